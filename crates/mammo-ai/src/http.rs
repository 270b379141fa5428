//! Shared HTTP client construction

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Error, Result};

/// Timeouts and pooling for the process-wide HTTP client.
///
/// reqwest has no separate write or pool-acquire deadline; both are bounded
/// by `request_timeout_secs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// TCP/TLS connect deadline
    pub connect_timeout_secs: u64,
    /// Maximum gap between two reads of a response body
    pub read_timeout_secs: u64,
    /// Whole-request deadline, including streaming the body
    pub request_timeout_secs: u64,
    /// How long an idle pooled connection is kept
    pub pool_idle_timeout_secs: u64,
    /// Idle connections kept per host
    pub pool_max_idle_per_host: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 10,
            read_timeout_secs: 60,
            request_timeout_secs: 120,
            pool_idle_timeout_secs: 90,
            pool_max_idle_per_host: 8,
        }
    }
}

impl HttpConfig {
    /// Build a client; clone it to share the connection pool.
    pub fn build_client(&self) -> Result<reqwest::Client> {
        reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(self.connect_timeout_secs))
            .read_timeout(Duration::from_secs(self.read_timeout_secs))
            .timeout(Duration::from_secs(self.request_timeout_secs))
            .pool_idle_timeout(Duration::from_secs(self.pool_idle_timeout_secs))
            .pool_max_idle_per_host(self.pool_max_idle_per_host)
            .build()
            .map_err(|e| Error::InvalidConfig(format!("failed to build HTTP client: {}", e)))
    }
}
