//! Failure-count circuit breaker for the direct streaming path.
//!
//! One breaker is shared (via `Arc`) by every conversation that uses the
//! direct path, so a failure in one conversation counts for all of them.
//! There is no explicit half-open state: once the open window has passed the
//! breaker closes again and the next call goes through.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

use crate::error::{Error, Result};

/// Breaker thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Failures (net of decay) that open the breaker
    pub failure_threshold: u32,
    /// How long the breaker stays open
    pub open_duration_secs: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            open_duration_secs: 60,
        }
    }
}

/// Breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls pass through; counts failures toward the threshold.
    Closed { failures: u32 },
    /// Calls are rejected until `until`.
    Open { until: Instant },
}

#[derive(Debug)]
pub struct CircuitBreaker {
    state: Mutex<CircuitState>,
    failure_threshold: u32,
    open_duration: Duration,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(&BreakerConfig::default())
    }
}

impl CircuitBreaker {
    pub fn new(config: &BreakerConfig) -> Self {
        Self {
            state: Mutex::new(CircuitState::Closed { failures: 0 }),
            failure_threshold: config.failure_threshold.max(1),
            open_duration: Duration::from_secs(config.open_duration_secs),
        }
    }

    pub fn state(&self) -> CircuitState {
        *self.state.lock()
    }

    /// Gate a call. Closes an expired open window first.
    pub fn check(&self) -> Result<()> {
        let mut state = self.state.lock();
        if let CircuitState::Open { until } = *state {
            let now = Instant::now();
            if now > until {
                tracing::info!("circuit breaker closed after open window elapsed");
                *state = CircuitState::Closed { failures: 0 };
            } else {
                return Err(Error::CircuitOpen {
                    retry_after: until - now,
                });
            }
        }
        Ok(())
    }

    pub fn record_failure(&self) {
        let mut state = self.state.lock();
        if let CircuitState::Closed { failures } = *state {
            let failures = failures + 1;
            if failures >= self.failure_threshold {
                tracing::warn!(
                    failures,
                    open_secs = self.open_duration.as_secs(),
                    "circuit breaker opened"
                );
                *state = CircuitState::Open {
                    until: Instant::now() + self.open_duration,
                };
            } else {
                *state = CircuitState::Closed { failures };
            }
        }
    }

    /// Decay the failure count by one
    pub fn record_success(&self) {
        let mut state = self.state.lock();
        if let CircuitState::Closed { failures } = *state {
            *state = CircuitState::Closed {
                failures: failures.saturating_sub(1),
            };
        }
    }
}
