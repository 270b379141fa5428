//! Session authentication capability checked before a turn starts

use crate::error::{Error, Result};

/// Whether the caller may chat
pub trait SessionAuth: Send + Sync {
    fn is_authenticated(&self) -> bool;

    fn ensure_authenticated(&self) -> Result<()> {
        if self.is_authenticated() {
            Ok(())
        } else {
            Err(Error::Authentication(
                "a memory service credential is required".into(),
            ))
        }
    }
}

/// Session backed by the memory-service API key; present means signed in
#[derive(Debug, Clone, Default)]
pub struct ApiKeySession {
    api_key: Option<String>,
}

impl ApiKeySession {
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            api_key: api_key.filter(|k| !k.trim().is_empty()),
        }
    }
}

impl SessionAuth for ApiKeySession {
    fn is_authenticated(&self) -> bool {
        self.api_key.is_some()
    }
}
