//! Error types for mammo-chat

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Result type alias using mammo-chat Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the chat core
#[derive(Error, Debug)]
pub enum Error {
    /// Missing or invalid credentials, prompts or settings
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The user's input was rejected
    #[error("Invalid input: {0}")]
    Validation(String),

    /// The caller has no valid session
    #[error("Authentication required: {0}")]
    Authentication(String),

    /// The agent path failed (model, tool or output error)
    #[error("Generation failed: {0}")]
    Generation(String),

    /// A connect, read or turn deadline was exceeded
    #[error("Request timed out: {0}")]
    Timeout(String),

    /// The LLM endpoint could not be reached or dropped the request
    #[error("Connection failed: {0}")]
    Connection(String),

    /// The LLM endpoint answered with a non-success status
    #[error("Upstream returned status {status}: {message}")]
    UpstreamStatus { status: u16, message: String },

    /// The circuit breaker rejected the call without a network attempt
    #[error("Service temporarily unavailable, retry in {}s", .retry_after.as_secs().max(1))]
    CircuitOpen { retry_after: Duration },

    /// The memory gateway failed
    #[error("Memory service error: {0}")]
    Memory(String),
}

/// Coarse error classes a front end can act on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Configuration,
    Validation,
    Authentication,
    Generation,
    /// Worth retrying later
    Transient,
    /// Circuit open
    Unavailable,
    Memory,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Configuration(_) => ErrorKind::Configuration,
            Error::Validation(_) => ErrorKind::Validation,
            Error::Authentication(_) => ErrorKind::Authentication,
            Error::Generation(_) => ErrorKind::Generation,
            Error::UpstreamStatus { status, .. } if is_credential_status(*status) => {
                ErrorKind::Configuration
            }
            Error::Timeout(_) | Error::Connection(_) | Error::UpstreamStatus { .. } => {
                ErrorKind::Transient
            }
            Error::CircuitOpen { .. } => ErrorKind::Unavailable,
            Error::Memory(_) => ErrorKind::Memory,
        }
    }

    /// Whether the circuit breaker should count this as a failure
    pub fn is_breaker_failure(&self) -> bool {
        matches!(
            self,
            Error::Timeout(_) | Error::Connection(_) | Error::UpstreamStatus { .. }
        )
    }

    /// A sentence for the person chatting, saying what to do next
    pub fn user_message(&self) -> String {
        match self {
            Error::Configuration(detail) => format!(
                "The assistant is not configured ({}). Set the missing credentials and try again.",
                detail
            ),
            Error::Validation(detail) => {
                format!("Your message was rejected: {}. Please edit it and resend.", detail)
            }
            Error::Authentication(_) => {
                "You are not signed in. Provide a memory API key to start chatting.".to_string()
            }
            Error::Generation(_) => {
                "The assistant could not produce a reply. Please try again.".to_string()
            }
            Error::Timeout(_) => {
                "The language model took too long to respond. Please retry in a moment."
                    .to_string()
            }
            Error::Connection(_) => {
                "Could not reach the language model. Check your connection and retry.".to_string()
            }
            Error::UpstreamStatus { status, .. } if is_credential_status(*status) => format!(
                "The language model rejected the configured API key (status {}). Check your credentials.",
                status
            ),
            Error::UpstreamStatus { status, .. } => format!(
                "The language model service returned an error (status {}). Please retry later.",
                status
            ),
            Error::CircuitOpen { retry_after } => format!(
                "The assistant is temporarily unavailable after repeated failures. Retry in {}s.",
                retry_after.as_secs().max(1)
            ),
            Error::Memory(_) => {
                "The memory service is unavailable right now. Please retry later.".to_string()
            }
        }
    }
}

fn is_credential_status(status: u16) -> bool {
    status == 401 || status == 403
}

impl From<mammo_ai::Error> for Error {
    fn from(e: mammo_ai::Error) -> Self {
        use mammo_ai::Error as Ai;

        match e {
            Ai::Timeout(msg) => Error::Timeout(msg),
            Ai::Connection(msg) => Error::Connection(msg),
            Ai::UpstreamStatus { status, message } => Error::UpstreamStatus { status, message },
            Ai::Http(e) => Error::Connection(e.to_string()),
            Ai::Sse(msg) => Error::Connection(msg),
            Ai::InvalidApiKey => Error::Configuration("missing or invalid LLM API key".into()),
            Ai::InvalidConfig(msg) => Error::Configuration(msg),
            Ai::Api {
                error_type,
                message,
            } => Error::Generation(format!("{} ({})", message, error_type)),
            Ai::Json(e) => Error::Generation(format!("malformed model response: {}", e)),
            Ai::UnexpectedResponse(msg) => Error::Generation(msg),
        }
    }
}
