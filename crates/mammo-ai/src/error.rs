//! Error types for mammo-ai

use thiserror::Error;

/// Result type alias using mammo-ai Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur when talking to a chat-completions endpoint
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP request failed for a reason other than connect/timeout
    #[error("HTTP error: {0}")]
    Http(#[source] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// API returned an error body with a success status
    #[error("API error: {message} (type: {error_type})")]
    Api { error_type: String, message: String },

    /// Request or read deadline exceeded
    #[error("Request timed out: {0}")]
    Timeout(String),

    /// Could not reach the endpoint
    #[error("Connection failed: {0}")]
    Connection(String),

    /// Endpoint answered with a non-success HTTP status
    #[error("Upstream returned status {status}: {message}")]
    UpstreamStatus { status: u16, message: String },

    /// Server-sent events error
    #[error("SSE error: {0}")]
    Sse(String),

    /// Unexpected response format
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    /// Invalid API key
    #[error("Invalid or missing API key")]
    InvalidApiKey,

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Error::Timeout(e.to_string())
        } else if e.is_connect() {
            Error::Connection(e.to_string())
        } else if let Some(status) = e.status() {
            Error::UpstreamStatus {
                status: status.as_u16(),
                message: e.to_string(),
            }
        } else {
            Error::Http(e)
        }
    }
}

impl Error {
    /// Create an API error from type and message
    pub fn api(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Api {
            error_type: error_type.into(),
            message: message.into(),
        }
    }

    /// Create an upstream status error
    pub fn status(status: u16, message: impl Into<String>) -> Self {
        Self::UpstreamStatus {
            status,
            message: message.into(),
        }
    }

    /// Check if this error is a transient network/upstream failure
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Timeout(_) | Error::Connection(_) | Error::Http(_) | Error::Sse(_) => true,
            Error::UpstreamStatus { status, .. } => *status == 429 || *status >= 500,
            Error::Api {
                error_type,
                message,
            } => {
                let et = error_type.to_lowercase();
                let msg = message.to_lowercase();
                et.contains("rate_limit")
                    || et.contains("overloaded")
                    || msg.contains("rate limit")
                    || msg.contains("overloaded")
                    || msg.contains("too many requests")
            }
            _ => false,
        }
    }
}
