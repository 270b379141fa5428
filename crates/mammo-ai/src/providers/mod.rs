//! Chat-completion provider implementations

pub mod openai;

use crate::{Completion, CompletionOptions, Context, Error, Result, TextStream};
use async_trait::async_trait;

/// Trait for chat-completion providers
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Run one request/response round trip; tools in the context may be called.
    async fn complete(&self, context: &Context, options: &CompletionOptions)
    -> Result<Completion>;

    /// Start a streamed completion.
    ///
    /// Resolves once the endpoint has accepted the request, so connect,
    /// timeout and status failures surface here rather than inside the stream.
    async fn stream_text(
        &self,
        context: &Context,
        options: &CompletionOptions,
    ) -> Result<TextStream>;
}

/// Get an API key from a provided value or the environment
pub fn get_api_key(provided: Option<&str>, env_var: &str) -> Result<String> {
    if let Some(key) = provided.filter(|k| !k.trim().is_empty()) {
        return Ok(key.to_string());
    }

    std::env::var(env_var)
        .ok()
        .filter(|k| !k.trim().is_empty())
        .ok_or(Error::InvalidApiKey)
}
