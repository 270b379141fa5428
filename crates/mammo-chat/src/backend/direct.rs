use async_trait::async_trait;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;

use mammo_ai::providers::openai::OpenAICompatProvider;
use mammo_ai::{ChatProvider, CompletionOptions, Model};

use super::{Generation, GenerationBackend, GenerationRequest};
use crate::breaker::CircuitBreaker;
use crate::error::{Error, Result};

/// Raw streamed completion behind the shared circuit breaker.
///
/// A dropped connection mid-reply ends the reply with a notice and counts as
/// a success; the missing tail is lost.
pub struct DirectBackend {
    provider: Arc<dyn ChatProvider>,
    breaker: Arc<CircuitBreaker>,
    system_prompt: String,
    options: CompletionOptions,
    timeout: Duration,
}

impl DirectBackend {
    pub fn new(
        provider: Arc<dyn ChatProvider>,
        breaker: Arc<CircuitBreaker>,
        system_prompt: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            breaker,
            system_prompt: system_prompt.into(),
            options: CompletionOptions::default(),
            timeout: Duration::from_secs(120),
        }
    }

    /// Build on an OpenAI-compatible endpoint
    pub fn connect(
        client: reqwest::Client,
        api_key: &str,
        model: Model,
        breaker: Arc<CircuitBreaker>,
        system_prompt: impl Into<String>,
    ) -> Result<Self> {
        let provider = OpenAICompatProvider::new(client, api_key, model)?;
        Ok(Self::new(Arc::new(provider), breaker, system_prompt))
    }

    pub fn with_options(mut self, options: CompletionOptions) -> Self {
        self.options = options;
        self
    }

    /// Bound on one whole generation, streaming included
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn stream_reply(&self, request: &GenerationRequest) -> Result<String> {
        let context = request.context(&self.system_prompt);
        let mut stream = self.provider.stream_text(&context, &self.options).await?;

        let mut reply = String::new();
        while let Some(fragment) = stream.next().await {
            reply.push_str(&fragment?);
        }
        Ok(reply)
    }
}

#[async_trait]
impl GenerationBackend for DirectBackend {
    fn name(&self) -> &str {
        "direct"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<Generation> {
        self.breaker.check()?;

        let result = match tokio::time::timeout(self.timeout, self.stream_reply(request)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(format!(
                "no complete reply within {}s",
                self.timeout.as_secs()
            ))),
        };

        match result {
            Ok(reply) => {
                self.breaker.record_success();
                Ok(Generation {
                    reply,
                    referenced_memory_ids: vec![],
                })
            }
            Err(e) => {
                if e.is_breaker_failure() {
                    self.breaker.record_failure();
                }
                Err(e)
            }
        }
    }
}
