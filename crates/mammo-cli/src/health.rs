//! Dependency probe for `--health`

use std::time::{Duration, Instant};

use mammo_ai::providers::openai::OpenAICompatProvider;
use mammo_chat::MemoryGateway;

/// Outcome of probing one dependency
#[derive(Debug)]
pub struct ProbeResult {
    pub name: &'static str,
    pub latency: Duration,
    pub outcome: Result<String, String>,
}

impl ProbeResult {
    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn line(&self) -> String {
        match &self.outcome {
            Ok(detail) => format!(
                "{:<8} ok    {:>5}ms  {}",
                self.name,
                self.latency.as_millis(),
                detail
            ),
            Err(e) => format!(
                "{:<8} FAIL  {:>5}ms  {}",
                self.name,
                self.latency.as_millis(),
                e
            ),
        }
    }
}

/// List models on the LLM endpoint
pub async fn probe_llm(provider: &OpenAICompatProvider) -> ProbeResult {
    let start = Instant::now();
    let outcome = match provider.list_models().await {
        Ok(models) => {
            let configured = &provider.model().id;
            if models.iter().any(|m| &m.id == configured) {
                Ok(format!("{} models, {} available", models.len(), configured))
            } else {
                Ok(format!(
                    "{} models, {} not listed",
                    models.len(),
                    configured
                ))
            }
        }
        Err(e) => Err(e.to_string()),
    };
    ProbeResult {
        name: "llm",
        latency: start.elapsed(),
        outcome,
    }
}

/// List scopes on the memory service
pub async fn probe_memory(gateway: &dyn MemoryGateway) -> ProbeResult {
    let start = Instant::now();
    let outcome = gateway
        .list_scopes()
        .await
        .map(|scopes| format!("{} scopes", scopes.len()))
        .map_err(|e| e.to_string());
    ProbeResult {
        name: "memory",
        latency: start.elapsed(),
        outcome,
    }
}
