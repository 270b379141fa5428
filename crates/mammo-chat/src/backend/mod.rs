//! Generation backends: the tool-calling agent path and the direct streaming path

mod agent;
mod direct;

pub use agent::{AgentBackend, AgentConfig};
pub use direct::DirectBackend;

use async_trait::async_trait;

use crate::error::Result;

/// Everything a backend needs to produce one reply
#[derive(Debug, Clone, Default)]
pub struct GenerationRequest {
    /// Prior user/assistant turns, oldest first
    pub history: Vec<mammo_ai::Message>,
    pub user_text: String,
    /// Memory scopes the turn may search; empty means unscoped
    pub scope_ids: Vec<String>,
    /// Conversation id, forwarded to memory ingestion
    pub session_id: Option<String>,
}

impl GenerationRequest {
    pub(crate) fn context(&self, system_prompt: &str) -> mammo_ai::Context {
        let mut context = mammo_ai::Context::with_system(system_prompt);
        context.messages = self.history.clone();
        context.push(mammo_ai::Message::user(self.user_text.clone()));
        context
    }
}

/// A finished reply
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Generation {
    pub reply: String,
    /// Memory episodes consulted, first-seen order, no duplicates
    pub referenced_memory_ids: Vec<String>,
}

/// A strategy for turning a user message into a reply
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &str;

    async fn generate(&self, request: &GenerationRequest) -> Result<Generation>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_appends_user_text_after_history() {
        let request = GenerationRequest {
            history: vec![
                mammo_ai::Message::user("earlier"),
                mammo_ai::Message::assistant("reply"),
            ],
            user_text: "now".into(),
            ..Default::default()
        };
        let context = request.context("sys");
        assert_eq!(context.system_prompt.as_deref(), Some("sys"));
        assert_eq!(context.messages.len(), 3);
        assert_eq!(context.messages[2].text(), "now");
        assert!(context.tools.is_empty());
    }
}
