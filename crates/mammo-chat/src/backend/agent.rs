use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use mammo_ai::providers::openai::OpenAICompatProvider;
use mammo_ai::{ChatProvider, CompletionOptions, Message, Model};

use super::{Generation, GenerationBackend, GenerationRequest};
use crate::error::{Error, Result};
use crate::memory::{MemoryGateway, MemoryIngestTool, MemorySearchTool};
use crate::tool::{BoxedTool, ToolContext, ToolSet};

/// Placeholder in the system prompt replaced by the tool list
const TOOLS_PLACEHOLDER: &str = "{tools}";

/// Agent path settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// May contain `{tools}`, replaced by a list of the registered tools
    pub system_prompt: String,
    /// Model/tool exchanges before giving up
    pub max_tool_rounds: usize,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    /// Bound on one whole generation
    pub timeout_secs: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            system_prompt: String::new(),
            max_tool_rounds: 5,
            temperature: Some(0.7),
            max_tokens: None,
            timeout_secs: 120,
        }
    }
}

/// Tool-calling generation over a non-streamed completion endpoint.
///
/// Every failure is reported as [`Error::Generation`]; the caller decides
/// whether to fall back. No retries happen here.
pub struct AgentBackend {
    provider: Arc<dyn ChatProvider>,
    tools: ToolSet,
    config: AgentConfig,
}

impl AgentBackend {
    /// Build on an OpenAI-compatible endpoint, validating the credential and prompt
    pub fn connect(
        client: reqwest::Client,
        api_key: &str,
        model: Model,
        config: AgentConfig,
    ) -> Result<Self> {
        let provider = OpenAICompatProvider::new(client, api_key, model)?;
        Self::new(Arc::new(provider), config)
    }

    pub fn new(provider: Arc<dyn ChatProvider>, config: AgentConfig) -> Result<Self> {
        if config.system_prompt.trim().is_empty() {
            return Err(Error::Configuration(
                "the agent requires a system prompt".into(),
            ));
        }
        Ok(Self {
            provider,
            tools: ToolSet::new(),
            config,
        })
    }

    pub fn with_tool(mut self, tool: BoxedTool) -> Self {
        self.tools.add(tool);
        self
    }

    /// Register `memory_search` and `memory_ingest` backed by the gateway
    pub fn with_memory(self, gateway: Arc<dyn MemoryGateway>) -> Self {
        self.with_tool(Arc::new(MemorySearchTool::new(gateway.clone())))
            .with_tool(Arc::new(MemoryIngestTool::new(gateway)))
    }

    fn system_prompt(&self) -> String {
        if !self.config.system_prompt.contains(TOOLS_PLACEHOLDER) {
            return self.config.system_prompt.clone();
        }
        let listing: String = self
            .tools
            .definitions()
            .iter()
            .map(|t| format!("- `{}`: {}\n", t.name, t.description))
            .collect();
        self.config.system_prompt.replace(TOOLS_PLACEHOLDER, &listing)
    }

    async fn run(&self, request: &GenerationRequest) -> Result<Generation> {
        let mut context = request.context(&self.system_prompt());
        context.tools = self.tools.definitions();

        let options = CompletionOptions {
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
        };
        let tool_context = ToolContext {
            scope_ids: request.scope_ids.clone(),
            session_id: request.session_id.clone(),
        };
        let mut referenced: Vec<String> = Vec::new();

        for round in 0..=self.config.max_tool_rounds {
            let completion = self
                .provider
                .complete(&context, &options)
                .await
                .map_err(|e| Error::Generation(format!("model call failed: {}", e)))?;

            let calls = completion.message.tool_calls().to_vec();
            if calls.is_empty() {
                return Ok(Generation {
                    reply: completion.message.text().to_string(),
                    referenced_memory_ids: referenced,
                });
            }
            if round == self.config.max_tool_rounds {
                break;
            }

            context.push(completion.message);
            for call in &calls {
                let result = self
                    .tools
                    .execute(call, &tool_context)
                    .await
                    .map_err(|e| Error::Generation(format!("tool {} failed: {}", call.name, e)))?;

                if let Some(ids) = result
                    .details
                    .as_ref()
                    .and_then(|d| d.get("episode_ids"))
                    .and_then(|ids| ids.as_array())
                {
                    for id in ids.iter().filter_map(|id| id.as_str()) {
                        if !referenced.iter().any(|seen| seen == id) {
                            referenced.push(id.to_string());
                        }
                    }
                }

                context.push(Message::tool_result(call.id.clone(), result.content));
            }
        }

        Err(Error::Generation(format!(
            "no final answer after {} tool rounds",
            self.config.max_tool_rounds
        )))
    }
}

#[async_trait]
impl GenerationBackend for AgentBackend {
    fn name(&self) -> &str {
        "agent"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<Generation> {
        let limit = Duration::from_secs(self.config.timeout_secs);
        match tokio::time::timeout(limit, self.run(request)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Generation(format!(
                "no answer within {}s",
                limit.as_secs()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{Episode, MemoryScope, MemorySearchResult};
    use mammo_ai::{Completion, Context, TextStream, ToolCall, Usage};
    use parking_lot::Mutex;

    /// A mock provider that returns canned completions in order.
    struct MockProvider {
        responses: Mutex<Vec<mammo_ai::Result<Message>>>,
        contexts: Mutex<Vec<Context>>,
    }

    impl MockProvider {
        fn new(responses: Vec<mammo_ai::Result<Message>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses),
                contexts: Mutex::new(vec![]),
            })
        }
    }

    #[async_trait]
    impl ChatProvider for MockProvider {
        async fn complete(
            &self,
            context: &Context,
            _options: &CompletionOptions,
        ) -> mammo_ai::Result<Completion> {
            self.contexts.lock().push(context.clone());
            let next = {
                let mut responses = self.responses.lock();
                if responses.is_empty() {
                    Ok(Message::assistant("done"))
                } else {
                    responses.remove(0)
                }
            };
            next.map(|message| Completion {
                message,
                finish_reason: None,
                usage: Usage::default(),
            })
        }

        async fn stream_text(
            &self,
            _context: &Context,
            _options: &CompletionOptions,
        ) -> mammo_ai::Result<TextStream> {
            Err(mammo_ai::Error::InvalidConfig("not used".into()))
        }
    }

    struct MockGateway {
        fail: bool,
    }

    #[async_trait]
    impl MemoryGateway for MockGateway {
        async fn search(
            &self,
            _query: &str,
            _scope_ids: Option<&[String]>,
            _limit: usize,
            _include_invalidated: bool,
        ) -> Result<MemorySearchResult> {
            if self.fail {
                return Err(Error::Memory("gateway down".into()));
            }
            let episode = |id: &str| Episode {
                id: id.into(),
                body: format!("body of {}", id),
                scope_id: None,
                created_at: None,
            };
            Ok(MemorySearchResult {
                episodes: vec![episode("ep-2"), episode("ep-1")],
                total: 2,
            })
        }

        async fn ingest(
            &self,
            _note: &str,
            _scope_id: Option<&str>,
            _session_id: Option<&str>,
            _source: Option<&str>,
        ) -> Result<String> {
            Ok("ep-new".into())
        }

        async fn list_scopes(&self) -> Result<Vec<MemoryScope>> {
            Ok(vec![])
        }
    }

    fn tool_call(id: &str, name: &str, arguments: serde_json::Value) -> Message {
        Message::Assistant {
            content: None,
            tool_calls: vec![ToolCall {
                id: id.into(),
                name: name.into(),
                arguments,
            }],
        }
    }

    fn config() -> AgentConfig {
        AgentConfig {
            system_prompt: "You have tools:\n{tools}".into(),
            ..Default::default()
        }
    }

    fn request() -> GenerationRequest {
        GenerationRequest {
            user_text: "what do I drink?".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_blank_system_prompt_rejected() {
        let provider = MockProvider::new(vec![]);
        let result = AgentBackend::new(provider, AgentConfig::default());
        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[test]
    fn test_blank_api_key_rejected() {
        let result = AgentBackend::connect(
            reqwest::Client::new(),
            "",
            Model::new("deepseek-chat", "http://localhost"),
            config(),
        );
        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[tokio::test]
    async fn test_plain_reply_without_tools() {
        let provider = MockProvider::new(vec![Ok(Message::assistant("Hi!"))]);
        let backend = AgentBackend::new(provider.clone(), config()).unwrap();

        let generation = backend.generate(&request()).await.unwrap();
        assert_eq!(generation.reply, "Hi!");
        assert!(generation.referenced_memory_ids.is_empty());

        let contexts = provider.contexts.lock();
        assert_eq!(contexts[0].system_prompt.as_deref(), Some("You have tools:\n"));
    }

    #[tokio::test]
    async fn test_search_results_are_referenced_once() {
        let provider = MockProvider::new(vec![
            Ok(tool_call("c1", "memory_search", serde_json::json!({"query": "drink"}))),
            Ok(tool_call("c2", "memory_search", serde_json::json!({"query": "tea"}))),
            Ok(Message::assistant("You drink tea.")),
        ]);
        let backend = AgentBackend::new(provider.clone(), config())
            .unwrap()
            .with_memory(Arc::new(MockGateway { fail: false }));

        let generation = backend.generate(&request()).await.unwrap();
        assert_eq!(generation.reply, "You drink tea.");
        assert_eq!(generation.referenced_memory_ids, vec!["ep-2", "ep-1"]);

        let contexts = provider.contexts.lock();
        assert!(contexts[0].system_prompt.as_deref().unwrap().contains("memory_search"));
        assert_eq!(contexts[0].tools.len(), 2);
        let last = contexts.last().unwrap();
        assert_eq!(last.messages.last().unwrap().role(), "tool");
    }

    #[tokio::test]
    async fn test_invalid_arguments_go_back_to_model() {
        let provider = MockProvider::new(vec![
            Ok(tool_call("c1", "memory_search", serde_json::json!({"limit": 3}))),
            Ok(Message::assistant("Sorry, let me answer directly.")),
        ]);
        let backend = AgentBackend::new(provider.clone(), config())
            .unwrap()
            .with_memory(Arc::new(MockGateway { fail: false }));

        let generation = backend.generate(&request()).await.unwrap();
        assert_eq!(generation.reply, "Sorry, let me answer directly.");
        assert!(generation.referenced_memory_ids.is_empty());

        let contexts = provider.contexts.lock();
        let tool_message = contexts[1].messages.last().unwrap();
        assert!(tool_message.text().contains("validation failed"));
    }

    #[tokio::test]
    async fn test_gateway_failure_is_generation_error() {
        let provider = MockProvider::new(vec![Ok(tool_call(
            "c1",
            "memory_search",
            serde_json::json!({"query": "x"}),
        ))]);
        let backend = AgentBackend::new(provider, config())
            .unwrap()
            .with_memory(Arc::new(MockGateway { fail: true }));

        let err = backend.generate(&request()).await.unwrap_err();
        assert!(matches!(err, Error::Generation(_)));
    }

    #[tokio::test]
    async fn test_model_failure_is_generation_error() {
        let provider = MockProvider::new(vec![Err(mammo_ai::Error::status(500, "boom"))]);
        let backend = AgentBackend::new(provider, config()).unwrap();
        let err = backend.generate(&request()).await.unwrap_err();
        assert!(matches!(err, Error::Generation(_)));
    }

    #[tokio::test]
    async fn test_tool_round_limit() {
        let looping: Vec<_> = (0..10)
            .map(|i| {
                Ok(tool_call(
                    &format!("c{}", i),
                    "memory_ingest",
                    serde_json::json!({"note": "again"}),
                ))
            })
            .collect();
        let provider = MockProvider::new(looping);
        let backend = AgentBackend::new(
            provider.clone(),
            AgentConfig {
                max_tool_rounds: 2,
                ..config()
            },
        )
        .unwrap()
        .with_memory(Arc::new(MockGateway { fail: false }));

        let err = backend.generate(&request()).await.unwrap_err();
        assert!(matches!(err, Error::Generation(_)));
        assert_eq!(provider.contexts.lock().len(), 3);
    }

    #[tokio::test]
    async fn test_history_precedes_user_text() {
        let provider = MockProvider::new(vec![Ok(Message::assistant("ok"))]);
        let backend = AgentBackend::new(provider.clone(), config()).unwrap();
        let request = GenerationRequest {
            history: vec![Message::user("first"), Message::assistant("noted")],
            user_text: "second".into(),
            ..Default::default()
        };

        backend.generate(&request).await.unwrap();
        let contexts = provider.contexts.lock();
        let texts: Vec<&str> = contexts[0].messages.iter().map(|m| m.text()).collect();
        assert_eq!(texts, vec!["first", "noted", "second"]);
    }
}
