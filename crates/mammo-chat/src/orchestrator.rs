//! Turn orchestration: validation, backend selection and the ordered event stream

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use tokio_stream::Stream;

use crate::auth::SessionAuth;
use crate::backend::{Generation, GenerationBackend, GenerationRequest};
use crate::conversation::{
    ChatMessage, ConversationState, ConversationStatus, ExecutionStep, MessageRole, StepPayload,
};
use crate::error::{Error, Result};
use crate::events::ChatStreamEvent;

/// Largest accepted chunk size
pub const MAX_CHUNK_SIZE: usize = 4096;

/// Events of one turn. A failed turn ends with an `ERROR` event followed by
/// the error itself.
pub type TurnStream<'a> = Pin<Box<dyn Stream<Item = Result<ChatStreamEvent>> + Send + 'a>>;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Append the user's message to the transcript
    pub store_user_messages: bool,
    /// Characters per `MESSAGE_CHUNK`, clamped to `1..=MAX_CHUNK_SIZE`
    pub stream_chunk_size: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            store_user_messages: true,
            stream_chunk_size: 50,
        }
    }
}

/// Per-turn overrides
#[derive(Debug, Clone, Default)]
pub struct TurnOptions {
    pub chunk_size: Option<usize>,
    pub store_user_message: Option<bool>,
    /// Replaces the conversation's scopes for this turn only
    pub scope_ids: Option<Vec<String>>,
    /// Attached to the stored user message
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Coordinates one turn from validated input to `STREAM_END`.
///
/// The agent backend is tried first when present; any failure there falls
/// back to the direct backend exactly once.
pub struct StreamOrchestrator {
    agent: Option<Arc<dyn GenerationBackend>>,
    direct: Arc<dyn GenerationBackend>,
    auth: Arc<dyn SessionAuth>,
    config: OrchestratorConfig,
}

impl StreamOrchestrator {
    pub fn new(
        direct: Arc<dyn GenerationBackend>,
        auth: Arc<dyn SessionAuth>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            agent: None,
            direct,
            auth,
            config,
        }
    }

    pub fn with_agent(mut self, agent: Arc<dyn GenerationBackend>) -> Self {
        self.agent = Some(agent);
        self
    }

    pub fn has_agent(&self) -> bool {
        self.agent.is_some()
    }

    /// Start a turn.
    ///
    /// Authentication and input errors are returned here, before any event
    /// and without touching the conversation. Dropping the stream early
    /// leaves the conversation `failed`.
    pub fn stream_turn<'a>(
        &'a self,
        conversation: &'a mut ConversationState,
        user_text: &str,
        options: TurnOptions,
    ) -> Result<TurnStream<'a>> {
        self.auth.ensure_authenticated()?;
        if user_text.trim().is_empty() {
            return Err(Error::Validation("message is empty".into()));
        }

        let chunk_size = options
            .chunk_size
            .unwrap_or(self.config.stream_chunk_size)
            .clamp(1, MAX_CHUNK_SIZE);
        let store_user = options
            .store_user_message
            .unwrap_or(self.config.store_user_messages);
        let user_text = user_text.to_string();

        let stream = async_stream::stream! {
            let guard = TurnGuard { conversation };
            guard.conversation.set_status(ConversationStatus::Running);

            let request = GenerationRequest {
                history: guard.conversation.history(),
                user_text: user_text.clone(),
                scope_ids: options
                    .scope_ids
                    .unwrap_or_else(|| guard.conversation.memory_scope_ids().to_vec()),
                session_id: Some(guard.conversation.id().to_string()),
            };

            if store_user {
                guard.conversation.append_message(
                    ChatMessage::new(MessageRole::User, user_text).with_metadata(options.metadata),
                );
            }

            match self.generate(&request).await {
                Ok(generation) => {
                    let message_id = guard
                        .conversation
                        .append_message(ChatMessage::new(MessageRole::Assistant, ""));
                    yield Ok(ChatStreamEvent::MessageStart {
                        role: MessageRole::Assistant,
                        message_id: message_id.clone(),
                    });

                    for chunk in chunk_text(&generation.reply, chunk_size) {
                        guard.conversation.append_content(&message_id, chunk);
                        yield Ok(ChatStreamEvent::MessageChunk {
                            content: chunk.to_string(),
                        });
                    }

                    let content = guard
                        .conversation
                        .message_content(&message_id)
                        .map(str::to_string)
                        .unwrap_or_else(|| generation.reply.clone());
                    yield Ok(ChatStreamEvent::MessageEnd { content });

                    if !generation.referenced_memory_ids.is_empty() {
                        let payload = StepPayload::memory(&generation.referenced_memory_ids);
                        guard
                            .conversation
                            .append_execution_step(ExecutionStep::from_payload(payload.clone()));
                        yield Ok(ChatStreamEvent::Step(payload));
                    }

                    guard.conversation.set_status(ConversationStatus::Success);
                    yield Ok(ChatStreamEvent::StreamEnd);
                }
                Err(e) => {
                    tracing::error!(error = %e, "turn failed");
                    let message = e.user_message();
                    guard
                        .conversation
                        .append_message(ChatMessage::new(MessageRole::Error, message.clone()));
                    yield Ok(ChatStreamEvent::Error {
                        kind: e.kind(),
                        message,
                    });
                    guard.conversation.set_status(ConversationStatus::Failed);
                    yield Err(e);
                }
            }
        };

        Ok(Box::pin(stream))
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<Generation> {
        if let Some(agent) = &self.agent {
            tracing::info!(backend = agent.name(), "generating reply");
            match agent.generate(request).await {
                Ok(generation) => return Ok(generation),
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        fallback = self.direct.name(),
                        "agent backend failed, falling back"
                    );
                }
            }
        } else {
            tracing::info!(backend = self.direct.name(), "generating reply");
        }

        self.direct.generate(request).await
    }
}

/// Marks the turn failed if the stream is dropped while still running
struct TurnGuard<'a> {
    conversation: &'a mut ConversationState,
}

impl Drop for TurnGuard<'_> {
    fn drop(&mut self) {
        if self.conversation.status() == ConversationStatus::Running {
            tracing::warn!("turn abandoned before completion");
            self.conversation.set_status(ConversationStatus::Failed);
        }
    }
}

/// Split text into slices of `size` characters; the last may be shorter.
///
/// Slices on character boundaries, so concatenating the result gives back
/// `text` exactly. Empty text yields no slices.
pub fn chunk_text(text: &str, size: usize) -> Vec<&str> {
    let size = size.max(1);
    let mut chunks = Vec::with_capacity(text.len() / size + 1);
    let mut start = 0;
    let mut count = 0;

    for (idx, _) in text.char_indices() {
        if count == size {
            chunks.push(&text[start..idx]);
            start = idx;
            count = 0;
        }
        count += 1;
    }
    if start < text.len() {
        chunks.push(&text[start..]);
    }

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::ChatEventType;
    use async_trait::async_trait;
    use futures::StreamExt;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct AllowAll;

    impl SessionAuth for AllowAll {
        fn is_authenticated(&self) -> bool {
            true
        }
    }

    struct DenyAll;

    impl SessionAuth for DenyAll {
        fn is_authenticated(&self) -> bool {
            false
        }
    }

    /// A backend that returns a canned outcome and counts calls.
    struct ScriptedBackend {
        outcome: std::result::Result<Generation, fn() -> Error>,
        calls: AtomicUsize,
        requests: parking_lot::Mutex<Vec<GenerationRequest>>,
    }

    impl ScriptedBackend {
        fn reply(reply: &str, referenced: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                outcome: Ok(Generation {
                    reply: reply.to_string(),
                    referenced_memory_ids: referenced.iter().map(|s| s.to_string()).collect(),
                }),
                calls: AtomicUsize::new(0),
                requests: parking_lot::Mutex::new(vec![]),
            })
        }

        fn fail(make: fn() -> Error) -> Arc<Self> {
            Arc::new(Self {
                outcome: Err(make),
                calls: AtomicUsize::new(0),
                requests: parking_lot::Mutex::new(vec![]),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl GenerationBackend for ScriptedBackend {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn generate(&self, request: &GenerationRequest) -> Result<Generation> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.requests.lock().push(request.clone());
            match &self.outcome {
                Ok(generation) => Ok(generation.clone()),
                Err(make) => Err(make()),
            }
        }
    }

    fn orchestrator(direct: Arc<ScriptedBackend>) -> StreamOrchestrator {
        StreamOrchestrator::new(direct, Arc::new(AllowAll), OrchestratorConfig::default())
    }

    async fn run_turn(
        orchestrator: &StreamOrchestrator,
        conversation: &mut ConversationState,
        text: &str,
        options: TurnOptions,
    ) -> Vec<Result<ChatStreamEvent>> {
        let mut stream = orchestrator
            .stream_turn(conversation, text, options)
            .unwrap();
        let mut items = Vec::new();
        while let Some(item) = stream.next().await {
            items.push(item);
        }
        items
    }

    fn types(items: &[Result<ChatStreamEvent>]) -> Vec<ChatEventType> {
        items
            .iter()
            .filter_map(|i| i.as_ref().ok())
            .map(|e| e.event_type())
            .collect()
    }

    fn chunks(items: &[Result<ChatStreamEvent>]) -> Vec<String> {
        items
            .iter()
            .filter_map(|i| match i {
                Ok(ChatStreamEvent::MessageChunk { content }) => Some(content.clone()),
                _ => None,
            })
            .collect()
    }

    fn with_chunk_size(size: usize) -> TurnOptions {
        TurnOptions {
            chunk_size: Some(size),
            ..Default::default()
        }
    }

    #[test]
    fn test_chunk_text_hello_world() {
        assert_eq!(chunk_text("HelloWorld", 3), vec!["Hel", "loW", "orl", "d"]);
        assert!(chunk_text("", 50).is_empty());
        assert_eq!(chunk_text("abc", 0), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_chunk_text_fidelity() {
        let samples = [
            "a",
            "HelloWorld",
            "exactly six",
            "héllo wörld, ünïcode ✓ and emoji 🦀🦀 mixed in",
            "line one\nline two\n\n  trailing  ",
        ];
        for text in samples {
            let len = text.chars().count();
            for size in 1..=len + 2 {
                let parts = chunk_text(text, size);
                assert_eq!(parts.concat(), text, "size {}", size);
                assert_eq!(parts.len(), len.div_ceil(size), "size {}", size);
                let (last, full) = parts.split_last().unwrap();
                assert!(full.iter().all(|p| p.chars().count() == size));
                assert!(last.chars().count() <= size);
            }
        }
    }

    #[tokio::test]
    async fn test_hello_world_turn() {
        let direct = ScriptedBackend::reply("HelloWorld", &[]);
        let orchestrator = orchestrator(direct.clone());
        let mut conversation = ConversationState::new();

        let items = run_turn(&orchestrator, &mut conversation, "hi", with_chunk_size(3)).await;

        assert_eq!(chunks(&items), vec!["Hel", "loW", "orl", "d"]);
        assert!(matches!(
            items.iter().rev().nth(1),
            Some(Ok(ChatStreamEvent::MessageEnd { content })) if content == "HelloWorld"
        ));
        assert_eq!(
            types(&items),
            vec![
                ChatEventType::MessageStart,
                ChatEventType::MessageChunk,
                ChatEventType::MessageChunk,
                ChatEventType::MessageChunk,
                ChatEventType::MessageChunk,
                ChatEventType::MessageEnd,
                ChatEventType::StreamEnd,
            ]
        );
        assert_eq!(conversation.status(), ConversationStatus::Success);
        assert_eq!(conversation.messages().len(), 2);
        assert_eq!(
            conversation.last_assistant_message().unwrap().content,
            "HelloWorld"
        );
    }

    #[tokio::test]
    async fn test_empty_reply_emits_three_events() {
        let orchestrator = orchestrator(ScriptedBackend::reply("", &[]));
        let mut conversation = ConversationState::new();

        let items = run_turn(&orchestrator, &mut conversation, "hi", with_chunk_size(50)).await;

        assert_eq!(
            types(&items),
            vec![
                ChatEventType::MessageStart,
                ChatEventType::MessageEnd,
                ChatEventType::StreamEnd,
            ]
        );
        assert!(matches!(
            &items[1],
            Ok(ChatStreamEvent::MessageEnd { content }) if content.is_empty()
        ));
        assert_eq!(conversation.status(), ConversationStatus::Success);
    }

    #[tokio::test]
    async fn test_referenced_memories_emit_step() {
        let orchestrator =
            orchestrator(ScriptedBackend::reply("You like tea.", &["ep-1", "ep-2"]));
        let mut conversation = ConversationState::new();

        let items = run_turn(&orchestrator, &mut conversation, "hi", TurnOptions::default()).await;

        let types = types(&items);
        assert_eq!(
            &types[types.len() - 3..],
            &[
                ChatEventType::MessageEnd,
                ChatEventType::Step,
                ChatEventType::StreamEnd
            ]
        );
        let step = &conversation.execution_history()[0];
        assert_eq!(step.skill_name, "memory");
        assert_eq!(step.observation, r#"{"referenced":["ep-1","ep-2"]}"#);
        assert!(items.iter().any(|i| matches!(
            i,
            Ok(ChatStreamEvent::Step(payload)) if *payload == step.data
        )));
    }

    #[tokio::test]
    async fn test_user_message_persistence_toggle() {
        let orchestrator = orchestrator(ScriptedBackend::reply("ok", &[]));
        let mut conversation = ConversationState::new();

        run_turn(&orchestrator, &mut conversation, "first", TurnOptions::default()).await;
        assert_eq!(conversation.messages().len(), 2);
        assert_eq!(conversation.messages()[0].role, MessageRole::User);

        let options = TurnOptions {
            store_user_message: Some(false),
            ..Default::default()
        };
        run_turn(&orchestrator, &mut conversation, "second", options).await;
        assert_eq!(conversation.messages().len(), 3);
        assert_eq!(conversation.messages()[2].role, MessageRole::Assistant);
        assert_eq!(conversation.status(), ConversationStatus::Success);
    }

    #[tokio::test]
    async fn test_whitespace_message_rejected_without_mutation() {
        let direct = ScriptedBackend::reply("never", &[]);
        let orchestrator = orchestrator(direct.clone());
        let mut conversation = ConversationState::new();

        let result = orchestrator
            .stream_turn(&mut conversation, "  \n\t ", TurnOptions::default())
            .err();

        assert!(matches!(result, Some(Error::Validation(_))));
        assert_eq!(conversation.status(), ConversationStatus::Idle);
        assert!(conversation.messages().is_empty());
        assert_eq!(direct.calls(), 0);
    }

    #[tokio::test]
    async fn test_unauthenticated_caller_rejected() {
        let direct = ScriptedBackend::reply("never", &[]);
        let orchestrator = StreamOrchestrator::new(
            direct.clone(),
            Arc::new(DenyAll),
            OrchestratorConfig::default(),
        );
        let mut conversation = ConversationState::new();

        let result = orchestrator
            .stream_turn(&mut conversation, "hello", TurnOptions::default())
            .err();

        assert!(matches!(result, Some(Error::Authentication(_))));
        assert!(conversation.messages().is_empty());
        assert_eq!(direct.calls(), 0);
    }

    #[tokio::test]
    async fn test_agent_failure_falls_back_once() {
        let agent = ScriptedBackend::fail(|| Error::Generation("model exploded".into()));
        let direct = ScriptedBackend::reply("fallback reply", &[]);
        let orchestrator = orchestrator(direct.clone()).with_agent(agent.clone());
        let mut conversation = ConversationState::new();

        let items = run_turn(&orchestrator, &mut conversation, "hi", TurnOptions::default()).await;

        assert_eq!(agent.calls(), 1);
        assert_eq!(direct.calls(), 1);
        assert!(items.iter().all(|i| i.is_ok()));
        assert!(!types(&items).contains(&ChatEventType::Error));
        assert_eq!(chunks(&items).concat(), "fallback reply");
        assert_eq!(conversation.status(), ConversationStatus::Success);
    }

    #[tokio::test]
    async fn test_agent_success_skips_direct() {
        let agent = ScriptedBackend::reply("from agent", &["ep-1"]);
        let direct = ScriptedBackend::reply("unused", &[]);
        let orchestrator = orchestrator(direct.clone()).with_agent(agent.clone());
        let mut conversation = ConversationState::new();

        let items = run_turn(&orchestrator, &mut conversation, "hi", TurnOptions::default()).await;

        assert_eq!(direct.calls(), 0);
        assert_eq!(chunks(&items).concat(), "from agent");
    }

    #[tokio::test]
    async fn test_backend_failure_ends_with_error() {
        let agent = ScriptedBackend::fail(|| Error::Generation("no".into()));
        let direct = ScriptedBackend::fail(|| Error::CircuitOpen {
            retry_after: std::time::Duration::from_secs(30),
        });
        let orchestrator = orchestrator(direct.clone()).with_agent(agent);
        let mut conversation = ConversationState::new();

        let items = run_turn(&orchestrator, &mut conversation, "hi", TurnOptions::default()).await;

        assert_eq!(items.len(), 2);
        match &items[0] {
            Ok(ChatStreamEvent::Error { kind, message }) => {
                assert_eq!(*kind, crate::error::ErrorKind::Unavailable);
                assert!(message.contains("temporarily unavailable"));
            }
            other => panic!("expected ERROR event, got {:?}", other),
        }
        assert!(matches!(items[1], Err(Error::CircuitOpen { .. })));
        assert_eq!(conversation.status(), ConversationStatus::Failed);
        let roles: Vec<MessageRole> = conversation.messages().iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![MessageRole::User, MessageRole::Error]);
    }

    #[tokio::test]
    async fn test_dropped_stream_marks_failed() {
        let orchestrator = orchestrator(ScriptedBackend::reply("HelloWorld", &[]));
        let mut conversation = ConversationState::new();

        {
            let mut stream = orchestrator
                .stream_turn(&mut conversation, "hi", with_chunk_size(2))
                .unwrap();
            let first = stream.next().await.unwrap().unwrap();
            assert_eq!(first.event_type(), ChatEventType::MessageStart);
        }

        assert_eq!(conversation.status(), ConversationStatus::Failed);
    }

    /// Never finishes generating; records that it was entered and dropped.
    struct StalledBackend {
        entered: AtomicUsize,
        released: Arc<AtomicUsize>,
    }

    struct ReleaseOnDrop(Arc<AtomicUsize>);

    impl Drop for ReleaseOnDrop {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl GenerationBackend for StalledBackend {
        fn name(&self) -> &str {
            "stalled"
        }

        async fn generate(&self, _request: &GenerationRequest) -> Result<Generation> {
            self.entered.fetch_add(1, Ordering::SeqCst);
            let _held = ReleaseOnDrop(self.released.clone());
            futures::future::pending::<()>().await;
            unreachable!()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_while_generating_marks_failed() {
        let released = Arc::new(AtomicUsize::new(0));
        let backend = Arc::new(StalledBackend {
            entered: AtomicUsize::new(0),
            released: released.clone(),
        });
        let orchestrator = StreamOrchestrator::new(
            backend.clone(),
            Arc::new(AllowAll),
            OrchestratorConfig::default(),
        );
        let mut conversation = ConversationState::new();

        {
            let mut stream = orchestrator
                .stream_turn(&mut conversation, "hi", TurnOptions::default())
                .unwrap();
            let polled =
                tokio::time::timeout(std::time::Duration::from_secs(1), stream.next()).await;
            assert!(polled.is_err());
            assert_eq!(backend.entered.load(Ordering::SeqCst), 1);
            assert_eq!(released.load(Ordering::SeqCst), 0);
        }

        assert_eq!(released.load(Ordering::SeqCst), 1);
        assert_eq!(conversation.status(), ConversationStatus::Failed);
        let roles: Vec<MessageRole> = conversation.messages().iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![MessageRole::User]);
    }

    #[tokio::test]
    async fn test_history_and_scopes_forwarded() {
        let direct = ScriptedBackend::reply("ok", &[]);
        let orchestrator = orchestrator(direct.clone());
        let mut conversation = ConversationState::new();
        conversation.set_memory_scope_ids(vec!["work".to_string()]);

        run_turn(&orchestrator, &mut conversation, "first", TurnOptions::default()).await;
        let options = TurnOptions {
            scope_ids: Some(vec!["home".to_string()]),
            ..Default::default()
        };
        run_turn(&orchestrator, &mut conversation, "second", options).await;

        let requests = direct.requests.lock();
        assert!(requests[0].history.is_empty());
        assert_eq!(requests[0].scope_ids, vec!["work"]);
        assert_eq!(requests[1].history.len(), 2);
        assert_eq!(requests[1].user_text, "second");
        assert_eq!(requests[1].scope_ids, vec!["home"]);
        assert_eq!(requests[1].session_id.as_deref(), Some(conversation.id()));
    }

    #[tokio::test]
    async fn test_concurrent_conversations_are_independent() {
        let orchestrator = orchestrator(ScriptedBackend::reply("abcdef", &[]));
        let mut first = ConversationState::new();
        let mut second = ConversationState::new();

        let (a, b) = tokio::join!(
            run_turn(&orchestrator, &mut first, "one", with_chunk_size(2)),
            run_turn(&orchestrator, &mut second, "two", with_chunk_size(4)),
        );

        assert_eq!(chunks(&a), vec!["ab", "cd", "ef"]);
        assert_eq!(chunks(&b), vec!["abcd", "ef"]);
        assert_eq!(first.status(), ConversationStatus::Success);
        assert_eq!(second.status(), ConversationStatus::Success);
    }
}
