//! mammo-chat: streaming chat orchestration with memory-backed generation
//!
//! A turn is validated, handed to a generation backend (a tool-calling agent
//! that can search and store memories, falling back to a direct streamed
//! completion behind a circuit breaker), then replayed to the caller as an
//! ordered stream of [`ChatStreamEvent`]s while the [`ConversationState`] is
//! updated.

pub mod auth;
pub mod backend;
pub mod breaker;
pub mod conversation;
pub mod error;
pub mod events;
pub mod memory;
pub mod orchestrator;
pub mod tool;

pub use auth::{ApiKeySession, SessionAuth};
pub use backend::{
    AgentBackend, AgentConfig, DirectBackend, Generation, GenerationBackend, GenerationRequest,
};
pub use breaker::{BreakerConfig, CircuitBreaker, CircuitState};
pub use conversation::{
    ChatMessage, ConversationState, ConversationStatus, ExecutionStep, MessageRole, StepPayload,
};
pub use error::{Error, ErrorKind, Result};
pub use events::{ChatEventType, ChatStreamEvent};
pub use memory::{HttpMemoryGateway, MemoryGateway, MemoryScope, MemorySearchResult};
pub use orchestrator::{OrchestratorConfig, StreamOrchestrator, TurnOptions, TurnStream};
pub use tool::{Tool, ToolContext, ToolResult};
