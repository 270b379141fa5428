//! Chat stream event types

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::conversation::{MessageRole, StepPayload};
use crate::error::ErrorKind;

/// Events emitted to callers during a turn.
///
/// Serialized as `{"type": "MESSAGE_CHUNK", "payload": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChatStreamEvent {
    /// An assistant message was opened
    MessageStart { role: MessageRole, message_id: String },

    /// A slice of the reply
    MessageChunk { content: String },

    /// The message is complete
    MessageEnd { content: String },

    /// A tool use worth surfacing
    Step(StepPayload),

    /// The turn failed
    Error { kind: ErrorKind, message: String },

    /// No more events follow
    StreamEnd,

    /// A notice produced locally rather than by the model
    System { message: String },
}

/// The `type` of a [`ChatStreamEvent`] without its payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChatEventType {
    MessageStart,
    MessageChunk,
    MessageEnd,
    Step,
    Error,
    StreamEnd,
    System,
}

impl ChatEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatEventType::MessageStart => "MESSAGE_START",
            ChatEventType::MessageChunk => "MESSAGE_CHUNK",
            ChatEventType::MessageEnd => "MESSAGE_END",
            ChatEventType::Step => "STEP",
            ChatEventType::Error => "ERROR",
            ChatEventType::StreamEnd => "STREAM_END",
            ChatEventType::System => "SYSTEM",
        }
    }
}

impl fmt::Display for ChatEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ChatStreamEvent {
    pub fn event_type(&self) -> ChatEventType {
        match self {
            ChatStreamEvent::MessageStart { .. } => ChatEventType::MessageStart,
            ChatStreamEvent::MessageChunk { .. } => ChatEventType::MessageChunk,
            ChatStreamEvent::MessageEnd { .. } => ChatEventType::MessageEnd,
            ChatStreamEvent::Step(_) => ChatEventType::Step,
            ChatStreamEvent::Error { .. } => ChatEventType::Error,
            ChatStreamEvent::StreamEnd => ChatEventType::StreamEnd,
            ChatStreamEvent::System { .. } => ChatEventType::System,
        }
    }

    /// Check if this is a terminal event
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ChatStreamEvent::StreamEnd | ChatStreamEvent::Error { .. }
        )
    }
}
