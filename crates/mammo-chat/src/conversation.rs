//! Conversation state: transcript, execution history and turn status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Default cap on retained messages
pub const DEFAULT_MAX_MESSAGES: usize = 1000;
/// Default cap on retained execution steps
pub const DEFAULT_MAX_EXECUTION_STEPS: usize = 500;

/// Who produced a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
    Error,
}

/// Lifecycle of the conversation's current turn
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationStatus {
    #[default]
    Idle,
    Running,
    Success,
    Failed,
}

/// One utterance in the transcript
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub role: MessageRole,
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl ChatMessage {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            created_at: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, metadata: HashMap<String, serde_json::Value>) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Structured payload of a surfaced tool use, shared by the step record and the `STEP` event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepPayload {
    pub skill_name: String,
    pub skill_status: String,
    pub user_message: String,
    pub observation: serde_json::Value,
}

impl StepPayload {
    /// Payload recording which memory episodes informed a reply
    pub fn memory(referenced: &[String]) -> Self {
        Self {
            skill_name: "memory".to_string(),
            skill_status: "complete".to_string(),
            user_message: String::new(),
            observation: serde_json::json!({ "referenced": referenced }),
        }
    }
}

/// Audit record of a tool invocation; never mutated after append
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionStep {
    pub id: String,
    pub skill_name: String,
    pub status: String,
    /// Serialized observation
    pub observation: String,
    pub user_message: String,
    pub data: StepPayload,
}

impl ExecutionStep {
    pub fn from_payload(data: StepPayload) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            skill_name: data.skill_name.clone(),
            status: data.skill_status.clone(),
            observation: data.observation.to_string(),
            user_message: data.user_message.clone(),
            data,
        }
    }
}

/// One chat session.
///
/// Fields are private so that the bounds and the append-only rules hold; the
/// orchestrator is the only writer while a turn runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationState {
    id: String,
    status: ConversationStatus,
    messages: Vec<ChatMessage>,
    execution_history: Vec<ExecutionStep>,
    memory_scope_ids: Vec<String>,
    #[serde(skip, default = "default_max_messages")]
    max_messages: usize,
    #[serde(skip, default = "default_max_execution_steps")]
    max_execution_steps: usize,
}

fn default_max_messages() -> usize {
    DEFAULT_MAX_MESSAGES
}

fn default_max_execution_steps() -> usize {
    DEFAULT_MAX_EXECUTION_STEPS
}

impl Default for ConversationState {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversationState {
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_MAX_MESSAGES, DEFAULT_MAX_EXECUTION_STEPS)
    }

    /// Create a conversation keeping at most the given numbers of messages and steps
    pub fn with_limits(max_messages: usize, max_execution_steps: usize) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            status: ConversationStatus::Idle,
            messages: Vec::new(),
            execution_history: Vec::new(),
            memory_scope_ids: Vec::new(),
            max_messages: max_messages.max(1),
            max_execution_steps: max_execution_steps.max(1),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn status(&self) -> ConversationStatus {
        self.status
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn execution_history(&self) -> &[ExecutionStep] {
        &self.execution_history
    }

    pub fn memory_scope_ids(&self) -> &[String] {
        &self.memory_scope_ids
    }

    /// Replace the scopes searched by later turns; duplicates are dropped
    pub fn set_memory_scope_ids(&mut self, scope_ids: impl IntoIterator<Item = String>) {
        self.memory_scope_ids.clear();
        for id in scope_ids {
            if !self.memory_scope_ids.contains(&id) {
                self.memory_scope_ids.push(id);
            }
        }
    }

    pub(crate) fn set_status(&mut self, status: ConversationStatus) {
        self.status = status;
    }

    /// Append a message, evicting the oldest when full. Returns the message id.
    pub fn append_message(&mut self, message: ChatMessage) -> String {
        let id = message.id.clone();
        self.messages.push(message);
        if self.messages.len() > self.max_messages {
            let excess = self.messages.len() - self.max_messages;
            self.messages.drain(..excess);
        }
        id
    }

    /// Grow the content of a message still being streamed
    pub(crate) fn append_content(&mut self, message_id: &str, chunk: &str) {
        if let Some(message) = self.messages.iter_mut().rev().find(|m| m.id == message_id) {
            message.content.push_str(chunk);
        }
    }

    pub(crate) fn message_content(&self, message_id: &str) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.id == message_id)
            .map(|m| m.content.as_str())
    }

    /// Append a step record, evicting the oldest when full
    pub fn append_execution_step(&mut self, step: ExecutionStep) {
        self.execution_history.push(step);
        if self.execution_history.len() > self.max_execution_steps {
            let excess = self.execution_history.len() - self.max_execution_steps;
            self.execution_history.drain(..excess);
        }
    }

    pub fn last_assistant_message(&self) -> Option<&ChatMessage> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == MessageRole::Assistant)
    }

    /// Start over: drop messages and steps and return to idle. Scopes are kept.
    pub fn clear(&mut self) {
        self.messages.clear();
        self.execution_history.clear();
        self.status = ConversationStatus::Idle;
    }

    /// Prior user and assistant turns, oldest first, as model context
    pub fn history(&self) -> Vec<mammo_ai::Message> {
        self.messages
            .iter()
            .filter_map(|m| match m.role {
                MessageRole::User => Some(mammo_ai::Message::user(m.content.clone())),
                MessageRole::Assistant => Some(mammo_ai::Message::assistant(m.content.clone())),
                MessageRole::System | MessageRole::Error => None,
            })
            .collect()
    }
}
