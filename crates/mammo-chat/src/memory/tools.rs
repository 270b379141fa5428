use async_trait::async_trait;
use std::sync::Arc;

use super::MemoryGateway;
use crate::error::Result;
use crate::tool::{Tool, ToolContext, ToolResult};

/// Source tag attached to notes stored by the agent
pub const INGEST_SOURCE: &str = "chat_agent";

const DEFAULT_SEARCH_LIMIT: u64 = 5;
const CONFIRMATION_PREVIEW_CHARS: usize = 50;

/// `memory_search`: look up episodes related to a query
pub struct MemorySearchTool {
    gateway: Arc<dyn MemoryGateway>,
}

impl MemorySearchTool {
    pub fn new(gateway: Arc<dyn MemoryGateway>) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl Tool for MemorySearchTool {
    fn name(&self) -> &str {
        "memory_search"
    }

    fn description(&self) -> &str {
        "Search the user's memory store for episodes related to the query. \
         Returns the matching episode texts."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "minLength": 1,
                    "description": "What to look for"
                },
                "limit": {
                    "type": "integer",
                    "minimum": 1,
                    "maximum": 50,
                    "description": "Maximum number of episodes (default 5)"
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(
        &self,
        _tool_call_id: &str,
        arguments: serde_json::Value,
        context: &ToolContext,
    ) -> Result<ToolResult> {
        let query = arguments["query"].as_str().unwrap_or_default();
        let limit = arguments["limit"].as_u64().unwrap_or(DEFAULT_SEARCH_LIMIT) as usize;
        let scopes = (!context.scope_ids.is_empty()).then_some(context.scope_ids.as_slice());

        let result = self.gateway.search(query, scopes, limit, false).await?;

        let ids: Vec<&str> = result
            .episodes
            .iter()
            .map(|e| e.id.as_str())
            .filter(|id| !id.is_empty())
            .collect();
        let bodies: Vec<&str> = result.episodes.iter().map(|e| e.body.as_str()).collect();
        let content = if bodies.is_empty() {
            "No matching memories found.".to_string()
        } else {
            serde_json::json!(bodies).to_string()
        };

        Ok(ToolResult::text(content).with_details(serde_json::json!({ "episode_ids": ids })))
    }
}

/// `memory_ingest`: store a new note
pub struct MemoryIngestTool {
    gateway: Arc<dyn MemoryGateway>,
}

impl MemoryIngestTool {
    pub fn new(gateway: Arc<dyn MemoryGateway>) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl Tool for MemoryIngestTool {
    fn name(&self) -> &str {
        "memory_ingest"
    }

    fn description(&self) -> &str {
        "Store a new note in the user's memory. Optionally target a scope by id."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "note": {
                    "type": "string",
                    "minLength": 1,
                    "description": "The information to remember"
                },
                "scope_id": {
                    "type": "string",
                    "description": "Scope to store the note in"
                }
            },
            "required": ["note"]
        })
    }

    async fn execute(
        &self,
        _tool_call_id: &str,
        arguments: serde_json::Value,
        context: &ToolContext,
    ) -> Result<ToolResult> {
        let note = arguments["note"].as_str().unwrap_or_default();
        let scope_id = arguments["scope_id"].as_str();

        let episode_id = self
            .gateway
            .ingest(
                note,
                scope_id,
                context.session_id.as_deref(),
                Some(INGEST_SOURCE),
            )
            .await?;

        let preview: String = note.chars().take(CONFIRMATION_PREVIEW_CHARS).collect();
        Ok(ToolResult::text(format!("Memory stored: {}...", preview))
            .with_details(serde_json::json!({ "episode_id": episode_id })))
    }
}
