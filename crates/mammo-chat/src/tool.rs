//! Tool trait and execution

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::Result;

/// Result of a tool execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// Content to return to the LLM
    pub content: String,
    /// Whether the execution resulted in an error
    pub is_error: bool,
    /// Optional structured details, not sent to the LLM
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ToolResult {
    /// Create a successful text result
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: text.into(),
            is_error: false,
            details: None,
        }
    }

    /// Create an error result the model can react to
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: message.into(),
            is_error: true,
            details: None,
        }
    }

    /// Add details to the result
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// Per-turn data a tool may need
#[derive(Debug, Clone, Default)]
pub struct ToolContext {
    /// Memory scopes the turn may search; empty means unscoped
    pub scope_ids: Vec<String>,
    pub session_id: Option<String>,
}

/// Trait for executable tools
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name (used in API calls)
    fn name(&self) -> &str;

    /// Tool description for the LLM
    fn description(&self) -> &str;

    /// JSON Schema for parameters
    fn parameters_schema(&self) -> serde_json::Value;

    /// Execute the tool with validated arguments.
    ///
    /// `Ok(ToolResult::error(..))` is handed back to the model; `Err` aborts
    /// the generation.
    async fn execute(
        &self,
        tool_call_id: &str,
        arguments: serde_json::Value,
        context: &ToolContext,
    ) -> Result<ToolResult>;
}

/// Type alias for a boxed tool
pub type BoxedTool = Arc<dyn Tool>;

/// Convert a Tool to a mammo_ai::Tool for API calls
pub fn to_api_tool(tool: &dyn Tool) -> mammo_ai::Tool {
    mammo_ai::Tool {
        name: tool.name().to_string(),
        description: tool.description().to_string(),
        parameters: tool.parameters_schema(),
    }
}

/// Tools offered to the model, with their compiled argument schemas
#[derive(Default)]
pub struct ToolSet {
    tools: Vec<BoxedTool>,
    schema_cache: HashMap<String, Arc<jsonschema::Validator>>,
}

impl ToolSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool, compiling its schema once
    pub fn add(&mut self, tool: BoxedTool) {
        let schema = tool.parameters_schema();
        match jsonschema::validator_for(&schema) {
            Ok(validator) => {
                self.schema_cache
                    .insert(tool.name().to_string(), Arc::new(validator));
            }
            Err(e) => {
                tracing::warn!(
                    "Invalid tool parameter schema for '{}', skipping validation: {}",
                    tool.name(),
                    e
                );
            }
        }
        self.tools.push(tool);
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Definitions sent with each request
    pub fn definitions(&self) -> Vec<mammo_ai::Tool> {
        self.tools.iter().map(|t| to_api_tool(t.as_ref())).collect()
    }

    /// Run one tool call requested by the model.
    ///
    /// Unknown tools and invalid arguments come back as error results.
    pub async fn execute(
        &self,
        call: &mammo_ai::ToolCall,
        context: &ToolContext,
    ) -> Result<ToolResult> {
        let Some(tool) = self.tools.iter().find(|t| t.name() == call.name) else {
            return Ok(ToolResult::error(format!("Tool not found: {}", call.name)));
        };

        if let serde_json::Value::String(raw) = &call.arguments {
            return Ok(ToolResult::error(format!(
                "Tool arguments are not valid JSON: {}",
                raw
            )));
        }

        let validation_error = self
            .schema_cache
            .get(call.name.as_str())
            .and_then(|validator| validate_with_validator(&call.arguments, validator));
        if let Some(err) = validation_error {
            return Ok(ToolResult::error(err));
        }

        tracing::debug!(tool = %call.name, id = %call.id, "executing tool");
        tool.execute(&call.id, call.arguments.clone(), context).await
    }
}

/// Validate tool arguments using a pre-compiled validator.
/// Returns `Some(error_message)` if validation fails, `None` if valid.
fn validate_with_validator(
    args: &serde_json::Value,
    validator: &jsonschema::Validator,
) -> Option<String> {
    let errors: Vec<String> = validator
        .iter_errors(args)
        .map(|e| {
            let path = e.instance_path.to_string();
            if path.is_empty() {
                e.to_string()
            } else {
                format!("{}: {}", path, e)
            }
        })
        .collect();

    if errors.is_empty() {
        None
    } else {
        Some(format!(
            "Tool argument validation failed:\n{}",
            errors.join("\n")
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    /// A simple test tool that echoes its arguments.
    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echoes input"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({
                "type": "object",
                "properties": {
                    "text": { "type": "string" }
                },
                "required": ["text"]
            })
        }
        async fn execute(
            &self,
            _tool_call_id: &str,
            arguments: serde_json::Value,
            context: &ToolContext,
        ) -> Result<ToolResult> {
            let text = arguments
                .get("text")
                .and_then(|v| v.as_str())
                .unwrap_or("(empty)");
            if text == "fail" {
                return Err(Error::Memory("down".into()));
            }
            Ok(ToolResult::text(format!("{} {}", text, context.scope_ids.join(","))))
        }
    }

    fn call(name: &str, arguments: serde_json::Value) -> mammo_ai::ToolCall {
        mammo_ai::ToolCall {
            id: "call_1".into(),
            name: name.into(),
            arguments,
        }
    }

    fn echo_set() -> ToolSet {
        let mut tools = ToolSet::new();
        tools.add(Arc::new(EchoTool));
        tools
    }

    #[test]
    fn test_tool_result_text() {
        let r = ToolResult::text("ok");
        assert!(!r.is_error);
        assert_eq!(r.content, "ok");
    }

    #[test]
    fn test_to_api_tool() {
        let api_tool = to_api_tool(&EchoTool);
        assert_eq!(api_tool.name, "echo");
        assert_eq!(api_tool.description, "Echoes input");
    }

    #[tokio::test]
    async fn test_valid_call_passes_context() {
        let context = ToolContext {
            scope_ids: vec!["work".into()],
            session_id: None,
        };
        let result = echo_set()
            .execute(&call("echo", serde_json::json!({"text": "hi"})), &context)
            .await
            .unwrap();
        assert!(!result.is_error);
        assert_eq!(result.content, "hi work");
    }

    #[tokio::test]
    async fn test_schema_violation_is_error_result() {
        let result = echo_set()
            .execute(&call("echo", serde_json::json!({"text": 5})), &ToolContext::default())
            .await
            .unwrap();
        assert!(result.is_error);
        assert!(result.content.contains("validation failed"));

        let result = echo_set()
            .execute(&call("echo", serde_json::json!({})), &ToolContext::default())
            .await
            .unwrap();
        assert!(result.is_error);
    }

    #[tokio::test]
    async fn test_unknown_tool_and_raw_arguments() {
        let tools = echo_set();
        let result = tools
            .execute(&call("nope", serde_json::json!({})), &ToolContext::default())
            .await
            .unwrap();
        assert!(result.is_error);
        assert!(result.content.contains("Tool not found"));

        let result = tools
            .execute(
                &call("echo", serde_json::Value::String("{broken".into())),
                &ToolContext::default(),
            )
            .await
            .unwrap();
        assert!(result.is_error);
        assert!(result.content.contains("not valid JSON"));
    }

    #[tokio::test]
    async fn test_tool_failure_propagates() {
        let err = echo_set()
            .execute(&call("echo", serde_json::json!({"text": "fail"})), &ToolContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Memory(_)));
    }
}
