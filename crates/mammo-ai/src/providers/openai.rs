//! OpenAI-compatible Chat Completions provider (DeepSeek, OpenAI, local servers)

use async_stream::stream;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest_eventsource::{Event, EventSource};
use serde::{Deserialize, Serialize};

use super::ChatProvider;
use crate::{
    error::{Error, Result},
    stream::{INTERRUPTED_NOTICE, StreamData, TextStream, parse_stream_data},
    types::{Completion, CompletionOptions, Context, FinishReason, Message, Model, ToolCall, Usage},
};

/// Environment variable holding the API key
pub const API_KEY_ENV: &str = "DEEPSEEK_API_KEY";

/// Client for an OpenAI-compatible `/chat/completions` endpoint
pub struct OpenAICompatProvider {
    client: reqwest::Client,
    api_key: String,
    model: Model,
}

impl OpenAICompatProvider {
    /// Create a provider sharing an existing client's connection pool
    pub fn new(client: reqwest::Client, api_key: impl Into<String>, model: Model) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(Error::InvalidApiKey);
        }
        model.ensure_valid()?;
        Ok(Self {
            client,
            api_key,
            model,
        })
    }

    /// Create from the `DEEPSEEK_API_KEY` environment variable
    pub fn from_env(client: reqwest::Client, model: Model) -> Result<Self> {
        let api_key = super::get_api_key(None, API_KEY_ENV)?;
        Self::new(client, api_key, model)
    }

    /// The model this provider targets
    pub fn model(&self) -> &Model {
        &self.model
    }

    /// List models served by the endpoint
    pub async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let response = self
            .client
            .get(self.model.endpoint("models"))
            .headers(self.headers()?)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::status(status.as_u16(), error_message(&text, status)));
        }

        let list: ModelList = response.json().await?;
        Ok(list.data)
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        let auth = HeaderValue::from_str(&format!("Bearer {}", self.api_key))
            .map_err(|_| Error::InvalidApiKey)?;
        headers.insert(reqwest::header::AUTHORIZATION, auth);
        headers.insert(
            reqwest::header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );

        // Add model-specific headers
        for (key, value) in &self.model.headers {
            if let (Ok(name), Ok(val)) = (key.parse::<HeaderName>(), value.parse::<HeaderValue>()) {
                headers.insert(name, val);
            }
        }

        Ok(headers)
    }

    fn build_request(
        &self,
        context: &Context,
        options: &CompletionOptions,
        stream: bool,
    ) -> CompletionRequest {
        let mut messages = Vec::with_capacity(context.messages.len() + 1);

        if let Some(ref system_prompt) = context.system_prompt {
            messages.push(WireMessage {
                role: "system".to_string(),
                content: Some(system_prompt.clone()),
                tool_calls: None,
                tool_call_id: None,
            });
        }

        messages.extend(context.messages.iter().map(convert_message));

        let tools = if context.tools.is_empty() {
            None
        } else {
            Some(
                context
                    .tools
                    .iter()
                    .map(|t| WireTool {
                        tool_type: "function".to_string(),
                        function: WireFunction {
                            name: t.name.clone(),
                            description: Some(t.description.clone()),
                            parameters: Some(t.parameters.clone()),
                        },
                    })
                    .collect(),
            )
        };

        let has_tools = tools.is_some();
        CompletionRequest {
            model: self.model.id.clone(),
            messages,
            stream,
            temperature: options.temperature,
            max_tokens: options.max_tokens,
            tools,
            tool_choice: has_tools.then(|| serde_json::json!("auto")),
        }
    }
}

#[async_trait]
impl ChatProvider for OpenAICompatProvider {
    async fn complete(
        &self,
        context: &Context,
        options: &CompletionOptions,
    ) -> Result<Completion> {
        let request = self.build_request(context, options, false);

        let response = self
            .client
            .post(self.model.endpoint("chat/completions"))
            .headers(self.headers()?)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::status(status.as_u16(), error_message(&text, status)));
        }

        let body = response.text().await?;
        parse_completion(&body)
    }

    async fn stream_text(
        &self,
        context: &Context,
        options: &CompletionOptions,
    ) -> Result<TextStream> {
        let request = self.build_request(context, options, true);
        let request_builder = self
            .client
            .post(self.model.endpoint("chat/completions"))
            .headers(self.headers()?)
            .json(&request);

        let mut event_source = EventSource::new(request_builder)
            .map_err(|e| Error::Sse(format!("Failed to create event source: {}", e)))?;

        // Wait for the response head so request failures are raised, not streamed
        let first_data = loop {
            match event_source.next().await {
                Some(Ok(Event::Open)) => break None,
                Some(Ok(Event::Message(msg))) => break Some(msg.data),
                Some(Err(e)) => {
                    event_source.close();
                    return Err(open_error(e).await);
                }
                None => {
                    return Err(Error::UnexpectedResponse(
                        "stream closed before the response started".into(),
                    ));
                }
            }
        };

        Ok(Box::pin(create_stream(event_source, first_data)))
    }
}

/// Translate a failure that happened before the stream opened
async fn open_error(error: reqwest_eventsource::Error) -> Error {
    use reqwest_eventsource::Error as SseError;

    match error {
        SseError::InvalidStatusCode(status, response) => {
            let text = response.text().await.unwrap_or_default();
            Error::status(status.as_u16(), error_message(&text, status))
        }
        SseError::Transport(e) => Error::from(e),
        SseError::InvalidContentType(content_type, _) => Error::UnexpectedResponse(format!(
            "expected an event stream, got content type {:?}",
            content_type
        )),
        SseError::StreamEnded => {
            Error::UnexpectedResponse("stream ended before the response started".into())
        }
        other => Error::Sse(other.to_string()),
    }
}

fn create_stream(
    mut event_source: EventSource,
    first_data: Option<String>,
) -> impl futures::Stream<Item = Result<String>> {
    stream! {
        let mut pending = first_data;

        loop {
            let data = match pending.take() {
                Some(data) => data,
                None => match event_source.next().await {
                    Some(Ok(Event::Open)) => continue,
                    Some(Ok(Event::Message(msg))) => msg.data,
                    Some(Err(reqwest_eventsource::Error::StreamEnded)) | None => break,
                    Some(Err(reqwest_eventsource::Error::Transport(e))) if e.is_timeout() => {
                        yield Err(Error::Timeout(e.to_string()));
                        break;
                    }
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "completion stream interrupted");
                        yield Ok(INTERRUPTED_NOTICE.to_string());
                        break;
                    }
                },
            };

            match parse_stream_data(&data) {
                StreamData::Fragment(text) => yield Ok(text),
                StreamData::Done => break,
                StreamData::Empty => {}
                StreamData::Malformed => {
                    tracing::debug!(data = %data, "skipping malformed stream line");
                }
            }
        }

        // Closing stops the event source from reconnecting
        event_source.close();
    }
}

fn convert_message(msg: &Message) -> WireMessage {
    match msg {
        Message::User { content } => WireMessage {
            role: "user".to_string(),
            content: Some(content.clone()),
            tool_calls: None,
            tool_call_id: None,
        },
        Message::Assistant {
            content,
            tool_calls,
        } => WireMessage {
            role: "assistant".to_string(),
            content: content.clone(),
            tool_calls: if tool_calls.is_empty() {
                None
            } else {
                Some(
                    tool_calls
                        .iter()
                        .map(|tc| WireToolCall {
                            id: tc.id.clone(),
                            call_type: "function".to_string(),
                            function: WireFunctionCall {
                                name: tc.name.clone(),
                                arguments: match &tc.arguments {
                                    serde_json::Value::String(raw) => raw.clone(),
                                    other => other.to_string(),
                                },
                            },
                        })
                        .collect(),
                )
            },
            tool_call_id: None,
        },
        Message::Tool {
            tool_call_id,
            content,
        } => WireMessage {
            role: "tool".to_string(),
            content: Some(content.clone()),
            tool_calls: None,
            tool_call_id: Some(tool_call_id.clone()),
        },
    }
}

fn parse_completion(body: &str) -> Result<Completion> {
    let response: CompletionResponse = serde_json::from_str(body)?;

    if let Some(error) = response.error {
        return Err(Error::api(
            error.error_type.unwrap_or_else(|| "error".into()),
            error.message,
        ));
    }

    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| Error::UnexpectedResponse("completion has no choices".into()))?;

    let tool_calls = choice
        .message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|tc| ToolCall {
            id: tc.id,
            name: tc.function.name,
            arguments: serde_json::from_str(&tc.function.arguments)
                .unwrap_or(serde_json::Value::String(tc.function.arguments)),
        })
        .collect();

    let usage = response
        .usage
        .map(|u| Usage {
            input: u.prompt_tokens,
            output: u.completion_tokens,
        })
        .unwrap_or_default();

    Ok(Completion {
        message: Message::Assistant {
            content: choice.message.content,
            tool_calls,
        },
        finish_reason: choice.finish_reason.as_deref().and_then(FinishReason::parse),
        usage,
    })
}

/// Pull `error.message` out of an error body, falling back to the status text
fn error_message(body: &str, status: reqwest::StatusCode) -> String {
    serde_json::from_str::<ErrorEnvelope>(body)
        .ok()
        .and_then(|env| env.error)
        .map(|e| e.message)
        .filter(|m| !m.is_empty())
        .or_else(|| {
            let trimmed = body.trim();
            (!trimmed.is_empty()).then(|| trimmed.chars().take(200).collect())
        })
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("error").to_string())
}

/// Model info returned from the `/models` endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    #[serde(default)]
    pub owned_by: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ModelList {
    data: Vec<ModelInfo>,
}

// Request types

#[derive(Debug, Serialize)]
struct CompletionRequest {
    model: String,
    messages: Vec<WireMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<WireTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct WireTool {
    #[serde(rename = "type")]
    tool_type: String,
    function: WireFunction,
}

#[derive(Debug, Serialize)]
struct WireFunction {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    parameters: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type")]
    call_type: String,
    function: WireFunctionCall,
}

#[derive(Debug, Serialize)]
struct WireFunctionCall {
    name: String,
    arguments: String,
}

// Response types

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<ResponseChoice>,
    #[serde(default)]
    usage: Option<ResponseUsage>,
    #[serde(default)]
    error: Option<ErrorBody>,
}

#[derive(Debug, Deserialize)]
struct ResponseChoice {
    message: ResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
    tool_calls: Option<Vec<ResponseToolCall>>,
}

#[derive(Debug, Deserialize)]
struct ResponseToolCall {
    id: String,
    function: ResponseFunction,
}

#[derive(Debug, Deserialize)]
struct ResponseFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct ResponseUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: Option<ErrorBody>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
    #[serde(rename = "type")]
    error_type: Option<String>,
}
