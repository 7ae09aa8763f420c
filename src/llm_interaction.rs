use std::collections::BTreeMap;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use eventsource_stream::{EventStreamError, Eventsource};
use futures::{Stream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tokio::time::timeout;
use tracing::{debug, error, instrument};
use uuid::Uuid;

use crate::tools::ToolDescriptor;

/// A tool call as requested by the model, arguments already decoded from JSON.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallRequest {
    pub call_id: String,
    pub tool_name: String,
    /// Decoded arguments; undecodable argument text is kept as a JSON string so the
    /// registry rejects it as a validation failure.
    pub args: Value,
}

/// Fresh tool call id in the shape Mistral accepts: 9 alphanumeric characters.
pub fn generate_call_id() -> String {
    Uuid::new_v4().simple().to_string()[..9].to_string()
}

/// Provider-neutral conversation entry sent to the model.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelMessage {
    User {
        content: String,
    },
    Assistant {
        content: String,
        tool_calls: Vec<ToolCallRequest>,
    },
    Tool {
        call_id: String,
        tool_name: String,
        content: String,
    },
}

#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub model: String,
    pub system_prompt: String,
    pub messages: Vec<ModelMessage>,
    pub tools: Vec<ToolDescriptor>,
    pub temperature: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProviderEvent {
    TextDelta(String),
    ToolCall(ToolCallRequest),
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("model provider returned {status}: {body}")]
    Http { status: u16, body: String },
    #[error("request to model provider failed: {0}")]
    Network(String),
    #[error("model provider did not respond within {0:?}")]
    Timeout(Duration),
    #[error("invalid response from model provider: {0}")]
    InvalidResponse(String),
}

pub type ProviderStream = Pin<Box<dyn Stream<Item = Result<ProviderEvent, ProviderError>> + Send>>;

/// One model step: the stream yields text deltas and tool calls, then ends.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    async fn open_stream(&self, request: &ModelRequest) -> Result<ProviderStream, ProviderError>;
}

// Structures matching Mistral's /v1/chat/completions endpoint
#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'static str>,
    temperature: f32,
    stream: bool,
}

#[derive(Serialize, Debug, PartialEq)]
struct WireMessage {
    role: &'static str,
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
}

#[derive(Serialize, Debug, PartialEq)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type")]
    call_type: &'static str,
    function: WireFunctionCall,
}

#[derive(Serialize, Debug, PartialEq)]
struct WireFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Serialize)]
struct WireTool<'a> {
    #[serde(rename = "type")]
    tool_type: &'static str,
    function: &'a ToolDescriptor,
}

#[derive(Deserialize, Debug)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    // Set to "error" when the API aborts mid-stream
    object: Option<String>,
    message: Option<Value>,
}

#[derive(Deserialize, Debug)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Debug, Default)]
struct StreamDelta {
    content: Option<String>,
    tool_calls: Option<Vec<ToolCallDelta>>,
}

#[derive(Deserialize, Debug)]
struct ToolCallDelta {
    index: Option<usize>,
    id: Option<String>,
    function: Option<FunctionDelta>,
}

#[derive(Deserialize, Debug)]
struct FunctionDelta {
    name: Option<String>,
    arguments: Option<String>,
}

#[derive(Debug, Default)]
struct PartialToolCall {
    id: String,
    name: String,
    arguments: String,
}

impl PartialToolCall {
    fn finish(self) -> ToolCallRequest {
        let args = if self.arguments.trim().is_empty() {
            json!({})
        } else {
            serde_json::from_str(&self.arguments).unwrap_or(Value::String(self.arguments))
        };
        let call_id = if self.id.is_empty() {
            generate_call_id()
        } else {
            self.id
        };
        ToolCallRequest {
            call_id,
            tool_name: self.name,
            args,
        }
    }
}

/// Accumulates one streamed completion into provider events.
#[derive(Debug, Default)]
struct CompletionAssembler {
    tool_calls: BTreeMap<usize, PartialToolCall>,
}

impl CompletionAssembler {
    fn accept(&mut self, payload: &str) -> Result<Vec<ProviderEvent>, ProviderError> {
        let mut events = Vec::new();
        if payload == "[DONE]" {
            return Ok(events);
        }
        let chunk = serde_json::from_str::<StreamChunk>(payload).map_err(|e| {
            error!("Failed to parse stream chunk: {} - Error: {}", payload, e);
            ProviderError::InvalidResponse(format!("undecodable stream chunk: {}", e))
        })?;
        if chunk.object.as_deref() == Some("error") {
            let message = match chunk.message {
                Some(Value::String(text)) => text,
                Some(other) => other.to_string(),
                None => "stream aborted".to_string(),
            };
            return Err(ProviderError::InvalidResponse(message));
        }

        for choice in chunk.choices {
            if let Some(content) = choice.delta.content {
                if !content.is_empty() {
                    events.push(ProviderEvent::TextDelta(content));
                }
            }
            for (position, delta) in choice.delta.tool_calls.into_iter().flatten().enumerate() {
                let entry = self.tool_calls.entry(delta.index.unwrap_or(position)).or_default();
                if let Some(id) = delta.id {
                    entry.id = id;
                }
                if let Some(function) = delta.function {
                    if let Some(name) = function.name {
                        entry.name.push_str(&name);
                    }
                    if let Some(arguments) = function.arguments {
                        entry.arguments.push_str(&arguments);
                    }
                }
            }
            if choice.finish_reason.is_some() {
                events.extend(self.flush());
            }
        }
        Ok(events)
    }

    fn flush(&mut self) -> Vec<ProviderEvent> {
        std::mem::take(&mut self.tool_calls)
            .into_values()
            .map(|partial| ProviderEvent::ToolCall(partial.finish()))
            .collect()
    }
}

fn to_wire_messages(request: &ModelRequest) -> Vec<WireMessage> {
    let mut messages = vec![WireMessage {
        role: "system",
        content: request.system_prompt.clone(),
        tool_calls: None,
        tool_call_id: None,
        name: None,
    }];
    for message in &request.messages {
        messages.push(match message {
            ModelMessage::User { content } => WireMessage {
                role: "user",
                content: content.clone(),
                tool_calls: None,
                tool_call_id: None,
                name: None,
            },
            ModelMessage::Assistant { content, tool_calls } => WireMessage {
                role: "assistant",
                content: content.clone(),
                tool_calls: (!tool_calls.is_empty()).then(|| {
                    tool_calls
                        .iter()
                        .map(|call| WireToolCall {
                            id: call.call_id.clone(),
                            call_type: "function",
                            function: WireFunctionCall {
                                name: call.tool_name.clone(),
                                arguments: call.args.to_string(),
                            },
                        })
                        .collect()
                }),
                tool_call_id: None,
                name: None,
            },
            ModelMessage::Tool {
                call_id,
                tool_name,
                content,
            } => WireMessage {
                role: "tool",
                content: content.clone(),
                tool_calls: None,
                tool_call_id: Some(call_id.clone()),
                name: Some(tool_name.clone()),
            },
        });
    }
    messages
}

/// Streaming client for Mistral's chat-completions API.
#[derive(Debug, Clone)]
pub struct MistralProvider {
    client: Client,
    api_url: String,
    api_key: String,
    timeout: Duration,
}

impl MistralProvider {
    pub fn new(api_url: impl Into<String>, api_key: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: Client::new(),
            api_url: api_url.into(),
            api_key: api_key.into(),
            timeout,
        }
    }
}

#[async_trait]
impl ModelProvider for MistralProvider {
    #[instrument(skip(self, request), fields(model = %request.model, messages = request.messages.len()))]
    async fn open_stream(&self, request: &ModelRequest) -> Result<ProviderStream, ProviderError> {
        let body = ChatCompletionRequest {
            model: &request.model,
            messages: to_wire_messages(request),
            tools: request
                .tools
                .iter()
                .map(|function| WireTool {
                    tool_type: "function",
                    function,
                })
                .collect(),
            tool_choice: (!request.tools.is_empty()).then_some("auto"),
            temperature: request.temperature,
            stream: true,
        };

        let send = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send();
        let response = timeout(self.timeout, send)
            .await
            .map_err(|_| ProviderError::Timeout(self.timeout))?
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_body = response.text().await.unwrap_or_else(|_| "Failed to read error body".to_string());
            error!(%status, %error_body, "Model API request failed");
            return Err(ProviderError::Http {
                status: status.as_u16(),
                body: error_body,
            });
        }
        debug!("Model stream opened");

        let chunk_timeout = self.timeout;
        let mut sse_events = response.bytes_stream().eventsource();
        let stream = async_stream::stream! {
            let mut assembler = CompletionAssembler::default();
            loop {
                let event = match timeout(chunk_timeout, sse_events.next()).await {
                    Err(_) => {
                        yield Err(ProviderError::Timeout(chunk_timeout));
                        return;
                    }
                    Ok(None) => break,
                    Ok(Some(Err(EventStreamError::Transport(e)))) => {
                        yield Err(ProviderError::Network(e.to_string()));
                        return;
                    }
                    Ok(Some(Err(e))) => {
                        yield Err(ProviderError::InvalidResponse(e.to_string()));
                        return;
                    }
                    Ok(Some(Ok(event))) => event,
                };
                if event.data == "[DONE]" {
                    break;
                }
                if event.data.is_empty() {
                    continue;
                }
                match assembler.accept(&event.data) {
                    Ok(events) => for event in events {
                        yield Ok(event);
                    },
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                }
            }
            // Streams cut off before a finish_reason still deliver their tool calls
            for event in assembler.flush() {
                yield Ok(event);
            }
        };
        Ok(Box::pin(stream))
    }
}
