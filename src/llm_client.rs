use crate::context::{Content, Message, ToolCall};
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
    #[error("API error: {0}")]
    ApiError(String),
}

/// What the model decided to do with a request. The distinction is made
/// exactly once, here at the API boundary, so the agent loop only ever
/// matches on this enum.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelReply {
    /// Final text, None when the response carried no usable content.
    Text(Option<String>),
    /// One or more tool invocations, with any text the model sent along.
    ToolCalls {
        content: Option<String>,
        calls: Vec<ToolCall>,
    },
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    /// One chat-completion round trip. `tools` carries ready-made
    /// function schemas, or None for a plain completion.
    async fn chat(&self, messages: &[Message], tools: Option<&[Value]>)
        -> Result<ModelReply, LlmError>;

    /// Single-prompt completion used for summarization. Returns the
    /// response text, empty when the model sent none.
    async fn generate_text(&self, prompt: &str) -> Result<String, LlmError>;
}

/// Spaces out API calls so bursts of tool rounds stay under the
/// provider's rate limit. The lock is held across the sleep so
/// concurrent callers queue instead of stampeding.
pub struct RateLimiter {
    min_interval: Duration,
    last_call: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_call: Mutex::new(None),
        }
    }

    pub async fn acquire(&self) {
        let mut last = self.last_call.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.min_interval {
                tokio::time::sleep(self.min_interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }
}

pub struct MistralClient {
    api_key: String,
    client: Client,
    model: String,
    base_url: String,
    limiter: RateLimiter,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<&'a [Value]>,
}

/// A message as the chat-completions wire format wants it: tool-call
/// arguments are a JSON-encoded string, not an object.
#[derive(Serialize)]
struct WireMessage {
    role: &'static str,
    content: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
}

#[derive(Serialize, Deserialize, Clone)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type", default = "default_call_type")]
    kind: String,
    function: WireFunction,
}

#[derive(Serialize, Deserialize, Clone)]
struct WireFunction {
    name: String,
    arguments: String,
}

fn default_call_type() -> String {
    "function".to_string()
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<Value>,
    #[serde(default)]
    tool_calls: Option<Vec<WireToolCall>>,
}

fn to_wire(message: &Message) -> WireMessage {
    let content = match &message.content {
        Some(content) => serde_json::to_value(content).unwrap_or(Value::Null),
        None => Value::Null,
    };
    let tool_calls = message.tool_calls.as_ref().map(|calls| {
        calls
            .iter()
            .map(|call| WireToolCall {
                id: call.id.clone(),
                kind: "function".to_string(),
                function: WireFunction {
                    name: call.name.clone(),
                    arguments: call.arguments.to_string(),
                },
            })
            .collect()
    });

    WireMessage {
        role: message.role.as_str(),
        content,
        tool_calls,
        tool_call_id: message.tool_call_id.clone(),
        name: message.name.clone(),
    }
}

fn content_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Array(parts) => {
            let texts: Vec<&str> = parts
                .iter()
                .filter(|p| p.get("type").and_then(Value::as_str) == Some("text"))
                .filter_map(|p| p.get("text").and_then(Value::as_str))
                .collect();
            if texts.is_empty() {
                None
            } else {
                Some(texts.concat())
            }
        }
        _ => None,
    }
}

fn decode_reply(response: ChatResponse) -> Result<ModelReply, LlmError> {
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| LlmError::ApiError("response contained no choices".to_string()))?;

    let content = choice.message.content.as_ref().and_then(content_text);

    match choice.message.tool_calls {
        Some(wire_calls) if !wire_calls.is_empty() => {
            let mut calls = Vec::with_capacity(wire_calls.len());
            for call in wire_calls {
                let arguments: Value = if call.function.arguments.trim().is_empty() {
                    Value::Object(serde_json::Map::new())
                } else {
                    serde_json::from_str(&call.function.arguments)?
                };
                calls.push(ToolCall {
                    id: call.id,
                    name: call.function.name,
                    arguments,
                });
            }
            Ok(ModelReply::ToolCalls { content, calls })
        }
        _ => Ok(ModelReply::Text(content)),
    }
}

impl MistralClient {
    pub fn new(api_key: String, model: String, base_url: String, min_interval: Duration) -> Self {
        Self {
            api_key,
            client: Client::new(),
            model,
            base_url,
            limiter: RateLimiter::new(min_interval),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl LlmClient for MistralClient {
    async fn chat(
        &self,
        messages: &[Message],
        tools: Option<&[Value]>,
    ) -> Result<ModelReply, LlmError> {
        self.limiter.acquire().await;

        let request = ChatRequest {
            model: &self.model,
            messages: messages.iter().map(to_wire).collect(),
            tools,
        };

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .header(CONTENT_TYPE, "application/json")
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::ApiError(format!("HTTP {status}: {body}")));
        }

        let parsed: ChatResponse = response.json().await?;
        decode_reply(parsed)
    }

    async fn generate_text(&self, prompt: &str) -> Result<String, LlmError> {
        let reply = self.chat(&[Message::user(prompt)], None).await?;
        let text = match reply {
            ModelReply::Text(text) => text,
            ModelReply::ToolCalls { content, .. } => content,
        };
        Ok(text.unwrap_or_default())
    }
}
