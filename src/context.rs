use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Prefix of the synthetic system message produced by a compaction.
pub const SUMMARY_PREFIX: &str = "[Previous conversation summary]: ";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

/// Message content as stored and sent on the wire: either a plain string
/// or a list of typed parts. We only ever write the plain form, but
/// histories written by other clients may carry parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Content {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentPart {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

/// A tool invocation requested by the model, with arguments already
/// parsed from the wire's JSON string into a JSON object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    #[serde(default)]
    pub content: Option<Content>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Message {
    fn text(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: Some(Content::Text(content.into())),
            tool_calls: None,
            tool_call_id: None,
            name: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::text(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::text(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::text(Role::Assistant, content)
    }

    /// Assistant message carrying tool calls. A missing content string is
    /// stored as "" so the message stays valid when sent back to the API.
    pub fn assistant_with_calls(content: Option<String>, calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content: Some(Content::Text(content.unwrap_or_default())),
            tool_calls: Some(calls),
            tool_call_id: None,
            name: None,
        }
    }

    pub fn tool_result(
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            role: Role::Tool,
            content: Some(Content::Text(content.into())),
            tool_calls: None,
            tool_call_id: Some(call_id.into()),
            name: Some(tool_name.into()),
        }
    }

    /// The message's text, flattening part lists the same way the
    /// transcript renderer does. None when there is nothing textual.
    pub fn text_content(&self) -> Option<String> {
        match &self.content {
            Some(Content::Text(text)) => Some(text.clone()),
            Some(Content::Parts(parts)) => {
                let texts: Vec<String> = parts
                    .iter()
                    .filter(|p| p.kind == "text")
                    .map(|p| p.text.clone().unwrap_or_default())
                    .collect();
                if texts.is_empty() {
                    None
                } else {
                    Some(texts.join(" "))
                }
            }
            None => None,
        }
    }
}

/// The persisted conversation: an ordered list of messages, serialized
/// as a bare JSON array so the memory file stays hand-inspectable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct History {
    messages: Vec<Message>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_messages(messages: Vec<Message>) -> Self {
        Self { messages }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn truncate(&mut self, len: usize) {
        self.messages.truncate(len);
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Size of the compact JSON serialization, in kilobytes.
    pub fn size_kb(&self) -> f64 {
        serde_json::to_string(&self.messages)
            .map(|s| s.len() as f64 / 1024.0)
            .unwrap_or(0.0)
    }

    /// Strictly greater than: a history sitting exactly at the threshold
    /// is not compacted.
    pub fn needs_compaction(&self, threshold_kb: f64) -> bool {
        self.size_kb() > threshold_kb
    }

    /// Renders the history as "ROLE: text" lines for summarization.
    /// Messages without textual content are skipped.
    pub fn transcript(&self) -> String {
        let mut lines = Vec::new();
        for message in &self.messages {
            if let Some(text) = message.text_content() {
                lines.push(format!("{}: {}", message.role.as_str().to_uppercase(), text));
            }
        }
        lines.join("\n")
    }

    /// Fills a summarization template's `{conversation}` placeholder.
    pub fn summary_request(&self, template: &str) -> String {
        template.replace("{conversation}", &self.transcript())
    }

    /// Replaces the history with a summary message followed by the most
    /// recent `keep_last` messages. The result always has
    /// `1 + min(keep_last, len)` entries.
    pub fn compress(&self, summary: &str, keep_last: usize) -> History {
        let mut messages = Vec::with_capacity(keep_last + 1);
        messages.push(Message::system(format!("{SUMMARY_PREFIX}{summary}")));
        let start = self.messages.len().saturating_sub(keep_last);
        messages.extend_from_slice(&self.messages[start..]);
        History { messages }
    }
}
