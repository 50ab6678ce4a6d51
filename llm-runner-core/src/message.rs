//! Records produced by the external tool.
//!
//! In streaming mode every non-blank stdout line is one JSON object whose
//! `type` field selects a [`StreamedMessage`] variant. In single-shot JSON mode
//! stdout holds exactly one [`RunResult`].

use serde::{Deserialize, Serialize};

/// Status of a tool server reported at session start
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct McpServerStatus {
    pub name: String,
    pub status: String,
}

/// Session initialisation and other system notices
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtype: Option<String>,
    #[serde(default)]
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mcp_servers: Vec<McpServerStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<serde_json::Value>,
}

/// A conversational turn; the nested payload is passed through undecoded
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtype: Option<String>,
    #[serde(default)]
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<serde_json::Value>,
}

/// The terminal record of a session
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtype: Option<String>,
    #[serde(default)]
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default)]
    pub cost_usd: f64,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default)]
    pub duration_api_ms: u64,
    #[serde(default)]
    pub is_error: bool,
    #[serde(default)]
    pub num_turns: u32,
}

/// One line of streamed output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamedMessage {
    System(SystemMessage),
    User(ConversationMessage),
    Assistant(ConversationMessage),
    ToolResult(ConversationMessage),
    Result(ResultMessage),
}

impl StreamedMessage {
    /// Decode a single line of stream output
    pub fn from_line(line: &str) -> serde_json::Result<Self> {
        serde_json::from_str(line)
    }

    /// The `type` tag of this record
    pub fn message_type(&self) -> &'static str {
        match self {
            StreamedMessage::System(_) => "system",
            StreamedMessage::User(_) => "user",
            StreamedMessage::Assistant(_) => "assistant",
            StreamedMessage::ToolResult(_) => "tool_result",
            StreamedMessage::Result(_) => "result",
        }
    }

    pub fn session_id(&self) -> &str {
        match self {
            StreamedMessage::System(m) => &m.session_id,
            StreamedMessage::User(m)
            | StreamedMessage::Assistant(m)
            | StreamedMessage::ToolResult(m) => &m.session_id,
            StreamedMessage::Result(m) => &m.session_id,
        }
    }

    /// Nested payload, for variants that carry one
    pub fn payload(&self) -> Option<&serde_json::Value> {
        match self {
            StreamedMessage::System(m) => m.message.as_ref(),
            StreamedMessage::User(m)
            | StreamedMessage::Assistant(m)
            | StreamedMessage::ToolResult(m) => m.message.as_ref(),
            StreamedMessage::Result(_) => None,
        }
    }

    pub fn is_result(&self) -> bool {
        matches!(self, StreamedMessage::Result(_))
    }

    pub fn as_result(&self) -> Option<&ResultMessage> {
        match self {
            StreamedMessage::Result(m) => Some(m),
            _ => None,
        }
    }
}

/// Output of a single-shot JSON-format invocation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtype: Option<String>,
    #[serde(default)]
    pub result: String,
    #[serde(default)]
    pub cost_usd: f64,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default)]
    pub duration_api_ms: u64,
    #[serde(default)]
    pub is_error: bool,
    #[serde(default)]
    pub num_turns: u32,
    #[serde(default)]
    pub session_id: String,
}

impl RunResult {
    /// Wrap plain text output
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            result: text.into(),
            ..Default::default()
        }
    }
}
