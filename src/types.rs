//! Wire-level stream event types
//!
//! Inbound events use snake_case JSON for compatibility with the agent
//! backend: `{type, content, metadata: {session_id, ...}, id?, usage?}`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Closed set of inbound event types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Start,
    ThinkingStart,
    ThinkingDelta,
    ThinkingEnd,
    /// Whole-block reasoning (compatibility echo of the incremental form)
    Thinking,
    TextStart,
    TextDelta,
    TextEnd,
    /// Whole-block text (compatibility echo of the incremental form)
    Text,
    ToolInputStart,
    ToolInputDelta,
    ToolInputEnd,
    ToolUse,
    ToolResult,
    Todos,
    AskUser,
    PermissionRequest,
    Done,
    Error,
}

impl EventKind {
    /// Whether this event ends the turn
    pub fn is_terminal(self) -> bool {
        matches!(self, EventKind::Done | EventKind::Error)
    }

    /// Wire name of the event type
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Start => "start",
            EventKind::ThinkingStart => "thinking_start",
            EventKind::ThinkingDelta => "thinking_delta",
            EventKind::ThinkingEnd => "thinking_end",
            EventKind::Thinking => "thinking",
            EventKind::TextStart => "text_start",
            EventKind::TextDelta => "text_delta",
            EventKind::TextEnd => "text_end",
            EventKind::Text => "text",
            EventKind::ToolInputStart => "tool_input_start",
            EventKind::ToolInputDelta => "tool_input_delta",
            EventKind::ToolInputEnd => "tool_input_end",
            EventKind::ToolUse => "tool_use",
            EventKind::ToolResult => "tool_result",
            EventKind::Todos => "todos",
            EventKind::AskUser => "ask_user",
            EventKind::PermissionRequest => "permission_request",
            EventKind::Done => "done",
            EventKind::Error => "error",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event routing metadata
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventMetadata {
    /// Owning session; events without one are dropped by the router
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,

    /// Optional event subtype
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtype: Option<String>,

    /// Any other backend-supplied keys
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// Token counters attached to a terminal `done` event
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub input_tokens: u64,

    #[serde(default)]
    pub output_tokens: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_read_input_tokens: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_creation_input_tokens: Option<u64>,
}

impl Usage {
    /// Input plus output tokens
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// A single inbound protocol event
///
/// Events are immutable and consumed exactly once, in transport order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamEvent {
    /// Event type discriminator
    #[serde(rename = "type")]
    pub kind: EventKind,

    /// Type-dependent payload
    #[serde(default)]
    pub content: Value,

    /// Routing metadata (owning session id, subtype)
    #[serde(default)]
    pub metadata: EventMetadata,

    /// Correlation id tying a tool call's streamed sub-events together
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Token usage, present only on `done`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl StreamEvent {
    /// Create an event for a session with the given payload
    pub fn new(kind: EventKind, session_id: impl Into<String>, content: Value) -> Self {
        Self {
            kind,
            content,
            metadata: EventMetadata {
                session_id: Some(session_id.into()),
                ..Default::default()
            },
            id: None,
            usage: None,
        }
    }

    /// Set the correlation id
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Attach token usage
    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = Some(usage);
        self
    }

    /// Decode an event from a raw JSON frame
    pub fn from_json(frame: &str) -> crate::Result<Self> {
        serde_json::from_str(frame).map_err(|e| crate::SessionError::MalformedEvent {
            reason: e.to_string(),
        })
    }

    /// Owning session id, if present and non-empty
    pub fn session_id(&self) -> Option<&str> {
        self.metadata
            .session_id
            .as_deref()
            .filter(|id| !id.is_empty())
    }

    /// Textual payload: the content itself when it is a string, otherwise
    /// its `text`, `content` or `message` field
    pub fn text(&self) -> String {
        match &self.content {
            Value::String(s) => s.clone(),
            Value::Object(map) => ["text", "content", "message"]
                .iter()
                .find_map(|key| map.get(*key).and_then(Value::as_str))
                .unwrap_or_default()
                .to_string(),
            _ => String::new(),
        }
    }

    /// A field of an object payload
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.content.as_object().and_then(|map| map.get(key))
    }

    /// A string field of an object payload
    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.field(key).and_then(Value::as_str).filter(|s| !s.is_empty())
    }
}

/// Execution status of a session as seen by the client
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    Idle,
    Running,
    Error,
}

impl SessionStatus {
    pub fn is_running(self) -> bool {
        self == SessionStatus::Running
    }
}

/// Current time in Unix milliseconds
pub(crate) fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
