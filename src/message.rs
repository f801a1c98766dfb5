//! Conversation messages and their typed, stateful blocks

use crate::types::{now_millis, Usage};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Author of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

/// Lifecycle status of a block
///
/// Moves forward only: `pending|streaming → executing → success|error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockStatus {
    Pending,
    Streaming,
    Executing,
    Success,
    Error,
}

impl BlockStatus {
    fn rank(self) -> u8 {
        match self {
            BlockStatus::Pending | BlockStatus::Streaming => 0,
            BlockStatus::Executing => 1,
            BlockStatus::Success | BlockStatus::Error => 2,
        }
    }

    /// Terminal status (`success` or `error`)
    pub fn is_settled(self) -> bool {
        self.rank() == 2
    }

    /// Still receiving content or awaiting a result
    pub fn is_in_flight(self) -> bool {
        matches!(self, BlockStatus::Streaming | BlockStatus::Executing)
    }

    /// Whether `self → next` respects forward-only ordering
    pub fn can_transition(self, next: BlockStatus) -> bool {
        if self.is_settled() {
            return self == next;
        }
        next.rank() >= self.rank()
    }
}

/// Block type discriminator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockKind {
    Text,
    Thinking,
    ToolUse,
    ToolResult,
    Plan,
    AskUser,
}

/// A tool invocation and, once known, its result
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,

    /// Final (or best-effort parsed) arguments
    #[serde(default)]
    pub input: Value,

    /// Raw partial-argument buffer accumulated while streaming
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub raw_input: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    #[serde(default)]
    pub is_error: bool,
}

/// A tool result that could not be attached to a known call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,

    #[serde(default)]
    pub output: Value,

    #[serde(default)]
    pub is_error: bool,
}

/// Derived status of a single plan entry
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanItemStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
}

/// One todo entry of a plan
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanItem {
    pub content: String,

    pub status: PlanItemStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_form: Option<String>,
}

/// Ordered task list tracked by the agent
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub items: Vec<PlanItem>,
}

impl Plan {
    /// Number of completed entries
    pub fn completed(&self) -> usize {
        self.items
            .iter()
            .filter(|i| i.status == PlanItemStatus::Completed)
            .count()
    }
}

/// A selectable option of a question
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuestionOption {
    pub label: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A multiple-choice question posed to the user
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Question {
    pub question: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header: Option<String>,

    #[serde(default)]
    pub options: Vec<QuestionOption>,

    #[serde(default, alias = "multiSelect")]
    pub multi_select: bool,
}

/// Question set of an `ask_user` block
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Questionnaire {
    pub questions: Vec<Question>,

    /// Seconds before the backend treats the request as skipped
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,

    /// Answers given by the user (empty map = skipped)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answers: Option<serde_json::Map<String, Value>>,
}

/// Typed payload of a block; the tag is the block type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BlockContent {
    Text { text: String },
    Thinking { thinking: String },
    ToolUse(ToolCall),
    ToolResult(ToolOutput),
    Plan(Plan),
    AskUser(Questionnaire),
}

impl BlockContent {
    pub fn kind(&self) -> BlockKind {
        match self {
            BlockContent::Text { .. } => BlockKind::Text,
            BlockContent::Thinking { .. } => BlockKind::Thinking,
            BlockContent::ToolUse(_) => BlockKind::ToolUse,
            BlockContent::ToolResult(_) => BlockKind::ToolResult,
            BlockContent::Plan(_) => BlockKind::Plan,
            BlockContent::AskUser(_) => BlockKind::AskUser,
        }
    }
}

/// How a tool result was tied to its block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Correlation {
    /// Matched by protocol call id
    CallId,
    /// Oldest executing block taken for an un-ided result; unverified
    FifoFallback,
}

/// Block flags and correlation ids
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BlockMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,

    #[serde(default, skip_serializing_if = "is_false")]
    pub requires_permission: bool,

    /// Human-readable reason shown with a permission prompt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Transient "thinking…" block shown until the first real event
    #[serde(default, skip_serializing_if = "is_false")]
    pub placeholder: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation: Option<Correlation>,

    /// Permission decision once the user answered
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved: Option<bool>,
}

fn is_false(v: &bool) -> bool {
    !*v
}

/// Atomic render/state unit of a message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageBlock {
    pub id: String,
    pub content: BlockContent,
    pub status: BlockStatus,
    #[serde(default)]
    pub metadata: BlockMetadata,
}

impl MessageBlock {
    pub fn new(id: impl Into<String>, content: BlockContent, status: BlockStatus) -> Self {
        Self {
            id: id.into(),
            content,
            status,
            metadata: BlockMetadata::default(),
        }
    }

    /// The synthetic thinking placeholder of an assistant message
    pub fn placeholder(message_id: &str) -> Self {
        let mut block = Self::new(
            placeholder_id(message_id),
            BlockContent::Thinking {
                thinking: String::new(),
            },
            BlockStatus::Pending,
        );
        block.metadata.placeholder = true;
        block
    }

    pub fn kind(&self) -> BlockKind {
        self.content.kind()
    }

    /// Move to `next` if allowed by forward-only ordering
    pub fn advance(&mut self, next: BlockStatus) -> bool {
        if self.status.can_transition(next) {
            self.status = next;
            true
        } else {
            tracing::debug!(
                block_id = %self.id,
                from = ?self.status,
                to = ?next,
                "Ignoring backward block transition"
            );
            false
        }
    }

    /// Append streamed text to a text or thinking block
    pub fn push_text(&mut self, delta: &str) {
        match &mut self.content {
            BlockContent::Text { text } => text.push_str(delta),
            BlockContent::Thinking { thinking } => thinking.push_str(delta),
            _ => {}
        }
    }

    pub fn tool_call(&self) -> Option<&ToolCall> {
        match &self.content {
            BlockContent::ToolUse(call) => Some(call),
            _ => None,
        }
    }

    pub fn tool_call_mut(&mut self) -> Option<&mut ToolCall> {
        match &mut self.content {
            BlockContent::ToolUse(call) => Some(call),
            _ => None,
        }
    }
}

/// Id of the thinking placeholder for a message
pub fn placeholder_id(message_id: &str) -> String {
    format!("{}-thinking-placeholder", message_id)
}

/// One turn's output (or the user's request)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: Role,

    /// Flat accumulated text, kept for compatibility
    #[serde(default)]
    pub content: String,

    #[serde(default)]
    pub blocks: Vec<MessageBlock>,

    #[serde(default)]
    pub is_streaming: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,

    /// Unix timestamp in milliseconds
    #[serde(default)]
    pub timestamp: u64,
}

impl Message {
    /// A user message with a single text block
    pub fn user(content: impl Into<String>) -> Self {
        let id = format!("msg-{}", uuid::Uuid::new_v4());
        let content = content.into();
        let block = MessageBlock::new(
            format!("{}-text", id),
            BlockContent::Text {
                text: content.clone(),
            },
            BlockStatus::Success,
        );
        Self {
            id,
            role: Role::User,
            content,
            blocks: vec![block],
            is_streaming: false,
            usage: None,
            timestamp: now_millis(),
        }
    }

    /// An empty assistant message carrying only the thinking placeholder
    pub fn assistant_shell(id: impl Into<String>) -> Self {
        let id = id.into();
        let placeholder = MessageBlock::placeholder(&id);
        Self {
            id,
            role: Role::Assistant,
            content: String::new(),
            blocks: vec![placeholder],
            is_streaming: false,
            usage: None,
            timestamp: now_millis(),
        }
    }

    pub fn block(&self, id: &str) -> Option<&MessageBlock> {
        self.blocks.iter().find(|b| b.id == id)
    }

    pub fn block_mut(&mut self, id: &str) -> Option<&mut MessageBlock> {
        self.blocks.iter_mut().find(|b| b.id == id)
    }

    /// Delete a block, returning it
    pub fn remove_block(&mut self, id: &str) -> Option<MessageBlock> {
        let idx = self.blocks.iter().position(|b| b.id == id)?;
        Some(self.blocks.remove(idx))
    }

    /// Replace the block with the same id in place, or append it
    pub fn upsert_block(&mut self, block: MessageBlock) {
        match self.blocks.iter_mut().find(|b| b.id == block.id) {
            Some(existing) => *existing = block,
            None => self.blocks.push(block),
        }
    }

    /// Whether the thinking placeholder is still present
    pub fn has_placeholder(&self) -> bool {
        self.blocks.iter().any(|b| b.metadata.placeholder)
    }

    /// Blocks of a given kind, in render order
    pub fn blocks_of(&self, kind: BlockKind) -> impl Iterator<Item = &MessageBlock> {
        self.blocks.iter().filter(move |b| b.kind() == kind)
    }
}
