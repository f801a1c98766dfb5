//! Block reconstruction: fold one turn's events into an assistant message
//!
//! `TurnState` is the whole per-turn reducer state; `apply` is a pure
//! `(state, message, event) → (state', message')` step with an exhaustive
//! match over `EventKind`. Block ids are derived from the message id, a
//! per-turn counter, call ids and request ids, so folding the same event
//! log twice yields identical blocks.

pub mod correlation;
pub mod plan;

use crate::message::{BlockContent, BlockStatus, Message, MessageBlock, ToolCall, ToolOutput};
use crate::types::{EventKind, StreamEvent, Usage};
use correlation::ToolCallTable;
use plan::{classify_tool, parse_plan, parse_questionnaire, ToolRole};
use serde_json::Value;
use std::collections::HashSet;

/// The two shapes the backend uses for the same text or reasoning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentForm {
    /// One complete `text` / `thinking` event
    WholeBlock,
    /// `*_start`, `*_delta`, `*_end`
    Incremental,
}

/// Suppresses whole-block echoes once the incremental form was seen
#[derive(Debug, Clone, Copy, Default)]
struct FormGate {
    incremental_seen: bool,
}

impl FormGate {
    fn admit(&mut self, form: ContentForm) -> bool {
        match form {
            ContentForm::Incremental => {
                self.incremental_seen = true;
                true
            }
            ContentForm::WholeBlock => !self.incremental_seen,
        }
    }
}

/// How a turn ended
#[derive(Debug, Clone, PartialEq)]
pub enum TurnEnd {
    Done { usage: Option<Usage> },
    Error { message: String },
}

/// Result of applying one event
#[derive(Debug, Clone, PartialEq)]
pub enum TurnStep {
    Applied,
    /// Event had no effect (duplicate form, suppressed tool, finished turn)
    Ignored,
    Finished(TurnEnd),
}

/// Reducer state for one in-flight turn
#[derive(Debug, Clone)]
pub struct TurnState {
    message_id: String,
    placeholder_id: String,
    placeholder_removed: bool,
    open_text: Option<String>,
    open_thinking: Option<String>,
    /// Streaming tool block that un-ided input deltas append to
    open_tool: Option<String>,
    tools: ToolCallTable,
    text_form: FormGate,
    thinking_form: FormGate,
    /// Plan and ask-user calls rendered elsewhere
    suppressed_calls: HashSet<String>,
    next_seq: u32,
    finished: bool,
    applied: usize,
}

impl TurnState {
    pub fn new(message_id: impl Into<String>) -> Self {
        let message_id = message_id.into();
        Self {
            placeholder_id: crate::message::placeholder_id(&message_id),
            message_id,
            placeholder_removed: false,
            open_text: None,
            open_thinking: None,
            open_tool: None,
            tools: ToolCallTable::new(),
            text_form: FormGate::default(),
            thinking_form: FormGate::default(),
            suppressed_calls: HashSet::new(),
            next_seq: 0,
            finished: false,
            applied: 0,
        }
    }

    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    /// Whether a terminal event was applied
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Number of events applied (ignored ones included)
    pub fn applied(&self) -> usize {
        self.applied
    }

    pub fn tools(&self) -> &ToolCallTable {
        &self.tools
    }

    /// Apply one event to the turn's assistant message
    pub fn apply(&mut self, message: &mut Message, event: &StreamEvent) -> TurnStep {
        if self.finished {
            tracing::debug!(
                message_id = %self.message_id,
                kind = %event.kind,
                "Ignoring event after end of turn"
            );
            return TurnStep::Ignored;
        }
        self.applied += 1;
        if event.kind != EventKind::Start {
            self.drop_placeholder(message);
        }

        match event.kind {
            EventKind::Start => TurnStep::Applied,

            EventKind::ThinkingStart => {
                self.thinking_form.admit(ContentForm::Incremental);
                self.open_thinking_block(message);
                TurnStep::Applied
            }
            EventKind::ThinkingDelta => {
                self.thinking_form.admit(ContentForm::Incremental);
                let id = match self.open_thinking.clone() {
                    Some(id) => id,
                    None => self.open_thinking_block(message),
                };
                if let Some(block) = message.block_mut(&id) {
                    block.push_text(&event.text());
                }
                TurnStep::Applied
            }
            EventKind::ThinkingEnd => {
                if let Some(id) = self.open_thinking.take() {
                    settle(message, &id, BlockStatus::Success);
                }
                TurnStep::Applied
            }
            EventKind::Thinking => {
                if !self.thinking_form.admit(ContentForm::WholeBlock) {
                    return TurnStep::Ignored;
                }
                let id = self.seq_id("thinking");
                message.blocks.push(MessageBlock::new(
                    id,
                    BlockContent::Thinking {
                        thinking: event.text(),
                    },
                    BlockStatus::Success,
                ));
                TurnStep::Applied
            }

            EventKind::TextStart => {
                self.text_form.admit(ContentForm::Incremental);
                self.open_text_block(message);
                TurnStep::Applied
            }
            EventKind::TextDelta => {
                self.text_form.admit(ContentForm::Incremental);
                let id = match self.open_text.clone() {
                    Some(id) => id,
                    None => self.open_text_block(message),
                };
                let delta = event.text();
                if let Some(block) = message.block_mut(&id) {
                    block.push_text(&delta);
                }
                message.content.push_str(&delta);
                TurnStep::Applied
            }
            EventKind::TextEnd => {
                if let Some(id) = self.open_text.take() {
                    settle(message, &id, BlockStatus::Success);
                }
                message.is_streaming = false;
                TurnStep::Applied
            }
            EventKind::Text => {
                if !self.text_form.admit(ContentForm::WholeBlock) {
                    return TurnStep::Ignored;
                }
                let text = event.text();
                message.content.push_str(&text);
                let id = self.seq_id("text");
                message.blocks.push(MessageBlock::new(
                    id,
                    BlockContent::Text { text },
                    BlockStatus::Success,
                ));
                TurnStep::Applied
            }

            EventKind::ToolInputStart => self.tool_input_start(message, event),
            EventKind::ToolInputDelta => self.tool_input_delta(message, event),
            EventKind::ToolInputEnd => self.tool_input_end(message, event),
            EventKind::ToolUse => self.tool_use(message, event),
            EventKind::ToolResult => self.tool_result(message, event),

            EventKind::Todos => {
                self.upsert_plan(message, &event.content);
                TurnStep::Applied
            }
            EventKind::AskUser => self.ask_user(message, event),
            EventKind::PermissionRequest => self.permission_request(message, event),

            EventKind::Done => {
                for block in message.blocks.iter_mut() {
                    if block.status.is_in_flight() {
                        block.advance(BlockStatus::Success);
                    }
                }
                if event.usage.is_some() {
                    message.usage = event.usage.clone();
                }
                self.finish(message);
                TurnStep::Finished(TurnEnd::Done {
                    usage: event.usage.clone(),
                })
            }
            EventKind::Error => {
                let text = match event.text() {
                    t if t.is_empty() => "Unknown error".to_string(),
                    t => t,
                };
                for block in message.blocks.iter_mut() {
                    if block.status.is_in_flight() {
                        block.advance(BlockStatus::Error);
                    }
                }
                message.upsert_block(MessageBlock::new(
                    format!("{}-error", self.message_id),
                    BlockContent::Text { text: text.clone() },
                    BlockStatus::Error,
                ));
                self.finish(message);
                tracing::warn!(message_id = %self.message_id, error = %text, "Turn failed");
                TurnStep::Finished(TurnEnd::Error { message: text })
            }
        }
    }

    fn finish(&mut self, message: &mut Message) {
        message.is_streaming = false;
        self.open_text = None;
        self.open_thinking = None;
        self.open_tool = None;
        self.finished = true;
    }

    fn drop_placeholder(&mut self, message: &mut Message) {
        if !self.placeholder_removed {
            message.remove_block(&self.placeholder_id);
            self.placeholder_removed = true;
        }
    }

    fn seq_id(&mut self, kind: &str) -> String {
        self.next_seq += 1;
        format!("{}-{}-{}", self.message_id, kind, self.next_seq)
    }

    fn open_thinking_block(&mut self, message: &mut Message) -> String {
        let id = self.seq_id("thinking");
        message.blocks.push(MessageBlock::new(
            id.clone(),
            BlockContent::Thinking {
                thinking: String::new(),
            },
            BlockStatus::Streaming,
        ));
        self.open_thinking = Some(id.clone());
        id
    }

    fn open_text_block(&mut self, message: &mut Message) -> String {
        let id = self.seq_id("text");
        message.blocks.push(MessageBlock::new(
            id.clone(),
            BlockContent::Text {
                text: String::new(),
            },
            BlockStatus::Streaming,
        ));
        message.is_streaming = true;
        self.open_text = Some(id.clone());
        id
    }

    fn tool_block_id(&mut self, call_id: Option<&str>) -> String {
        match call_id {
            Some(call_id) => format!("{}-tool-{}", self.message_id, call_id),
            None => self.seq_id("tool"),
        }
    }

    /// Block targeted by a tool input event: by call id, else the open one
    fn input_target(&self, call_id: Option<&str>) -> Option<String> {
        match call_id {
            Some(call_id) => self.tools.lookup(call_id).map(str::to_string),
            None => self.open_tool.clone(),
        }
    }

    fn tool_input_start(&mut self, message: &mut Message, event: &StreamEvent) -> TurnStep {
        let call_id = call_id_of(event);
        let name = match &event.content {
            Value::String(name) => name.clone(),
            _ => event.str_field("name").unwrap_or_default().to_string(),
        };
        if classify_tool(&name) != ToolRole::Generic {
            if let Some(call_id) = call_id {
                self.suppressed_calls.insert(call_id.to_string());
            }
            return TurnStep::Ignored;
        }
        if let Some(existing) = call_id.and_then(|id| self.tools.lookup(id)) {
            self.open_tool = Some(existing.to_string());
            return TurnStep::Ignored;
        }

        let block_id = self.tool_block_id(call_id);
        let mut block = MessageBlock::new(
            block_id.clone(),
            BlockContent::ToolUse(ToolCall {
                name: name.clone(),
                ..Default::default()
            }),
            BlockStatus::Streaming,
        );
        block.metadata.tool_name = Some(name).filter(|n| !n.is_empty());
        block.metadata.call_id = call_id.map(str::to_string);
        message.blocks.push(block);

        if let Some(call_id) = call_id {
            self.tools.bind(call_id, &block_id);
        }
        self.open_tool = Some(block_id);
        TurnStep::Applied
    }

    fn tool_input_delta(&mut self, message: &mut Message, event: &StreamEvent) -> TurnStep {
        let call_id = call_id_of(event);
        if call_id.is_some_and(|id| self.suppressed_calls.contains(id)) {
            return TurnStep::Ignored;
        }
        let Some(block_id) = self.input_target(call_id) else {
            tracing::debug!(call_id = ?call_id, "Tool input delta without open tool block");
            return TurnStep::Ignored;
        };
        let delta = event.text();
        match message
            .block_mut(&block_id)
            .and_then(MessageBlock::tool_call_mut)
        {
            Some(call) => {
                call.raw_input.push_str(&delta);
                TurnStep::Applied
            }
            None => TurnStep::Ignored,
        }
    }

    fn tool_input_end(&mut self, message: &mut Message, event: &StreamEvent) -> TurnStep {
        let call_id = call_id_of(event);
        if call_id.is_some_and(|id| self.suppressed_calls.contains(id)) {
            return TurnStep::Ignored;
        }
        let Some(block_id) = self.input_target(call_id) else {
            return TurnStep::Ignored;
        };
        let Some(block) = message.block_mut(&block_id) else {
            return TurnStep::Ignored;
        };
        if let Some(call) = block.tool_call_mut() {
            if let Ok(input) = serde_json::from_str::<Value>(&call.raw_input) {
                call.input = input;
            }
        }
        if block.advance(BlockStatus::Executing) && block.status == BlockStatus::Executing {
            self.tools.mark_executing(&block_id);
        }
        if self.open_tool.as_deref() == Some(block_id.as_str()) {
            self.open_tool = None;
        }
        TurnStep::Applied
    }

    fn tool_use(&mut self, message: &mut Message, event: &StreamEvent) -> TurnStep {
        let call_id = call_id_of(event);
        let name = event.str_field("name").unwrap_or_default().to_string();
        let input = event.field("input").cloned().unwrap_or(Value::Null);

        let role = classify_tool(&name);
        if role != ToolRole::Generic {
            let mut removed = false;
            if let Some(call_id) = call_id {
                self.suppressed_calls.insert(call_id.to_string());
                if let Some(block_id) = self.tools.lookup(call_id).map(str::to_string) {
                    removed = message.remove_block(&block_id).is_some();
                    self.tools.forget(call_id);
                    if self.open_tool.as_deref() == Some(block_id.as_str()) {
                        self.open_tool = None;
                    }
                }
            }
            return match role {
                ToolRole::Plan => {
                    self.upsert_plan(message, &input);
                    TurnStep::Applied
                }
                _ if removed => TurnStep::Applied,
                _ => TurnStep::Ignored,
            };
        }

        let existing = call_id
            .and_then(|id| self.tools.lookup(id))
            .map(str::to_string)
            .filter(|id| message.block(id).is_some());

        let block_id = match existing {
            Some(block_id) => {
                let Some(block) = message.block_mut(&block_id) else {
                    return TurnStep::Ignored;
                };
                if let Some(call) = block.tool_call_mut() {
                    if !name.is_empty() {
                        call.name = name.clone();
                    }
                    if !input.is_null() {
                        call.input = input;
                    }
                }
                if !name.is_empty() {
                    block.metadata.tool_name = Some(name);
                }
                if !(block.advance(BlockStatus::Executing)
                    && block.status == BlockStatus::Executing)
                {
                    return TurnStep::Applied;
                }
                if self.open_tool.as_deref() == Some(block_id.as_str()) {
                    self.open_tool = None;
                }
                block_id
            }
            None => {
                let block_id = self.tool_block_id(call_id);
                let mut block = MessageBlock::new(
                    block_id.clone(),
                    BlockContent::ToolUse(ToolCall {
                        name: name.clone(),
                        input,
                        ..Default::default()
                    }),
                    BlockStatus::Executing,
                );
                block.metadata.tool_name = Some(name).filter(|n| !n.is_empty());
                block.metadata.call_id = call_id.map(str::to_string);
                message.blocks.push(block);
                if let Some(call_id) = call_id {
                    self.tools.bind(call_id, &block_id);
                }
                block_id
            }
        };
        self.tools.mark_executing(&block_id);
        TurnStep::Applied
    }

    fn tool_result(&mut self, message: &mut Message, event: &StreamEvent) -> TurnStep {
        let call_id = event
            .str_field("tool_use_id")
            .or(event.id.as_deref().filter(|id| !id.is_empty()));
        if call_id.is_some_and(|id| self.suppressed_calls.contains(id)) {
            return TurnStep::Ignored;
        }

        let (output, is_error) = match &event.content {
            Value::Object(map) => (
                map.get("content")
                    .or_else(|| map.get("output"))
                    .cloned()
                    .unwrap_or(Value::Null),
                map.get("is_error")
                    .or_else(|| map.get("isError"))
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
            ),
            other => (other.clone(), false),
        };
        let status = if is_error {
            BlockStatus::Error
        } else {
            BlockStatus::Success
        };

        if let Some(resolution) = self.tools.resolve(call_id) {
            if let Some(block) = message.block_mut(&resolution.block_id) {
                if let Some(call) = block.tool_call_mut() {
                    call.result = Some(output);
                    call.is_error = is_error;
                }
                block.metadata.correlation = Some(resolution.correlation);
                block.advance(status);
                return TurnStep::Applied;
            }
        }

        let id = match call_id {
            Some(call_id) => format!("{}-result-{}", self.message_id, call_id),
            None => self.seq_id("result"),
        };
        tracing::debug!(block_id = %id, "Tool result without matching call");
        message.upsert_block(MessageBlock::new(
            id,
            BlockContent::ToolResult(ToolOutput {
                call_id: call_id.map(str::to_string),
                output,
                is_error,
            }),
            status,
        ));
        TurnStep::Applied
    }

    fn upsert_plan(&mut self, message: &mut Message, payload: &Value) {
        message.upsert_block(MessageBlock::new(
            format!("{}-plan", self.message_id),
            BlockContent::Plan(parse_plan(payload)),
            BlockStatus::Success,
        ));
    }

    fn ask_user(&mut self, message: &mut Message, event: &StreamEvent) -> TurnStep {
        let Some(request_id) = request_id_of(event) else {
            tracing::warn!(message_id = %self.message_id, "ask_user without request id");
            return TurnStep::Ignored;
        };
        let id = format!("ask-{}", request_id);
        if message.block(&id).is_some_and(|b| b.status.is_settled()) {
            return TurnStep::Ignored;
        }
        let mut block = MessageBlock::new(
            id,
            BlockContent::AskUser(parse_questionnaire(&event.content)),
            BlockStatus::Pending,
        );
        block.metadata.request_id = Some(request_id.to_string());
        message.upsert_block(block);
        TurnStep::Applied
    }

    fn permission_request(&mut self, message: &mut Message, event: &StreamEvent) -> TurnStep {
        let Some(request_id) = request_id_of(event) else {
            tracing::warn!(message_id = %self.message_id, "permission_request without request id");
            return TurnStep::Ignored;
        };
        let id = format!("permission-{}", request_id);
        if message.block(&id).is_some_and(|b| b.status.is_settled()) {
            return TurnStep::Ignored;
        }
        let tool_name = event.str_field("tool_name").unwrap_or_default().to_string();
        let mut block = MessageBlock::new(
            id,
            BlockContent::ToolUse(ToolCall {
                name: tool_name.clone(),
                input: event.field("input").cloned().unwrap_or(Value::Null),
                ..Default::default()
            }),
            BlockStatus::Pending,
        );
        block.metadata.request_id = Some(request_id.to_string());
        block.metadata.requires_permission = true;
        block.metadata.tool_name = Some(tool_name).filter(|n| !n.is_empty());
        block.metadata.description = event.str_field("description").map(str::to_string);
        message.upsert_block(block);
        TurnStep::Applied
    }
}

fn call_id_of(event: &StreamEvent) -> Option<&str> {
    event
        .id
        .as_deref()
        .filter(|id| !id.is_empty())
        .or_else(|| event.str_field("id"))
}

fn request_id_of(event: &StreamEvent) -> Option<&str> {
    event
        .str_field("request_id")
        .or(event.id.as_deref().filter(|id| !id.is_empty()))
}

fn settle(message: &mut Message, block_id: &str, status: BlockStatus) {
    if let Some(block) = message.block_mut(block_id) {
        block.advance(status);
    }
}

/// Rebuild an assistant message from scratch by folding an event log
pub fn reconstruct<'a>(
    message_id: &str,
    events: impl IntoIterator<Item = &'a StreamEvent>,
) -> Message {
    let mut message = Message::assistant_shell(message_id);
    let mut state = TurnState::new(message_id);
    for event in events {
        state.apply(&mut message, event);
    }
    message
}
