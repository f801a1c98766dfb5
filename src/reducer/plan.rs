//! Special tool roles and payload parsing for plan and question blocks

use crate::message::{Plan, PlanItem, PlanItemStatus, Question, Questionnaire};
use serde_json::Value;

/// How a tool call is rendered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolRole {
    /// Regular `tool_use` block
    Generic,
    /// Task tracking; unpacked into the message's plan block
    Plan,
    /// Multiple-choice question; the dedicated `ask_user` event renders it
    AskUser,
}

const PLAN_TOOLS: &[&str] = &["todowrite", "todo_write", "update_plan"];
const ASK_TOOLS: &[&str] = &["askuserquestion", "ask_user_question", "ask_user"];

/// Classify a tool by name (case-insensitive)
pub fn classify_tool(name: &str) -> ToolRole {
    let name = name.to_ascii_lowercase();
    if PLAN_TOOLS.contains(&name.as_str()) {
        ToolRole::Plan
    } else if ASK_TOOLS.contains(&name.as_str()) {
        ToolRole::AskUser
    } else {
        ToolRole::Generic
    }
}

/// Parse a plan from `{todos: [...]}`, `{plan: [...]}` or a bare array
///
/// Entries that carry no text are skipped.
pub fn parse_plan(value: &Value) -> Plan {
    let entries = match value {
        Value::Array(items) => items.as_slice(),
        Value::Object(map) => map
            .get("todos")
            .or_else(|| map.get("plan"))
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default(),
        _ => &[],
    };

    let items = entries
        .iter()
        .filter_map(|entry| {
            let content = ["content", "step", "title"]
                .iter()
                .find_map(|key| entry.get(*key).and_then(Value::as_str))?;
            Some(PlanItem {
                content: content.to_string(),
                status: entry
                    .get("status")
                    .and_then(Value::as_str)
                    .map(item_status)
                    .unwrap_or_default(),
                active_form: entry
                    .get("activeForm")
                    .or_else(|| entry.get("active_form"))
                    .and_then(Value::as_str)
                    .map(str::to_string),
            })
        })
        .collect();
    Plan { items }
}

fn item_status(raw: &str) -> PlanItemStatus {
    match raw {
        "completed" | "done" => PlanItemStatus::Completed,
        "in_progress" | "in-progress" | "active" => PlanItemStatus::InProgress,
        _ => PlanItemStatus::Pending,
    }
}

/// Parse the question set of an `ask_user` payload
pub fn parse_questionnaire(value: &Value) -> Questionnaire {
    let questions = value
        .get("questions")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|q| match serde_json::from_value::<Question>(q.clone()) {
                    Ok(q) => Some(q),
                    Err(e) => {
                        tracing::warn!(error = %e, "Skipping malformed question");
                        None
                    }
                })
                .collect()
        })
        .unwrap_or_default();

    Questionnaire {
        questions,
        timeout_secs: value.get("timeout").and_then(Value::as_u64),
        answers: None,
    }
}
