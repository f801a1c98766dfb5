//! Outbound commands (client → backend)
//!
//! Every command is a JSON object with a `type` discriminator.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Tool permission policy requested for a query
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionMode {
    /// Ask before each sensitive tool call
    #[default]
    Default,
    /// Auto-approve file edits
    AcceptEdits,
    /// Read-only planning
    Plan,
    /// Never ask
    BypassPermissions,
}

/// Per-query overrides
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(default)]
    pub permission_mode: PermissionMode,
}

/// Commands sent over the shared connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientCommand {
    /// Start a task; no session id means "create a new session"
    Query {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        endpoint: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        model: Option<String>,
        #[serde(default)]
        permission_mode: PermissionMode,
    },

    /// Start receiving (replayed, then live) events for a session
    Subscribe { session_id: String },

    /// Stop receiving events for a session
    Unsubscribe { session_id: String },

    /// Answer an `ask_user` request; an empty map means skipped
    UserResponse {
        request_id: String,
        answers: Map<String, Value>,
    },

    /// Approve or deny a `permission_request`
    PermissionResponse { request_id: String, approved: bool },
}

impl ClientCommand {
    pub fn query(session_id: Option<&str>, content: impl Into<String>, opts: QueryOptions) -> Self {
        ClientCommand::Query {
            session_id: session_id.map(str::to_string),
            content: content.into(),
            endpoint: opts.endpoint,
            model: opts.model,
            permission_mode: opts.permission_mode,
        }
    }

    pub fn subscribe(session_id: impl Into<String>) -> Self {
        ClientCommand::Subscribe {
            session_id: session_id.into(),
        }
    }

    pub fn unsubscribe(session_id: impl Into<String>) -> Self {
        ClientCommand::Unsubscribe {
            session_id: session_id.into(),
        }
    }

    pub fn user_response(request_id: impl Into<String>, answers: Map<String, Value>) -> Self {
        ClientCommand::UserResponse {
            request_id: request_id.into(),
            answers,
        }
    }

    pub fn permission_response(request_id: impl Into<String>, approved: bool) -> Self {
        ClientCommand::PermissionResponse {
            request_id: request_id.into(),
            approved,
        }
    }

    /// Wire name of the command type
    pub fn name(&self) -> &'static str {
        match self {
            ClientCommand::Query { .. } => "query",
            ClientCommand::Subscribe { .. } => "subscribe",
            ClientCommand::Unsubscribe { .. } => "unsubscribe",
            ClientCommand::UserResponse { .. } => "user_response",
            ClientCommand::PermissionResponse { .. } => "permission_response",
        }
    }

    /// Encode as a JSON text frame
    pub fn encode(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
