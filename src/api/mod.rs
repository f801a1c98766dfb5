//! Session API for session CRUD and recovery queries
//!
//! `SessionApi` abstracts the backend's HTTP surface. `HttpSessionApi`
//! talks to a real backend; `MemorySessionApi` serves tests and embedding.

use crate::error::Result;
use crate::message::Message;
use crate::sessions::SessionState;
use crate::types::{SessionStatus, StreamEvent};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub mod http;
pub mod memory;

/// Backend-reported execution status of one session
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveStatus {
    #[serde(default)]
    pub status: SessionStatus,

    #[serde(default)]
    pub has_unread: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ActiveStatus {
    pub fn running() -> Self {
        Self {
            status: SessionStatus::Running,
            ..Default::default()
        }
    }
}

impl From<ActiveStatus> for SessionState {
    fn from(s: ActiveStatus) -> Self {
        SessionState {
            status: s.status,
            has_unread: s.has_unread,
            error: s.error,
        }
    }
}

/// A session as listed by the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,

    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl SessionSummary {
    pub fn new(id: impl Into<String>, title: Option<&str>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            title: title.map(str::to_string),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Persisted history of one session
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionDetail {
    #[serde(default)]
    pub messages: Vec<Message>,

    /// Endpoint used by the last query, reused by default for the next
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_endpoint: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_model: Option<String>,
}

/// Session CRUD and recovery queries
#[async_trait]
pub trait SessionApi: Send + Sync {
    /// Create a new, empty session
    async fn create(&self, title: Option<&str>) -> Result<SessionSummary>;

    async fn list(&self) -> Result<Vec<SessionSummary>>;

    /// Persisted messages plus last endpoint/model
    async fn get(&self, session_id: &str) -> Result<SessionDetail>;

    async fn delete(&self, session_id: &str) -> Result<()>;

    /// Status of every known session
    async fn get_active_status(&self) -> Result<HashMap<String, ActiveStatus>>;

    /// Cached event log of the session's current turn
    async fn get_events(&self, session_id: &str) -> Result<Vec<StreamEvent>>;

    /// Acknowledge that the user has seen the session's latest output
    async fn mark_read(&self, session_id: &str) -> Result<()>;

    /// Implementation name (e.g., "http", "memory")
    fn name(&self) -> &str;
}
