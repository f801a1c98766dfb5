//! In-memory session API for testing and single-process use

use super::{ActiveStatus, SessionApi, SessionDetail, SessionSummary};
use crate::error::{Result, SessionError};
use crate::message::Message;
use crate::types::StreamEvent;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Default)]
struct StoredSession {
    summary: Option<SessionSummary>,
    detail: SessionDetail,
    status: ActiveStatus,
    events: Vec<StreamEvent>,
}

#[derive(Default)]
struct MemoryState {
    sessions: BTreeMap<String, StoredSession>,
    failing_events: HashSet<String>,
    fail_status: bool,
    read_log: Vec<String>,
}

/// Session API backed by in-process maps
///
/// Cloning shares the same state, so a test can keep a handle while the
/// workspace owns another.
#[derive(Clone, Default)]
pub struct MemorySessionApi {
    state: Arc<RwLock<MemoryState>>,
}

impl MemorySessionApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or update a session's reported status
    pub async fn set_status(&self, session_id: &str, status: ActiveStatus) {
        let mut state = self.state.write().await;
        let session = entry(&mut state, session_id);
        session.status = status;
    }

    /// Set the cached event log returned by `get_events`
    pub async fn set_events(&self, session_id: &str, events: Vec<StreamEvent>) {
        let mut state = self.state.write().await;
        entry(&mut state, session_id).events = events;
    }

    /// Set the persisted history returned by `get`
    pub async fn set_messages(&self, session_id: &str, messages: Vec<Message>) {
        let mut state = self.state.write().await;
        entry(&mut state, session_id).detail.messages = messages;
    }

    /// Make `get_events` fail for a session
    pub async fn fail_events_for(&self, session_id: &str) {
        self.state
            .write()
            .await
            .failing_events
            .insert(session_id.to_string());
    }

    /// Make `get_active_status` fail
    pub async fn fail_status(&self, fail: bool) {
        self.state.write().await.fail_status = fail;
    }

    /// Sessions acknowledged through `mark_read`, in call order
    pub async fn read_log(&self) -> Vec<String> {
        self.state.read().await.read_log.clone()
    }

    pub async fn contains(&self, session_id: &str) -> bool {
        self.state.read().await.sessions.contains_key(session_id)
    }
}

fn entry<'a>(state: &'a mut MemoryState, session_id: &str) -> &'a mut StoredSession {
    state
        .sessions
        .entry(session_id.to_string())
        .or_insert_with(|| StoredSession {
            summary: Some(SessionSummary::new(session_id, None)),
            ..Default::default()
        })
}

#[async_trait]
impl SessionApi for MemorySessionApi {
    async fn create(&self, title: Option<&str>) -> Result<SessionSummary> {
        let id = uuid::Uuid::new_v4().to_string();
        let summary = SessionSummary::new(&id, title);
        let mut state = self.state.write().await;
        state.sessions.insert(
            id,
            StoredSession {
                summary: Some(summary.clone()),
                ..Default::default()
            },
        );
        Ok(summary)
    }

    async fn list(&self) -> Result<Vec<SessionSummary>> {
        let state = self.state.read().await;
        Ok(state
            .sessions
            .values()
            .filter_map(|s| s.summary.clone())
            .collect())
    }

    async fn get(&self, session_id: &str) -> Result<SessionDetail> {
        let state = self.state.read().await;
        state
            .sessions
            .get(session_id)
            .map(|s| s.detail.clone())
            .ok_or_else(|| SessionError::NotFound(format!("session '{}'", session_id)))
    }

    async fn delete(&self, session_id: &str) -> Result<()> {
        let mut state = self.state.write().await;
        state
            .sessions
            .remove(session_id)
            .map(|_| ())
            .ok_or_else(|| SessionError::NotFound(format!("session '{}'", session_id)))
    }

    async fn get_active_status(&self) -> Result<HashMap<String, ActiveStatus>> {
        let state = self.state.read().await;
        if state.fail_status {
            return Err(SessionError::Api("status query unavailable".into()));
        }
        Ok(state
            .sessions
            .iter()
            .map(|(id, s)| (id.clone(), s.status.clone()))
            .collect())
    }

    async fn get_events(&self, session_id: &str) -> Result<Vec<StreamEvent>> {
        let state = self.state.read().await;
        if state.failing_events.contains(session_id) {
            return Err(SessionError::Api(format!(
                "events of '{}' unavailable",
                session_id
            )));
        }
        Ok(state
            .sessions
            .get(session_id)
            .map(|s| s.events.clone())
            .unwrap_or_default())
    }

    async fn mark_read(&self, session_id: &str) -> Result<()> {
        let mut state = self.state.write().await;
        if let Some(session) = state.sessions.get_mut(session_id) {
            session.status.has_unread = false;
        }
        state.read_log.push(session_id.to_string());
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}
