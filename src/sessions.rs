//! Session status table kept current by the catch-all handler

use crate::types::{EventKind, SessionStatus, StreamEvent};
use std::collections::HashMap;

/// Client-side state of one session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    pub status: SessionStatus,
    pub has_unread: bool,
    pub error: Option<String>,
}

/// A status transition caused by an event or a local action
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChange {
    pub session_id: String,
    pub from: SessionStatus,
    pub to: SessionStatus,
    pub error: Option<String>,
}

/// Status of every known session plus the viewed one
#[derive(Debug, Clone, Default)]
pub struct SessionTable {
    sessions: HashMap<String, SessionState>,
    viewed: Option<String>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track status from a routed event
    ///
    /// `start` → running; `done` → idle, unread unless viewed;
    /// `error` → error with its message. Other events change nothing.
    pub fn apply_event(&mut self, event: &StreamEvent) -> Option<StatusChange> {
        let session_id = event.session_id()?;
        let viewed = self.viewed.as_deref() == Some(session_id);
        let state = self.sessions.entry(session_id.to_string()).or_default();
        let from = state.status;

        match event.kind {
            EventKind::Start => {
                state.status = SessionStatus::Running;
                state.error = None;
            }
            EventKind::Done => {
                state.status = SessionStatus::Idle;
                state.error = None;
                state.has_unread = !viewed;
            }
            EventKind::Error => {
                let text = event.text();
                state.status = SessionStatus::Error;
                state.error = Some(if text.is_empty() {
                    "Unknown error".to_string()
                } else {
                    text
                });
            }
            _ => return None,
        }

        if from == state.status && event.kind != EventKind::Error {
            return None;
        }
        tracing::debug!(session_id, from = ?from, to = ?state.status, "Session status changed");
        Some(StatusChange {
            session_id: session_id.to_string(),
            from,
            to: state.status,
            error: state.error.clone(),
        })
    }

    /// Mark a session running after a local send
    pub fn mark_running(&mut self, session_id: &str) {
        let state = self.sessions.entry(session_id.to_string()).or_default();
        state.status = SessionStatus::Running;
        state.error = None;
    }

    /// Make a session the viewed one; returns true if unread was cleared
    pub fn set_viewed(&mut self, session_id: Option<&str>) -> bool {
        self.viewed = session_id.map(str::to_string);
        match session_id.and_then(|id| self.sessions.get_mut(id)) {
            Some(state) if state.has_unread => {
                state.has_unread = false;
                true
            }
            _ => false,
        }
    }

    pub fn viewed(&self) -> Option<&str> {
        self.viewed.as_deref()
    }

    /// Merge authoritative statuses from a recovery query
    ///
    /// The viewed session never becomes unread.
    pub fn apply_statuses(&mut self, statuses: impl IntoIterator<Item = (String, SessionState)>) {
        for (session_id, mut state) in statuses {
            if self.viewed.as_deref() == Some(session_id.as_str()) {
                state.has_unread = false;
            }
            self.sessions.insert(session_id, state);
        }
    }

    /// Ids of running sessions, sorted
    pub fn running(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .sessions
            .iter()
            .filter(|(_, s)| s.status.is_running())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn insert(&mut self, session_id: &str) {
        self.sessions.entry(session_id.to_string()).or_default();
    }

    pub fn remove(&mut self, session_id: &str) -> Option<SessionState> {
        if self.viewed.as_deref() == Some(session_id) {
            self.viewed = None;
        }
        self.sessions.remove(session_id)
    }

    pub fn get(&self, session_id: &str) -> Option<&SessionState> {
        self.sessions.get(session_id)
    }

    pub fn status(&self, session_id: &str) -> SessionStatus {
        self.get(session_id).map(|s| s.status).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
