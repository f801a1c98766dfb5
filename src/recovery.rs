//! Recovery coordinator that resynchronizes after mount or reconnect
//!
//! 1. Query the status of every known session.
//! 2. Re-subscribe every running session.
//! 3. For the viewed running session, fetch its cached turn events and
//!    rebuild the in-flight turn.
//!
//! A failing fetch is logged and skipped; it never aborts the rest.

use crate::api::{ActiveStatus, SessionApi};
use crate::error::{Result, SessionError};
use crate::types::StreamEvent;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// Session id used in a failure that concerns every session
pub const ALL_SESSIONS: &str = "*";

/// What the coordinator drives during recovery
#[async_trait]
pub trait RecoveryTarget: Send + Sync {
    /// Merge authoritative statuses into local bookkeeping
    fn apply_statuses(&self, statuses: &HashMap<String, ActiveStatus>);

    /// Session currently shown to the user
    fn viewed_session(&self) -> Option<String>;

    /// Subscribe a session again (and prepare for its replay)
    async fn resubscribe(&self, session_id: &str) -> Result<()>;

    /// Rebuild a session's in-flight turn from its cached events
    fn restore_turn(&self, session_id: &str, events: &[StreamEvent]) -> Option<String>;
}

/// Outcome of one recovery pass
#[derive(Debug, Default)]
pub struct RecoveryReport {
    /// Running sessions subscribed again, sorted
    pub subscribed: Vec<String>,

    /// Session whose in-flight turn was restored, with the message id
    pub restored: Option<(String, String)>,

    /// Per-session failures (`SessionError::RecoveryFetch`)
    pub failures: Vec<SessionError>,
}

impl RecoveryReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Runs the recovery sequence against a `SessionApi`
#[derive(Clone)]
pub struct RecoveryCoordinator {
    api: Arc<dyn SessionApi>,
}

impl RecoveryCoordinator {
    pub fn new(api: Arc<dyn SessionApi>) -> Self {
        Self { api }
    }

    /// Run one recovery pass
    ///
    /// If the status query itself fails, only the viewed session is
    /// re-subscribed, since nothing is known about the others.
    pub async fn recover(&self, target: &dyn RecoveryTarget) -> RecoveryReport {
        let mut report = RecoveryReport::default();
        let viewed = target.viewed_session();

        let statuses = match self.api.get_active_status().await {
            Ok(statuses) => Some(statuses),
            Err(e) => {
                tracing::warn!(error = %e, api = self.api.name(), "Status query failed during recovery");
                report.failures.push(SessionError::RecoveryFetch {
                    session_id: ALL_SESSIONS.to_string(),
                    reason: e.to_string(),
                });
                None
            }
        };

        let mut running: Vec<String> = match &statuses {
            Some(statuses) => {
                target.apply_statuses(statuses);
                statuses
                    .iter()
                    .filter(|(_, s)| s.status.is_running())
                    .map(|(id, _)| id.clone())
                    .collect()
            }
            None => viewed.iter().cloned().collect(),
        };
        running.sort();

        for session_id in &running {
            match target.resubscribe(session_id).await {
                Ok(()) => report.subscribed.push(session_id.clone()),
                Err(e) => {
                    tracing::warn!(session_id = %session_id, error = %e, "Re-subscribe failed");
                    report.failures.push(SessionError::RecoveryFetch {
                        session_id: session_id.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        let viewed_running = statuses.is_some()
            && viewed
                .as_ref()
                .is_some_and(|id| running.iter().any(|r| r == id));
        if let Some(session_id) = viewed.filter(|_| viewed_running) {
            match self.api.get_events(&session_id).await {
                Ok(events) => {
                    if let Some(message_id) = target.restore_turn(&session_id, &events) {
                        report.restored = Some((session_id, message_id));
                    }
                }
                Err(e) => {
                    tracing::warn!(session_id = %session_id, error = %e, "Event fetch failed during recovery");
                    report.failures.push(SessionError::RecoveryFetch {
                        session_id,
                        reason: e.to_string(),
                    });
                }
            }
        }

        tracing::info!(
            subscribed = report.subscribed.len(),
            restored = report.restored.is_some(),
            failures = report.failures.len(),
            "Recovery pass complete"
        );
        report
    }
}
