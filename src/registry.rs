//! Subscription registry mapping session ids to event callbacks
//!
//! Every entry is stamped with the registry epoch current at registration.
//! A reconnect advances the epoch and discards all per-session entries, so
//! a callback registered against the old link can never fire again. The
//! single catch-all callback survives reconnects.

use crate::types::StreamEvent;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Callback invoked synchronously for each routed event
pub type EventCallback = Arc<dyn Fn(&StreamEvent) + Send + Sync>;

struct Entry {
    epoch: u64,
    callback: EventCallback,
}

#[derive(Default)]
struct RegistryState {
    epoch: u64,
    sessions: HashMap<String, Entry>,
    global: Option<EventCallback>,
}

/// Callbacks resolved for one event
pub struct Targets {
    pub session: Option<EventCallback>,
    pub global: Option<EventCallback>,
}

/// Routing table for per-session and catch-all callbacks
#[derive(Default)]
pub struct SubscriptionRegistry {
    state: RwLock<RegistryState>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace the callback for a session; returns the epoch
    pub fn insert(&self, session_id: &str, callback: EventCallback) -> u64 {
        let mut state = self.write();
        let epoch = state.epoch;
        state
            .sessions
            .insert(session_id.to_string(), Entry { epoch, callback });
        tracing::debug!(session_id, epoch, "Session callback registered");
        epoch
    }

    /// Remove a session callback; true if one was registered
    pub fn remove(&self, session_id: &str) -> bool {
        self.write().sessions.remove(session_id).is_some()
    }

    /// Install the catch-all callback, replacing any previous one
    pub fn set_global(&self, callback: EventCallback) {
        self.write().global = Some(callback);
    }

    pub fn clear_global(&self) {
        self.write().global = None;
    }

    /// Start a new epoch, discarding every per-session callback
    pub fn advance_epoch(&self) -> u64 {
        let mut state = self.write();
        state.epoch += 1;
        let discarded = state.sessions.len();
        state.sessions.clear();
        tracing::info!(epoch = state.epoch, discarded, "Registry epoch advanced");
        state.epoch
    }

    pub fn epoch(&self) -> u64 {
        self.read().epoch
    }

    /// Whether a live (current-epoch) callback exists for a session
    pub fn is_subscribed(&self, session_id: &str) -> bool {
        let state = self.read();
        state
            .sessions
            .get(session_id)
            .is_some_and(|entry| entry.epoch == state.epoch)
    }

    /// Sessions with a live callback, sorted
    pub fn session_ids(&self) -> Vec<String> {
        let state = self.read();
        let mut ids: Vec<String> = state
            .sessions
            .iter()
            .filter(|(_, entry)| entry.epoch == state.epoch)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Resolve the callbacks for a session; stale entries are inert
    ///
    /// Callbacks are cloned out so they run without the registry lock held.
    pub fn targets(&self, session_id: &str) -> Targets {
        let state = self.read();
        let session = state
            .sessions
            .get(session_id)
            .filter(|entry| entry.epoch == state.epoch)
            .map(|entry| Arc::clone(&entry.callback));
        Targets {
            session,
            global: state.global.clone(),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, RegistryState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, RegistryState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }
}
