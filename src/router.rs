//! Event router (frame → decoded event → callbacks)

use crate::error::Result;
use crate::registry::SubscriptionRegistry;
use crate::types::StreamEvent;
use std::sync::Arc;

/// What happened to one routed event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    /// No owning session id; nothing was invoked
    Dropped,
    Delivered { to_session: bool, to_global: bool },
}

/// Dispatches inbound events to session callbacks and the catch-all
#[derive(Clone)]
pub struct EventRouter {
    registry: Arc<SubscriptionRegistry>,
}

impl EventRouter {
    pub fn new(registry: Arc<SubscriptionRegistry>) -> Self {
        Self { registry }
    }

    /// Decode and route one raw frame
    pub fn route_frame(&self, frame: &str) -> Result<RouteOutcome> {
        let event = StreamEvent::from_json(frame)?;
        Ok(self.route(&event))
    }

    /// Deliver an event to its session callback, then to the catch-all
    pub fn route(&self, event: &StreamEvent) -> RouteOutcome {
        let Some(session_id) = event.session_id() else {
            tracing::warn!(kind = %event.kind, "Dropping event without session id");
            return RouteOutcome::Dropped;
        };

        let targets = self.registry.targets(session_id);
        tracing::debug!(
            session_id,
            kind = %event.kind,
            subscribed = targets.session.is_some(),
            "Routing event"
        );

        let to_session = targets.session.is_some();
        let to_global = targets.global.is_some();
        if let Some(callback) = targets.session {
            callback(event);
        }
        if let Some(callback) = targets.global {
            callback(event);
        }
        RouteOutcome::Delivered {
            to_session,
            to_global,
        }
    }

    /// Frame handler entry point: malformed frames are logged and dropped
    pub fn handle_frame(&self, frame: &str) {
        if let Err(e) = self.route_frame(frame) {
            tracing::warn!(error = %e, len = frame.len(), "Dropping malformed frame");
        }
    }

    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }
}
