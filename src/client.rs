//! Session client: subscriptions and outbound commands over one connection
//!
//! ```rust,no_run
//! use a3s_session::{ClientConfig, SessionClient, StreamEvent};
//! use std::sync::Arc;
//!
//! # async fn example() -> a3s_session::Result<()> {
//! let client = SessionClient::websocket(&ClientConfig::default())?;
//! client
//!     .subscribe("s-1", Arc::new(|event: &StreamEvent| println!("{}", event.kind)))
//!     .await?;
//! client.send_query(Some("s-1"), "hello", Default::default()).await?;
//! # Ok(())
//! # }
//! ```

use crate::command::{ClientCommand, QueryOptions};
use crate::config::ClientConfig;
use crate::connection::{Connection, ConnectionConfig, ConnectionStatus, ReconnectHook};
use crate::error::Result;
use crate::registry::{EventCallback, SubscriptionRegistry};
use crate::router::EventRouter;
use crate::transport::websocket::WebSocketTransport;
use crate::transport::Transport;
use serde_json::{Map, Value};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

/// Multiplexes many session subscriptions over one backend connection
pub struct SessionClient {
    connection: Connection,
    registry: Arc<SubscriptionRegistry>,
    on_reconnected: Arc<Mutex<Option<ReconnectHook>>>,
}

impl SessionClient {
    /// Create a client over any transport
    pub fn new(transport: Arc<dyn Transport>, config: ConnectionConfig) -> Self {
        let registry = Arc::new(SubscriptionRegistry::new());
        let router = EventRouter::new(Arc::clone(&registry));
        let connection = Connection::new(
            transport,
            config,
            Arc::new(move |frame: &str| router.handle_frame(frame)),
        );

        let on_reconnected: Arc<Mutex<Option<ReconnectHook>>> = Arc::new(Mutex::new(None));
        let reset_registry = Arc::clone(&registry);
        let user_hook = Arc::clone(&on_reconnected);
        connection.set_on_reconnected(Arc::new(move || {
            reset_registry.advance_epoch();
            let hook = user_hook.lock().unwrap_or_else(|e| e.into_inner()).clone();
            if let Some(hook) = hook {
                hook();
            }
        }));

        Self {
            connection,
            registry,
            on_reconnected,
        }
    }

    /// Create a WebSocket client from configuration
    pub fn websocket(config: &ClientConfig) -> Result<Self> {
        config.validate()?;
        let transport = WebSocketTransport::new(&config.ws_url)?;
        Ok(Self::new(Arc::new(transport), config.connection()))
    }

    /// Connect (idempotent)
    pub async fn connect(&self) -> Result<()> {
        self.connection.connect().await
    }

    pub async fn disconnect(&self) {
        self.connection.disconnect().await
    }

    pub fn status(&self) -> ConnectionStatus {
        self.connection.status()
    }

    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.connection.watch_status()
    }

    /// Install the catch-all handler that sees every routed event
    pub fn set_global_handler(&self, callback: EventCallback) {
        self.registry.set_global(callback);
    }

    /// Install the hook run after each automatic reconnect
    ///
    /// Runs after per-session callbacks have been discarded, so it is the
    /// place to re-subscribe.
    pub fn set_on_reconnected(&self, hook: ReconnectHook) {
        *self
            .on_reconnected
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(hook);
    }

    /// Register a session callback and ask the backend for its events
    ///
    /// The backend replays cached events for the session before live ones.
    pub async fn subscribe(&self, session_id: &str, callback: EventCallback) -> Result<()> {
        // A pending reconnect advances the epoch inside connect; register after it.
        self.connection.connect().await?;
        self.registry.insert(session_id, callback);
        if let Err(e) = self.send(&ClientCommand::subscribe(session_id)).await {
            self.registry.remove(session_id);
            return Err(e);
        }
        tracing::info!(session_id, "Subscribed");
        Ok(())
    }

    /// Remove a session callback and stop its events
    pub async fn unsubscribe(&self, session_id: &str) -> Result<()> {
        self.registry.remove(session_id);
        self.send(&ClientCommand::unsubscribe(session_id)).await?;
        tracing::info!(session_id, "Unsubscribed");
        Ok(())
    }

    /// Start a task; `None` asks the backend to create a new session
    pub async fn send_query(
        &self,
        session_id: Option<&str>,
        content: &str,
        opts: QueryOptions,
    ) -> Result<()> {
        self.send(&ClientCommand::query(session_id, content, opts))
            .await
    }

    /// Answer a question prompt; an empty map skips it
    pub async fn send_user_response(
        &self,
        request_id: &str,
        answers: Map<String, Value>,
    ) -> Result<()> {
        self.send(&ClientCommand::user_response(request_id, answers))
            .await
    }

    pub async fn send_permission_response(&self, request_id: &str, approved: bool) -> Result<()> {
        self.send(&ClientCommand::permission_response(request_id, approved))
            .await
    }

    /// Encode and send any command, connecting first
    pub async fn send(&self, command: &ClientCommand) -> Result<()> {
        let frame = command.encode()?;
        tracing::debug!(command = command.name(), "Sending command");
        self.connection.send_frame(frame).await
    }

    pub fn is_subscribed(&self, session_id: &str) -> bool {
        self.registry.is_subscribed(session_id)
    }

    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }

    pub fn endpoint(&self) -> &str {
        self.connection.endpoint()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::memory::MemoryTransport;
    use crate::types::{EventKind, StreamEvent};
    use serde_json::json;
    use std::time::Duration;

    fn fast() -> ConnectionConfig {
        ConnectionConfig {
            connect_timeout: Duration::from_millis(200),
            reconnect_base_delay: Duration::from_millis(10),
            max_reconnect_attempts: 3,
        }
    }

    #[tokio::test]
    async fn test_subscribe_sends_command() {
        let (transport, mut server) = MemoryTransport::new();
        let client = SessionClient::new(Arc::new(transport), fast());
        client
            .subscribe("s-1", Arc::new(|_: &StreamEvent| {}))
            .await
            .unwrap();

        let mut peer = server.accept().await.unwrap();
        assert_eq!(
            peer.recv_command().await,
            Some(ClientCommand::subscribe("s-1"))
        );
        assert!(client.is_subscribed("s-1"));
    }

    #[tokio::test]
    async fn test_failed_subscribe_leaves_no_registration() {
        let (transport, _server) = MemoryTransport::new();
        transport.fail_next(1);
        let client = SessionClient::new(Arc::new(transport), fast());
        assert!(client
            .subscribe("s-1", Arc::new(|_: &StreamEvent| {}))
            .await
            .is_err());
        assert!(!client.is_subscribed("s-1"));
    }

    #[tokio::test]
    async fn test_unsubscribe_removes_and_sends() {
        let (transport, mut server) = MemoryTransport::new();
        let client = SessionClient::new(Arc::new(transport), fast());
        client
            .subscribe("s-1", Arc::new(|_: &StreamEvent| {}))
            .await
            .unwrap();
        client.unsubscribe("s-1").await.unwrap();

        let mut peer = server.accept().await.unwrap();
        peer.recv_command().await;
        assert_eq!(
            peer.recv_command().await,
            Some(ClientCommand::unsubscribe("s-1"))
        );
        assert!(!client.is_subscribed("s-1"));
    }

    #[tokio::test]
    async fn test_reconnect_discards_subscriptions() {
        let (transport, mut server) = MemoryTransport::new();
        let client = SessionClient::new(Arc::new(transport), fast());
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        client.set_on_reconnected(Arc::new(move || {
            let _ = tx.send(());
        }));
        client
            .subscribe("s-1", Arc::new(|_: &StreamEvent| {}))
            .await
            .unwrap();
        assert_eq!(client.registry().epoch(), 0);

        drop(server.accept().await.unwrap());
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(client.registry().epoch(), 1);
        assert!(!client.is_subscribed("s-1"));
    }

    #[tokio::test]
    async fn test_subscribe_while_reconnecting_survives_reset() {
        let (transport, mut server) = MemoryTransport::new();
        let client = SessionClient::new(
            Arc::new(transport),
            ConnectionConfig {
                reconnect_base_delay: Duration::from_millis(500),
                ..fast()
            },
        );
        client.connect().await.unwrap();
        let mut status = client.watch_status();
        drop(server.accept().await.unwrap());
        tokio::time::timeout(
            Duration::from_secs(2),
            status.wait_for(|s| matches!(s, ConnectionStatus::Reconnecting { .. })),
        )
        .await
        .unwrap()
        .unwrap();

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        client
            .subscribe(
                "s-1",
                Arc::new(move |event: &StreamEvent| {
                    let _ = tx.send(event.text());
                }),
            )
            .await
            .unwrap();
        assert_eq!(client.registry().epoch(), 1);
        assert!(client.is_subscribed("s-1"));

        let mut peer = server.accept().await.unwrap();
        assert_eq!(
            peer.recv_command().await,
            Some(ClientCommand::subscribe("s-1"))
        );
        peer.send_event(&StreamEvent::new(EventKind::TextDelta, "s-1", json!("replayed")));
        let got = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap();
        assert_eq!(got.as_deref(), Some("replayed"));
    }

    #[tokio::test]
    async fn test_frames_reach_session_callback() {
        let (transport, mut server) = MemoryTransport::new();
        let client = SessionClient::new(Arc::new(transport), fast());
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        client
            .subscribe(
                "s-1",
                Arc::new(move |event: &StreamEvent| {
                    let _ = tx.send(event.text());
                }),
            )
            .await
            .unwrap();

        let peer = server.accept().await.unwrap();
        peer.send("garbage");
        peer.send_event(&StreamEvent::new(EventKind::TextDelta, "s-1", json!("Hi")));
        assert_eq!(rx.recv().await.as_deref(), Some("Hi"));
    }
}
