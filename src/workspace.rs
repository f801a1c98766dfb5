//! Workspace wiring the session client, session API and local state together
//!
//! The workspace owns one `SessionClient`, the session table and a
//! `Conversation` per session. The catch-all handler keeps the session
//! table current for every session; per-session callbacks feed
//! conversations. After every reconnect a recovery pass runs in the
//! background.

use crate::api::http::HttpSessionApi;
use crate::api::{ActiveStatus, SessionApi, SessionSummary};
use crate::client::SessionClient;
use crate::command::QueryOptions;
use crate::config::ClientConfig;
use crate::conversation::Conversation;
use crate::error::{Result, SessionError};
use crate::recovery::{RecoveryCoordinator, RecoveryReport, RecoveryTarget};
use crate::registry::EventCallback;
use crate::reducer::TurnStep;
use crate::sessions::{SessionState, SessionTable, StatusChange};
use crate::types::{EventKind, StreamEvent};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::broadcast;

const NOTICE_CAPACITY: usize = 256;

/// Change notifications for a UI layer
#[derive(Debug, Clone, PartialEq)]
pub enum WorkspaceNotice {
    StatusChanged(StatusChange),
    /// Backend-reported error for a session; surface to the user
    ProtocolError { session_id: String, message: String },
    ConversationUpdated { session_id: String },
}

#[derive(Default)]
struct WorkspaceState {
    sessions: SessionTable,
    conversations: HashMap<String, Conversation>,
    /// Endpoint/model last used per session
    defaults: HashMap<String, QueryOptions>,
}

impl WorkspaceState {
    fn conversation(&mut self, session_id: &str) -> &mut Conversation {
        self.conversations
            .entry(session_id.to_string())
            .or_insert_with(|| Conversation::new(session_id))
    }
}

struct WorkspaceInner {
    client: SessionClient,
    api: Arc<dyn SessionApi>,
    recovery: RecoveryCoordinator,
    state: Arc<Mutex<WorkspaceState>>,
    notices: broadcast::Sender<WorkspaceNotice>,
}

/// Session workspace façade
#[derive(Clone)]
pub struct Workspace {
    inner: Arc<WorkspaceInner>,
}

impl Workspace {
    /// Wire a client and a session API together
    pub fn new(client: SessionClient, api: Arc<dyn SessionApi>) -> Self {
        let state = Arc::new(Mutex::new(WorkspaceState::default()));
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);

        let inner = Arc::new(WorkspaceInner {
            client,
            recovery: RecoveryCoordinator::new(Arc::clone(&api)),
            api,
            state,
            notices,
        });

        let weak: Weak<WorkspaceInner> = Arc::downgrade(&inner);
        inner.client.set_global_handler(status_handler(
            Arc::clone(&inner.state),
            inner.notices.clone(),
            weak.clone(),
        ));
        inner.client.set_on_reconnected(Arc::new(move || {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            tokio::spawn(async move {
                let workspace = Workspace { inner };
                let report = workspace.recover().await;
                if !report.is_clean() {
                    tracing::warn!(failures = report.failures.len(), "Recovery after reconnect incomplete");
                }
            });
        }));

        Self { inner }
    }

    /// WebSocket client plus HTTP session API from configuration
    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        let client = SessionClient::websocket(config)?;
        let api = HttpSessionApi::new(&config.api_url)?;
        Ok(Self::new(client, Arc::new(api)))
    }

    /// Connect and run the initial recovery pass
    pub async fn mount(&self) -> Result<RecoveryReport> {
        self.inner.client.connect().await?;
        Ok(self.recover().await)
    }

    /// Run a recovery pass now
    pub async fn recover(&self) -> RecoveryReport {
        self.inner.recovery.recover(self).await
    }

    /// Refresh the session list from the API
    pub async fn refresh_sessions(&self) -> Result<Vec<SessionSummary>> {
        let sessions = self.inner.api.list().await?;
        let mut state = self.state();
        for summary in &sessions {
            state.sessions.insert(&summary.id);
        }
        Ok(sessions)
    }

    /// Make a session the viewed one
    ///
    /// The previously viewed session is unsubscribed unless it is running.
    /// An unsubscribed session has its history loaded and is subscribed,
    /// which replays its cached events. A session already subscribed in the
    /// background gets its history loaded on first open, beneath any turn
    /// it is streaming.
    pub async fn open_session(&self, session_id: &str) -> Result<()> {
        let (previous, cleared) = {
            let mut state = self.state();
            let previous = state.sessions.viewed().map(str::to_string);
            if previous.as_deref() == Some(session_id) {
                return Ok(());
            }
            state.sessions.insert(session_id);
            let cleared = state.sessions.set_viewed(Some(session_id));
            (previous, cleared)
        };

        if let Some(previous) = previous {
            self.release(&previous).await;
        }
        if cleared {
            if let Err(e) = self.inner.api.mark_read(session_id).await {
                tracing::warn!(session_id, error = %e, "Failed to mark session read");
            }
        }

        let subscribed = self.inner.client.is_subscribed(session_id);
        let history_loaded = self
            .state()
            .conversations
            .get(session_id)
            .is_some_and(Conversation::history_loaded);
        if !subscribed || !history_loaded {
            let detail = self.inner.api.get(session_id).await?;
            let mut state = self.state();
            let conversation = state.conversation(session_id);
            if subscribed {
                conversation.load_history(detail.messages);
            } else {
                conversation.replace_history(detail.messages);
            }
            state.defaults.insert(
                session_id.to_string(),
                QueryOptions {
                    endpoint: detail.last_endpoint,
                    model: detail.last_model,
                    ..Default::default()
                },
            );
        }
        if !subscribed {
            self.subscribe_session(session_id, false).await?;
        }
        self.notify(WorkspaceNotice::ConversationUpdated {
            session_id: session_id.to_string(),
        });
        Ok(())
    }

    /// Stop viewing the current session
    pub async fn leave_session(&self) {
        let previous = {
            let mut state = self.state();
            let previous = state.sessions.viewed().map(str::to_string);
            state.sessions.set_viewed(None);
            previous
        };
        if let Some(previous) = previous {
            self.release(&previous).await;
        }
    }

    /// Send a query; `None` creates a new session first
    ///
    /// Returns the session id. The turn's user message and the assistant
    /// placeholder are appended before the command is sent.
    pub async fn send_query(
        &self,
        session_id: Option<&str>,
        content: &str,
        opts: QueryOptions,
    ) -> Result<String> {
        let session_id = match session_id {
            Some(id) => id.to_string(),
            None => {
                let created = self.inner.api.create(None).await?;
                tracing::info!(session_id = %created.id, "Created session for query");
                self.open_session(&created.id).await?;
                created.id
            }
        };
        if !self.inner.client.is_subscribed(&session_id) {
            self.subscribe_session(&session_id, false).await?;
        }

        let opts = {
            let mut state = self.state();
            let defaults = state.defaults.get(&session_id).cloned().unwrap_or_default();
            let opts = QueryOptions {
                endpoint: opts.endpoint.or(defaults.endpoint),
                model: opts.model.or(defaults.model),
                permission_mode: opts.permission_mode,
            };
            state.defaults.insert(session_id.clone(), opts.clone());
            state.conversation(&session_id).begin_turn(content);
            state.sessions.mark_running(&session_id);
            opts
        };
        self.notify(WorkspaceNotice::ConversationUpdated {
            session_id: session_id.clone(),
        });

        if let Err(e) = self
            .inner
            .client
            .send_query(Some(&session_id), content, opts)
            .await
        {
            tracing::warn!(session_id = %session_id, error = %e, "Query send failed");
            let failure = StreamEvent::new(EventKind::Error, session_id.as_str(), Value::String(e.to_string()));
            self.apply_locally(&session_id, &failure);
            return Err(e);
        }
        Ok(session_id)
    }

    /// Answer an `ask_user` request
    pub async fn answer_question(
        &self,
        session_id: &str,
        request_id: &str,
        answers: Map<String, Value>,
    ) -> Result<()> {
        self.inner
            .client
            .send_user_response(request_id, answers.clone())
            .await?;
        self.state()
            .conversation(session_id)
            .resolve_question(request_id, answers);
        self.notify(WorkspaceNotice::ConversationUpdated {
            session_id: session_id.to_string(),
        });
        Ok(())
    }

    /// Skip an `ask_user` request (empty answer map)
    pub async fn skip_question(&self, session_id: &str, request_id: &str) -> Result<()> {
        self.answer_question(session_id, request_id, Map::new())
            .await
    }

    /// Approve or deny a permission request
    pub async fn answer_permission(
        &self,
        session_id: &str,
        request_id: &str,
        approved: bool,
    ) -> Result<()> {
        self.inner
            .client
            .send_permission_response(request_id, approved)
            .await?;
        self.state()
            .conversation(session_id)
            .resolve_permission(request_id, approved);
        self.notify(WorkspaceNotice::ConversationUpdated {
            session_id: session_id.to_string(),
        });
        Ok(())
    }

    /// Delete a session on the backend and forget it locally
    pub async fn delete_session(&self, session_id: &str) -> Result<()> {
        self.inner.api.delete(session_id).await?;
        if self.inner.client.is_subscribed(session_id) {
            if let Err(e) = self.inner.client.unsubscribe(session_id).await {
                tracing::warn!(session_id, error = %e, "Failed to unsubscribe deleted session");
            }
        }
        let mut state = self.state();
        state.sessions.remove(session_id);
        state.conversations.remove(session_id);
        state.defaults.remove(session_id);
        Ok(())
    }

    /// Copy of a session's conversation
    pub fn conversation(&self, session_id: &str) -> Option<Conversation> {
        self.state().conversations.get(session_id).cloned()
    }

    pub fn session(&self, session_id: &str) -> Option<SessionState> {
        self.state().sessions.get(session_id).cloned()
    }

    pub fn viewed(&self) -> Option<String> {
        self.state().sessions.viewed().map(str::to_string)
    }

    pub fn running_sessions(&self) -> Vec<String> {
        self.state().sessions.running()
    }

    /// Subscribe to change notifications
    pub fn notices(&self) -> broadcast::Receiver<WorkspaceNotice> {
        self.inner.notices.subscribe()
    }

    pub fn client(&self) -> &SessionClient {
        &self.inner.client
    }

    pub fn api(&self) -> &Arc<dyn SessionApi> {
        &self.inner.api
    }

    async fn subscribe_session(&self, session_id: &str, rewind: bool) -> Result<()> {
        {
            let mut state = self.state();
            let conversation = state.conversation(session_id);
            if rewind {
                conversation.rewind();
            }
        }
        let callback = conversation_handler(
            session_id,
            Arc::clone(&self.inner.state),
            self.inner.notices.clone(),
        );
        self.inner.client.subscribe(session_id, callback).await
    }

    /// Unsubscribe a session that is neither viewed nor running
    async fn release(&self, session_id: &str) {
        let keep = {
            let state = self.state();
            state.sessions.status(session_id).is_running()
                || state.sessions.viewed() == Some(session_id)
        };
        if keep || !self.inner.client.is_subscribed(session_id) {
            return;
        }
        if let Err(e) = self.inner.client.unsubscribe(session_id).await {
            tracing::warn!(session_id, error = %e, "Failed to unsubscribe");
        }
    }

    /// Feed a locally generated event through the same paths as routed ones
    fn apply_locally(&self, session_id: &str, event: &StreamEvent) {
        let change = {
            let mut state = self.state();
            state.conversation(session_id).handle_event(event);
            state.sessions.apply_event(event)
        };
        if let Some(change) = change {
            self.notify(WorkspaceNotice::StatusChanged(change));
        }
        self.notify(WorkspaceNotice::ConversationUpdated {
            session_id: session_id.to_string(),
        });
    }

    fn notify(&self, notice: WorkspaceNotice) {
        let _ = self.inner.notices.send(notice);
    }

    fn state(&self) -> MutexGuard<'_, WorkspaceState> {
        lock(&self.inner.state)
    }
}

fn lock(state: &Mutex<WorkspaceState>) -> MutexGuard<'_, WorkspaceState> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}

/// Catch-all: session status bookkeeping for every session
///
/// A background session that stops running is released.
fn status_handler(
    state: Arc<Mutex<WorkspaceState>>,
    notices: broadcast::Sender<WorkspaceNotice>,
    workspace: Weak<WorkspaceInner>,
) -> EventCallback {
    Arc::new(move |event: &StreamEvent| {
        let change = lock(&state).sessions.apply_event(event);
        if let Some(change) = change {
            let stopped = (!change.to.is_running()).then(|| change.session_id.clone());
            let _ = notices.send(WorkspaceNotice::StatusChanged(change));
            if let Some(session_id) = stopped {
                release_in_background(&workspace, session_id);
            }
        }
        if event.kind == EventKind::Error {
            if let Some(session_id) = event.session_id() {
                let message = event.text();
                let error = SessionError::Protocol {
                    session_id: session_id.to_string(),
                    message: message.clone(),
                };
                tracing::warn!(error = %error, "Backend reported an error");
                let _ = notices.send(WorkspaceNotice::ProtocolError {
                    session_id: session_id.to_string(),
                    message,
                });
            }
        }
    })
}

fn release_in_background(workspace: &Weak<WorkspaceInner>, session_id: String) {
    let Some(inner) = workspace.upgrade() else {
        return;
    };
    if !inner.client.is_subscribed(&session_id) {
        return;
    }
    tokio::spawn(async move {
        Workspace { inner }.release(&session_id).await;
    });
}

/// Per-session callback: fold events into the session's conversation
fn conversation_handler(
    session_id: &str,
    state: Arc<Mutex<WorkspaceState>>,
    notices: broadcast::Sender<WorkspaceNotice>,
) -> EventCallback {
    let session_id = session_id.to_string();
    Arc::new(move |event: &StreamEvent| {
        let step = lock(&state).conversation(&session_id).handle_event(event);
        if step != TurnStep::Ignored {
            let _ = notices.send(WorkspaceNotice::ConversationUpdated {
                session_id: session_id.clone(),
            });
        }
    })
}

#[async_trait]
impl RecoveryTarget for Workspace {
    fn apply_statuses(&self, statuses: &HashMap<String, ActiveStatus>) {
        self.state().sessions.apply_statuses(
            statuses
                .iter()
                .map(|(id, status)| (id.clone(), SessionState::from(status.clone()))),
        );
    }

    fn viewed_session(&self) -> Option<String> {
        self.viewed()
    }

    async fn resubscribe(&self, session_id: &str) -> Result<()> {
        self.subscribe_session(session_id, true).await
    }

    fn restore_turn(&self, session_id: &str, events: &[StreamEvent]) -> Option<String> {
        let restored = self.state().conversation(session_id).restore(events);
        if restored.is_some() {
            self.notify(WorkspaceNotice::ConversationUpdated {
                session_id: session_id.to_string(),
            });
        }
        restored
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::memory::MemorySessionApi;
    use crate::command::ClientCommand;
    use crate::connection::ConnectionConfig;
    use crate::message::Message;
    use crate::transport::memory::{MemoryPeer, MemoryServer, MemoryTransport};
    use crate::types::SessionStatus;
    use serde_json::json;
    use std::time::Duration;

    async fn setup() -> (Workspace, MemorySessionApi, MemoryServer) {
        let (transport, server) = MemoryTransport::new();
        let client = SessionClient::new(
            Arc::new(transport),
            ConnectionConfig {
                connect_timeout: Duration::from_millis(200),
                reconnect_base_delay: Duration::from_millis(10),
                max_reconnect_attempts: 3,
            },
        );
        let api = MemorySessionApi::new();
        let workspace = Workspace::new(client, Arc::new(api.clone()));
        (workspace, api, server)
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(30)).await;
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached");
    }

    fn ev(kind: EventKind, session: &str, content: Value) -> StreamEvent {
        StreamEvent::new(kind, session, content)
    }

    async fn accept(server: &mut MemoryServer) -> MemoryPeer {
        tokio::time::timeout(Duration::from_secs(2), server.accept())
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn test_send_query_appends_turn_and_marks_running() {
        let (workspace, api, mut server) = setup().await;
        api.set_status("s-1", ActiveStatus::default()).await;
        workspace.open_session("s-1").await.unwrap();
        workspace
            .send_query(Some("s-1"), "hello", QueryOptions::default())
            .await
            .unwrap();

        let mut peer = accept(&mut server).await;
        assert_eq!(peer.recv_command().await, Some(ClientCommand::subscribe("s-1")));
        assert!(matches!(
            peer.recv_command().await,
            Some(ClientCommand::Query { content, .. }) if content == "hello"
        ));

        let conv = workspace.conversation("s-1").unwrap();
        assert_eq!(conv.messages().len(), 2);
        assert!(conv.last_message().unwrap().has_placeholder());
        assert_eq!(workspace.session("s-1").unwrap().status, SessionStatus::Running);
    }

    #[tokio::test]
    async fn test_send_query_without_session_creates_one() {
        let (workspace, api, _server) = setup().await;
        let id = workspace
            .send_query(None, "new task", QueryOptions::default())
            .await
            .unwrap();
        assert!(api.contains(&id).await);
        assert_eq!(workspace.viewed().as_deref(), Some(id.as_str()));
    }

    #[tokio::test]
    async fn test_done_for_background_session_marks_unread() {
        let (workspace, api, mut server) = setup().await;
        api.set_status("a", ActiveStatus::default()).await;
        workspace.open_session("a").await.unwrap();
        let peer = accept(&mut server).await;

        peer.send_event(&ev(EventKind::Start, "b", json!(null)));
        peer.send_event(&ev(EventKind::Done, "b", json!(null)));
        settle().await;

        let b = workspace.session("b").unwrap();
        assert_eq!(b.status, SessionStatus::Idle);
        assert!(b.has_unread);

        api.set_status("b", ActiveStatus::default()).await;
        workspace.open_session("b").await.unwrap();
        assert!(!workspace.session("b").unwrap().has_unread);
        assert_eq!(api.read_log().await, vec!["b"]);
    }

    #[tokio::test]
    async fn test_error_event_surfaces_notice() {
        let (workspace, api, mut server) = setup().await;
        api.set_status("s-1", ActiveStatus::default()).await;
        let mut notices = workspace.notices();
        workspace.open_session("s-1").await.unwrap();
        let peer = accept(&mut server).await;

        peer.send_event(&ev(EventKind::Error, "s-1", json!("overloaded")));
        settle().await;

        let mut saw_protocol_error = false;
        while let Ok(notice) = notices.try_recv() {
            if let WorkspaceNotice::ProtocolError { message, .. } = notice {
                assert_eq!(message, "overloaded");
                saw_protocol_error = true;
            }
        }
        assert!(saw_protocol_error);
        assert_eq!(workspace.session("s-1").unwrap().status, SessionStatus::Error);
    }

    #[tokio::test]
    async fn test_switching_keeps_running_session_subscribed() {
        let (workspace, api, _server) = setup().await;
        api.set_status("a", ActiveStatus::default()).await;
        api.set_status("b", ActiveStatus::default()).await;
        api.set_status("c", ActiveStatus::default()).await;

        workspace.open_session("a").await.unwrap();
        workspace
            .send_query(Some("a"), "long job", QueryOptions::default())
            .await
            .unwrap();
        workspace.open_session("b").await.unwrap();
        assert!(workspace.client().is_subscribed("a"));

        workspace.open_session("c").await.unwrap();
        assert!(!workspace.client().is_subscribed("b"));
    }

    #[tokio::test]
    async fn test_answer_permission_settles_block() {
        let (workspace, api, mut server) = setup().await;
        api.set_status("s-1", ActiveStatus::default()).await;
        workspace.open_session("s-1").await.unwrap();
        let mut peer = accept(&mut server).await;
        peer.recv_command().await;

        peer.send_event(&ev(
            EventKind::PermissionRequest,
            "s-1",
            json!({"request_id": "p1", "tool_name": "Bash", "input": {"cmd": "ls"}}),
        ));
        settle().await;
        workspace.answer_permission("s-1", "p1", true).await.unwrap();

        assert_eq!(
            peer.recv_command().await,
            Some(ClientCommand::permission_response("p1", true))
        );
        let conv = workspace.conversation("s-1").unwrap();
        let block = conv.last_message().unwrap().block("permission-p1").unwrap();
        assert_eq!(block.metadata.approved, Some(true));
    }

    #[tokio::test]
    async fn test_open_running_session_loads_history_beneath_turn() {
        let (workspace, api, mut server) = setup().await;
        api.set_status("s-1", ActiveStatus::running()).await;
        api.set_messages("s-1", vec![Message::user("first"), Message::user("second")])
            .await;

        let report = workspace.mount().await.unwrap();
        assert_eq!(report.subscribed, vec!["s-1"]);
        let peer = accept(&mut server).await;
        peer.send_event(&ev(EventKind::Start, "s-1", json!(null)));
        peer.send_event(&ev(EventKind::TextStart, "s-1", json!(null)));
        peer.send_event(&ev(EventKind::TextDelta, "s-1", json!("Hel")));
        wait_until(|| {
            workspace
                .conversation("s-1")
                .is_some_and(|c| c.last_message().is_some_and(|m| m.content == "Hel"))
        })
        .await;

        workspace.open_session("s-1").await.unwrap();
        let conv = workspace.conversation("s-1").unwrap();
        assert_eq!(conv.messages().len(), 3);
        assert_eq!(conv.messages()[0].content, "first");
        assert_eq!(conv.last_message().unwrap().content, "Hel");
        assert!(conv.is_turn_active());

        peer.send_event(&ev(EventKind::TextDelta, "s-1", json!("lo")));
        wait_until(|| {
            workspace
                .conversation("s-1")
                .is_some_and(|c| c.last_message().is_some_and(|m| m.content == "Hello"))
        })
        .await;
        assert_eq!(workspace.conversation("s-1").unwrap().messages().len(), 3);
    }

    #[tokio::test]
    async fn test_background_session_released_once_idle() {
        let (workspace, api, mut server) = setup().await;
        api.set_status("fg", ActiveStatus::default()).await;
        api.set_status("bg", ActiveStatus::running()).await;

        workspace.open_session("fg").await.unwrap();
        let mut peer = accept(&mut server).await;
        let report = workspace.recover().await;
        assert_eq!(report.subscribed, vec!["bg"]);
        assert!(workspace.client().is_subscribed("bg"));

        peer.send_event(&ev(EventKind::Done, "bg", json!(null)));
        wait_until(|| !workspace.client().is_subscribed("bg")).await;

        let unsubscribed = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                match peer.recv_command().await {
                    Some(command) if command == ClientCommand::unsubscribe("bg") => break,
                    Some(_) => {}
                    None => panic!("link closed"),
                }
            }
        })
        .await;
        assert!(unsubscribed.is_ok());
        assert!(workspace.client().is_subscribed("fg"));
        assert_eq!(workspace.session("bg").unwrap().status, SessionStatus::Idle);
    }

    #[tokio::test]
    async fn test_viewed_session_stays_subscribed_after_done() {
        let (workspace, api, mut server) = setup().await;
        api.set_status("s-1", ActiveStatus::default()).await;
        workspace.open_session("s-1").await.unwrap();
        workspace
            .send_query(Some("s-1"), "hi", QueryOptions::default())
            .await
            .unwrap();
        let peer = accept(&mut server).await;

        peer.send_event(&ev(EventKind::Done, "s-1", json!(null)));
        wait_until(|| {
            workspace
                .session("s-1")
                .is_some_and(|s| s.status == SessionStatus::Idle)
        })
        .await;
        settle().await;
        assert!(workspace.client().is_subscribed("s-1"));
    }
}
