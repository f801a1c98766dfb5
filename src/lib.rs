//! # a3s-session
//!
//! Multiplexed agent session client and streaming conversation
//! reconstruction for the A3S ecosystem.
//!
//! ## Overview
//!
//! `a3s-session` keeps one duplex connection to an agent backend and
//! multiplexes any number of sessions over it. Inbound stream events are
//! routed by session id and folded, one at a time, into typed message
//! blocks (text, reasoning, tool calls, plans, questions, permission
//! prompts). After a reconnect, running sessions are re-subscribed and the
//! viewed session's in-flight turn is rebuilt without duplication.
//!
//! ## Quick Start
//!
//! ```rust
//! use a3s_session::reducer::reconstruct;
//! use a3s_session::{BlockStatus, EventKind, StreamEvent};
//! use serde_json::json;
//!
//! let events = vec![
//!     StreamEvent::new(EventKind::TextStart, "s-1", json!(null)),
//!     StreamEvent::new(EventKind::TextDelta, "s-1", json!("Hi")),
//!     StreamEvent::new(EventKind::TextEnd, "s-1", json!(null)),
//!     StreamEvent::new(EventKind::Done, "s-1", json!(null)),
//! ];
//! let message = reconstruct("msg-1", &events);
//! assert_eq!(message.content, "Hi");
//! assert_eq!(message.blocks[0].status, BlockStatus::Success);
//! ```
//!
//! ## Transports
//!
//! - **websocket**: tokio-tungstenite client for `ws://` / `wss://`
//! - **memory**: in-process link for tests and embedding
//!
//! ## Architecture
//!
//! - **Connection**: connect, dispatch, reconnect with linear backoff
//! - **SubscriptionRegistry** / **EventRouter**: epoch-versioned routing
//! - **SessionClient**: subscriptions and outbound commands
//! - **TurnState**: per-turn reducer over one assistant message
//! - **Conversation** / **SessionTable**: per-session state
//! - **RecoveryCoordinator**: resynchronization after mount or reconnect
//! - **Workspace**: everything above wired to a `SessionApi`

pub mod api;
pub mod client;
pub mod command;
pub mod config;
pub mod connection;
pub mod conversation;
pub mod error;
pub mod message;
pub mod recovery;
pub mod reducer;
pub mod registry;
pub mod router;
pub mod sessions;
pub mod transport;
pub mod types;
pub mod workspace;

// Re-export core types
pub use api::{ActiveStatus, SessionApi, SessionDetail, SessionSummary};
pub use client::SessionClient;
pub use command::{ClientCommand, PermissionMode, QueryOptions};
pub use config::ClientConfig;
pub use connection::{Connection, ConnectionConfig, ConnectionStatus};
pub use conversation::Conversation;
pub use error::{Result, SessionError};
pub use message::{
    BlockContent, BlockKind, BlockMetadata, BlockStatus, Correlation, Message, MessageBlock,
    Plan, PlanItem, PlanItemStatus, Question, Questionnaire, Role, ToolCall, ToolOutput,
};
pub use recovery::{RecoveryCoordinator, RecoveryReport, RecoveryTarget};
pub use reducer::{TurnEnd, TurnState, TurnStep};
pub use registry::{EventCallback, SubscriptionRegistry};
pub use router::{EventRouter, RouteOutcome};
pub use sessions::{SessionState, SessionTable, StatusChange};
pub use transport::Transport;
pub use types::{EventKind, EventMetadata, SessionStatus, StreamEvent, Usage};
pub use workspace::{Workspace, WorkspaceNotice};

// Re-export implementations for convenience
pub use api::http::HttpSessionApi;
pub use api::memory::MemorySessionApi;
pub use transport::memory::{MemoryPeer, MemoryServer, MemoryTransport};
pub use transport::websocket::WebSocketTransport;
