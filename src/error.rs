//! Error types for a3s-session

use thiserror::Error;

/// Errors that can occur in the session client
#[derive(Debug, Error)]
pub enum SessionError {
    /// No open acknowledgement arrived within the connect timeout
    #[error("Connection timed out after {timeout_ms}ms: {url}")]
    ConnectionTimeout { url: String, timeout_ms: u64 },

    /// Transport-level failure (triggers reconnect backoff)
    #[error("Connection error: {0}")]
    Connection(String),

    /// A command was issued while no link is open
    #[error("Not connected: {0}")]
    NotConnected(String),

    /// An inbound frame could not be decoded into a stream event
    #[error("Malformed event: {reason}")]
    MalformedEvent { reason: String },

    /// Backend-reported `error` event
    #[error("Protocol error in session '{session_id}': {message}")]
    Protocol { session_id: String, message: String },

    /// Status or event query failed during recovery
    #[error("Recovery fetch failed for session '{session_id}': {reason}")]
    RecoveryFetch { session_id: String, reason: String },

    /// Session API (REST collaborator) failure
    #[error("Session API error: {0}")]
    Api(String),

    /// Serialization/deserialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Session or request not found
    #[error("Not found: {0}")]
    NotFound(String),
}

impl SessionError {
    /// Whether this error came from the transport and is handled by backoff
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            SessionError::ConnectionTimeout { .. }
                | SessionError::Connection(_)
                | SessionError::NotConnected(_)
        )
    }
}

/// Result type alias for session client operations
pub type Result<T> = std::result::Result<T, SessionError>;
