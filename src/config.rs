//! Client configuration with serde defaults and environment overrides

use crate::connection::ConnectionConfig;
use crate::error::{Result, SessionError};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

pub const ENV_WS_URL: &str = "A3S_SESSION_WS_URL";
pub const ENV_API_URL: &str = "A3S_SESSION_API_URL";
pub const ENV_CONNECT_TIMEOUT_MS: &str = "A3S_SESSION_CONNECT_TIMEOUT_MS";
pub const ENV_RECONNECT_DELAY_MS: &str = "A3S_SESSION_RECONNECT_DELAY_MS";
pub const ENV_MAX_RECONNECTS: &str = "A3S_SESSION_MAX_RECONNECTS";

/// Connection and API settings for a session workspace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientConfig {
    /// Backend WebSocket endpoint (`ws://` or `wss://`)
    pub ws_url: String,

    /// REST API base URL
    pub api_url: String,

    /// Connect timeout in milliseconds
    pub connect_timeout_ms: u64,

    /// Reconnect delay unit in milliseconds; attempt `n` waits `n` units
    pub reconnect_delay_ms: u64,

    pub max_reconnect_attempts: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            ws_url: "ws://127.0.0.1:8000/ws".to_string(),
            api_url: "http://127.0.0.1:8000/api/".to_string(),
            connect_timeout_ms: 10_000,
            reconnect_delay_ms: 1_000,
            max_reconnect_attempts: 5,
        }
    }
}

impl ClientConfig {
    /// Defaults overridden by `A3S_SESSION_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by values from `lookup`
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(url) = lookup(ENV_WS_URL) {
            config.ws_url = url;
        }
        if let Some(url) = lookup(ENV_API_URL) {
            config.api_url = url;
        }
        if let Some(ms) = parse_var(&lookup, ENV_CONNECT_TIMEOUT_MS)? {
            config.connect_timeout_ms = ms;
        }
        if let Some(ms) = parse_var(&lookup, ENV_RECONNECT_DELAY_MS)? {
            config.reconnect_delay_ms = ms;
        }
        if let Some(n) = parse_var(&lookup, ENV_MAX_RECONNECTS)? {
            config.max_reconnect_attempts = n;
        }
        config.validate()?;
        Ok(config)
    }

    /// Reject malformed URLs and a zero connect timeout
    pub fn validate(&self) -> Result<()> {
        check_url(&self.ws_url, &["ws", "wss"], "wsUrl")?;
        check_url(&self.api_url, &["http", "https"], "apiUrl")?;
        if self.connect_timeout_ms == 0 {
            return Err(SessionError::Config(
                "connectTimeoutMs must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Timing settings for the transport connection
    pub fn connection(&self) -> ConnectionConfig {
        ConnectionConfig {
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            reconnect_base_delay: Duration::from_millis(self.reconnect_delay_ms),
            max_reconnect_attempts: self.max_reconnect_attempts,
        }
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>> {
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw.trim().parse().map(Some).map_err(|_| {
            SessionError::Config(format!("{} must be a non-negative integer, got '{}'", key, raw))
        }),
    }
}

fn check_url(raw: &str, schemes: &[&str], field: &str) -> Result<()> {
    let url = Url::parse(raw)
        .map_err(|e| SessionError::Config(format!("Invalid {} '{}': {}", field, raw, e)))?;
    if !schemes.contains(&url.scheme()) {
        return Err(SessionError::Config(format!(
            "{} must use {}, got: {}",
            field,
            schemes.join(" or "),
            url.scheme()
        )));
    }
    Ok(())
}
