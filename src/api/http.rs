//! HTTP implementation of the session API over reqwest

use super::{ActiveStatus, SessionApi, SessionDetail, SessionSummary};
use crate::error::{Result, SessionError};
use crate::types::StreamEvent;
use async_trait::async_trait;
use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use url::Url;

/// REST client for `{base}/sessions...`
pub struct HttpSessionApi {
    client: reqwest::Client,
    base: Url,
}

impl HttpSessionApi {
    /// Create a client for an API base URL such as `http://host:8000/api/`
    pub fn new(base_url: &str) -> Result<Self> {
        let base = Url::parse(base_url)
            .map_err(|e| SessionError::Config(format!("Invalid API URL '{}': {}", base_url, e)))?;
        if base.scheme() != "http" && base.scheme() != "https" {
            return Err(SessionError::Config(format!(
                "API URL must use http:// or https://, got: {}",
                base.scheme()
            )));
        }

        let client = reqwest::Client::builder()
            .user_agent(concat!("a3s-session/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| SessionError::Api(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client, base })
    }

    pub fn base_url(&self) -> &str {
        self.base.as_str()
    }

    /// Base URL with path segments appended (each percent-encoded)
    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| SessionError::Config(format!("Cannot use '{}' as a base URL", self.base)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn execute(&self, request: RequestBuilder, what: &str) -> Result<reqwest::Response> {
        let response = request
            .send()
            .await
            .map_err(|e| SessionError::Api(format!("{} failed: {}", what, e)))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(SessionError::NotFound(what.to_string()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SessionError::Api(format!(
                "{} returned {}: {}",
                what, status, body
            )));
        }
        Ok(response)
    }

    async fn fetch<T: DeserializeOwned>(&self, request: RequestBuilder, what: &str) -> Result<T> {
        self.execute(request, what)
            .await?
            .json()
            .await
            .map_err(|e| SessionError::Api(format!("Failed to parse {} response: {}", what, e)))
    }
}

#[async_trait]
impl SessionApi for HttpSessionApi {
    async fn create(&self, title: Option<&str>) -> Result<SessionSummary> {
        let url = self.endpoint(&["sessions"])?;
        let body = match title {
            Some(title) => serde_json::json!({ "title": title }),
            None => serde_json::json!({}),
        };
        let summary: SessionSummary = self
            .fetch(self.client.post(url).json(&body), "create session")
            .await?;
        tracing::info!(session_id = %summary.id, "Session created");
        Ok(summary)
    }

    async fn list(&self) -> Result<Vec<SessionSummary>> {
        let url = self.endpoint(&["sessions"])?;
        self.fetch(self.client.get(url), "list sessions").await
    }

    async fn get(&self, session_id: &str) -> Result<SessionDetail> {
        let url = self.endpoint(&["sessions", session_id])?;
        self.fetch(self.client.get(url), &format!("session '{}'", session_id))
            .await
    }

    async fn delete(&self, session_id: &str) -> Result<()> {
        let url = self.endpoint(&["sessions", session_id])?;
        self.execute(
            self.client.delete(url),
            &format!("delete session '{}'", session_id),
        )
        .await?;
        tracing::info!(session_id, "Session deleted");
        Ok(())
    }

    async fn get_active_status(&self) -> Result<HashMap<String, ActiveStatus>> {
        let url = self.endpoint(&["sessions", "status"])?;
        self.fetch(self.client.get(url), "session status").await
    }

    async fn get_events(&self, session_id: &str) -> Result<Vec<StreamEvent>> {
        let url = self.endpoint(&["sessions", session_id, "events"])?;
        let body: Value = self
            .fetch(self.client.get(url), &format!("events of '{}'", session_id))
            .await?;
        // Either a bare array or `{"events": [...]}`
        let events = match body {
            Value::Object(mut map) => map.remove("events").unwrap_or(Value::Array(Vec::new())),
            other => other,
        };
        Ok(serde_json::from_value(events)?)
    }

    async fn mark_read(&self, session_id: &str) -> Result<()> {
        let url = self.endpoint(&["sessions", session_id, "read"])?;
        self.execute(
            self.client.post(url),
            &format!("mark '{}' read", session_id),
        )
        .await?;
        Ok(())
    }

    fn name(&self) -> &str {
        "http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_joins_segments() {
        let api = HttpSessionApi::new("http://localhost:8000/api").unwrap();
        assert_eq!(
            api.endpoint(&["sessions", "s-1", "events"]).unwrap().as_str(),
            "http://localhost:8000/api/sessions/s-1/events"
        );

        let api = HttpSessionApi::new("http://localhost:8000/api/").unwrap();
        assert_eq!(
            api.endpoint(&["sessions"]).unwrap().as_str(),
            "http://localhost:8000/api/sessions"
        );
    }

    #[test]
    fn test_endpoint_escapes_ids() {
        let api = HttpSessionApi::new("http://localhost:8000/").unwrap();
        assert_eq!(
            api.endpoint(&["sessions", "a/b"]).unwrap().as_str(),
            "http://localhost:8000/sessions/a%2Fb"
        );
    }

    #[test]
    fn test_rejects_non_http() {
        assert!(matches!(
            HttpSessionApi::new("ws://localhost:8000/api"),
            Err(SessionError::Config(_))
        ));
        assert!(HttpSessionApi::new("::nonsense").is_err());
    }
}
