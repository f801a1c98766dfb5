//! HTTP session API integration tests
//!
//! An axum server on a loopback port implements the backend's session
//! routes; `HttpSessionApi` is exercised against it.

use a3s_session::{
    ActiveStatus, EventKind, HttpSessionApi, SessionApi, SessionError, SessionStatus,
    SessionSummary, StreamEvent,
};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[derive(Clone, Default)]
struct Backend {
    sessions: Arc<Mutex<Vec<SessionSummary>>>,
    read: Arc<Mutex<Vec<String>>>,
}

async fn list(State(backend): State<Backend>) -> Json<Vec<SessionSummary>> {
    Json(backend.sessions.lock().unwrap().clone())
}

async fn create(State(backend): State<Backend>, Json(body): Json<Value>) -> Json<SessionSummary> {
    let mut sessions = backend.sessions.lock().unwrap();
    let id = format!("s-{}", sessions.len() + 1);
    let summary = SessionSummary::new(id, body["title"].as_str());
    sessions.push(summary.clone());
    Json(summary)
}

async fn detail(State(backend): State<Backend>, Path(id): Path<String>) -> Result<Json<Value>, StatusCode> {
    let known = backend.sessions.lock().unwrap().iter().any(|s| s.id == id);
    if !known {
        return Err(StatusCode::NOT_FOUND);
    }
    Ok(Json(json!({
        "messages": [],
        "last_model": "m-large"
    })))
}

async fn remove(State(backend): State<Backend>, Path(id): Path<String>) -> StatusCode {
    let mut sessions = backend.sessions.lock().unwrap();
    let before = sessions.len();
    sessions.retain(|s| s.id != id);
    if sessions.len() == before {
        StatusCode::NOT_FOUND
    } else {
        StatusCode::NO_CONTENT
    }
}

async fn status() -> Json<HashMap<String, ActiveStatus>> {
    let mut statuses = HashMap::new();
    statuses.insert("s-1".to_string(), ActiveStatus::running());
    statuses.insert(
        "s-2".to_string(),
        ActiveStatus {
            status: SessionStatus::Error,
            has_unread: true,
            error: Some("boom".into()),
        },
    );
    Json(statuses)
}

async fn events(Path(id): Path<String>) -> Result<Json<Value>, (StatusCode, String)> {
    let start = StreamEvent::new(EventKind::Start, id.as_str(), Value::Null);
    let delta = StreamEvent::new(EventKind::TextDelta, id.as_str(), json!("Hi"));
    match id.as_str() {
        "bare" => Ok(Json(json!([start, delta]))),
        "wrapped" => Ok(Json(json!({ "events": [start] }))),
        _ => Err((StatusCode::INTERNAL_SERVER_ERROR, "cache offline".into())),
    }
}

async fn mark_read(State(backend): State<Backend>, Path(id): Path<String>) -> StatusCode {
    backend.read.lock().unwrap().push(id);
    StatusCode::OK
}

async fn serve() -> (HttpSessionApi, Backend) {
    let backend = Backend::default();
    let app = Router::new()
        .route("/api/sessions", get(list).post(create))
        .route("/api/sessions/status", get(status))
        .route("/api/sessions/:id", get(detail).delete(remove))
        .route("/api/sessions/:id/events", get(events))
        .route("/api/sessions/:id/read", post(mark_read))
        .with_state(backend.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let api = HttpSessionApi::new(&format!("http://{}/api/", addr)).unwrap();
    (api, backend)
}

// ─── Session CRUD ────────────────────────────────────────────────

#[tokio::test]
async fn test_create_list_get_delete() {
    let (api, _backend) = serve().await;

    let created = api.create(Some("refactor")).await.unwrap();
    assert_eq!(created.id, "s-1");
    assert_eq!(created.title.as_deref(), Some("refactor"));
    api.create(None).await.unwrap();

    let listed = api.list().await.unwrap();
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[1].title, None);

    let detail = api.get("s-1").await.unwrap();
    assert!(detail.messages.is_empty());
    assert_eq!(detail.last_model.as_deref(), Some("m-large"));

    api.delete("s-1").await.unwrap();
    assert!(matches!(api.get("s-1").await, Err(SessionError::NotFound(_))));
    assert!(matches!(api.delete("s-1").await, Err(SessionError::NotFound(_))));
}

// ─── Recovery Queries ────────────────────────────────────────────

#[tokio::test]
async fn test_active_status() {
    let (api, _backend) = serve().await;
    let statuses = api.get_active_status().await.unwrap();
    assert_eq!(statuses["s-1"].status, SessionStatus::Running);
    assert_eq!(statuses["s-2"].error.as_deref(), Some("boom"));
    assert!(statuses["s-2"].has_unread);
}

#[tokio::test]
async fn test_events_bare_and_wrapped() {
    let (api, _backend) = serve().await;

    let bare = api.get_events("bare").await.unwrap();
    assert_eq!(bare.len(), 2);
    assert_eq!(bare[1].kind, EventKind::TextDelta);
    assert_eq!(bare[1].session_id(), Some("bare"));

    let wrapped = api.get_events("wrapped").await.unwrap();
    assert_eq!(wrapped.len(), 1);
}

#[tokio::test]
async fn test_server_error_carries_body() {
    let (api, _backend) = serve().await;
    match api.get_events("broken").await {
        Err(SessionError::Api(message)) => {
            assert!(message.contains("500"));
            assert!(message.contains("cache offline"));
        }
        other => panic!("expected api error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_mark_read() {
    let (api, backend) = serve().await;
    api.mark_read("s-9").await.unwrap();
    assert_eq!(*backend.read.lock().unwrap(), vec!["s-9".to_string()]);
}

#[tokio::test]
async fn test_unreachable_backend() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let api = HttpSessionApi::new(&format!("http://{}/api", addr)).unwrap();
    assert!(matches!(api.list().await, Err(SessionError::Api(_))));
}
