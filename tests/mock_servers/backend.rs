//! Mock app backend
//!
//! Simulates the stream endpoints (`/api/stream-status`, `/api/stream/{id}`)
//! and the social endpoints used by the feed commands.

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{Method, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

/// A listener accounting call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub room: u64,
    pub action: String,
    pub user_id: Option<String>,
}

#[derive(Default)]
struct MockBackendState {
    /// Status payload per room
    streams: HashMap<u64, Value>,
    notifications: Vec<Notification>,
    /// (method, path, body)
    social: Vec<(String, String, Value)>,
    fail_social: bool,
}

type SharedState = Arc<RwLock<MockBackendState>>;

pub struct MockBackend {
    addr: SocketAddr,
    state: SharedState,
    handle: JoinHandle<()>,
}

impl MockBackend {
    /// Start a mock backend on a random port
    pub async fn start() -> Self {
        let state: SharedState = Arc::new(RwLock::new(MockBackendState::default()));

        let app = Router::new()
            .route("/api/stream-status", get(handle_status))
            .route("/api/stream/{id}", post(handle_notify))
            .route("/api/posts/{id}/like", post(handle_social).delete(handle_social))
            .route("/api/posts/{id}/comments", post(handle_social))
            .route("/api/users/{id}/follow", post(handle_social).delete(handle_social))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr,
            state,
            handle,
        }
    }

    /// Base URL as configured on the client (`.../api`)
    pub fn url(&self) -> String {
        format!("http://{}/api", self.addr)
    }

    /// Set the reported status for a room ("PENDING", "ACTIVE", "ENDED")
    pub async fn set_status(&self, room: u64, status: &str) {
        self.state.write().await.streams.insert(
            room,
            json!({
                "status": status,
                "listenerCount": 3,
                "mosqueName": "Masjid Al-Noor",
                "preacherName": "Sheikh Yusuf",
                "topic": "Sabr",
                "startedAt": "2024-03-08T12:15:00Z"
            }),
        );
    }

    pub async fn notifications(&self) -> Vec<Notification> {
        self.state.read().await.notifications.clone()
    }

    pub async fn social_calls(&self) -> Vec<(String, String, Value)> {
        self.state.read().await.social.clone()
    }

    /// Make every social endpoint answer 500
    pub async fn fail_social(&self, fail: bool) {
        self.state.write().await.fail_social = fail;
    }

    pub async fn stop(self) {
        self.handle.abort();
    }
}

#[derive(Deserialize)]
struct StatusQuery {
    id: u64,
}

async fn handle_status(
    State(state): State<SharedState>,
    Query(query): Query<StatusQuery>,
) -> Result<Json<Value>, StatusCode> {
    let state = state.read().await;
    state
        .streams
        .get(&query.id)
        .cloned()
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct NotifyQuery {
    action: String,
    user_id: Option<String>,
}

async fn handle_notify(
    State(state): State<SharedState>,
    Path(id): Path<u64>,
    Query(query): Query<NotifyQuery>,
) -> Json<Value> {
    state.write().await.notifications.push(Notification {
        room: id,
        action: query.action,
        user_id: query.user_id,
    });
    Json(json!({ "success": true }))
}

async fn handle_social(
    State(state): State<SharedState>,
    method: Method,
    uri: axum::http::Uri,
    body: Bytes,
) -> StatusCode {
    let mut state = state.write().await;
    let body: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    state
        .social
        .push((method.to_string(), uri.path().to_string(), body));
    if state.fail_social {
        StatusCode::INTERNAL_SERVER_ERROR
    } else {
        StatusCode::OK
    }
}
