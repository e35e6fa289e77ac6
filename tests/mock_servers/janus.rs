//! Mock Janus server (HTTP transport, video room plugin)
//!
//! Simulates `POST /janus`, `POST /janus/{session}`,
//! `POST /janus/{session}/{handle}` and the long-poll
//! `GET /janus/{session}?maxev=N`. Plugin messages are acked and their
//! results queued for the long poll, like a real server.

use axum::{
    extract::{Path, State},
    routing::post,
    Json, Router,
};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{Notify, RwLock};
use tokio::task::JoinHandle;

pub const OFFER_SDP: &str = "v=0\r\no=- 0 0 IN IP4 127.0.0.1\r\ns=janus\r\nm=audio 9 UDP/TLS/RTP/SAVPF 111\r\n";

/// How long a long-poll waits before answering with a keepalive
const LONG_POLL_WAIT: Duration = Duration::from_millis(300);

#[derive(Default)]
struct MockJanusState {
    next_id: u64,
    sessions: HashSet<u64>,
    destroyed: Vec<u64>,
    /// Plugin handles in attach order
    handles: Vec<u64>,
    detached: Vec<u64>,
    fail_attach: bool,
    /// Publishers per room
    rooms: HashMap<u64, Vec<u64>>,
    events: VecDeque<Value>,
    requests: Vec<Value>,
}

struct Shared {
    state: RwLock<MockJanusState>,
    notify: Notify,
}

impl Shared {
    async fn push_events(&self, events: Vec<Value>) {
        self.state.write().await.events.extend(events);
        self.notify.notify_waiters();
    }
}

pub struct MockJanusServer {
    addr: SocketAddr,
    shared: Arc<Shared>,
    handle: JoinHandle<()>,
}

impl MockJanusServer {
    /// Start a mock Janus server on a random port
    pub async fn start() -> Self {
        let shared = Arc::new(Shared {
            state: RwLock::new(MockJanusState {
                next_id: 1000,
                ..Default::default()
            }),
            notify: Notify::new(),
        });

        let app = Router::new()
            .route("/janus", post(handle_create))
            .route("/janus/{session}", post(handle_session).get(handle_poll))
            .route("/janus/{session}/{handle}", post(handle_plugin))
            .with_state(shared.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr,
            shared,
            handle,
        }
    }

    /// Server URL as configured on the client
    pub fn url(&self) -> String {
        format!("http://{}/janus", self.addr)
    }

    /// Register a room with its current publishers
    pub async fn add_room(&self, room: u64, publishers: &[u64]) {
        self.shared
            .state
            .write()
            .await
            .rooms
            .insert(room, publishers.to_vec());
    }

    /// Announce a new publisher to everyone in the room
    pub async fn publish(&self, room: u64, feed: u64) {
        self.shared
            .state
            .write()
            .await
            .rooms
            .entry(room)
            .or_default()
            .push(feed);
        self.shared
            .push_events(vec![json!({
                "janus": "event",
                "plugindata": {
                    "plugin": "janus.plugin.videoroom",
                    "data": { "videoroom": "event", "room": room, "publishers": [{ "id": feed, "display": "imam" }] }
                }
            })])
            .await;
    }

    /// Queue a raw event for the long poll
    pub async fn push_event(&self, event: Value) {
        self.shared.push_events(vec![event]).await;
    }

    /// Sessions destroyed by clients
    pub async fn destroyed(&self) -> Vec<u64> {
        self.shared.state.read().await.destroyed.clone()
    }

    /// Handles attached so far, oldest first
    pub async fn handles(&self) -> Vec<u64> {
        self.shared.state.read().await.handles.clone()
    }

    /// Handles released by clients, in order
    pub async fn detached(&self) -> Vec<u64> {
        self.shared.state.read().await.detached.clone()
    }

    /// Make every following attach fail with a plugin error
    pub async fn fail_attach(&self, fail: bool) {
        self.shared.state.write().await.fail_attach = fail;
    }

    pub async fn live_sessions(&self) -> usize {
        self.shared.state.read().await.sessions.len()
    }

    /// Request bodies received, in order
    pub async fn requests(&self) -> Vec<Value> {
        self.shared.state.read().await.requests.clone()
    }

    /// Plugin request bodies (`body.request`) received, in order
    pub async fn plugin_requests(&self) -> Vec<String> {
        self.requests()
            .await
            .iter()
            .filter_map(|r| {
                let body = &r["body"];
                let request = body["request"].as_str()?;
                Some(match body["ptype"].as_str() {
                    Some(ptype) => format!("{}:{}", request, ptype),
                    None => request.to_string(),
                })
            })
            .collect()
    }

    pub async fn stop(self) {
        self.handle.abort();
    }
}

fn success(transaction: &Value, data: Value) -> Json<Value> {
    Json(json!({ "janus": "success", "transaction": transaction, "data": data }))
}

fn error(transaction: &Value, code: u64, reason: &str) -> Json<Value> {
    Json(json!({
        "janus": "error",
        "transaction": transaction,
        "error": { "code": code, "reason": reason }
    }))
}

async fn handle_create(State(shared): State<Arc<Shared>>, Json(body): Json<Value>) -> Json<Value> {
    let mut state = shared.state.write().await;
    state.requests.push(body.clone());
    if body["janus"] != "create" {
        return error(&body["transaction"], 456, "Unhandled request");
    }
    state.next_id += 1;
    let session = state.next_id;
    state.sessions.insert(session);
    success(&body["transaction"], json!({ "id": session }))
}

async fn handle_session(
    State(shared): State<Arc<Shared>>,
    Path(session): Path<u64>,
    Json(body): Json<Value>,
) -> Json<Value> {
    let mut state = shared.state.write().await;
    state.requests.push(body.clone());
    let transaction = &body["transaction"];
    if !state.sessions.contains(&session) {
        return error(transaction, 458, "No such session");
    }

    match body["janus"].as_str() {
        Some("attach") if state.fail_attach => error(transaction, 460, "Plugin not found"),
        Some("attach") => {
            state.next_id += 1;
            let handle = state.next_id;
            state.handles.push(handle);
            success(transaction, json!({ "id": handle }))
        }
        Some("destroy") => {
            state.sessions.remove(&session);
            state.destroyed.push(session);
            drop(state);
            shared.notify.notify_waiters();
            success(transaction, json!({}))
        }
        Some("keepalive") => Json(json!({ "janus": "ack", "transaction": transaction })),
        _ => error(transaction, 456, "Unhandled request"),
    }
}

async fn handle_plugin(
    State(shared): State<Arc<Shared>>,
    Path((session, handle)): Path<(u64, u64)>,
    Json(body): Json<Value>,
) -> Json<Value> {
    let transaction = body["transaction"].clone();
    let events = {
        let mut state = shared.state.write().await;
        state.requests.push(body.clone());
        if !state.sessions.contains(&session) {
            return error(&transaction, 458, "No such session");
        }
        match body["janus"].as_str() {
            Some("message") => plugin_events(&state, handle, &transaction, &body["body"]),
            Some("detach") => {
                if !state.handles.contains(&handle) || state.detached.contains(&handle) {
                    return error(&transaction, 459, "No such handle");
                }
                state.detached.push(handle);
                drop(state);
                shared
                    .push_events(vec![json!({ "janus": "detached", "sender": handle })])
                    .await;
                return success(&transaction, json!({}));
            }
            _ => return error(&transaction, 456, "Unhandled request"),
        }
    };

    shared.push_events(events).await;
    Json(json!({ "janus": "ack", "transaction": transaction }))
}

/// Asynchronous results of a video room request
fn plugin_events(state: &MockJanusState, handle: u64, transaction: &Value, request: &Value) -> Vec<Value> {
    let room = request["room"].as_u64().unwrap_or_default();
    let plugin_event = |data: Value| {
        json!({
            "janus": "event",
            "sender": handle,
            "transaction": transaction,
            "plugindata": { "plugin": "janus.plugin.videoroom", "data": data }
        })
    };
    let Some(publishers) = state.rooms.get(&room) else {
        return vec![plugin_event(json!({
            "videoroom": "event",
            "error_code": 426,
            "error": format!("No such room ({})", room)
        }))];
    };

    match (request["request"].as_str(), request["ptype"].as_str()) {
        (Some("join"), Some("publisher")) => {
            let publishers: Vec<Value> = publishers
                .iter()
                .map(|id| json!({ "id": id, "display": "imam" }))
                .collect();
            vec![plugin_event(json!({
                "videoroom": "joined",
                "room": room,
                "id": handle,
                "publishers": publishers
            }))]
        }
        (Some("join"), Some("subscriber")) => {
            let feed = request["feed"].as_u64().unwrap_or_default();
            if !publishers.contains(&feed) {
                return vec![plugin_event(json!({
                    "videoroom": "event",
                    "error_code": 428,
                    "error": format!("No such feed ({})", feed)
                }))];
            }
            let mut event = plugin_event(json!({ "videoroom": "attached", "room": room, "id": feed }));
            event["jsep"] = json!({ "type": "offer", "sdp": OFFER_SDP });
            vec![event]
        }
        (Some("start"), _) => vec![
            plugin_event(json!({ "videoroom": "event", "room": room, "started": "ok" })),
            json!({ "janus": "webrtcup", "sender": handle }),
            json!({ "janus": "media", "sender": handle, "type": "audio", "mid": "0", "receiving": true }),
        ],
        _ => vec![plugin_event(json!({
            "videoroom": "event",
            "error_code": 423,
            "error": "Invalid request"
        }))],
    }
}

async fn handle_poll(State(shared): State<Arc<Shared>>, Path(session): Path<u64>) -> Json<Value> {
    let deadline = tokio::time::Instant::now() + LONG_POLL_WAIT;
    loop {
        let notified = shared.notify.notified();
        {
            let mut state = shared.state.write().await;
            if !state.sessions.contains(&session) {
                return Json(json!({
                    "janus": "error",
                    "session_id": session,
                    "error": { "code": 458, "reason": "No such session" }
                }));
            }
            if !state.events.is_empty() {
                return Json(Value::Array(state.events.drain(..).collect()));
            }
        }
        if tokio::time::timeout_at(deadline, notified).await.is_err() {
            return Json(json!({ "janus": "keepalive" }));
        }
    }
}
