//! Janus video room client over the Janus HTTP API.
//!
//! Requests are JSON POSTs to `{server}`, `{server}/{session}` and
//! `{server}/{session}/{handle}`; asynchronous plugin replies and
//! notifications are read by a background long-poll task
//! (`GET {server}/{session}?maxev=N`). Replies are matched to requests by
//! `transaction`; everything else is translated into [`SignalingEvent`]s.

use async_trait::async_trait;
use rand::distributions::Alphanumeric;
use rand::Rng;
use reqwest::Client;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bus::RoomId;
use crate::stream::signaling::{
    FeedId, Jsep, RemoteTrack, SignalingClient, SignalingError, SignalingEvent, TrackKind,
};

const VIDEOROOM_PLUGIN: &str = "janus.plugin.videoroom";
const TRANSACTION_LEN: usize = 12;
const EVENT_CHANNEL_CAPACITY: usize = 64;
/// Janus holds a long-poll for up to 30s
const LONG_POLL_TIMEOUT: Duration = Duration::from_secs(45);
const MAX_EVENTS_PER_POLL: u32 = 10;
const MAX_CONSECUTIVE_POLL_FAILURES: u32 = 3;
const POLL_FAILURE_PAUSE: Duration = Duration::from_millis(500);
const ASYNC_REPLY_TIMEOUT: Duration = Duration::from_secs(15);

fn new_transaction() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(TRANSACTION_LEN)
        .map(char::from)
        .collect()
}

/// `{"janus": kind, "transaction": ...}`
fn envelope(kind: &str) -> Value {
    json!({ "janus": kind, "transaction": new_transaction() })
}

/// Top-level `{"janus":"error","error":{"code":..,"reason":..}}`
fn janus_error(reply: &Value) -> Option<String> {
    if reply["janus"].as_str() != Some("error") {
        return None;
    }
    let code = reply["error"]["code"].as_i64().unwrap_or_default();
    let reason = reply["error"]["reason"].as_str().unwrap_or("unknown error");
    Some(format!("{} ({})", reason, code))
}

/// Plugin-level `plugindata.data.error`
fn plugin_error(reply: &Value) -> Option<String> {
    let data = &reply["plugindata"]["data"];
    data["error"].as_str().map(|reason| {
        let code = data["error_code"].as_i64().unwrap_or_default();
        format!("{} ({})", reason, code)
    })
}

type PendingReplies = Arc<Mutex<HashMap<String, oneshot::Sender<Value>>>>;

#[derive(Default)]
struct JanusState {
    session_id: Option<u64>,
    publisher_handle: Option<u64>,
    subscriber_handle: Option<u64>,
    subscribed_feed: Option<FeedId>,
    poller: Option<CancellationToken>,
}

/// [`SignalingClient`] for a Janus server's HTTP transport
#[derive(Clone)]
pub struct JanusHttpClient {
    server_url: String,
    client: Client,
    state: Arc<RwLock<JanusState>>,
    pending: PendingReplies,
    events_tx: mpsc::Sender<SignalingEvent>,
    events_rx: Arc<tokio::sync::Mutex<mpsc::Receiver<SignalingEvent>>>,
}

impl JanusHttpClient {
    pub fn new(server_url: impl Into<String>, timeout: Duration) -> Result<Self, SignalingError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client, server_url))
    }

    pub fn with_client(client: Client, server_url: impl Into<String>) -> Self {
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            server_url: server_url.into().trim_end_matches('/').to_string(),
            client,
            state: Arc::new(RwLock::new(JanusState::default())),
            pending: Arc::new(Mutex::new(HashMap::new())),
            events_tx,
            events_rx: Arc::new(tokio::sync::Mutex::new(events_rx)),
        }
    }

    pub async fn session_id(&self) -> Option<u64> {
        self.state.read().await.session_id
    }

    async fn post(&self, path: &str, body: Value) -> Result<Value, SignalingError> {
        let url = format!("{}{}", self.server_url, path);
        debug!(janus = ?body["janus"], "POST {}", url);

        let response = self.client.post(&url).json(&body).send().await?;
        if !response.status().is_success() {
            return Err(SignalingError::Transport(format!(
                "{} returned {}",
                url,
                response.status()
            )));
        }

        let reply: Value = response.json().await?;
        if let Some(reason) = janus_error(&reply) {
            return Err(SignalingError::Protocol(reason));
        }
        Ok(reply)
    }

    async fn attach(&self, session: u64) -> Result<u64, SignalingError> {
        let mut body = envelope("attach");
        body["plugin"] = json!(VIDEOROOM_PLUGIN);
        let reply = self.post(&format!("/{}", session), body).await?;
        reply["data"]["id"]
            .as_u64()
            .ok_or_else(|| SignalingError::Protocol("attach reply without handle id".into()))
    }

    /// Release a plugin handle. Failures are logged only.
    async fn detach(&self, session: u64, handle: u64) {
        match self
            .post(&format!("/{}/{}", session, handle), envelope("detach"))
            .await
        {
            Ok(_) => debug!("Detached handle {}", handle),
            Err(e) => warn!("Failed to detach handle {}: {}", handle, e),
        }
    }

    /// Send a plugin message. Synchronous replies (`success`) return
    /// directly; `ack` waits for the matching event from the poller.
    async fn send_message(
        &self,
        handle: u64,
        body: Value,
        jsep: Option<&Jsep>,
    ) -> Result<Value, SignalingError> {
        let session = self
            .session_id()
            .await
            .ok_or(SignalingError::NotConnected)?;

        let mut request = envelope("message");
        request["body"] = body;
        if let Some(jsep) = jsep {
            request["jsep"] = json!(jsep);
        }
        let transaction = request["transaction"]
            .as_str()
            .unwrap_or_default()
            .to_string();

        let (tx, rx) = oneshot::channel();
        self.register_pending(&transaction, tx);

        let reply = match self.post(&format!("/{}/{}", session, handle), request).await {
            Ok(reply) => reply,
            Err(e) => {
                self.take_pending(&transaction);
                return Err(e);
            }
        };

        let reply_kind = reply["janus"].as_str().map(str::to_string);
        let event = match reply_kind.as_deref() {
            Some("success") => {
                self.take_pending(&transaction);
                reply
            }
            Some("ack") => match tokio::time::timeout(ASYNC_REPLY_TIMEOUT, rx).await {
                Ok(Ok(event)) => event,
                Ok(Err(_)) => {
                    return Err(SignalingError::Transport("event poller stopped".into()));
                }
                Err(_) => {
                    self.take_pending(&transaction);
                    return Err(SignalingError::Timeout("plugin reply"));
                }
            },
            other => {
                self.take_pending(&transaction);
                return Err(SignalingError::Protocol(format!(
                    "unexpected reply to message: {:?}",
                    other
                )));
            }
        };

        if let Some(reason) = plugin_error(&event) {
            return Err(SignalingError::Protocol(reason));
        }
        Ok(event)
    }

    fn register_pending(&self, transaction: &str, tx: oneshot::Sender<Value>) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.insert(transaction.to_string(), tx);
        }
    }

    fn take_pending(&self, transaction: &str) -> Option<oneshot::Sender<Value>> {
        self.pending
            .lock()
            .ok()
            .and_then(|mut pending| pending.remove(transaction))
    }

    fn spawn_poller(&self, session: u64) -> CancellationToken {
        let shutdown = CancellationToken::new();
        let poller = EventPoller {
            client: self.client.clone(),
            url: format!("{}/{}?maxev={}", self.server_url, session, MAX_EVENTS_PER_POLL),
            state: self.state.clone(),
            pending: self.pending.clone(),
            events_tx: self.events_tx.clone(),
        };
        let token = shutdown.clone();
        tokio::spawn(async move { poller.run(token).await });
        shutdown
    }
}

#[async_trait]
impl SignalingClient for JanusHttpClient {
    async fn connect(&self) -> Result<(), SignalingError> {
        let reply = self.post("", envelope("create")).await?;
        let session = reply["data"]["id"]
            .as_u64()
            .ok_or_else(|| SignalingError::Protocol("create reply without session id".into()))?;

        let poller = self.spawn_poller(session);
        let handle = match self.attach(session).await {
            Ok(handle) => handle,
            Err(e) => {
                poller.cancel();
                if let Err(destroy_err) = self
                    .post(&format!("/{}", session), envelope("destroy"))
                    .await
                {
                    warn!("Failed to destroy session {}: {}", session, destroy_err);
                }
                return Err(e);
            }
        };

        let mut state = self.state.write().await;
        state.session_id = Some(session);
        state.publisher_handle = Some(handle);
        state.poller = Some(poller);
        info!("Janus session {} created (publisher handle {})", session, handle);
        Ok(())
    }

    async fn join_room(&self, room: RoomId) -> Result<(), SignalingError> {
        let handle = self
            .state
            .read()
            .await
            .publisher_handle
            .ok_or(SignalingError::NotConnected)?;

        // Publishers in the `joined` reply are emitted by the poller
        self.send_message(
            handle,
            json!({
                "request": "join",
                "ptype": "publisher",
                "room": room.get(),
                "display": "listener",
            }),
            None,
        )
        .await?;
        info!("Joined room {} as silent publisher", room);
        Ok(())
    }

    async fn subscribe(&self, room: RoomId, feed: FeedId) -> Result<Jsep, SignalingError> {
        let session = self
            .session_id()
            .await
            .ok_or(SignalingError::NotConnected)?;
        let previous = {
            let mut state = self.state.write().await;
            state.subscribed_feed = None;
            state.subscriber_handle.take()
        };
        if let Some(previous) = previous {
            self.detach(session, previous).await;
        }

        let handle = self.attach(session).await?;
        {
            let mut state = self.state.write().await;
            state.subscriber_handle = Some(handle);
            state.subscribed_feed = Some(feed);
        }

        let event = self
            .send_message(
                handle,
                json!({
                    "request": "join",
                    "ptype": "subscriber",
                    "room": room.get(),
                    "feed": feed,
                }),
                None,
            )
            .await?;

        let jsep: Jsep = serde_json::from_value(event["jsep"].clone())
            .map_err(|_| SignalingError::Protocol("subscriber join without offer".into()))?;
        debug!("Received {} for feed {}", jsep.kind, feed);
        Ok(jsep)
    }

    async fn start(&self, room: RoomId, answer: Jsep) -> Result<(), SignalingError> {
        let handle = self
            .state
            .read()
            .await
            .subscriber_handle
            .ok_or(SignalingError::NotConnected)?;
        self.send_message(
            handle,
            json!({ "request": "start", "room": room.get() }),
            Some(&answer),
        )
        .await?;
        Ok(())
    }

    async fn next_event(&self) -> Result<Option<SignalingEvent>, SignalingError> {
        let mut rx = self.events_rx.lock().await;
        Ok(rx.recv().await)
    }

    async fn destroy(&self) -> Result<(), SignalingError> {
        let (session, poller) = {
            let mut state = self.state.write().await;
            let session = state.session_id.take();
            let poller = state.poller.take();
            *state = JanusState::default();
            (session, poller)
        };

        if let Some(poller) = poller {
            poller.cancel();
        }
        if let Ok(mut pending) = self.pending.lock() {
            pending.clear();
        }

        match session {
            Some(session) => {
                self.post(&format!("/{}", session), envelope("destroy"))
                    .await?;
                info!("Janus session {} destroyed", session);
                Ok(())
            }
            None => Ok(()),
        }
    }
}

// =============================================================================
// Event poller
// =============================================================================

struct EventPoller {
    client: Client,
    url: String,
    state: Arc<RwLock<JanusState>>,
    pending: PendingReplies,
    events_tx: mpsc::Sender<SignalingEvent>,
}

impl EventPoller {
    async fn run(self, shutdown: CancellationToken) {
        let mut consecutive_failures: u32 = 0;

        loop {
            let fetch = async {
                let response = self
                    .client
                    .get(&self.url)
                    .timeout(LONG_POLL_TIMEOUT)
                    .send()
                    .await?;
                response.json::<Value>().await
            };

            let result = tokio::select! {
                _ = shutdown.cancelled() => break,
                result = fetch => result,
            };

            match result {
                Ok(value) => {
                    consecutive_failures = 0;
                    let events = match value {
                        Value::Array(items) => items,
                        single => vec![single],
                    };
                    for event in events {
                        if let Some(reason) = janus_error(&event) {
                            // Session gone (e.g. 458 no such session)
                            self.emit(SignalingEvent::Error {
                                reason,
                                fatal: true,
                            })
                            .await;
                            return;
                        }
                        self.route(event).await;
                    }
                }
                Err(e) => {
                    consecutive_failures += 1;
                    if consecutive_failures >= MAX_CONSECUTIVE_POLL_FAILURES {
                        warn!(
                            "Janus event poll failed {} consecutive times: {}",
                            consecutive_failures, e
                        );
                        self.emit(SignalingEvent::Error {
                            reason: format!("lost connection to media server: {}", e),
                            fatal: true,
                        })
                        .await;
                        return;
                    }
                    warn!(
                        "Janus event poll failed ({}/{}): {}",
                        consecutive_failures, MAX_CONSECUTIVE_POLL_FAILURES, e
                    );
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(POLL_FAILURE_PAUSE) => {}
                    }
                }
            }
        }
        debug!("Janus event poller stopped");
    }

    async fn emit(&self, event: SignalingEvent) {
        // Receiver lives as long as the client
        let _ = self.events_tx.send(event).await;
    }

    async fn route(&self, event: Value) {
        let kind = event["janus"].as_str().unwrap_or_default().to_string();

        let waiter = event["transaction"].as_str().and_then(|t| {
            self.pending
                .lock()
                .ok()
                .and_then(|mut pending| pending.remove(t))
        });
        let answered = waiter.is_some();
        if let Some(tx) = waiter {
            let _ = tx.send(event.clone());
        }

        let (subscriber, feed) = {
            let state = self.state.read().await;
            (state.subscriber_handle, state.subscribed_feed)
        };
        let from_subscriber = subscriber.is_some() && event["sender"].as_u64() == subscriber;

        match kind.as_str() {
            "event" => {
                let data = &event["plugindata"]["data"];
                if let Some(publishers) = data["publishers"].as_array() {
                    for id in publishers.iter().filter_map(|p| p["id"].as_u64()) {
                        self.emit(SignalingEvent::PublisherDiscovered(id)).await;
                    }
                }
                // Own handle gets "unpublished": "ok"; only numeric ids are feeds
                for key in ["unpublished", "leaving"] {
                    if let Some(id) = data[key].as_u64() {
                        self.emit(SignalingEvent::PublisherLeft(id)).await;
                    }
                }
                if !answered {
                    if let Some(reason) = plugin_error(&event) {
                        self.emit(SignalingEvent::Error {
                            reason,
                            fatal: false,
                        })
                        .await;
                    }
                }
            }
            "media" => {
                if event["receiving"].as_bool() != Some(true) {
                    return;
                }
                let track_kind = match event["type"].as_str() {
                    Some("audio") => TrackKind::Audio,
                    Some("video") => TrackKind::Video,
                    _ => return,
                };
                self.emit(SignalingEvent::RemoteTrack(RemoteTrack {
                    feed,
                    kind: track_kind,
                    mid: event["mid"].as_str().map(str::to_string),
                }))
                .await;
            }
            "hangup" | "detached" if from_subscriber => {
                let reason = event["reason"].as_str().unwrap_or(kind.as_str()).to_string();
                self.emit(SignalingEvent::Error {
                    reason: format!("media connection closed: {}", reason),
                    fatal: true,
                })
                .await;
            }
            "webrtcup" => debug!("PeerConnection up (sender {:?})", event["sender"]),
            "slowlink" => debug!("Janus reports slow link: {}", event),
            "keepalive" | "ack" | "success" => {}
            other => debug!("Ignoring Janus event {:?}", other),
        }
    }
}
