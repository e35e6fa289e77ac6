//! Live khotba listener session.
//!
//! Drives `idle → connecting → live → ended` for one room:
//!
//! ```text
//! poll status ──ACTIVE──> join notify ─> connect ─> join room (silent publisher)
//!      │                                              │ PublisherDiscovered(feed)
//!      │                                              v
//!      │                              subscribe(feed) ─> answer ─> start
//!      │                                              │ RemoteTrack(audio)
//!      │                                              v
//!      │                                  attach ─> Live { autoplay_blocked }
//!      └──ENDED / fatal signaling error──> Ended: destroy, detach, leave
//! ```
//!
//! There is no retry: a failed step leaves the session in `connecting` with
//! an explanatory status line. "leave" is attempted at most once per session,
//! whichever of ended / stop / unload gets there first.

use anyhow::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bus::{BusEvent, ListenState, ListenerAction, RoomId, SharedBus};
use crate::config::Config;
use crate::stream::api::{ApiError, StreamApi, StreamInfo, StreamStatus};
use crate::stream::signaling::{
    FeedId, MediaEngine, MediaError, PlaybackOutcome, SignalingClient, SignalingError,
    SignalingEvent, TrackKind,
};

/// How long `stop()` waits for the session task to clean up by itself
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("Missing room ID")]
    MissingRoomId,

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Signaling(#[from] SignalingError),

    #[error(transparent)]
    Media(#[from] MediaError),
}

impl ListenerError {
    /// Status line shown to the user
    pub fn status_text(&self) -> &'static str {
        match self {
            Self::MissingRoomId => "Missing room ID",
            Self::Api(_) => "Could not reach the server",
            Self::Signaling(_) => "Could not connect to the broadcast. Reload to try again.",
            Self::Media(_) => "Audio could not be started",
        }
    }
}

/// Per-session settings
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    pub poll_interval: Duration,
    pub user_id: Option<String>,
}

impl ListenerConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            user_id: config.user_id.clone(),
        }
    }
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            user_id: None,
        }
    }
}

struct SessionState {
    state: ListenState,
    status_text: String,
    info: Option<StreamInfo>,
    feed: Option<FeedId>,
    running: bool,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            state: ListenState::Idle,
            status_text: String::new(),
            info: None,
            feed: None,
            running: false,
        }
    }
}

/// Progress of the signaling side within one run
#[derive(Default)]
struct Flow {
    /// `connect` was attempted (teardown must destroy)
    signaling_started: bool,
    /// `connect` succeeded; events are being read
    signaling_active: bool,
    feed: Option<FeedId>,
}

enum EndReason {
    Stopped,
    StreamEnded,
    SignalingFailed(String),
}

/// Listener for one live stream room
#[derive(Clone)]
pub struct ListenerSession {
    room: Option<RoomId>,
    config: ListenerConfig,
    api: Arc<dyn StreamApi>,
    signaling: Arc<dyn SignalingClient>,
    media: Arc<dyn MediaEngine>,
    bus: SharedBus,
    state: Arc<RwLock<SessionState>>,
    leave_sent: Arc<AtomicBool>,
    /// Wrapped in RwLock to allow a fresh token per run
    shutdown: Arc<RwLock<CancellationToken>>,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl ListenerSession {
    pub fn new(
        room: Option<RoomId>,
        config: ListenerConfig,
        api: Arc<dyn StreamApi>,
        signaling: Arc<dyn SignalingClient>,
        media: Arc<dyn MediaEngine>,
        bus: SharedBus,
    ) -> Self {
        Self {
            room,
            config,
            api,
            signaling,
            media,
            bus,
            state: Arc::new(RwLock::new(SessionState::default())),
            leave_sent: Arc::new(AtomicBool::new(false)),
            shutdown: Arc::new(RwLock::new(CancellationToken::new())),
            task: Arc::new(Mutex::new(None)),
        }
    }

    pub fn room(&self) -> Option<RoomId> {
        self.room
    }

    pub async fn state(&self) -> ListenState {
        self.state.read().await.state
    }

    pub async fn status_text(&self) -> String {
        self.state.read().await.status_text.clone()
    }

    pub async fn stream_info(&self) -> Option<StreamInfo> {
        self.state.read().await.info.clone()
    }

    /// Feed currently subscribed to, if any
    pub async fn feed(&self) -> Option<FeedId> {
        self.state.read().await.feed
    }

    async fn has_room(&self) -> bool {
        self.room.is_some()
    }

    /// Resume playback after the host blocked autoplay
    pub async fn tap_to_play(&self) -> Result<(), ListenerError> {
        let blocked = matches!(
            self.state().await,
            ListenState::Live {
                autoplay_blocked: true
            }
        );
        if !blocked {
            return Ok(());
        }
        if let Err(e) = self.media.resume().await {
            warn!("Manual playback failed: {}", e);
            let err = ListenerError::Media(e);
            self.set_status_text(err.status_text()).await;
            return Err(err);
        }
        self.set_state(
            ListenState::Live {
                autoplay_blocked: false,
            },
            "Live",
        )
        .await;
        Ok(())
    }

    /// Unload hook: send "leave" right away without waiting for teardown.
    /// Safe to combine with `stop()`; only the first attempt goes out.
    pub async fn leave_now(&self) {
        if let Some(room) = self.room {
            self.send_leave(room).await;
        }
    }

    async fn start_internal(&self) -> Result<()> {
        let Some(room) = self.room else {
            let text = ListenerError::MissingRoomId.status_text();
            if self.status_text().await != text {
                self.set_state(ListenState::Idle, text).await;
            }
            return Err(ListenerError::MissingRoomId.into());
        };

        {
            let mut state = self.state.write().await;
            if state.running || state.state.is_terminal() {
                return Ok(());
            }
            state.running = true;
        }

        let shutdown = {
            let mut token = self.shutdown.write().await;
            *token = CancellationToken::new();
            token.clone()
        };

        self.set_state(ListenState::Connecting, "Checking stream status...")
            .await;
        info!("Listening to room {}", room);

        let session = self.clone();
        let handle = tokio::spawn(async move { session.run(room, shutdown).await });
        *self.task.lock().await = Some(handle);
        Ok(())
    }

    async fn stop_internal(&self) {
        self.shutdown.read().await.cancel();

        let handle = self.task.lock().await.take();
        match handle {
            Some(mut handle) => {
                if tokio::time::timeout(STOP_TIMEOUT, &mut handle).await.is_err() {
                    warn!("Listener task did not stop in {:?}, aborting", STOP_TIMEOUT);
                    handle.abort();
                    if let Some(room) = self.room {
                        self.teardown(room, true).await;
                    }
                    self.finish().await;
                }
            }
            // Never started; the page still announces leaving
            None => self.leave_now().await,
        }
    }

    async fn run(self, room: RoomId, shutdown: CancellationToken) {
        let mut ticker = interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut flow = Flow::default();

        let reason = loop {
            tokio::select! {
                _ = shutdown.cancelled() => break EndReason::Stopped,
                _ = ticker.tick() => {
                    if let Some(reason) = self.poll_once(room, &mut flow).await {
                        break reason;
                    }
                }
                event = self.signaling.next_event(), if flow.signaling_active => {
                    if let Some(reason) = self.handle_signaling_event(room, event, &mut flow).await {
                        break reason;
                    }
                }
            }
        };

        match reason {
            EndReason::Stopped => debug!("Listener for room {} stopped", room),
            EndReason::StreamEnded => {
                info!("Stream {} ended", room);
                self.set_state(ListenState::Ended, "The khotba has ended").await;
            }
            EndReason::SignalingFailed(reason) => {
                warn!("Signaling failed for room {}: {}", room, reason);
                self.set_state(ListenState::Ended, "Connection to the broadcast was lost")
                    .await;
            }
        }

        self.teardown(room, flow.signaling_started).await;
        self.finish().await;
    }

    async fn finish(&self) {
        self.state.write().await.running = false;
        self.bus.publish(BusEvent::SessionStopped { room_id: self.room });
    }

    /// One status poll. Returns `Some` when the session must end.
    async fn poll_once(&self, room: RoomId, flow: &mut Flow) -> Option<EndReason> {
        let info = match self.api.fetch_status(room).await {
            Ok(info) => info,
            Err(e) => {
                warn!("Status poll for room {} failed: {}", room, e);
                if self.state().await == ListenState::Connecting {
                    self.set_status_text(ListenerError::Api(e).status_text()).await;
                }
                return None;
            }
        };

        debug!("Room {}: {}", room, info.summary());
        self.state.write().await.info = Some(info.clone());
        self.bus.publish(BusEvent::StreamInfoUpdated {
            room_id: room,
            info: info.clone(),
        });

        match info.status {
            StreamStatus::Ended => return Some(EndReason::StreamEnded),
            StreamStatus::Pending if !flow.signaling_started => {
                self.set_status_text("The khotba has not started yet").await;
            }
            StreamStatus::Active if !flow.signaling_started => {
                flow.signaling_started = true;
                if let Err(e) = self.begin_signaling(room, flow).await {
                    warn!("Could not join room {}: {}", room, e);
                    self.set_status_text(e.status_text()).await;
                }
            }
            _ => {}
        }
        None
    }

    async fn begin_signaling(&self, room: RoomId, flow: &mut Flow) -> Result<(), ListenerError> {
        // Listener accounting goes out before any signaling
        self.notify(room, ListenerAction::Join).await;

        self.set_status_text("Connecting to the broadcast...").await;
        self.signaling.connect().await?;
        flow.signaling_active = true;

        self.signaling.join_room(room).await?;
        self.set_status_text("Waiting for the broadcaster...").await;
        Ok(())
    }

    async fn handle_signaling_event(
        &self,
        room: RoomId,
        event: Result<Option<SignalingEvent>, SignalingError>,
        flow: &mut Flow,
    ) -> Option<EndReason> {
        let event = match event {
            Ok(Some(event)) => event,
            Ok(None) => {
                return Some(EndReason::SignalingFailed(
                    "signaling connection closed".to_string(),
                ))
            }
            Err(e) => return Some(EndReason::SignalingFailed(e.to_string())),
        };

        match event {
            SignalingEvent::PublisherDiscovered(feed) => {
                if flow.feed.is_some() {
                    debug!("Already subscribed, ignoring publisher {}", feed);
                    return None;
                }
                info!("Discovered publisher {} in room {}", feed, room);
                flow.feed = Some(feed);
                self.state.write().await.feed = Some(feed);

                if let Err(e) = self.subscribe(room, feed).await {
                    warn!("Subscribing to feed {} failed: {}", feed, e);
                    flow.feed = None;
                    self.state.write().await.feed = None;
                    self.set_status_text(e.status_text()).await;
                }
            }
            SignalingEvent::PublisherLeft(feed) if flow.feed == Some(feed) => {
                info!("Publisher {} left room {}", feed, room);
                flow.feed = None;
                self.state.write().await.feed = None;
                self.media.detach().await;
                self.set_state(
                    ListenState::Connecting,
                    "The broadcaster disconnected. Waiting...",
                )
                .await;
            }
            SignalingEvent::PublisherLeft(feed) => {
                debug!("Ignoring departure of unsubscribed publisher {}", feed);
            }
            SignalingEvent::RemoteTrack(track) if track.kind == TrackKind::Audio => {
                match self.media.attach(track).await {
                    Ok(PlaybackOutcome::Playing) => {
                        self.set_state(
                            ListenState::Live {
                                autoplay_blocked: false,
                            },
                            "Live",
                        )
                        .await;
                    }
                    Ok(PlaybackOutcome::Blocked) => {
                        info!("Autoplay blocked, waiting for user gesture");
                        self.set_state(
                            ListenState::Live {
                                autoplay_blocked: true,
                            },
                            "Tap to play",
                        )
                        .await;
                    }
                    Err(e) => {
                        warn!("Attaching remote audio failed: {}", e);
                        self.set_status_text(ListenerError::Media(e).status_text())
                            .await;
                    }
                }
            }
            SignalingEvent::RemoteTrack(track) => {
                debug!("Ignoring non-audio track {:?}", track.kind);
            }
            SignalingEvent::Error {
                reason,
                fatal: true,
            } => return Some(EndReason::SignalingFailed(reason)),
            SignalingEvent::Error { reason, .. } => {
                warn!("Signaling error in room {}: {}", room, reason);
                self.set_status_text(
                    ListenerError::Signaling(SignalingError::Protocol(reason)).status_text(),
                )
                .await;
            }
        }
        None
    }

    async fn subscribe(&self, room: RoomId, feed: FeedId) -> Result<(), ListenerError> {
        let offer = self.signaling.subscribe(room, feed).await?;
        let answer = self.media.create_answer(&offer).await?;
        self.signaling.start(room, answer).await?;
        self.set_status_text("Receiving audio...").await;
        Ok(())
    }

    /// Best-effort cleanup; failures are logged and swallowed
    async fn teardown(&self, room: RoomId, signaling_started: bool) {
        if signaling_started {
            if let Err(e) = self.signaling.destroy().await {
                warn!("Destroying signaling session failed (ignored): {}", e);
            }
        }
        self.media.detach().await;
        self.send_leave(room).await;
    }

    async fn send_leave(&self, room: RoomId) {
        if self.leave_sent.swap(true, Ordering::SeqCst) {
            debug!("Leave for room {} already sent", room);
            return;
        }
        self.notify(room, ListenerAction::Leave).await;
    }

    async fn notify(&self, room: RoomId, action: ListenerAction) {
        let result = self
            .api
            .notify(room, action, self.config.user_id.as_deref())
            .await;
        if let Err(ref e) = result {
            warn!("{} notification for room {} failed: {}", action.as_str(), room, e);
        }
        self.bus.publish(BusEvent::ListenerNotified {
            room_id: room,
            action,
            success: result.is_ok(),
        });
    }

    async fn set_state(&self, new_state: ListenState, status_text: &str) {
        let changed = {
            let mut state = self.state.write().await;
            let changed = state.state != new_state;
            state.state = new_state;
            state.status_text = status_text.to_string();
            changed
        };
        if changed {
            debug!("Listener state -> {}", new_state);
        }
        self.bus.publish(BusEvent::ListenStateChanged {
            room_id: self.room,
            state: new_state,
            status_text: status_text.to_string(),
        });
    }

    async fn set_status_text(&self, status_text: &str) {
        let current = self.state().await;
        self.set_state(current, status_text).await;
    }
}

crate::impl_startable!(ListenerSession, "listener", has_room);
