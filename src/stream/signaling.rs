//! Signaling transport and media sink seams for the listener.
//!
//! The room server and the audio output are external collaborators. The
//! listener only talks to them through these traits, so a session can be
//! driven end-to-end by mocks.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::bus::RoomId;

/// Janus publisher feed identifier inside a room
pub type FeedId = u64;

/// JSON-wrapped session description (`{"type": "offer", "sdp": "..."}`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jsep {
    #[serde(rename = "type")]
    pub kind: String,
    pub sdp: String,
}

impl Jsep {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: "offer".to_string(),
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: "answer".to_string(),
            sdp: sdp.into(),
        }
    }

    pub fn is_offer(&self) -> bool {
        self.kind == "offer"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

/// A remote media track announced by the room server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTrack {
    pub feed: Option<FeedId>,
    pub kind: TrackKind,
    pub mid: Option<String>,
}

/// Asynchronous notifications from the signaling transport
#[derive(Debug, Clone, PartialEq)]
pub enum SignalingEvent {
    /// A publisher is (or became) available in the joined room
    PublisherDiscovered(FeedId),
    /// A publisher stopped publishing or left
    PublisherLeft(FeedId),
    /// Media started flowing on the subscriber
    RemoteTrack(RemoteTrack),
    /// Transport or plugin error; `fatal` errors end the session
    Error { reason: String, fatal: bool },
}

#[derive(Debug, Error)]
pub enum SignalingError {
    #[error("signaling transport error: {0}")]
    Transport(String),

    #[error("signaling protocol error: {0}")]
    Protocol(String),

    #[error("signaling session is not connected")]
    NotConnected,

    #[error("timed out waiting for {0}")]
    Timeout(&'static str),
}

impl From<reqwest::Error> for SignalingError {
    fn from(e: reqwest::Error) -> Self {
        Self::Transport(e.to_string())
    }
}

/// Room-based publish/subscribe signaling (Janus video room semantics).
///
/// Call order: `connect` → `join_room` → (PublisherDiscovered) → `subscribe`
/// → `start` → (RemoteTrack) → `destroy`.
#[async_trait]
pub trait SignalingClient: Send + Sync {
    /// Open a session with the room server
    async fn connect(&self) -> Result<(), SignalingError>;

    /// Join `room` as a publisher that never publishes, to receive the
    /// publisher list and later publisher announcements
    async fn join_room(&self, room: RoomId) -> Result<(), SignalingError>;

    /// Attach a subscriber to `feed` and return the server's offer
    async fn subscribe(&self, room: RoomId, feed: FeedId) -> Result<Jsep, SignalingError>;

    /// Complete negotiation with the local answer
    async fn start(&self, room: RoomId, answer: Jsep) -> Result<(), SignalingError>;

    /// Wait for the next event. `Ok(None)` means the transport closed.
    /// Must be cancel safe: dropping the future loses no event.
    async fn next_event(&self) -> Result<Option<SignalingEvent>, SignalingError>;

    /// Tear down the session. Best effort.
    async fn destroy(&self) -> Result<(), SignalingError>;
}

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("could not negotiate media: {0}")]
    Negotiation(String),

    #[error("playback failed: {0}")]
    Playback(String),
}

/// Result of handing a remote track to the audio output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackOutcome {
    Playing,
    /// Host refused to start audio without a user gesture
    Blocked,
}

/// Peer connection plus audio output, provided by the embedding host
#[async_trait]
pub trait MediaEngine: Send + Sync {
    /// Produce the local answer for the subscriber offer
    async fn create_answer(&self, offer: &Jsep) -> Result<Jsep, MediaError>;

    /// Bind the remote track to the audio output and try to play it
    async fn attach(&self, track: RemoteTrack) -> Result<PlaybackOutcome, MediaError>;

    /// Retry playback after a user gesture
    async fn resume(&self) -> Result<(), MediaError>;

    /// Release the output and the peer connection
    async fn detach(&self);
}
