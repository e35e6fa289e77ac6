//! Live khotba streaming: backend status API, signaling transport and the
//! listener session that ties them together.

pub mod api;
pub mod janus;
pub mod lifecycle;
pub mod listener;
pub mod signaling;
pub mod watch;

pub use api::{ApiError, HttpStreamApi, StreamApi, StreamInfo, StreamStatus};
pub use janus::JanusHttpClient;
pub use lifecycle::{shutdown_signal, stop_all, Startable};
pub use listener::{ListenerConfig, ListenerError, ListenerSession};
pub use signaling::{
    FeedId, Jsep, MediaEngine, MediaError, PlaybackOutcome, RemoteTrack, SignalingClient,
    SignalingError, SignalingEvent, TrackKind,
};
pub use watch::StreamWatcher;
