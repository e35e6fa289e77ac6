//! Event types published on the client event bus.
//!
//! UI shells subscribe to these to render listener status, schedule changes
//! and rolled-back optimistic actions. Nothing in the core reacts to its own
//! events; the bus is for observation only.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::stream::api::StreamInfo;

// =============================================================================
// RoomId - numeric live stream / room identifier
// =============================================================================

/// Identifier of a live stream. The backend and the Janus video room share
/// the same numeric id.
///
/// ```ignore
/// let room: RoomId = "42".parse().unwrap();
/// assert_eq!(room.get(), 42);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(u64);

impl RoomId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn get(&self) -> u64 {
        self.0
    }

    /// Parse an optional raw id (e.g. a QR scan result or link parameter).
    /// Empty, missing and non-numeric values all yield `None`.
    pub fn parse_opt(raw: Option<&str>) -> Option<Self> {
        raw.map(str::trim)
            .filter(|s| !s.is_empty())
            .and_then(|s| s.parse().ok())
    }
}

impl FromStr for RoomId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse::<u64>().map(Self)
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// ListenState - listener session state machine
// =============================================================================

/// Listener session state.
///
/// `idle → connecting → live → ended`. Autoplay being blocked by the host is
/// a flag on `Live`, not a state of its own.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum ListenState {
    #[default]
    Idle,
    Connecting,
    Live {
        autoplay_blocked: bool,
    },
    Ended,
}

impl ListenState {
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Live { .. })
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ended)
    }
}

impl fmt::Display for ListenState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Connecting => write!(f, "connecting"),
            Self::Live {
                autoplay_blocked: false,
            } => write!(f, "live"),
            Self::Live {
                autoplay_blocked: true,
            } => write!(f, "live (tap to play)"),
            Self::Ended => write!(f, "ended"),
        }
    }
}

/// Listener accounting action sent to the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListenerAction {
    Join,
    Leave,
}

impl ListenerAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Join => "join",
            Self::Leave => "leave",
        }
    }
}

// =============================================================================
// Bus Events
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum BusEvent {
    // =========================================================================
    // Live listener
    // =========================================================================
    /// Listener session moved to a new state
    ListenStateChanged {
        room_id: Option<RoomId>,
        state: ListenState,
        /// Human-readable status line for the UI
        status_text: String,
    },

    /// A status poll returned fresh stream metadata
    StreamInfoUpdated { room_id: RoomId, info: StreamInfo },

    /// Join/leave notification was attempted
    ListenerNotified {
        room_id: RoomId,
        action: ListenerAction,
        success: bool,
    },

    /// Listener task exited (ACK for stop)
    SessionStopped { room_id: Option<RoomId> },

    // =========================================================================
    // Local state
    // =========================================================================
    /// Events for a schedule date were added or removed
    ScheduleChanged { date: String, event_count: usize },

    /// Sebha counter changed
    SebhaTicked {
        count: u32,
        target: u32,
        rounds: u32,
    },

    /// A remote call failed and its local effect was rolled back
    CommandCompensated { command: String, error: String },

    /// Process is shutting down (unload hook)
    ShuttingDown { reason: Option<String> },
}

impl BusEvent {
    /// Short event name used in logs
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::ListenStateChanged { .. } => "ListenStateChanged",
            Self::StreamInfoUpdated { .. } => "StreamInfoUpdated",
            Self::ListenerNotified { .. } => "ListenerNotified",
            Self::SessionStopped { .. } => "SessionStopped",
            Self::ScheduleChanged { .. } => "ScheduleChanged",
            Self::SebhaTicked { .. } => "SebhaTicked",
            Self::CommandCompensated { .. } => "CommandCompensated",
            Self::ShuttingDown { .. } => "ShuttingDown",
        }
    }
}
