//! Status-only watcher: polls a room until the stream ends.
//!
//! Used where no audio output exists (the CLI). Shares the listener's
//! polling cadence but never touches signaling.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bus::{BusEvent, RoomId, SharedBus};
use crate::stream::api::{StreamApi, StreamInfo, StreamStatus};

/// Log a warning after this many failed polls in a row
const MAX_CONSECUTIVE_POLL_FAILURES: u32 = 3;

#[derive(Default)]
struct WatchState {
    last: Option<StreamInfo>,
    running: bool,
}

#[derive(Clone)]
pub struct StreamWatcher {
    room: RoomId,
    poll_interval: Duration,
    api: Arc<dyn StreamApi>,
    bus: SharedBus,
    state: Arc<RwLock<WatchState>>,
    shutdown: Arc<RwLock<CancellationToken>>,
    /// Cancelled once the stream reports ENDED
    finished: CancellationToken,
}

impl StreamWatcher {
    pub fn new(room: RoomId, poll_interval: Duration, api: Arc<dyn StreamApi>, bus: SharedBus) -> Self {
        Self {
            room,
            poll_interval,
            api,
            bus,
            state: Arc::new(RwLock::new(WatchState::default())),
            shutdown: Arc::new(RwLock::new(CancellationToken::new())),
            finished: CancellationToken::new(),
        }
    }

    /// Last status seen
    pub async fn last(&self) -> Option<StreamInfo> {
        self.state.read().await.last.clone()
    }

    /// Resolves once the stream has ended
    pub async fn finished(&self) {
        self.finished.cancelled().await
    }

    async fn start_internal(&self) -> Result<()> {
        {
            let mut state = self.state.write().await;
            if state.running {
                return Ok(());
            }
            state.running = true;
        }

        let shutdown = {
            let mut token = self.shutdown.write().await;
            *token = CancellationToken::new();
            token.clone()
        };

        let watcher = self.clone();
        tokio::spawn(async move {
            watcher.run(shutdown).await;
            watcher.state.write().await.running = false;
        });
        Ok(())
    }

    async fn stop_internal(&self) {
        self.shutdown.read().await.cancel();
    }

    async fn run(&self, shutdown: CancellationToken) {
        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut consecutive_failures: u32 = 0;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("Watcher for room {} stopped", self.room);
                    break;
                }
                _ = ticker.tick() => {
                    match self.api.fetch_status(self.room).await {
                        Ok(info) => {
                            consecutive_failures = 0;
                            if self.record(info).await {
                                self.finished.cancel();
                                break;
                            }
                        }
                        Err(e) => {
                            consecutive_failures += 1;
                            if consecutive_failures >= MAX_CONSECUTIVE_POLL_FAILURES {
                                warn!(
                                    "Status poll for room {} failed {} times in a row: {}",
                                    self.room, consecutive_failures, e
                                );
                            } else {
                                debug!("Status poll for room {} failed: {}", self.room, e);
                            }
                        }
                    }
                }
            }
        }
    }

    /// Store the status and announce changes. Returns true once ended.
    async fn record(&self, info: StreamInfo) -> bool {
        let changed = {
            let mut state = self.state.write().await;
            let changed = state.last.as_ref() != Some(&info);
            state.last = Some(info.clone());
            changed
        };
        if changed {
            info!("Room {}: {}", self.room, info.summary());
        }
        let ended = info.status == StreamStatus::Ended;
        self.bus.publish(BusEvent::StreamInfoUpdated {
            room_id: self.room,
            info,
        });
        ended
    }
}

crate::impl_startable!(StreamWatcher, "watcher");
