//! Sebha (prayer-bead) counter.
//!
//! Counts up to a target (33 by default); reaching it wraps the count to
//! zero and completes a round. State is written through to the local store
//! after every change.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::bus::{BusEvent, SharedBus};
use crate::storage::{LocalStore, StorageError};

pub const SEBHA_KEY: &str = "sebha";
pub const DEFAULT_TARGET: u32 = 33;

#[derive(Debug, Error)]
pub enum SebhaError {
    #[error("target must be at least 1")]
    ZeroTarget,

    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SebhaState {
    pub count: u32,
    pub target: u32,
    pub rounds: u32,
}

impl Default for SebhaState {
    fn default() -> Self {
        Self {
            count: 0,
            target: DEFAULT_TARGET,
            rounds: 0,
        }
    }
}

/// Outcome of one increment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    Counted(u32),
    /// Target reached; count wrapped to zero
    RoundComplete { rounds: u32 },
}

pub struct Sebha {
    store: LocalStore,
    bus: Option<SharedBus>,
    state: SebhaState,
}

impl Sebha {
    pub fn open(store: LocalStore) -> Self {
        let mut state: SebhaState = store.load_or_default(SEBHA_KEY);
        if state.target == 0 {
            state.target = DEFAULT_TARGET;
        }
        if state.count >= state.target {
            state.count = 0;
        }
        Self {
            store,
            bus: None,
            state,
        }
    }

    pub fn with_bus(mut self, bus: SharedBus) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn state(&self) -> SebhaState {
        self.state
    }

    pub fn increment(&mut self) -> Result<Tick, SebhaError> {
        let mut next = self.state;
        next.count += 1;
        let tick = if next.count >= next.target {
            next.count = 0;
            next.rounds = next.rounds.saturating_add(1);
            Tick::RoundComplete {
                rounds: next.rounds,
            }
        } else {
            Tick::Counted(next.count)
        };
        self.commit(next)?;
        Ok(tick)
    }

    pub fn reset(&mut self) -> Result<(), SebhaError> {
        self.commit(SebhaState {
            count: 0,
            rounds: 0,
            ..self.state
        })
    }

    /// Change the round size. Resets the current count, keeps rounds.
    pub fn set_target(&mut self, target: u32) -> Result<(), SebhaError> {
        if target == 0 {
            return Err(SebhaError::ZeroTarget);
        }
        self.commit(SebhaState {
            count: 0,
            target,
            rounds: self.state.rounds,
        })
    }

    fn commit(&mut self, next: SebhaState) -> Result<(), SebhaError> {
        self.store.save(SEBHA_KEY, &next)?;
        self.state = next;
        debug!(
            "Sebha {}/{} (rounds: {})",
            next.count, next.target, next.rounds
        );
        if let Some(ref bus) = self.bus {
            bus.publish(BusEvent::SebhaTicked {
                count: next.count,
                target: next.target,
                rounds: next.rounds,
            });
        }
        Ok(())
    }
}
