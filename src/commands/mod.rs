//! Optimistic updates with compensation.
//!
//! A command mutates local state first, then performs its remote call with
//! no lock held. If the call fails the executor applies the command's
//! inverse and publishes [`BusEvent::CommandCompensated`]. Inverses are
//! deltas, not snapshots, so concurrent commands on other items are not
//! rolled back with it.

pub mod feed;
pub mod social;

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::bus::{BusEvent, SharedBus};
use crate::stream::api::ApiError;

pub use feed::{
    AddComment, Comment, FeedState, FollowUser, LikePost, Post, UnfollowUser, UnlikePost,
};
pub use social::{HttpSocialApi, SocialApi};

#[async_trait]
pub trait OptimisticCommand<S>: Send + Sync {
    /// What `apply` changed, handed back to `commit`/`compensate`
    type Undo: Send;

    fn name(&self) -> &'static str;

    /// Local mutation, visible immediately
    fn apply(&self, state: &mut S) -> Self::Undo;

    async fn remote(&self) -> Result<(), ApiError>;

    /// Remote call succeeded
    fn commit(&self, _state: &mut S, _undo: &Self::Undo) {}

    /// Remote call failed; reverse `apply`
    fn compensate(&self, state: &mut S, undo: Self::Undo);
}

/// Owns a piece of client state and runs commands against it
pub struct CommandExecutor<S> {
    state: Arc<RwLock<S>>,
    bus: SharedBus,
}

impl<S> Clone for CommandExecutor<S> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
            bus: self.bus.clone(),
        }
    }
}

impl<S: Send + Sync> CommandExecutor<S> {
    pub fn new(initial: S, bus: SharedBus) -> Self {
        Self {
            state: Arc::new(RwLock::new(initial)),
            bus,
        }
    }

    pub fn state(&self) -> Arc<RwLock<S>> {
        self.state.clone()
    }

    pub async fn snapshot(&self) -> S
    where
        S: Clone,
    {
        self.state.read().await.clone()
    }

    pub async fn execute<C>(&self, command: &C) -> Result<(), ApiError>
    where
        C: OptimisticCommand<S>,
    {
        let undo = {
            let mut state = self.state.write().await;
            command.apply(&mut state)
        };

        match command.remote().await {
            Ok(()) => {
                let mut state = self.state.write().await;
                command.commit(&mut state, &undo);
                debug!("{} confirmed", command.name());
                Ok(())
            }
            Err(e) => {
                {
                    let mut state = self.state.write().await;
                    command.compensate(&mut state, undo);
                }
                warn!("{} failed, reverted local change: {}", command.name(), e);
                self.bus.publish(BusEvent::CommandCompensated {
                    command: command.name().to_string(),
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }
}
