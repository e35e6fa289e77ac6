//! Social feed state and the commands that mutate it.

use async_trait::async_trait;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;

use super::social::SocialApi;
use super::OptimisticCommand;
use crate::stream::api::ApiError;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: String,
    #[serde(default)]
    pub author_id: Option<String>,
    pub text: String,
    /// Shown locally, not yet confirmed by the backend
    #[serde(default, skip_serializing)]
    pub pending: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: String,
    #[serde(default)]
    pub author_id: Option<String>,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub liked: bool,
    #[serde(default)]
    pub like_count: u32,
    #[serde(default)]
    pub comments: Vec<Comment>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedState {
    pub posts: Vec<Post>,
    pub following: BTreeSet<String>,
}

impl FeedState {
    pub fn new(posts: Vec<Post>) -> Self {
        Self {
            posts,
            following: BTreeSet::new(),
        }
    }

    pub fn post(&self, id: &str) -> Option<&Post> {
        self.posts.iter().find(|p| p.id == id)
    }

    fn post_mut(&mut self, id: &str) -> Option<&mut Post> {
        self.posts.iter_mut().find(|p| p.id == id)
    }

    pub fn is_following(&self, user_id: &str) -> bool {
        self.following.contains(user_id)
    }
}

// =============================================================================
// Likes
// =============================================================================

pub struct LikePost {
    api: Arc<dyn SocialApi>,
    post_id: String,
}

impl LikePost {
    pub fn new(api: Arc<dyn SocialApi>, post_id: impl Into<String>) -> Self {
        Self {
            api,
            post_id: post_id.into(),
        }
    }
}

/// Set `liked` and adjust the count. Returns whether anything changed.
fn set_liked(state: &mut FeedState, post_id: &str, liked: bool) -> bool {
    match state.post_mut(post_id) {
        Some(post) if post.liked != liked => {
            post.liked = liked;
            post.like_count = if liked {
                post.like_count.saturating_add(1)
            } else {
                post.like_count.saturating_sub(1)
            };
            true
        }
        _ => false,
    }
}

#[async_trait]
impl OptimisticCommand<FeedState> for LikePost {
    type Undo = bool;

    fn name(&self) -> &'static str {
        "like_post"
    }

    fn apply(&self, state: &mut FeedState) -> bool {
        set_liked(state, &self.post_id, true)
    }

    async fn remote(&self) -> Result<(), ApiError> {
        self.api.like_post(&self.post_id).await
    }

    fn compensate(&self, state: &mut FeedState, changed: bool) {
        if changed {
            set_liked(state, &self.post_id, false);
        }
    }
}

pub struct UnlikePost {
    api: Arc<dyn SocialApi>,
    post_id: String,
}

impl UnlikePost {
    pub fn new(api: Arc<dyn SocialApi>, post_id: impl Into<String>) -> Self {
        Self {
            api,
            post_id: post_id.into(),
        }
    }
}

#[async_trait]
impl OptimisticCommand<FeedState> for UnlikePost {
    type Undo = bool;

    fn name(&self) -> &'static str {
        "unlike_post"
    }

    fn apply(&self, state: &mut FeedState) -> bool {
        set_liked(state, &self.post_id, false)
    }

    async fn remote(&self) -> Result<(), ApiError> {
        self.api.unlike_post(&self.post_id).await
    }

    fn compensate(&self, state: &mut FeedState, changed: bool) {
        if changed {
            set_liked(state, &self.post_id, true);
        }
    }
}

// =============================================================================
// Follows
// =============================================================================

pub struct FollowUser {
    api: Arc<dyn SocialApi>,
    user_id: String,
}

impl FollowUser {
    pub fn new(api: Arc<dyn SocialApi>, user_id: impl Into<String>) -> Self {
        Self {
            api,
            user_id: user_id.into(),
        }
    }
}

#[async_trait]
impl OptimisticCommand<FeedState> for FollowUser {
    type Undo = bool;

    fn name(&self) -> &'static str {
        "follow_user"
    }

    fn apply(&self, state: &mut FeedState) -> bool {
        state.following.insert(self.user_id.clone())
    }

    async fn remote(&self) -> Result<(), ApiError> {
        self.api.follow_user(&self.user_id).await
    }

    fn compensate(&self, state: &mut FeedState, inserted: bool) {
        if inserted {
            state.following.remove(&self.user_id);
        }
    }
}

pub struct UnfollowUser {
    api: Arc<dyn SocialApi>,
    user_id: String,
}

impl UnfollowUser {
    pub fn new(api: Arc<dyn SocialApi>, user_id: impl Into<String>) -> Self {
        Self {
            api,
            user_id: user_id.into(),
        }
    }
}

#[async_trait]
impl OptimisticCommand<FeedState> for UnfollowUser {
    type Undo = bool;

    fn name(&self) -> &'static str {
        "unfollow_user"
    }

    fn apply(&self, state: &mut FeedState) -> bool {
        state.following.remove(&self.user_id)
    }

    async fn remote(&self) -> Result<(), ApiError> {
        self.api.unfollow_user(&self.user_id).await
    }

    fn compensate(&self, state: &mut FeedState, removed: bool) {
        if removed {
            state.following.insert(self.user_id.clone());
        }
    }
}

// =============================================================================
// Comments
// =============================================================================

pub struct AddComment {
    api: Arc<dyn SocialApi>,
    post_id: String,
    author_id: Option<String>,
    text: String,
}

impl AddComment {
    pub fn new(
        api: Arc<dyn SocialApi>,
        post_id: impl Into<String>,
        author_id: Option<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            api,
            post_id: post_id.into(),
            author_id,
            text: text.into(),
        }
    }
}

fn local_comment_id() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(char::from)
        .collect();
    format!("local-{}", suffix)
}

#[async_trait]
impl OptimisticCommand<FeedState> for AddComment {
    /// Local id of the placeholder comment, if one was added
    type Undo = Option<String>;

    fn name(&self) -> &'static str {
        "add_comment"
    }

    fn apply(&self, state: &mut FeedState) -> Option<String> {
        let post = state.post_mut(&self.post_id)?;
        let id = local_comment_id();
        post.comments.push(Comment {
            id: id.clone(),
            author_id: self.author_id.clone(),
            text: self.text.clone(),
            pending: true,
        });
        Some(id)
    }

    async fn remote(&self) -> Result<(), ApiError> {
        self.api.add_comment(&self.post_id, &self.text).await
    }

    fn commit(&self, state: &mut FeedState, local_id: &Option<String>) {
        let (Some(id), Some(post)) = (local_id, state.post_mut(&self.post_id)) else {
            return;
        };
        if let Some(comment) = post.comments.iter_mut().find(|c| &c.id == id) {
            comment.pending = false;
        }
    }

    fn compensate(&self, state: &mut FeedState, local_id: Option<String>) {
        let (Some(id), Some(post)) = (local_id, state.post_mut(&self.post_id)) else {
            return;
        };
        post.comments.retain(|c| c.id != id);
    }
}
