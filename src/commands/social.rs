//! Social backend operations used by the feed commands.
//!
//! - `POST|DELETE {backend}/posts/{id}/like`
//! - `POST|DELETE {backend}/users/{id}/follow`
//! - `POST {backend}/posts/{id}/comments` with `{"text": "..."}`

use async_trait::async_trait;
use reqwest::{Client, Method};
use serde_json::json;
use std::time::Duration;
use tracing::debug;

use crate::stream::api::ApiError;

#[async_trait]
pub trait SocialApi: Send + Sync {
    async fn like_post(&self, post_id: &str) -> Result<(), ApiError>;
    async fn unlike_post(&self, post_id: &str) -> Result<(), ApiError>;
    async fn follow_user(&self, user_id: &str) -> Result<(), ApiError>;
    async fn unfollow_user(&self, user_id: &str) -> Result<(), ApiError>;
    async fn add_comment(&self, post_id: &str, text: &str) -> Result<(), ApiError>;
}

/// reqwest-backed [`SocialApi`]
#[derive(Clone)]
pub struct HttpSocialApi {
    client: Client,
    base_url: String,
}

impl HttpSocialApi {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ApiError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client, base_url))
    }

    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url }
    }

    fn url(&self, collection: &str, id: &str, action: &str) -> String {
        format!(
            "{}/{}/{}/{}",
            self.base_url,
            collection,
            urlencoding::encode(id),
            action
        )
    }

    async fn send(&self, method: Method, url: String, body: Option<serde_json::Value>) -> Result<(), ApiError> {
        debug!("{} {}", method, url);
        let mut request = self.client.request(method, &url);
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(ApiError::Status {
                status: response.status().as_u16(),
                url,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl SocialApi for HttpSocialApi {
    async fn like_post(&self, post_id: &str) -> Result<(), ApiError> {
        self.send(Method::POST, self.url("posts", post_id, "like"), None).await
    }

    async fn unlike_post(&self, post_id: &str) -> Result<(), ApiError> {
        self.send(Method::DELETE, self.url("posts", post_id, "like"), None).await
    }

    async fn follow_user(&self, user_id: &str) -> Result<(), ApiError> {
        self.send(Method::POST, self.url("users", user_id, "follow"), None).await
    }

    async fn unfollow_user(&self, user_id: &str) -> Result<(), ApiError> {
        self.send(Method::DELETE, self.url("users", user_id, "follow"), None).await
    }

    async fn add_comment(&self, post_id: &str, text: &str) -> Result<(), ApiError> {
        let body = json!({ "text": text });
        self.send(Method::POST, self.url("posts", post_id, "comments"), Some(body))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_encode_ids() {
        let api = HttpSocialApi::with_client(Client::new(), "http://host/api/");
        assert_eq!(api.url("posts", "p1", "like"), "http://host/api/posts/p1/like");
        assert_eq!(
            api.url("users", "a/b", "follow"),
            "http://host/api/users/a%2Fb/follow"
        );
    }
}
