//! Backend stream API: status polling and listener accounting.
//!
//! - `GET  {backend}/stream-status?id=<id>` → [`StreamInfo`]
//! - `POST {backend}/stream/{id}?action=join|leave&userId=<id>` (fire and forget)

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::bus::{ListenerAction, RoomId};

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server returned {status} for {url}")]
    Status { status: u16, url: String },

    #[error("unexpected response body: {0}")]
    Decode(String),
}

/// Stream lifecycle as reported by the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StreamStatus {
    Pending,
    Active,
    Ended,
}

impl std::fmt::Display for StreamStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Active => write!(f, "ACTIVE"),
            Self::Ended => write!(f, "ENDED"),
        }
    }
}

/// `GET /stream-status` payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamInfo {
    pub status: StreamStatus,
    #[serde(default, deserialize_with = "lenient_count")]
    pub listener_count: u32,
    #[serde(default)]
    pub mosque_name: Option<String>,
    #[serde(default)]
    pub preacher_name: Option<String>,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub started_at: Option<DateTime<Utc>>,
}

/// `null`, negative or non-numeric counts read as 0
fn lenient_count<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u32, D::Error> {
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value
        .as_ref()
        .and_then(Value::as_u64)
        .and_then(|n| u32::try_from(n).ok())
        .unwrap_or_default())
}

/// RFC 3339, an offset-less local timestamp (taken as UTC) or epoch
/// millis. Anything else reads as `None`.
fn lenient_timestamp<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<DateTime<Utc>>, D::Error> {
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(raw)) => parse_timestamp(&raw),
        Some(Value::Number(n)) => n.as_i64().and_then(DateTime::from_timestamp_millis),
        _ => None,
    })
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
        .map(|naive| naive.and_utc())
}

impl StreamInfo {
    /// One-line summary for logs and the CLI
    pub fn summary(&self) -> String {
        let mut parts = vec![self.status.to_string()];
        if let Some(ref mosque) = self.mosque_name {
            parts.push(mosque.clone());
        }
        if let Some(ref preacher) = self.preacher_name {
            parts.push(preacher.clone());
        }
        if let Some(ref topic) = self.topic {
            parts.push(format!("\"{}\"", topic));
        }
        parts.push(format!("{} listening", self.listener_count));
        parts.join(" | ")
    }
}

/// Backend operations the listener depends on. Injected so the session can
/// be driven by a mock in tests.
#[async_trait]
pub trait StreamApi: Send + Sync {
    async fn fetch_status(&self, room: RoomId) -> Result<StreamInfo, ApiError>;

    async fn notify(
        &self,
        room: RoomId,
        action: ListenerAction,
        user_id: Option<&str>,
    ) -> Result<(), ApiError>;
}

/// reqwest-backed [`StreamApi`]
#[derive(Clone)]
pub struct HttpStreamApi {
    client: Client,
    base_url: String,
}

impl HttpStreamApi {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ApiError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client, base_url))
    }

    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url }
    }

    fn status_url(&self, room: RoomId) -> String {
        format!("{}/stream-status?id={}", self.base_url, room)
    }

    fn notify_url(&self, room: RoomId, action: ListenerAction, user_id: Option<&str>) -> String {
        let mut url = format!("{}/stream/{}?action={}", self.base_url, room, action.as_str());
        if let Some(user) = user_id {
            url.push_str("&userId=");
            url.push_str(&urlencoding::encode(user));
        }
        url
    }
}

#[async_trait]
impl StreamApi for HttpStreamApi {
    async fn fetch_status(&self, room: RoomId) -> Result<StreamInfo, ApiError> {
        let url = self.status_url(room);
        debug!(%room, "GET {}", url);

        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(ApiError::Status {
                status: response.status().as_u16(),
                url,
            });
        }

        let text = response.text().await?;
        serde_json::from_str(&text).map_err(|e| ApiError::Decode(e.to_string()))
    }

    async fn notify(
        &self,
        room: RoomId,
        action: ListenerAction,
        user_id: Option<&str>,
    ) -> Result<(), ApiError> {
        let url = self.notify_url(room, action, user_id);
        debug!(%room, action = action.as_str(), "POST {}", url);

        let response = self.client.post(&url).send().await?;
        if !response.status().is_success() {
            return Err(ApiError::Status {
                status: response.status().as_u16(),
                url,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn stream_info_parses_backend_payload() {
        let payload = json!({
            "status": "ACTIVE",
            "listenerCount": 12,
            "mosqueName": "Al-Noor",
            "preacherName": "Sheikh Ahmad",
            "topic": "Patience",
            "startedAt": "2024-03-01T12:05:00Z"
        });
        let info: StreamInfo = serde_json::from_value(payload).unwrap();
        assert_eq!(info.status, StreamStatus::Active);
        assert_eq!(info.listener_count, 12);
        assert_eq!(info.mosque_name.as_deref(), Some("Al-Noor"));
        assert!(info.started_at.is_some());
    }

    #[test]
    fn stream_info_tolerates_sparse_payload() {
        let info: StreamInfo = serde_json::from_value(json!({ "status": "PENDING" })).unwrap();
        assert_eq!(info.status, StreamStatus::Pending);
        assert_eq!(info.listener_count, 0);
        assert!(info.topic.is_none());
    }

    #[test]
    fn offset_less_started_at_is_read_as_utc() {
        let info: StreamInfo = serde_json::from_str(
            r#"{"status":"ACTIVE","listenerCount":3,"startedAt":"2024-03-08T12:00:00"}"#,
        )
        .unwrap();
        assert_eq!(info.status, StreamStatus::Active);
        assert_eq!(info.listener_count, 3);
        assert_eq!(
            info.started_at.unwrap().to_rfc3339(),
            "2024-03-08T12:00:00+00:00"
        );

        let info: StreamInfo = serde_json::from_value(json!({
            "status": "ACTIVE",
            "startedAt": "2024-03-08T12:00:00.123456"
        }))
        .unwrap();
        assert!(info.started_at.is_some());
    }

    #[test]
    fn display_fields_never_block_decoding() {
        let info: StreamInfo =
            serde_json::from_str(r#"{"status":"ACTIVE","listenerCount":null}"#).unwrap();
        assert_eq!(info.status, StreamStatus::Active);
        assert_eq!(info.listener_count, 0);

        let info: StreamInfo = serde_json::from_value(json!({
            "status": "ENDED",
            "listenerCount": -1,
            "startedAt": "yesterday"
        }))
        .unwrap();
        assert_eq!(info.status, StreamStatus::Ended);
        assert_eq!(info.listener_count, 0);
        assert!(info.started_at.is_none());

        let info: StreamInfo = serde_json::from_value(json!({
            "status": "ACTIVE",
            "startedAt": null
        }))
        .unwrap();
        assert!(info.started_at.is_none());
    }

    #[test]
    fn epoch_millis_started_at_is_accepted() {
        let info: StreamInfo = serde_json::from_value(json!({
            "status": "ACTIVE",
            "startedAt": 1709899200000i64
        }))
        .unwrap();
        assert_eq!(
            info.started_at.unwrap().to_rfc3339(),
            "2024-03-08T12:00:00+00:00"
        );
    }

    #[test]
    fn unknown_status_is_rejected() {
        let result = serde_json::from_value::<StreamInfo>(json!({ "status": "PAUSED" }));
        assert!(result.is_err());
    }

    #[test]
    fn urls_are_built_from_trimmed_base() {
        let api = HttpStreamApi::with_client(Client::new(), "http://host/api/");
        let room = RoomId::new(42);
        assert_eq!(api.status_url(room), "http://host/api/stream-status?id=42");
        assert_eq!(
            api.notify_url(room, ListenerAction::Join, Some("u 1")),
            "http://host/api/stream/42?action=join&userId=u%201"
        );
        assert_eq!(
            api.notify_url(room, ListenerAction::Leave, None),
            "http://host/api/stream/42?action=leave"
        );
    }

    #[test]
    fn summary_lists_known_fields() {
        let info = StreamInfo {
            status: StreamStatus::Active,
            listener_count: 3,
            mosque_name: Some("Al-Noor".into()),
            preacher_name: None,
            topic: Some("Gratitude".into()),
            started_at: None,
        };
        assert_eq!(info.summary(), "ACTIVE | Al-Noor | \"Gratitude\" | 3 listening");
    }
}
