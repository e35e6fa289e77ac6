//! Configuration management
//!
//! Replaces the browser's window globals with one explicit struct loaded at
//! startup. Precedence: `UMMAH_*` env > legacy env > config file > defaults.

use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

const APP_DIR_NAME: &str = "ummah";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Base URL of the app backend (`/stream-status`, `/stream/{id}`, social routes)
    #[serde(default = "default_backend_url")]
    pub backend_url: String,

    /// Janus HTTP endpoint (e.g. `https://media.example.org/janus`)
    #[serde(default)]
    pub signaling_url: Option<String>,

    /// Signed-in user, sent with join/leave accounting
    #[serde(default)]
    pub user_id: Option<String>,

    /// Stream status poll interval
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Per-request HTTP timeout
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_backend_url() -> String {
    "http://localhost:3000/api".to_string()
}

fn default_poll_interval_secs() -> u64 {
    5
}

fn default_request_timeout_secs() -> u64 {
    10
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend_url: default_backend_url(),
            signaling_url: None,
            user_id: None,
            poll_interval_secs: default_poll_interval_secs(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Config {
    pub fn poll_interval(&self) -> Duration {
        // A zero interval would spin the poll loop
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    /// Backend base URL without a trailing slash
    pub fn backend_base(&self) -> &str {
        self.backend_url.trim_end_matches('/')
    }

    /// Signaling URL, or an error naming the missing setting
    pub fn require_signaling_url(&self) -> Result<&str> {
        self.signaling_url
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| anyhow!("signaling_url is not configured (set UMMAH_SIGNALING_URL)"))
    }

    pub fn validate(&self) -> Result<()> {
        url::Url::parse(&self.backend_url)
            .map_err(|e| anyhow!("invalid backend_url {:?}: {}", self.backend_url, e))?;
        if let Some(ref signaling) = self.signaling_url {
            url::Url::parse(signaling)
                .map_err(|e| anyhow!("invalid signaling_url {:?}: {}", signaling, e))?;
        }
        Ok(())
    }
}

/// Get config directory (XDG_CONFIG_HOME or platform default)
pub fn get_config_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("UMMAH_CONFIG_DIR") {
        return PathBuf::from(dir);
    }

    #[cfg(target_os = "macos")]
    {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home)
                .join("Library/Application Support")
                .join(APP_DIR_NAME);
        }
    }

    #[cfg(target_os = "linux")]
    {
        if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
            return PathBuf::from(xdg).join(APP_DIR_NAME);
        }
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(".config").join(APP_DIR_NAME);
        }
    }

    #[cfg(target_os = "windows")]
    {
        if let Ok(appdata) = std::env::var("APPDATA") {
            return PathBuf::from(appdata).join(APP_DIR_NAME);
        }
    }

    PathBuf::from(".")
}

/// Get data directory (XDG_DATA_HOME or platform default)
///
/// Holds `store.json`, the local key-value store.
pub fn get_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("UMMAH_DATA_DIR") {
        return PathBuf::from(dir);
    }

    #[cfg(target_os = "macos")]
    {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home)
                .join("Library/Application Support")
                .join(APP_DIR_NAME);
        }
    }

    #[cfg(target_os = "linux")]
    {
        if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
            return PathBuf::from(xdg).join(APP_DIR_NAME);
        }
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(".local/share").join(APP_DIR_NAME);
        }
    }

    #[cfg(target_os = "windows")]
    {
        if let Ok(appdata) = std::env::var("LOCALAPPDATA") {
            return PathBuf::from(appdata).join(APP_DIR_NAME);
        }
    }

    PathBuf::from("./data")
}

pub fn load_config() -> Result<Config> {
    let config_dir = get_config_dir();

    let mut builder = ::config::Config::builder()
        .set_default("backend_url", default_backend_url())?
        .set_default("poll_interval_secs", default_poll_interval_secs())?
        .set_default("request_timeout_secs", default_request_timeout_secs())?
        // config.toml / config.json, if present
        .add_source(
            ::config::File::with_name(&config_dir.join("config").to_string_lossy()).required(false),
        )
        // UMMAH_BACKEND_URL, UMMAH_POLL_INTERVAL_SECS, ...
        .add_source(
            ::config::Environment::with_prefix("UMMAH")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

    // Legacy names used by the web deployment. UMMAH_* still wins.
    if std::env::var("UMMAH_BACKEND_URL").is_err() {
        if let Ok(url) = std::env::var("BACKEND_URL") {
            builder = builder.set_override("backend_url", url)?;
        }
    }
    if std::env::var("UMMAH_SIGNALING_URL").is_err() {
        if let Ok(url) = std::env::var("JANUS_URL") {
            builder = builder.set_override("signaling_url", url)?;
        }
    }

    let config: Config = builder.build()?.try_deserialize()?;
    config.validate()?;

    tracing::debug!(
        backend = %config.backend_url,
        signaling = ?config.signaling_url,
        poll_secs = config.poll_interval_secs,
        "configuration loaded"
    );
    Ok(config)
}
