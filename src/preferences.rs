//! User preferences kept in the local store: theme and cached profile.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::storage::{LocalStore, StorageError};

pub const THEME_KEY: &str = "theme";
pub const PROFILE_KEY: &str = "cached-profile";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    Light,
    Dark,
    #[default]
    System,
}

impl fmt::Display for Theme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Light => write!(f, "light"),
            Self::Dark => write!(f, "dark"),
            Self::System => write!(f, "system"),
        }
    }
}

impl FromStr for Theme {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "light" => Ok(Self::Light),
            "dark" => Ok(Self::Dark),
            "system" => Ok(Self::System),
            other => Err(format!("unknown theme: {}", other)),
        }
    }
}

#[derive(Clone)]
pub struct Preferences {
    store: LocalStore,
}

impl Preferences {
    pub fn new(store: LocalStore) -> Self {
        Self { store }
    }

    pub fn theme(&self) -> Theme {
        self.store.load_or_default(THEME_KEY)
    }

    pub fn set_theme(&self, theme: Theme) -> Result<(), StorageError> {
        self.store.save(THEME_KEY, &theme)
    }

    /// Profile as last fetched; shape is owned by the backend
    pub fn cached_profile(&self) -> Result<Option<Value>, StorageError> {
        self.store.load(PROFILE_KEY)
    }

    pub fn cache_profile(&self, profile: &Value) -> Result<(), StorageError> {
        self.store.save(PROFILE_KEY, profile)
    }

    pub fn clear_profile(&self) -> Result<(), StorageError> {
        self.store.remove(PROFILE_KEY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn theme_defaults_to_system() {
        let prefs = Preferences::new(LocalStore::in_memory());
        assert_eq!(prefs.theme(), Theme::System);

        prefs.set_theme(Theme::Dark).unwrap();
        assert_eq!(prefs.theme(), Theme::Dark);
        assert_eq!("LIGHT".parse::<Theme>(), Ok(Theme::Light));
    }

    #[test]
    fn profile_cache_roundtrip_and_clear() {
        let prefs = Preferences::new(LocalStore::in_memory());
        assert!(prefs.cached_profile().unwrap().is_none());

        let profile = json!({ "id": "u1", "name": "Aisha", "followers": 12 });
        prefs.cache_profile(&profile).unwrap();
        assert_eq!(prefs.cached_profile().unwrap(), Some(profile));

        prefs.clear_profile().unwrap();
        assert!(prefs.cached_profile().unwrap().is_none());
    }
}
