//! Configuration
//!
//! Two layers:
//! - [`AppConfig`]: local settings from `~/.config/habit-ledger/config.toml`
//! - [`SyncSettings`]: cloud sync settings kept in the local store, with the
//!   remote service description embedded as JSON text ([`RemoteConfig`])

use crate::error::{HabitError, Result};
use crate::store::{keys, LocalStore};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Directory holding the local store
    pub data_dir: PathBuf,

    /// How long a login stays valid
    pub session_hours: u32,

    /// Transport timeout for remote requests
    pub remote_timeout_secs: u64,

    /// Window used by `report` when no range is given
    pub default_report_days: u32,
}

impl Default for AppConfig {
    fn default() -> Self {
        let data_dir = dirs::data_dir().unwrap_or_else(|| PathBuf::from("."));

        Self {
            data_dir: data_dir.join("habit-ledger"),
            session_hours: 12,
            remote_timeout_secs: 20,
            default_report_days: 30,
        }
    }
}

impl AppConfig {
    /// Default configuration file path
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("habit-ledger")
            .join("config.toml")
    }

    /// Load configuration from file, falling back to defaults
    pub fn load(path: Option<&Path>) -> Self {
        let path = path.map(PathBuf::from).unwrap_or_else(Self::default_path);

        if path.exists() {
            match std::fs::read_to_string(&path) {
                Ok(content) => match toml::from_str(&content) {
                    Ok(config) => return config,
                    Err(e) => log::warn!("Ignoring invalid config {}: {}", path.display(), e),
                },
                Err(e) => log::warn!("Failed to read config {}: {}", path.display(), e),
            }
        }

        Self::default()
    }

    /// Save configuration to file
    pub fn save(&self, path: Option<&Path>) -> anyhow::Result<()> {
        let path = path.map(PathBuf::from).unwrap_or_else(Self::default_path);

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(&path, content)?;

        Ok(())
    }

    pub fn session_duration(&self) -> chrono::Duration {
        chrono::Duration::hours(i64::from(self.session_hours))
    }

    pub fn remote_timeout(&self) -> Duration {
        Duration::from_secs(self.remote_timeout_secs)
    }
}

/// Persisted cloud sync settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SyncSettings {
    /// JSON description of the remote service, see [`RemoteConfig`]
    pub remote_config_text: String,
    pub email: String,
    pub password: String,
}

impl SyncSettings {
    /// Stored settings, `None` when sync was never configured
    pub fn load(store: &LocalStore) -> Option<Self> {
        let settings: SyncSettings = store.load(keys::SYNC_CONFIG, SyncSettings::default());
        settings.is_configured().then_some(settings)
    }

    pub fn save(&self, store: &LocalStore) {
        store.save(keys::SYNC_CONFIG, self);
    }

    pub fn clear(store: &LocalStore) {
        store.remove(keys::SYNC_CONFIG);
    }

    pub fn is_configured(&self) -> bool {
        !self.remote_config_text.trim().is_empty()
    }

    pub fn has_email_login(&self) -> bool {
        !self.email.trim().is_empty() && !self.password.is_empty()
    }

    pub fn remote_config(&self) -> Result<RemoteConfig> {
        RemoteConfig::parse(&self.remote_config_text)
    }
}

/// Remote document service description
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteConfig {
    pub api_key: String,
    pub project_id: String,

    /// Base URL of the document service
    #[serde(default)]
    pub endpoint: Option<String>,
}

impl RemoteConfig {
    pub fn parse(text: &str) -> Result<Self> {
        let config: RemoteConfig = serde_json::from_str(text.trim())
            .map_err(|e| HabitError::RemoteConfig(e.to_string()))?;

        if config.api_key.trim().is_empty() {
            return Err(HabitError::RemoteConfig("apiKey is empty".to_string()));
        }
        if config.project_id.trim().is_empty() {
            return Err(HabitError::RemoteConfig("projectId is empty".to_string()));
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.session_hours, 12);
        assert_eq!(config.remote_timeout(), Duration::from_secs(20));
        assert!(config.data_dir.ends_with("habit-ledger"));
    }

    #[test]
    fn test_config_roundtrip_and_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = AppConfig::default();
        config.session_hours = 2;
        config.save(Some(&path)).unwrap();
        assert_eq!(AppConfig::load(Some(&path)).session_hours, 2);

        std::fs::write(&path, "default_report_days = 7\n").unwrap();
        let loaded = AppConfig::load(Some(&path));
        assert_eq!(loaded.default_report_days, 7);
        assert_eq!(loaded.session_hours, 12);

        std::fs::write(&path, "session_hours = \"many\"").unwrap();
        assert_eq!(AppConfig::load(Some(&path)).session_hours, 12);
    }

    #[test]
    fn test_remote_config_parse() {
        let config =
            RemoteConfig::parse(r#"{"apiKey":"k","projectId":"p","authDomain":"x"}"#).unwrap();
        assert_eq!(config.api_key, "k");
        assert_eq!(config.endpoint, None);

        assert!(matches!(
            RemoteConfig::parse("not json"),
            Err(HabitError::RemoteConfig(_))
        ));
        assert!(matches!(
            RemoteConfig::parse(r#"{"apiKey":"","projectId":"p"}"#),
            Err(HabitError::RemoteConfig(_))
        ));
    }

    #[test]
    fn test_sync_settings_store() {
        let store = LocalStore::in_memory().unwrap();
        assert!(SyncSettings::load(&store).is_none());

        let settings = SyncSettings {
            remote_config_text: r#"{"apiKey":"k","projectId":"p"}"#.to_string(),
            email: "me@example.com".to_string(),
            password: "secret".to_string(),
        };
        settings.save(&store);
        assert_eq!(SyncSettings::load(&store), Some(settings.clone()));
        assert!(settings.has_email_login());

        SyncSettings::clear(&store);
        assert!(SyncSettings::load(&store).is_none());
    }
}
