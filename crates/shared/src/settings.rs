//! Chat client settings, persisted as `settings.json` in the platform config
//! directory.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable that overrides [`ChatSettings::base_url`].
pub const BASE_URL_ENV: &str = "KYN_BASE_URL";

/// Which turn flow a session runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatMode {
    /// Streaming with step tracking, falling back to simulated steps.
    #[default]
    Sidebar,
    /// One blocking request per turn, no steps.
    Simple,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatSettings {
    pub base_url: String,
    pub stream_path: String,
    pub simple_path: String,
    /// Whether the streaming endpoint may be used at all.
    pub streaming: bool,
    pub mode: ChatMode,
    pub fallback_step_delay_ms: u64,
    pub request_timeout_secs: u64,
    /// Bot message seeded into new sessions.
    pub greeting: Option<String>,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:5000".into(),
            stream_path: "/api/chat-stream".into(),
            simple_path: "/api/chat".into(),
            streaming: true,
            mode: ChatMode::Sidebar,
            fallback_step_delay_ms: 800,
            request_timeout_secs: 120,
            greeting: None,
        }
    }
}

impl ChatSettings {
    pub fn fallback_step_delay(&self) -> Duration {
        Duration::from_millis(self.fallback_step_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn stream_url(&self) -> String {
        join_url(&self.base_url, &self.stream_path)
    }

    pub fn simple_url(&self) -> String {
        join_url(&self.base_url, &self.simple_path)
    }

    /// Apply `KYN_BASE_URL` if it is set and non-empty.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var(BASE_URL_ENV) {
            let url = url.trim();
            if !url.is_empty() {
                self.base_url = url.to_string();
            }
        }
    }
}

fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("settings I/O failed for {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("settings file {} is not valid: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// `<config dir>/settings.json`, if the platform has a config directory.
pub fn config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("com.local", "KYN", "KynChat")
        .map(|proj| proj.config_dir().join("settings.json"))
}

pub fn load_from(path: &Path) -> Result<ChatSettings, SettingsError> {
    let bytes = fs::read(path).map_err(|source| SettingsError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_slice(&bytes).map_err(|source| SettingsError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

pub fn save_to(path: &Path, settings: &ChatSettings) -> Result<(), SettingsError> {
    let io_err = |source: std::io::Error| SettingsError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).map_err(io_err)?;
    }
    let json = serde_json::to_vec_pretty(settings).map_err(|source| SettingsError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    fs::write(path, json).map_err(io_err)
}

/// Load settings from the config directory, falling back to defaults when the
/// file is missing or unreadable. Environment overrides are applied last.
pub fn load_settings_or_default() -> ChatSettings {
    let mut settings = match config_path() {
        Some(path) if path.exists() => match load_from(&path) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(error = %e, "ignoring unreadable settings file");
                ChatSettings::default()
            }
        },
        _ => ChatSettings::default(),
    };
    settings.apply_env_overrides();
    settings
}
