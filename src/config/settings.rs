//! Einstellungen laden und überlagern

use crate::call_engine::{OverflowPolicy, PlaybackOptions, Role, SessionOptions, StrategyMode};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Pfad zu einer expliziten Config-Datei
pub const CONFIG_PATH_ENV: &str = "HOTLINE_CONFIG";

/// Basis-URL des Vermittlungsdienstes
pub const SERVER_URL_ENV: &str = "HOTLINE_SERVER_URL";

/// `client` oder `operator`
pub const ROLE_ENV: &str = "HOTLINE_ROLE";

const CONFIG_FILE: &str = "config.toml";

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Invalid value for {key}: {message}")]
    Invalid { key: &'static str, message: String },
}

// ============================================================================
// CONFIG
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallConfig {
    /// Basis-URL, die Rolle hängt `/ws/<role>` an
    pub server_url: String,
    pub role: Role,
    pub grace_period_ms: u64,
    /// Standard-Filter wenn `RUST_LOG` nicht gesetzt ist
    pub log_filter: String,
    pub playback: PlaybackConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    pub mode: StrategyMode,
    pub queue_limit: Option<usize>,
    pub overflow: OverflowPolicy,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            server_url: "ws://localhost:8000".to_string(),
            role: Role::Client,
            grace_period_ms: 500,
            log_filter: "hotline=debug".to_string(),
            playback: PlaybackConfig::default(),
        }
    }
}

impl CallConfig {
    /// Lädt Datei (falls vorhanden) und Umgebungsvariablen
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match Self::config_path() {
            Some(path) if path.exists() => Self::from_file(&path)?,
            _ => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// `$HOTLINE_CONFIG`, sonst `<config_dir>/config.toml`
    pub fn config_path() -> Option<PathBuf> {
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            return Some(PathBuf::from(path));
        }
        directories::ProjectDirs::from("dev", "hotline", "hotline")
            .map(|dirs| dirs.config_dir().join(CONFIG_FILE))
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&contents).map_err(|e: toml::de::Error| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Überschreibt Werte aus der Umgebung; `lookup` liefert die Variable
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(SERVER_URL_ENV) {
            tracing::debug!("{} overrides server_url", SERVER_URL_ENV);
            self.server_url = url;
        }

        if let Some(role) = lookup(ROLE_ENV) {
            self.role = role.parse().map_err(|message| ConfigError::Invalid {
                key: ROLE_ENV,
                message,
            })?;
        }

        Ok(())
    }

    /// Endpunkt der konfigurierten Rolle
    pub fn endpoint(&self) -> Result<Url, ConfigError> {
        let invalid = |e: url::ParseError| ConfigError::Invalid {
            key: "server_url",
            message: e.to_string(),
        };

        let base = Url::parse(&self.server_url).map_err(invalid)?;
        self.role.endpoint(&base).map_err(invalid)
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            grace_period: Duration::from_millis(self.grace_period_ms),
            playback: PlaybackOptions {
                mode: self.playback.mode,
                queue_limit: self.playback.queue_limit,
                overflow: self.playback.overflow,
            },
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
