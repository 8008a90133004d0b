//! Config Module - Einstellungen für den Runner
//!
//! Reihenfolge der Quellen:
//! - Standardwerte
//! - TOML-Datei (`$HOTLINE_CONFIG` oder das Config-Verzeichnis der Plattform)
//! - Umgebungsvariablen (`HOTLINE_SERVER_URL`, `HOTLINE_ROLE`)

mod settings;

pub use settings::{CallConfig, ConfigError, PlaybackConfig, CONFIG_PATH_ENV, ROLE_ENV, SERVER_URL_ENV};
