//! Rollen und ihre Profile
//!
//! Client und Operator unterscheiden sich nur in zwei Punkten: welche
//! Steuer-Nachricht `waiting → connected` auslöst und in welchem Takt
//! aufgenommenes Audio verschickt wird.

use crate::signaling::SignalType;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

/// Chunk-Takt der Client-Rolle
pub const CLIENT_CHUNK_INTERVAL: Duration = Duration::from_millis(1000);

/// Chunk-Takt der Operator-Rolle
pub const OPERATOR_CHUNK_INTERVAL: Duration = Duration::from_millis(2000);

/// Rolle eines Gesprächsteilnehmers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Client,
    Operator,
}

/// Rollenabhängige Konstanten, einmal pro Session aufgelöst
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoleProfile {
    /// Nachricht die `waiting → connected` auslöst
    pub trigger: SignalType,
    /// Länge eines aufgenommenen Chunks
    pub chunk_interval: Duration,
}

impl Role {
    pub const fn profile(self) -> RoleProfile {
        match self {
            Role::Client => RoleProfile {
                trigger: SignalType::CallConnected,
                chunk_interval: CLIENT_CHUNK_INTERVAL,
            },
            Role::Operator => RoleProfile {
                trigger: SignalType::ClientConnected,
                chunk_interval: OPERATOR_CHUNK_INTERVAL,
            },
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Client => "client",
            Role::Operator => "operator",
        }
    }

    /// Endpunkt der Rolle relativ zur Server-Basis-URL (`<base>/ws/<role>`)
    pub fn endpoint(self, base: &Url) -> Result<Url, url::ParseError> {
        let mut base = base.clone();
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        base.join(&format!("ws/{}", self.as_str()))
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "client" => Ok(Role::Client),
            "operator" => Ok(Role::Operator),
            other => Err(format!("unknown role: {other}")),
        }
    }
}
