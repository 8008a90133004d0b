//! Message Types für das Call-Protokoll
//!
//! Textnachrichten sind JSON-Objekte mit einem `type`-Feld. Binärnachrichten
//! sind rohe, ungerahmte Audio-Chunks und haben daher keinen eigenen Typ.

use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// SERVER → CLIENT MESSAGES
// ============================================================================

/// Alle Steuer-Nachrichten des Vermittlungsdienstes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Client wurde in die Warteschlange gestellt
    Waiting,

    /// Client-Seite: ein Operator wurde zugewiesen
    CallConnected {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        role: Option<String>,
    },

    /// Operator-Seite: ein Client wurde zugewiesen
    ClientConnected {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        role: Option<String>,
    },

    /// Gegenseite hat aufgelegt
    CallEnded,

    /// Unbekannter Typ (wird geloggt und ignoriert)
    #[serde(other)]
    Unknown,
}

impl ServerMessage {
    /// Gibt den Typ der Nachricht ohne Nutzdaten zurück
    pub fn signal_type(&self) -> SignalType {
        match self {
            Self::Waiting => SignalType::Waiting,
            Self::CallConnected { .. } => SignalType::CallConnected,
            Self::ClientConnected { .. } => SignalType::ClientConnected,
            Self::CallEnded => SignalType::CallEnded,
            Self::Unknown => SignalType::Unknown,
        }
    }

    /// Server-seitige Session-ID der Paarung (falls mitgeschickt)
    pub fn session_id(&self) -> Option<&str> {
        match self {
            Self::CallConnected { session_id, .. } | Self::ClientConnected { session_id, .. } => {
                session_id.as_deref()
            }
            _ => None,
        }
    }
}

/// Typ-Tag einer [`ServerMessage`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalType {
    Waiting,
    CallConnected,
    ClientConnected,
    CallEnded,
    Unknown,
}

impl SignalType {
    /// Name des `type`-Felds auf dem Draht
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::CallConnected => "call_connected",
            Self::ClientConnected => "client_connected",
            Self::CallEnded => "call_ended",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for SignalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// TESTS
// ============================================================================
