//! Call-Status und Übergangstabelle

use serde::{Deserialize, Serialize};
use std::fmt;

/// Aktueller Status einer Session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallStatus {
    /// Keine Verbindung (Start- und Endzustand)
    #[default]
    Disconnected,
    /// Verbunden, wartet auf die Gegenseite
    Waiting,
    /// Gespräch aktiv, Aufnahme läuft
    Connected,
}

/// Auslöser für Statuswechsel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Trigger {
    /// Transport steht
    TransportOpened,
    /// Rollenspezifische "Gegenseite verbunden"-Nachricht
    PeerConnected,
    /// Gnadenfrist nach `call_ended` abgelaufen
    GraceElapsed,
    /// Aufnahme konnte nicht starten
    CaptureFailed,
    /// Transport geschlossen oder Fehler
    TransportClosed,
}

impl Trigger {
    pub const ALL: [Trigger; 5] = [
        Trigger::TransportOpened,
        Trigger::PeerConnected,
        Trigger::GraceElapsed,
        Trigger::CaptureFailed,
        Trigger::TransportClosed,
    ];
}

impl CallStatus {
    pub const ALL: [CallStatus; 3] = [
        CallStatus::Disconnected,
        CallStatus::Waiting,
        CallStatus::Connected,
    ];

    /// Folgezustand für einen Auslöser, `None` wenn er hier ignoriert wird
    pub fn on(self, trigger: Trigger) -> Option<CallStatus> {
        use CallStatus::*;

        match (self, trigger) {
            (Disconnected, Trigger::TransportOpened) => Some(Waiting),
            (Waiting, Trigger::PeerConnected) => Some(Connected),
            (Connected, Trigger::GraceElapsed) | (Connected, Trigger::CaptureFailed) => {
                Some(Disconnected)
            }
            (Waiting, Trigger::TransportClosed) | (Connected, Trigger::TransportClosed) => {
                Some(Disconnected)
            }
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CallStatus::Disconnected => "disconnected",
            CallStatus::Waiting => "waiting",
            CallStatus::Connected => "connected",
        }
    }
}

impl fmt::Display for CallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
