//! Signaling Module - Transport zum Vermittlungsdienst
//!
//! Dieses Modul kapselt die Verbindung einer Session:
//! - WebSocket-Verbindung aufbauen (ein Endpunkt pro Rolle)
//! - Steuer-Nachrichten parsen
//! - Audio-Chunks senden und empfangen
//!

mod client;
mod messages;

pub use client::{
    AudioSender, Connection, ConnectionDriver, Connector, OutboundFrame, TransportError,
    TransportEvent, TransportHandle, WebSocketConnector,
};
pub use messages::*;
