//! WebSocket Transport zum Vermittlungsdienst
//!
//! Eine Verbindung pro Session:
//! - Textnachrichten werden zu [`ServerMessage`] geparst
//! - Binärnachrichten sind Audio-Chunks
//! - Ausgehend werden nur Audio-Chunks und das Close-Frame gesendet
//!
//! Die Session sieht nie den WebSocket selbst, sondern nur eine [`Connection`]
//! (Handle + Event-Receiver). Dadurch lässt sich der Transport in Tests durch
//! ein In-Memory-Paar ersetzen.

use super::messages::ServerMessage;
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use url::Url;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone)]
pub enum TransportError {
    #[error("WebSocket connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Transport is closed")]
    NotConnected,

    #[error("Failed to send frame: {0}")]
    SendFailed(String),
}

// ============================================================================
// TRANSPORT EVENTS
// ============================================================================

/// Events die vom Transport an die Session geliefert werden
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Verbindung steht
    Opened,

    /// Steuer-Nachricht empfangen
    Message(ServerMessage),

    /// Audio-Chunk empfangen
    Audio(Vec<u8>),

    /// Fehler auf der Verbindung
    Error(String),

    /// Verbindung geschlossen
    Closed { reason: Option<String> },
}

/// Frames die von der Session an den Transport gehen
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    Audio(Vec<u8>),
    Close,
}

// ============================================================================
// CONNECTION
// ============================================================================

/// Offene Verbindung aus Sicht der Session
pub struct Connection {
    pub transport: TransportHandle,
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
}

/// Gegenstück zu [`Connection`]: wird vom Connector (oder vom Test) bedient
pub struct ConnectionDriver {
    events: mpsc::UnboundedSender<TransportEvent>,
    outbound: mpsc::UnboundedReceiver<OutboundFrame>,
    open: Arc<AtomicBool>,
}

impl Connection {
    /// Erstellt ein verbundenes Paar aus Session-Seite und Transport-Seite
    pub fn pair() -> (Connection, ConnectionDriver) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let open = Arc::new(AtomicBool::new(true));

        let connection = Connection {
            transport: TransportHandle {
                tx: out_tx,
                open: Arc::clone(&open),
            },
            events: event_rx,
        };
        let driver = ConnectionDriver {
            events: event_tx,
            outbound: out_rx,
            open,
        };
        (connection, driver)
    }
}

impl ConnectionDriver {
    /// Liefert ein Event an die Session; `false` wenn die Session weg ist
    pub fn emit(&self, event: TransportEvent) -> bool {
        if matches!(event, TransportEvent::Closed { .. } | TransportEvent::Error(_)) {
            self.open.store(false, Ordering::SeqCst);
        }
        self.events.send(event).is_ok()
    }

    /// Wartet auf den nächsten ausgehenden Frame
    pub async fn recv(&mut self) -> Option<OutboundFrame> {
        self.outbound.recv().await
    }

    /// Nächster ausgehender Frame, falls schon vorhanden
    pub fn try_recv(&mut self) -> Option<OutboundFrame> {
        self.outbound.try_recv().ok()
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

/// Exklusiver Besitz der Verbindung (nur die Session hält ihn)
#[derive(Debug)]
pub struct TransportHandle {
    tx: mpsc::UnboundedSender<OutboundFrame>,
    open: Arc<AtomicBool>,
}

impl TransportHandle {
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst) && !self.tx.is_closed()
    }

    /// Schließt die Verbindung. Mehrfacher Aufruf ist ein No-op.
    ///
    /// Gibt `true` zurück, wenn tatsächlich ein Close-Frame gesendet wurde.
    /// Der Statuswechsel passiert erst, wenn der Transport `Closed` meldet.
    pub fn close(&self) -> bool {
        if !self.open.swap(false, Ordering::SeqCst) {
            return false;
        }
        self.tx.send(OutboundFrame::Close).is_ok()
    }

    /// Send-only Zugriff für die Capture-Pipeline
    pub fn audio_sender(&self) -> AudioSender {
        AudioSender {
            tx: self.tx.clone(),
            open: Arc::clone(&self.open),
        }
    }
}

/// Kann Audio senden, aber die Verbindung weder lesen noch schließen
#[derive(Debug, Clone)]
pub struct AudioSender {
    tx: mpsc::UnboundedSender<OutboundFrame>,
    open: Arc<AtomicBool>,
}

impl AudioSender {
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst) && !self.tx.is_closed()
    }

    pub fn send_audio(&self, chunk: Vec<u8>) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::NotConnected);
        }
        self.tx
            .send(OutboundFrame::Audio(chunk))
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }
}

// ============================================================================
// CONNECTOR
// ============================================================================

/// Baut eine Verbindung zu einem Endpunkt auf
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, endpoint: &Url) -> Result<Connection, TransportError>;
}

/// WebSocket-Connector (tokio-tungstenite)
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, endpoint: &Url) -> Result<Connection, TransportError> {
        tracing::info!("Connecting to WebSocket at {}", endpoint);

        let (ws_stream, _) = connect_async(endpoint.as_str())
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        let (mut write, mut read) = ws_stream.split();
        let (connection, driver) = Connection::pair();
        let ConnectionDriver {
            events,
            mut outbound,
            open,
        } = driver;

        let _ = events.send(TransportEvent::Opened);

        // Read-Task starten
        let reader_open = Arc::clone(&open);
        tokio::spawn(async move {
            let mut reason = None;

            while let Some(msg_result) = read.next().await {
                match msg_result {
                    Ok(Message::Text(text)) => match serde_json::from_str::<ServerMessage>(&text) {
                        Ok(server_msg) => {
                            let _ = events.send(TransportEvent::Message(server_msg));
                        }
                        Err(e) => {
                            tracing::warn!("Ignoring malformed control message: {}", e);
                        }
                    },
                    Ok(Message::Binary(data)) => {
                        let _ = events.send(TransportEvent::Audio(data));
                    }
                    Ok(Message::Close(frame)) => {
                        tracing::info!("WebSocket closed by server");
                        reason = frame.map(|f| f.reason.to_string());
                        break;
                    }
                    Err(e) => {
                        tracing::error!("WebSocket error: {}", e);
                        let _ = events.send(TransportEvent::Error(e.to_string()));
                        break;
                    }
                    _ => {}
                }
            }

            reader_open.store(false, Ordering::SeqCst);
            let _ = events.send(TransportEvent::Closed { reason });
        });

        // Write-Task starten
        tokio::spawn(async move {
            while let Some(frame) = outbound.recv().await {
                match frame {
                    OutboundFrame::Audio(chunk) => {
                        let size = chunk.len();
                        if let Err(e) = write.send(Message::Binary(chunk)).await {
                            tracing::error!("Failed to send audio chunk: {}", e);
                            break;
                        }
                        tracing::trace!("Sent audio chunk: {} bytes", size);
                    }
                    OutboundFrame::Close => {
                        if let Err(e) = write.send(Message::Close(None)).await {
                            tracing::debug!("Close frame not delivered: {}", e);
                        }
                        break;
                    }
                }
            }
            open.store(false, Ordering::SeqCst);
        });

        Ok(connection)
    }
}

// ============================================================================
// TESTS
// ============================================================================
