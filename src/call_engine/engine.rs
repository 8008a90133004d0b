//! Session Engine - ein Gespräch pro Rolle
//!
//! Jede Session läuft als eigener Task. Der Task besitzt den gesamten Zustand
//! (Transport, Aufnahme, Wiedergabe-Queue, Gnadenfrist-Timer) und verarbeitet
//! Events strikt nacheinander:
//! - Befehle vom [`SessionHandle`]
//! - Transport-Events (Steuer-Nachrichten, Audio, Close)
//! - Abschluss des laufenden Wiedergabe-Chunks
//! - Ablauf der Gnadenfrist nach `call_ended`
//!
//! Jeder Statuswechsel läuft über [`CallStatus::on`]. Der Abbau (Transport
//! schließen, Aufnahme stoppen, Ausgabe freigeben) passiert genau einmal, auch
//! wenn der Task abgebrochen wird.

use super::audio::{AudioSink, CpalMicrophone, CpalOutputFactory, Microphone, OutputFactory};
use super::capture::CaptureFlow;
use super::codec::{EncoderRegistry, NativeEncoders};
use super::playback::{default_strategies, PlaybackFlow, PlaybackOptions, PlaybackStrategy};
use super::role::{Role, RoleProfile};
use super::status::{CallStatus, Trigger};
use crate::signaling::{
    Connection, Connector, ServerMessage, SignalType, TransportEvent, TransportHandle,
};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Sleep;
use tracing::Instrument;
use url::Url;
use uuid::Uuid;

/// Wartezeit nach `call_ended`, bevor die Aufnahme gestoppt wird
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_millis(500);

// ============================================================================
// OPTIONS & BACKEND
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    pub grace_period: Duration,
    pub playback: PlaybackOptions,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            grace_period: DEFAULT_GRACE_PERIOD,
            playback: PlaybackOptions::default(),
        }
    }
}

/// Geräte und Codecs einer Session
#[derive(Clone)]
pub struct AudioBackend {
    pub microphone: Arc<dyn Microphone>,
    pub encoders: Arc<dyn EncoderRegistry>,
    pub output: Arc<dyn OutputFactory>,
    pub strategies: Vec<Arc<dyn PlaybackStrategy>>,
}

impl AudioBackend {
    /// cpal für die Geräte, hound/symphonia für die Chunks
    pub fn native() -> Self {
        Self {
            microphone: Arc::new(CpalMicrophone),
            encoders: Arc::new(NativeEncoders),
            output: Arc::new(CpalOutputFactory),
            strategies: default_strategies(),
        }
    }
}

// ============================================================================
// SESSION CONTROLLER
// ============================================================================

/// Erzeugt Sessions mit gemeinsamem Connector und Backend
pub struct SessionController {
    connector: Arc<dyn Connector>,
    backend: AudioBackend,
    options: SessionOptions,
}

impl SessionController {
    pub fn new(
        connector: Arc<dyn Connector>,
        backend: AudioBackend,
        options: SessionOptions,
    ) -> Self {
        Self {
            connector,
            backend,
            options,
        }
    }

    /// Startet eine Session für `role` gegen `endpoint`
    ///
    /// Muss innerhalb einer tokio-Runtime aufgerufen werden.
    pub fn connect(&self, endpoint: Url, role: Role) -> SessionHandle {
        let connection_id = Uuid::new_v4();
        let (status_tx, status_rx) = watch::channel(CallStatus::Disconnected);
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        let sink = Arc::new(AudioSink::new(Arc::clone(&self.backend.output)));
        let session = Session {
            profile: role.profile(),
            status: status_tx,
            transport: None,
            capture: CaptureFlow::new(
                Arc::clone(&self.backend.microphone),
                Arc::clone(&self.backend.encoders),
            ),
            playback: PlaybackFlow::new(
                self.backend.strategies.clone(),
                Arc::clone(&sink),
                self.options.playback,
            ),
            sink,
            microphone: Arc::clone(&self.backend.microphone),
            grace: None,
            grace_period: self.options.grace_period,
            torn_down: false,
        };

        let span = tracing::info_span!("session", role = %role, connection_id = %connection_id);
        let task = tokio::spawn(
            run_session(session, Arc::clone(&self.connector), endpoint, command_rx).instrument(span),
        );

        SessionHandle {
            role,
            connection_id,
            status: status_rx,
            commands: command_tx,
            task: Some(task),
        }
    }
}

// ============================================================================
// SESSION HANDLE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionCommand {
    EndCall,
    StopCapture,
    Shutdown,
}

/// Zugriff des Aufrufers auf eine laufende Session
///
/// Drop des Handles baut die Session ab.
#[derive(Debug)]
pub struct SessionHandle {
    role: Role,
    connection_id: Uuid,
    status: watch::Receiver<CallStatus>,
    commands: mpsc::UnboundedSender<SessionCommand>,
    task: Option<JoinHandle<()>>,
}

impl SessionHandle {
    pub fn role(&self) -> Role {
        self.role
    }

    /// Korrelations-ID für Logs
    pub fn connection_id(&self) -> Uuid {
        self.connection_id
    }

    pub fn status(&self) -> CallStatus {
        *self.status.borrow()
    }

    /// Beobachtbarer Status
    pub fn watch(&self) -> watch::Receiver<CallStatus> {
        self.status.clone()
    }

    /// Beendet das Gespräch durch Schließen des Transports
    ///
    /// Beliebig oft aufrufbar, auch nach dem Ende der Session.
    pub fn end_call(&self) {
        let _ = self.commands.send(SessionCommand::EndCall);
    }

    /// Stoppt nur die Aufnahme, das Gespräch bleibt bestehen
    pub fn stop_capture(&self) {
        let _ = self.commands.send(SessionCommand::StopCapture);
    }

    /// Baut die Session ab und wartet bis der Task beendet ist
    pub async fn shutdown(mut self) {
        let _ = self.commands.send(SessionCommand::Shutdown);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!("Session task did not finish cleanly: {}", e);
            }
        }
    }
}

// ============================================================================
// SESSION
// ============================================================================

struct Session {
    profile: RoleProfile,
    status: watch::Sender<CallStatus>,
    transport: Option<TransportHandle>,
    capture: CaptureFlow,
    playback: PlaybackFlow,
    sink: Arc<AudioSink>,
    microphone: Arc<dyn Microphone>,
    grace: Option<Pin<Box<Sleep>>>,
    grace_period: Duration,
    torn_down: bool,
}

async fn run_session(
    mut session: Session,
    connector: Arc<dyn Connector>,
    endpoint: Url,
    mut commands: mpsc::UnboundedReceiver<SessionCommand>,
) {
    tracing::info!("Connecting to {}", endpoint);

    let connection = tokio::select! {
        result = connector.connect(&endpoint) => match result {
            Ok(connection) => connection,
            Err(e) => {
                tracing::error!("Failed to connect: {}", e);
                session.teardown();
                return;
            }
        },
        _ = wait_for_shutdown(&mut commands) => {
            tracing::info!("Session ended before the transport opened");
            session.teardown();
            return;
        }
    };

    let Connection {
        transport,
        mut events,
    } = connection;
    session.transport = Some(transport);

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(SessionCommand::EndCall) => session.end_call(),
                Some(SessionCommand::StopCapture) => session.capture.stop(),
                Some(SessionCommand::Shutdown) | None => break,
            },
            event = events.recv() => {
                let keep_running = match event {
                    Some(event) => session.handle_event(event).await,
                    None => {
                        session.on_transport_closed();
                        false
                    }
                };
                if !keep_running {
                    break;
                }
            },
            outcome = session.playback.completion() => session.playback.finish(outcome),
            _ = wait_for(&mut session.grace) => session.on_grace_elapsed(),
        }
    }

    session.teardown();
}

/// Befehle vor dem Verbindungsaufbau; kehrt bei Shutdown zurück
async fn wait_for_shutdown(commands: &mut mpsc::UnboundedReceiver<SessionCommand>) {
    while let Some(command) = commands.recv().await {
        match command {
            SessionCommand::Shutdown => return,
            other => tracing::debug!(?other, "Transport not open yet, ignoring command"),
        }
    }
}

/// Läuft nie ab, solange kein Timer gesetzt ist
async fn wait_for(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer.as_mut() {
        Some(sleep) => sleep.as_mut().await,
        None => std::future::pending().await,
    }
}

impl Session {
    fn current(&self) -> CallStatus {
        *self.status.borrow()
    }

    /// Wendet einen Auslöser an; `true` wenn sich der Status geändert hat
    fn transition(&mut self, trigger: Trigger) -> bool {
        let from = self.current();
        match from.on(trigger) {
            Some(to) => {
                tracing::info!(%from, %to, ?trigger, "Status changed");
                self.status.send_replace(to);
                true
            }
            None => {
                tracing::debug!(status = %from, ?trigger, "Trigger ignored");
                false
            }
        }
    }

    /// `false` beendet die Event-Schleife
    async fn handle_event(&mut self, event: TransportEvent) -> bool {
        match event {
            TransportEvent::Opened => {
                tracing::info!("WebSocket connected");
                if self.transition(Trigger::TransportOpened) {
                    self.check_permission();
                }
                true
            }
            TransportEvent::Message(message) => {
                self.on_message(message).await;
                true
            }
            TransportEvent::Audio(data) => {
                self.playback.enqueue(data);
                true
            }
            TransportEvent::Error(e) => {
                tracing::error!("WebSocket error: {}", e);
                self.on_transport_closed();
                false
            }
            TransportEvent::Closed { reason } => {
                tracing::info!(reason = reason.as_deref().unwrap_or(""), "WebSocket closed");
                self.on_transport_closed();
                false
            }
        }
    }

    async fn on_message(&mut self, message: ServerMessage) {
        let signal = message.signal_type();
        tracing::debug!(%signal, "Received message");

        if signal == self.profile.trigger {
            if let Some(session_id) = message.session_id() {
                tracing::info!(session_id, "Peer connected");
            }
            if self.transition(Trigger::PeerConnected) {
                self.start_capture().await;
            }
        } else if signal == SignalType::CallEnded {
            if self.current() != CallStatus::Connected || self.grace.is_some() {
                return;
            }
            tracing::info!(
                grace_ms = self.grace_period.as_millis() as u64,
                "Call ended, stopping recording after grace period"
            );
            self.grace = Some(Box::pin(tokio::time::sleep(self.grace_period)));
        }
    }

    /// Fire-and-forget; ein Fehler wird nur geloggt
    fn check_permission(&self) {
        let microphone = Arc::clone(&self.microphone);
        tokio::spawn(
            async move {
                match microphone.request_permission().await {
                    Ok(()) => tracing::info!("Microphone access available"),
                    Err(e) => tracing::warn!("Microphone permission check failed: {}", e),
                }
            }
            .in_current_span(),
        );
    }

    async fn start_capture(&mut self) {
        let Some(sender) = self.transport.as_ref().map(TransportHandle::audio_sender) else {
            return;
        };

        match self.capture.start(sender, self.profile.chunk_interval).await {
            Ok(format) => tracing::info!(mime = format.mime_type(), "Recording started"),
            Err(e) => {
                tracing::error!("Failed to start recording: {}", e);
                self.transition(Trigger::CaptureFailed);
            }
        }
    }

    fn on_grace_elapsed(&mut self) {
        self.grace = None;
        self.capture.stop();
        self.transition(Trigger::GraceElapsed);
    }

    fn on_transport_closed(&mut self) {
        self.grace = None;
        self.capture.stop();
        self.playback.clear();
        self.sink.release();
        self.transition(Trigger::TransportClosed);
    }

    fn end_call(&mut self) {
        match &self.transport {
            Some(transport) if transport.close() => {
                tracing::info!("Ending call");
                self.capture.stop();
            }
            _ => tracing::debug!("Transport already closed, nothing to end"),
        }
    }

    /// Gibt alle Ressourcen frei; nur der erste Aufruf wirkt
    fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;

        if let Some(transport) = self.transport.take() {
            transport.close();
        }
        self.grace = None;
        self.capture.stop();
        self.playback.clear();
        self.sink.release();

        let previous = self.status.send_replace(CallStatus::Disconnected);
        tracing::info!(from = %previous, "Session closed");
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.teardown();
    }
}

// ============================================================================
// TESTS
// ============================================================================
