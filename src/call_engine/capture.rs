//! Capture-Pipeline - Mikrofon in Chunks zerlegen und senden
//!
//! Pro Session höchstens eine laufende Aufnahme. Ein Timer-Task schneidet im
//! Takt der Rolle einen Chunk ab, kodiert ihn im ausgehandelten Format und
//! schickt ihn über den [`AudioSender`]. Leere Chunks werden verworfen.

use super::audio::{AudioError, InputStream, Microphone};
use super::codec::{negotiate, AudioFormat, ChunkEncoder, EncoderRegistry};
use crate::signaling::AudioSender;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::Instrument;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone)]
pub enum CaptureError {
    #[error("Audio input unavailable: {0}")]
    DeviceUnavailable(#[from] AudioError),

    #[error("No supported audio format found")]
    NoSupportedFormat,
}

// ============================================================================
// RECORDER
// ============================================================================

/// Gerät + Encoder, geteilt zwischen Timer-Task und `stop()`
struct Recorder {
    input: Box<dyn InputStream>,
    encoder: Box<dyn ChunkEncoder>,
}

impl Recorder {
    /// Schneidet einen Chunk ab und sendet ihn, falls er Audio enthält
    fn emit(&mut self, sender: &AudioSender) {
        let samples = self.input.take_samples();
        if samples.is_empty() {
            tracing::trace!("Dropping empty chunk");
            return;
        }
        if !sender.is_open() {
            tracing::trace!("Transport closed, dropping {} samples", samples.len());
            return;
        }

        match self.encoder.encode(&samples, self.input.sample_rate()) {
            Ok(chunk) if chunk.is_empty() => {}
            Ok(chunk) => {
                let size = chunk.len();
                match sender.send_audio(chunk) {
                    Ok(()) => tracing::debug!("Sent audio chunk: {} bytes", size),
                    Err(e) => tracing::debug!("Audio chunk not sent: {}", e),
                }
            }
            Err(e) => tracing::warn!("Failed to encode audio chunk: {}", e),
        }
    }
}

struct ActiveCapture {
    recorder: Arc<Mutex<Option<Recorder>>>,
    task: JoinHandle<()>,
    sender: AudioSender,
    format: AudioFormat,
}

// ============================================================================
// CAPTURE FLOW
// ============================================================================

pub struct CaptureFlow {
    microphone: Arc<dyn Microphone>,
    encoders: Arc<dyn EncoderRegistry>,
    active: Option<ActiveCapture>,
}

impl CaptureFlow {
    pub fn new(microphone: Arc<dyn Microphone>, encoders: Arc<dyn EncoderRegistry>) -> Self {
        Self {
            microphone,
            encoders,
            active: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.active.is_some()
    }

    /// Ausgehandeltes Format der laufenden Aufnahme
    pub fn format(&self) -> Option<AudioFormat> {
        self.active.as_ref().map(|a| a.format)
    }

    /// Startet die Aufnahme mit dem gegebenen Chunk-Takt
    ///
    /// Läuft bereits eine Aufnahme, wird deren Format zurückgegeben.
    pub async fn start(
        &mut self,
        sender: AudioSender,
        interval: Duration,
    ) -> Result<AudioFormat, CaptureError> {
        if let Some(active) = &self.active {
            return Ok(active.format);
        }

        tracing::info!("Starting recording");
        let input = self.microphone.open().await?;

        let (format, encoder) =
            negotiate(self.encoders.as_ref()).ok_or(CaptureError::NoSupportedFormat)?;
        tracing::info!("Recording with mimeType {}", format);

        let recorder = Arc::new(Mutex::new(Some(Recorder { input, encoder })));
        let task = tokio::spawn(
            record_loop(Arc::clone(&recorder), sender.clone(), interval).in_current_span(),
        );

        tracing::info!(
            interval_ms = interval.as_millis() as u64,
            "MediaRecorder initialized"
        );

        self.active = Some(ActiveCapture {
            recorder,
            task,
            sender,
            format,
        });
        Ok(format)
    }

    /// Stoppt die Aufnahme und gibt das Gerät frei
    ///
    /// Restliche Samples gehen als letzter Chunk raus, solange der Transport
    /// offen ist. Mehrfacher Aufruf ist ein No-op.
    pub fn stop(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };

        active.task.abort();
        let recorder = active.recorder.lock().take();
        if let Some(mut recorder) = recorder {
            recorder.emit(&active.sender);
        }
        tracing::info!("Recording stopped");
    }
}

impl Drop for CaptureFlow {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn record_loop(
    recorder: Arc<Mutex<Option<Recorder>>>,
    sender: AudioSender,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        let mut slot = recorder.lock();
        match slot.as_mut() {
            Some(rec) => rec.emit(&sender),
            None => break,
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
