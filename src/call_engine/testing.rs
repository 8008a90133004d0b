//! Test-Fakes für Geräte und Transport

use super::audio::{AudioError, AudioOutput, InputStream, Microphone, OutputFactory};
use super::codec::{AudioFormat, ChunkEncoder, DecodedAudio, EncoderRegistry, WavEncoder};
use crate::signaling::{Connection, ConnectionDriver, Connector, TransportError};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::time::Instant;
use url::Url;

// ============================================================================
// TRANSPORT
// ============================================================================

/// Gibt genau eine vorbereitete In-Memory-Verbindung heraus
pub(crate) struct MemoryConnector {
    connection: Mutex<Option<Connection>>,
    pub endpoints: Mutex<Vec<Url>>,
}

impl MemoryConnector {
    pub fn new() -> (Arc<Self>, ConnectionDriver) {
        let (connection, driver) = Connection::pair();
        let connector = Arc::new(Self {
            connection: Mutex::new(Some(connection)),
            endpoints: Mutex::new(Vec::new()),
        });
        (connector, driver)
    }

    /// Connector dessen Verbindungsaufbau immer fehlschlägt
    pub fn refusing() -> Arc<Self> {
        Arc::new(Self {
            connection: Mutex::new(None),
            endpoints: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, endpoint: &Url) -> Result<Connection, TransportError> {
        self.endpoints.lock().push(endpoint.clone());
        self.connection
            .lock()
            .take()
            .ok_or_else(|| TransportError::ConnectionFailed("connection refused".to_string()))
    }
}

// ============================================================================
// MICROPHONE
// ============================================================================

#[derive(Clone)]
pub(crate) struct FakeMicrophone {
    available: bool,
    samples_per_take: usize,
    pub opens: Arc<AtomicUsize>,
    pub releases: Arc<AtomicUsize>,
    pub permission_checks: Arc<AtomicUsize>,
}

impl FakeMicrophone {
    pub fn new() -> Self {
        Self {
            available: true,
            samples_per_take: 1600,
            opens: Arc::new(AtomicUsize::new(0)),
            releases: Arc::new(AtomicUsize::new(0)),
            permission_checks: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Liefert nie Samples
    pub fn silent() -> Self {
        Self {
            samples_per_take: 0,
            ..Self::new()
        }
    }

    pub fn unavailable() -> Self {
        Self {
            available: false,
            ..Self::new()
        }
    }

    /// Aktuell belegte Streams
    pub fn live_streams(&self) -> usize {
        self.opens.load(Ordering::SeqCst) - self.releases.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Microphone for FakeMicrophone {
    async fn request_permission(&self) -> Result<(), AudioError> {
        self.permission_checks.fetch_add(1, Ordering::SeqCst);
        if self.available {
            Ok(())
        } else {
            Err(AudioError::NoInputDevice)
        }
    }

    async fn open(&self) -> Result<Box<dyn InputStream>, AudioError> {
        if !self.available {
            return Err(AudioError::NoInputDevice);
        }
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeInput {
            samples_per_take: self.samples_per_take,
            releases: Arc::clone(&self.releases),
        }))
    }
}

struct FakeInput {
    samples_per_take: usize,
    releases: Arc<AtomicUsize>,
}

impl InputStream for FakeInput {
    fn sample_rate(&self) -> u32 {
        16000
    }

    fn take_samples(&mut self) -> Vec<f32> {
        vec![0.25; self.samples_per_take]
    }
}

impl Drop for FakeInput {
    fn drop(&mut self) {
        self.releases.fetch_add(1, Ordering::SeqCst);
    }
}

/// Registry ohne ein einziges Format
pub(crate) struct NoEncoders;

impl EncoderRegistry for NoEncoders {
    fn encoder_for(&self, _format: AudioFormat) -> Option<Box<dyn ChunkEncoder>> {
        None
    }
}

// ============================================================================
// OUTPUT
// ============================================================================

/// Eine abgeschlossene Wiedergabe
#[derive(Debug, Clone)]
pub(crate) struct RenderRecord {
    pub frames: usize,
    pub started: Instant,
    pub finished: Instant,
}

/// Ausgabe die in Echtzeit "spielt" und mitschreibt
#[derive(Clone, Default)]
pub(crate) struct RecordingOutputFactory {
    pub renders: Arc<Mutex<Vec<RenderRecord>>>,
    pub opens: Arc<AtomicUsize>,
    pub closes: Arc<AtomicUsize>,
}

#[async_trait]
impl OutputFactory for RecordingOutputFactory {
    async fn open(&self) -> Result<Arc<dyn AudioOutput>, AudioError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(RecordingOutput {
            renders: Arc::clone(&self.renders),
            closes: Arc::clone(&self.closes),
        }))
    }
}

struct RecordingOutput {
    renders: Arc<Mutex<Vec<RenderRecord>>>,
    closes: Arc<AtomicUsize>,
}

#[async_trait]
impl AudioOutput for RecordingOutput {
    async fn render(&self, audio: DecodedAudio) -> Result<(), AudioError> {
        let started = Instant::now();
        tokio::time::sleep(audio.duration()).await;
        self.renders.lock().push(RenderRecord {
            frames: audio.frames(),
            started,
            finished: Instant::now(),
        });
        Ok(())
    }

    fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// WAV-Chunk mit `frames` Frames bei 16kHz
pub(crate) fn wav_chunk(frames: usize) -> Vec<u8> {
    let samples = vec![0.1f32; frames];
    WavEncoder
        .encode(&samples, 16000)
        .expect("WAV encoding of test samples")
}
