//! Audio-Geräte - Mikrofon und Lautsprecher
//!
//! Verwendet cpal für Cross-Platform Audio I/O. Die Session sieht nur die
//! Traits [`Microphone`], [`InputStream`], [`AudioOutput`] und [`OutputFactory`];
//! Tests ersetzen sie durch Fakes.
//!
//! cpal-Streams sind nicht auf allen Plattformen `Send`. Sie werden deshalb auf
//! einem eigenen Thread gebaut und dort bis zum Stoppen geparkt.

use super::codec::{downmix, resample_linear, DecodedAudio};
use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, Stream, StreamConfig, SupportedStreamConfigRange};
use parking_lot::Mutex;
use ringbuf::{traits::*, HeapRb};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc as std_mpsc, Arc};
use std::thread::JoinHandle;
use std::time::Duration;
use thiserror::Error;

// ============================================================================
// CONSTANTS
// ============================================================================

/// Sample Rate (48kHz ist der Standard für beste Qualität)
pub const SAMPLE_RATE: u32 = 48000;

/// Aufnahmepuffer: reicht für den längsten Chunk-Takt mit Reserve
const CAPTURE_BUFFER_SIZE: usize = SAMPLE_RATE as usize * 4;

/// Wiedergabepuffer
const PLAYBACK_BUFFER_SIZE: usize = SAMPLE_RATE as usize;

/// Polling-Intervall beim Befüllen/Leerlaufen des Wiedergabepuffers
const RENDER_POLL: Duration = Duration::from_millis(20);

/// Zusätzliche Wartezeit, bevor ein Chunk als "fertig gespielt" gilt
const RENDER_SLACK: Duration = Duration::from_millis(500);

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone)]
pub enum AudioError {
    #[error("No audio input device found")]
    NoInputDevice,

    #[error("No audio output device found")]
    NoOutputDevice,

    #[error("Unsupported audio configuration: {0}")]
    UnsupportedConfig(String),

    #[error("Failed to build audio stream: {0}")]
    StreamBuildError(String),

    #[error("Failed to start audio stream: {0}")]
    StreamPlayError(String),

    #[error("Audio output has been released")]
    SinkReleased,
}

// ============================================================================
// DEVICE TRAITS
// ============================================================================

/// Eingabequelle (Mikrofon o.ä.)
#[async_trait]
pub trait Microphone: Send + Sync {
    /// Prüft den Zugriff auf das Gerät, ohne es zu belegen
    async fn request_permission(&self) -> Result<(), AudioError>;

    /// Belegt das Gerät. Drop des Streams gibt es wieder frei.
    async fn open(&self) -> Result<Box<dyn InputStream>, AudioError>;
}

/// Laufende Aufnahme
pub trait InputStream: Send {
    fn sample_rate(&self) -> u32;

    /// Entnimmt alle seit dem letzten Aufruf aufgenommenen Mono-Samples
    fn take_samples(&mut self) -> Vec<f32>;
}

/// Wiedergabegerät
#[async_trait]
pub trait AudioOutput: Send + Sync {
    /// Spielt das Audio ab; kehrt zurück, wenn es fertig gespielt ist
    async fn render(&self, audio: DecodedAudio) -> Result<(), AudioError>;

    /// Gibt das Gerät frei
    fn close(&self);
}

/// Erzeugt Wiedergabegeräte bei Bedarf
#[async_trait]
pub trait OutputFactory: Send + Sync {
    async fn open(&self) -> Result<Arc<dyn AudioOutput>, AudioError>;
}

// ============================================================================
// AUDIO SINK
// ============================================================================

/// Wiedergabe-Senke einer Session
///
/// Das Gerät wird erst bei der ersten Wiedergabe geöffnet und beim Abbau der
/// Session genau einmal geschlossen. Danach schlägt jeder Zugriff fehl.
pub struct AudioSink {
    factory: Arc<dyn OutputFactory>,
    output: Mutex<Option<Arc<dyn AudioOutput>>>,
    /// Serialisiert das Öffnen, ohne `output` über ein await zu sperren
    opening: tokio::sync::Mutex<()>,
    released: AtomicBool,
}

impl AudioSink {
    pub fn new(factory: Arc<dyn OutputFactory>) -> Self {
        Self {
            factory,
            output: Mutex::new(None),
            opening: tokio::sync::Mutex::new(()),
            released: AtomicBool::new(false),
        }
    }

    fn current(&self) -> Result<Option<Arc<dyn AudioOutput>>, AudioError> {
        let slot = self.output.lock();
        if self.released.load(Ordering::SeqCst) {
            return Err(AudioError::SinkReleased);
        }
        Ok(slot.clone())
    }

    /// Gibt das Ausgabegerät zurück und öffnet es beim ersten Aufruf
    pub async fn output(&self) -> Result<Arc<dyn AudioOutput>, AudioError> {
        let _opening = self.opening.lock().await;
        if let Some(output) = self.current()? {
            return Ok(output);
        }

        let output = self.factory.open().await?;

        let mut slot = self.output.lock();
        // Während des Öffnens freigegeben: das neue Gerät gleich wieder schließen
        if self.released.load(Ordering::SeqCst) {
            drop(slot);
            output.close();
            return Err(AudioError::SinkReleased);
        }
        tracing::info!("Audio output created");
        *slot = Some(Arc::clone(&output));
        Ok(output)
    }

    pub fn is_active(&self) -> bool {
        self.output.lock().is_some()
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    /// Schließt das Gerät; nur der erste Aufruf hat eine Wirkung
    pub fn release(&self) -> bool {
        let mut slot = self.output.lock();
        if self.released.swap(true, Ordering::SeqCst) {
            return false;
        }
        if let Some(output) = slot.take() {
            output.close();
            tracing::info!("Audio output closed");
        }
        true
    }
}

impl std::fmt::Debug for AudioSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioSink")
            .field("active", &self.is_active())
            .field("released", &self.is_released())
            .finish()
    }
}

// ============================================================================
// STREAM THREAD
// ============================================================================

/// Hält einen cpal-Stream auf einem eigenen Thread am Leben
struct StreamThread {
    stop: Option<std_mpsc::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl StreamThread {
    fn spawn<F>(name: &str, build: F) -> Result<Self, AudioError>
    where
        F: FnOnce() -> Result<Stream, AudioError> + Send + 'static,
    {
        let (ready_tx, ready_rx) = std_mpsc::sync_channel::<Result<(), AudioError>>(1);
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();

        let handle = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || match build() {
                Ok(stream) => {
                    let _ = ready_tx.send(Ok(()));
                    // Blockiert bis der Sender gedroppt wird
                    let _ = stop_rx.recv();
                    drop(stream);
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                }
            })
            .map_err(|e| AudioError::StreamBuildError(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                stop: Some(stop_tx),
                handle: Some(handle),
            }),
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => Err(AudioError::StreamBuildError(
                "audio thread exited before the stream was ready".to_string(),
            )),
        }
    }
}

impl Drop for StreamThread {
    fn drop(&mut self) {
        drop(self.stop.take());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

// ============================================================================
// CPAL MICROPHONE
// ============================================================================

/// Standard-Eingabegerät über cpal
#[derive(Debug, Clone, Copy, Default)]
pub struct CpalMicrophone;

#[async_trait]
impl Microphone for CpalMicrophone {
    async fn request_permission(&self) -> Result<(), AudioError> {
        let host = cpal::default_host();
        host.default_input_device()
            .map(|_| ())
            .ok_or(AudioError::NoInputDevice)
    }

    async fn open(&self) -> Result<Box<dyn InputStream>, AudioError> {
        let input = tokio::task::spawn_blocking(CpalInput::start)
            .await
            .map_err(|e| AudioError::StreamBuildError(e.to_string()))??;
        Ok(Box::new(input))
    }
}

/// Laufende cpal-Aufnahme (Mono, 48kHz)
pub struct CpalInput {
    /// Ring-Buffer für aufgenommenes Audio (Raw PCM)
    buffer: Arc<Mutex<HeapRb<f32>>>,
    _stream: StreamThread,
}

impl CpalInput {
    fn start() -> Result<Self, AudioError> {
        let buffer = Arc::new(Mutex::new(HeapRb::<f32>::new(CAPTURE_BUFFER_SIZE)));
        let capture_buffer = Arc::clone(&buffer);

        let stream = StreamThread::spawn("hotline-capture", move || {
            let host = cpal::default_host();
            let device = host.default_input_device().ok_or(AudioError::NoInputDevice)?;
            let config = find_best_input_config(&device)?;

            tracing::info!(
                "Starting audio capture: {} Hz, {} channels",
                config.sample_rate.0,
                config.channels
            );

            let channels = config.channels;
            let source_sample_rate = config.sample_rate.0;

            let stream = device
                .build_input_stream(
                    &config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        let mono = downmix(data, channels);
                        let samples = resample_linear(&mono, source_sample_rate, SAMPLE_RATE);

                        let mut buffer = capture_buffer.lock();
                        for sample in samples {
                            let _ = buffer.try_push(sample);
                        }
                    },
                    |err| {
                        tracing::error!("Audio capture error: {}", err);
                    },
                    None,
                )
                .map_err(|e| AudioError::StreamBuildError(e.to_string()))?;

            stream
                .play()
                .map_err(|e| AudioError::StreamPlayError(e.to_string()))?;

            Ok(stream)
        })?;

        Ok(Self {
            buffer,
            _stream: stream,
        })
    }
}

impl InputStream for CpalInput {
    fn sample_rate(&self) -> u32 {
        SAMPLE_RATE
    }

    fn take_samples(&mut self) -> Vec<f32> {
        let mut buffer = self.buffer.lock();
        let mut samples = Vec::with_capacity(buffer.occupied_len());
        while let Some(sample) = buffer.try_pop() {
            samples.push(sample);
        }
        samples
    }
}

// ============================================================================
// CPAL SPEAKER
// ============================================================================

/// Öffnet das Standard-Ausgabegerät über cpal
#[derive(Debug, Clone, Copy, Default)]
pub struct CpalOutputFactory;

#[async_trait]
impl OutputFactory for CpalOutputFactory {
    async fn open(&self) -> Result<Arc<dyn AudioOutput>, AudioError> {
        // Stream-Aufbau blockiert bis das Gerät bereit ist
        let speaker = tokio::task::spawn_blocking(CpalSpeaker::start)
            .await
            .map_err(|e| AudioError::StreamBuildError(e.to_string()))??;
        Ok(Arc::new(speaker))
    }
}

/// Wiedergabe über cpal (Mono-Ringpuffer, auf alle Kanäle verteilt)
pub struct CpalSpeaker {
    /// Ring-Buffer für zu spielendes Audio (decoded PCM, 48kHz mono)
    buffer: Arc<Mutex<HeapRb<f32>>>,
    stream: Mutex<Option<StreamThread>>,
}

impl CpalSpeaker {
    fn start() -> Result<Self, AudioError> {
        let buffer = Arc::new(Mutex::new(HeapRb::<f32>::new(PLAYBACK_BUFFER_SIZE)));
        let playback_buffer = Arc::clone(&buffer);

        let stream = StreamThread::spawn("hotline-playback", move || {
            let host = cpal::default_host();
            let device = host
                .default_output_device()
                .ok_or(AudioError::NoOutputDevice)?;
            let config = find_best_output_config(&device)?;

            tracing::info!(
                "Starting audio playback: {} Hz, {} channels",
                config.sample_rate.0,
                config.channels
            );

            let channels = (config.channels as usize).max(1);
            // Quell-Samples pro Ausgabe-Frame
            let step = SAMPLE_RATE as f32 / config.sample_rate.0 as f32;
            let mut phase = 1.0f32;
            let mut current = 0.0f32;

            let stream = device
                .build_output_stream(
                    &config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        let mut buffer = playback_buffer.lock();
                        for frame in data.chunks_mut(channels) {
                            while phase >= 1.0 {
                                current = buffer.try_pop().unwrap_or(0.0);
                                phase -= 1.0;
                            }
                            phase += step;
                            // Auf alle Kanäle verteilen
                            for s in frame.iter_mut() {
                                *s = current;
                            }
                        }
                    },
                    |err| {
                        tracing::error!("Audio playback error: {}", err);
                    },
                    None,
                )
                .map_err(|e| AudioError::StreamBuildError(e.to_string()))?;

            stream
                .play()
                .map_err(|e| AudioError::StreamPlayError(e.to_string()))?;

            Ok(stream)
        })?;

        Ok(Self {
            buffer,
            stream: Mutex::new(Some(stream)),
        })
    }

    fn is_open(&self) -> bool {
        self.stream.lock().is_some()
    }
}

#[async_trait]
impl AudioOutput for CpalSpeaker {
    async fn render(&self, audio: DecodedAudio) -> Result<(), AudioError> {
        let samples = audio.to_mono_at(SAMPLE_RATE);
        let mut written = 0;

        while written < samples.len() {
            if !self.is_open() {
                return Err(AudioError::SinkReleased);
            }
            written += {
                let mut buffer = self.buffer.lock();
                let mut pushed = 0;
                for &sample in &samples[written..] {
                    if buffer.try_push(sample).is_err() {
                        break;
                    }
                    pushed += 1;
                }
                pushed
            };
            if written < samples.len() {
                tokio::time::sleep(RENDER_POLL).await;
            }
        }

        // Warten bis der Puffer leergespielt ist
        let deadline = tokio::time::Instant::now() + audio.duration() + RENDER_SLACK;
        loop {
            let pending = self.buffer.lock().occupied_len();
            if pending == 0 || !self.is_open() || tokio::time::Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep(RENDER_POLL).await;
        }

        Ok(())
    }

    fn close(&self) {
        self.stream.lock().take();
    }
}

// ============================================================================
// CONFIG SELECTION
// ============================================================================

/// Findet die beste Input-Konfiguration
fn find_best_input_config(device: &Device) -> Result<StreamConfig, AudioError> {
    let configs = device
        .supported_input_configs()
        .map_err(|e| AudioError::UnsupportedConfig(e.to_string()))?;

    select_best_config(configs.collect())
}

/// Findet die beste Output-Konfiguration
fn find_best_output_config(device: &Device) -> Result<StreamConfig, AudioError> {
    let configs = device
        .supported_output_configs()
        .map_err(|e| AudioError::UnsupportedConfig(e.to_string()))?;

    select_best_config(configs.collect())
}

/// Wählt die beste F32-Konfiguration, bevorzugt 48kHz
fn select_best_config(configs: Vec<SupportedStreamConfigRange>) -> Result<StreamConfig, AudioError> {
    let target_rate = cpal::SampleRate(SAMPLE_RATE);
    let supports_target = |c: &SupportedStreamConfigRange| {
        c.min_sample_rate() <= target_rate && c.max_sample_rate() >= target_rate
    };

    // Die Callbacks arbeiten mit f32, andere Formate scheiden aus
    let mut float_configs = configs
        .into_iter()
        .filter(|c| c.sample_format() == SampleFormat::F32)
        .peekable();

    let first = float_configs.peek().cloned();
    if let Some(config) = float_configs.find(supports_target) {
        return Ok(config.with_sample_rate(target_rate).into());
    }

    first
        .map(|config| config.with_max_sample_rate().into())
        .ok_or_else(|| {
            AudioError::UnsupportedConfig("No f32 audio configuration found".to_string())
        })
}

// ============================================================================
// TESTS
// ============================================================================
