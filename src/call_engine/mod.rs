//! Call Engine Module - Session und Audio
//!
//! Dieses Modul verwaltet:
//! - Session-Zustandsmaschine (disconnected / waiting / connected)
//! - Audio Capture (Mikrofon → Chunks → Transport)
//! - Audio Playback (Transport → FIFO-Queue → Lautsprecher)
//! - Format-Aushandlung und Chunk-Kodierung

mod audio;
mod capture;
mod codec;
mod engine;
mod playback;
mod role;
mod status;

#[cfg(test)]
mod testing;

pub use audio::{
    AudioError, AudioOutput, AudioSink, CpalMicrophone, CpalOutputFactory, InputStream, Microphone,
    OutputFactory, SAMPLE_RATE,
};
pub use capture::{CaptureError, CaptureFlow};
pub use codec::{
    decode_container, decode_wav, negotiate, AudioFormat, ChunkEncoder, CodecError, DecodedAudio,
    EncoderRegistry, NativeEncoders, WavEncoder, FORMAT_PREFERENCE,
};
pub use engine::{
    AudioBackend, SessionController, SessionHandle, SessionOptions, DEFAULT_GRACE_PERIOD,
};
pub use playback::{
    default_strategies, play_with, DecodedPlayback, OverflowPolicy, PlaybackError, PlaybackFlow,
    PlaybackOptions, PlaybackOutcome, PlaybackStrategy, StrategyMode, WavPlayback,
};
pub use role::{Role, RoleProfile, CLIENT_CHUNK_INTERVAL, OPERATOR_CHUNK_INTERVAL};
pub use status::{CallStatus, Trigger};
