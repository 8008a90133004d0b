//! Audio-Formate, Encoder und Decoder
//!
//! Ausgehend: ein Chunk ist eine in sich geschlossene Datei im ausgehandelten
//! Format. Nativ ist das WAV (16 Bit PCM, mono) über `hound`.
//!
//! Eingehend: zwei unabhängige Decode-Pfade, `hound` für WAV und `symphonia`
//! für erkannte Container (WAV, Ogg, Matroska/WebM).
//!
//! symphonia 0.5 bringt keinen Opus-Decoder mit. WebM/Opus- und Ogg/Opus-Chunks,
//! wie Browser sie aufnehmen, scheitern deshalb an beiden Pfaden und werden als
//! `AllStrategiesFailed` übersprungen. Dekodiert wird nur PCM- oder Vorbis-Inhalt.

use std::fmt;
use std::io::Cursor;
use thiserror::Error;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Failed to encode chunk: {0}")]
    Encode(String),

    #[error("Failed to decode chunk: {0}")]
    Decode(String),

    #[error("Chunk contains no audio")]
    Empty,
}

impl From<hound::Error> for CodecError {
    fn from(e: hound::Error) -> Self {
        CodecError::Decode(e.to_string())
    }
}

// ============================================================================
// FORMATS
// ============================================================================

/// Kandidaten für das Aufnahmeformat
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AudioFormat {
    Webm,
    Mp4,
    Ogg,
    Wav,
}

/// Feste Prioritätsreihenfolge der Aushandlung
pub const FORMAT_PREFERENCE: [AudioFormat; 4] = [
    AudioFormat::Webm,
    AudioFormat::Mp4,
    AudioFormat::Ogg,
    AudioFormat::Wav,
];

impl AudioFormat {
    pub fn mime_type(self) -> &'static str {
        match self {
            AudioFormat::Webm => "audio/webm",
            AudioFormat::Mp4 => "audio/mp4",
            AudioFormat::Ogg => "audio/ogg",
            AudioFormat::Wav => "audio/wav",
        }
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mime_type())
    }
}

// ============================================================================
// ENCODING
// ============================================================================

/// Kodiert einen Block Mono-Samples zu einem sendefertigen Chunk
pub trait ChunkEncoder: Send {
    fn encode(&mut self, samples: &[f32], sample_rate: u32) -> Result<Vec<u8>, CodecError>;
}

/// Welche Formate die Laufzeit kodieren kann
pub trait EncoderRegistry: Send + Sync {
    fn encoder_for(&self, format: AudioFormat) -> Option<Box<dyn ChunkEncoder>>;
}

/// Nimmt den ersten unterstützten Kandidaten aus [`FORMAT_PREFERENCE`]
pub fn negotiate(registry: &dyn EncoderRegistry) -> Option<(AudioFormat, Box<dyn ChunkEncoder>)> {
    let selected = FORMAT_PREFERENCE
        .iter()
        .find_map(|&format| registry.encoder_for(format).map(|enc| (format, enc)));

    tracing::debug!(
        candidates = ?FORMAT_PREFERENCE.map(AudioFormat::mime_type),
        supported = selected.as_ref().map(|(f, _)| f.mime_type()).unwrap_or(""),
        "Checking supported MIME types"
    );

    selected
}

/// Encoder die ohne native Codec-Bibliotheken verfügbar sind
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeEncoders;

impl EncoderRegistry for NativeEncoders {
    fn encoder_for(&self, format: AudioFormat) -> Option<Box<dyn ChunkEncoder>> {
        match format {
            AudioFormat::Wav => Some(Box::new(WavEncoder)),
            _ => None,
        }
    }
}

/// 16 Bit PCM Mono WAV
#[derive(Debug, Clone, Copy, Default)]
pub struct WavEncoder;

impl ChunkEncoder for WavEncoder {
    fn encode(&mut self, samples: &[f32], sample_rate: u32) -> Result<Vec<u8>, CodecError> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        let mut cursor = Cursor::new(Vec::with_capacity(44 + samples.len() * 2));
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec)
                .map_err(|e| CodecError::Encode(e.to_string()))?;
            for &sample in samples {
                let value = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
                writer
                    .write_sample(value)
                    .map_err(|e| CodecError::Encode(e.to_string()))?;
            }
            writer
                .finalize()
                .map_err(|e| CodecError::Encode(e.to_string()))?;
        }

        Ok(cursor.into_inner())
    }
}

// ============================================================================
// DECODING
// ============================================================================

/// Dekodiertes Audio, bereit zur Wiedergabe
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    /// Interleaved Samples (L, R, L, R, ...)
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl DecodedAudio {
    /// Anzahl Frames (Samples pro Kanal)
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.samples.len() / self.channels as usize
        }
    }

    pub fn duration(&self) -> std::time::Duration {
        if self.sample_rate == 0 {
            return std::time::Duration::ZERO;
        }
        std::time::Duration::from_nanos(
            self.frames() as u64 * 1_000_000_000 / self.sample_rate as u64,
        )
    }

    /// Mono-Samples in der Ziel-Samplerate
    pub fn to_mono_at(&self, target_rate: u32) -> Vec<f32> {
        let mono = downmix(&self.samples, self.channels);
        resample_linear(&mono, self.sample_rate, target_rate)
    }
}

/// WAV über hound
pub fn decode_wav(data: &[u8]) -> Result<DecodedAudio, CodecError> {
    let reader = hound::WavReader::new(Cursor::new(data))?;
    let spec = reader.spec();

    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<Result<Vec<_>, _>>()?,
        hound::SampleFormat::Int => {
            let max_val = (1i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 / max_val))
                .collect::<Result<Vec<_>, _>>()?
        }
    };

    if samples.is_empty() {
        return Err(CodecError::Empty);
    }

    Ok(DecodedAudio {
        samples,
        sample_rate: spec.sample_rate,
        channels: spec.channels,
    })
}

/// Container-Erkennung und Dekodierung über symphonia
///
/// Opus-Spuren schlagen mit `unsupported codec` fehl.
pub fn decode_container(data: &[u8]) -> Result<DecodedAudio, CodecError> {
    use symphonia::core::audio::SampleBuffer;
    use symphonia::core::codecs::DecoderOptions;
    use symphonia::core::errors::Error as SymphoniaError;
    use symphonia::core::formats::FormatOptions;
    use symphonia::core::io::MediaSourceStream;
    use symphonia::core::meta::MetadataOptions;
    use symphonia::core::probe::Hint;

    let decode_err = |e: SymphoniaError| CodecError::Decode(e.to_string());

    let cursor = Cursor::new(data.to_vec());
    let mss = MediaSourceStream::new(Box::new(cursor), Default::default());

    let probed = symphonia::default::get_probe()
        .format(
            &Hint::new(),
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(decode_err)?;

    let mut format = probed.format;
    let track = format
        .default_track()
        .ok_or_else(|| CodecError::Decode("no audio track found".to_string()))?;

    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| CodecError::Decode("no sample rate".to_string()))?;
    let mut channels = track
        .codec_params
        .channels
        .map(|c| c.count() as u16)
        .unwrap_or(1);

    let codecs = symphonia::default::get_codecs();
    if codecs.get_codec(track.codec_params.codec).is_none() {
        return Err(CodecError::Decode(format!(
            "unsupported codec {:?}",
            track.codec_params.codec
        )));
    }
    let mut decoder = codecs
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(decode_err)?;

    let track_id = track.id;
    let mut samples: Vec<f32> = Vec::new();

    loop {
        let packet = match format.next_packet() {
            Ok(p) => p,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(e) => return Err(decode_err(e)),
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = decoder.decode(&packet).map_err(decode_err)?;
        let spec = *decoded.spec();
        channels = spec.channels.count() as u16;

        let mut sample_buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        sample_buf.copy_interleaved_ref(decoded);
        samples.extend_from_slice(sample_buf.samples());
    }

    if samples.is_empty() {
        return Err(CodecError::Empty);
    }

    Ok(DecodedAudio {
        samples,
        sample_rate,
        channels,
    })
}

// ============================================================================
// SAMPLE HELPERS
// ============================================================================

/// Mittelt interleaved Kanäle zu Mono
pub fn downmix(samples: &[f32], channels: u16) -> Vec<f32> {
    match channels {
        0 | 1 => samples.to_vec(),
        n => samples
            .chunks(n as usize)
            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
            .collect(),
    }
}

/// Einfaches Linear-Resampling
pub fn resample_linear(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || from_rate == 0 || samples.is_empty() {
        return samples.to_vec();
    }

    let ratio = to_rate as f64 / from_rate as f64;
    let new_len = (samples.len() as f64 * ratio) as usize;
    (0..new_len)
        .map(|i| {
            let src_idx = i as f64 / ratio;
            let idx = src_idx as usize;
            let frac = (src_idx - idx as f64) as f32;
            let s1 = samples.get(idx).copied().unwrap_or(0.0);
            let s2 = samples.get(idx + 1).copied().unwrap_or(s1);
            s1 + (s2 - s1) * frac
        })
        .collect()
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    struct SupportOnly(Vec<AudioFormat>);

    struct TagEncoder(AudioFormat);

    impl ChunkEncoder for TagEncoder {
        fn encode(&mut self, _samples: &[f32], _rate: u32) -> Result<Vec<u8>, CodecError> {
            Ok(self.0.mime_type().as_bytes().to_vec())
        }
    }

    impl EncoderRegistry for SupportOnly {
        fn encoder_for(&self, format: AudioFormat) -> Option<Box<dyn ChunkEncoder>> {
            self.0
                .contains(&format)
                .then(|| Box::new(TagEncoder(format)) as Box<dyn ChunkEncoder>)
        }
    }

    #[test]
    fn test_negotiation_follows_priority_order() {
        let registry = SupportOnly(vec![AudioFormat::Wav, AudioFormat::Ogg, AudioFormat::Webm]);
        let (format, _) = negotiate(&registry).unwrap();
        assert_eq!(format, AudioFormat::Webm);

        let registry = SupportOnly(vec![AudioFormat::Wav, AudioFormat::Ogg]);
        let (format, mut encoder) = negotiate(&registry).unwrap();
        assert_eq!(format, AudioFormat::Ogg);
        assert_eq!(encoder.encode(&[0.0], 48000).unwrap(), b"audio/ogg");
    }

    #[test]
    fn test_negotiation_without_support() {
        assert!(negotiate(&SupportOnly(vec![])).is_none());
    }

    #[test]
    fn test_native_encoders_pick_wav() {
        let (format, _) = negotiate(&NativeEncoders).unwrap();
        assert_eq!(format, AudioFormat::Wav);
        assert_eq!(format.to_string(), "audio/wav");
    }

    #[test]
    fn test_wav_chunk_decodes_on_both_paths() {
        let samples: Vec<f32> = (0..1600).map(|i| ((i as f32) * 0.05).sin() * 0.5).collect();
        let chunk = WavEncoder.encode(&samples, 16000).unwrap();
        assert_eq!(&chunk[0..4], b"RIFF");

        let via_hound = decode_wav(&chunk).unwrap();
        assert_eq!(via_hound.sample_rate, 16000);
        assert_eq!(via_hound.channels, 1);
        assert_eq!(via_hound.frames(), 1600);
        assert_eq!(via_hound.duration(), std::time::Duration::from_millis(100));
        assert!((via_hound.samples[100] - samples[100]).abs() < 1e-3);

        let via_symphonia = decode_container(&chunk).unwrap();
        assert_eq!(via_symphonia.sample_rate, 16000);
        assert_eq!(via_symphonia.frames(), 1600);
    }

    #[test]
    fn test_garbage_fails_to_decode() {
        let garbage = vec![0x42u8; 256];
        assert!(decode_wav(&garbage).is_err());
        assert!(decode_container(&garbage).is_err());
    }

    #[test]
    fn test_opus_has_no_decoder() {
        use symphonia::core::codecs::{CODEC_TYPE_OPUS, CODEC_TYPE_PCM_S16LE, CODEC_TYPE_VORBIS};

        // Browser-Chunks sind meist Opus; dafür gibt es keinen Decoder
        let codecs = symphonia::default::get_codecs();
        assert!(codecs.get_codec(CODEC_TYPE_OPUS).is_none());
        assert!(codecs.get_codec(CODEC_TYPE_VORBIS).is_some());
        assert!(codecs.get_codec(CODEC_TYPE_PCM_S16LE).is_some());
    }

    #[test]
    fn test_downmix_and_resample() {
        let stereo = [1.0, 0.0, 0.5, 0.5];
        assert_eq!(downmix(&stereo, 2), vec![0.5, 0.5]);

        let up = resample_linear(&[0.0, 1.0], 24000, 48000);
        assert_eq!(up.len(), 4);
        assert_eq!(up[0], 0.0);
        assert!((up[1] - 0.5).abs() < 1e-6);

        let same = resample_linear(&[0.25; 10], 48000, 48000);
        assert_eq!(same.len(), 10);
    }
}
