// Narration audio buffers
// Turns the backend's base64 payload into mono f32 PCM ready for playback

use base64::{engine::general_purpose, Engine as _};
use std::sync::Arc;

use super::context::{AudioContext, AudioContextManager};
use super::decoder::{self, ContainerKind};
use crate::error::{AudioDecodeError, DecodeError, NarrationAudioError};

/// Sample rate of narration audio produced by the speech backend
pub const NARRATION_SAMPLE_RATE: u32 = 24_000;

/// Narration audio is always mono
pub const NARRATION_CHANNELS: u16 = 1;

/// Layout of headerless PCM handed over by the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcmFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl PcmFormat {
    /// Bytes per s16le frame across all channels
    pub fn frame_bytes(&self) -> usize {
        2 * self.channels.max(1) as usize
    }
}

impl Default for PcmFormat {
    fn default() -> Self {
        Self {
            sample_rate: NARRATION_SAMPLE_RATE,
            channels: NARRATION_CHANNELS,
        }
    }
}

/// Decoded, immutable mono audio
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    samples: Vec<f32>,
    sample_rate: u32,
}

impl DecodedAudio {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        NARRATION_CHANNELS
    }

    /// Number of sample frames
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Duration in seconds
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }

    /// Index of the frame playing at `seconds`, clamped to the buffer
    pub fn frame_at(&self, seconds: f64) -> usize {
        let frame = (seconds.max(0.0) * self.sample_rate as f64).floor() as usize;
        frame.min(self.samples.len())
    }
}

/// Decode a base64 string into raw bytes
///
/// An empty string is a valid zero-length payload. Line breaks and other
/// ASCII whitespace inside the payload are ignored.
pub fn decode_base64(input: &str) -> Result<Vec<u8>, DecodeError> {
    if input.bytes().any(|b| b.is_ascii_whitespace()) {
        let compact: String = input.chars().filter(|c| !c.is_ascii_whitespace()).collect();
        return Ok(general_purpose::STANDARD.decode(compact)?);
    }
    Ok(general_purpose::STANDARD.decode(input)?)
}

/// Interpret bytes as little-endian signed 16-bit PCM, down-mixed to mono
pub fn decode_pcm_s16le(bytes: &[u8], format: PcmFormat) -> Result<DecodedAudio, AudioDecodeError> {
    if bytes.is_empty() {
        return Err(AudioDecodeError::Empty);
    }
    if format.sample_rate == 0 || format.channels == 0 {
        return Err(AudioDecodeError::Layout(format!(
            "{} Hz, {} channels",
            format.sample_rate, format.channels
        )));
    }

    let channels = format.channels as usize;
    let frame_bytes = format.frame_bytes();
    if bytes.len() % frame_bytes != 0 {
        return Err(AudioDecodeError::PartialFrame {
            len: bytes.len(),
            frame_bytes,
        });
    }

    let scale = 1.0 / 32768.0;
    let samples = bytes
        .chunks_exact(frame_bytes)
        .map(|frame| {
            let sum: f32 = frame
                .chunks_exact(2)
                .map(|s| i16::from_le_bytes([s[0], s[1]]) as f32 * scale)
                .sum();
            sum / channels as f32
        })
        .collect();

    Ok(DecodedAudio::new(samples, format.sample_rate))
}

/// Builds playable buffers against the shared audio output
pub struct AudioBufferBuilder {
    contexts: Arc<AudioContextManager>,
    format: PcmFormat,
}

impl AudioBufferBuilder {
    pub fn new(contexts: Arc<AudioContextManager>, format: PcmFormat) -> Self {
        Self { contexts, format }
    }

    pub fn format(&self) -> PcmFormat {
        self.format
    }

    /// Acquire (and resume) the audio output, then decode the payload
    pub fn build(
        &self,
        bytes: &[u8],
    ) -> Result<(Arc<dyn AudioContext>, DecodedAudio), NarrationAudioError> {
        let context = self.contexts.acquire()?;
        let audio = self.decode(bytes)?;
        tracing::debug!(
            "[Audio] Built narration buffer: {:.2}s at {} Hz",
            audio.duration(),
            audio.sample_rate()
        );
        Ok((context, audio))
    }

    /// Same as [`build`](Self::build), starting from the backend's base64 text
    pub fn build_from_base64(
        &self,
        audio_base64: &str,
    ) -> Result<(Arc<dyn AudioContext>, DecodedAudio), NarrationAudioError> {
        let bytes = decode_base64(audio_base64)?;
        self.build(&bytes)
    }

    /// Decode bytes without touching the audio output.
    ///
    /// Raw PCM whose first samples happen to look like a container signature
    /// is still accepted: a failed container decode falls back to PCM when the
    /// length is a whole number of frames.
    pub fn decode(&self, bytes: &[u8]) -> Result<DecodedAudio, AudioDecodeError> {
        let Some(kind) = ContainerKind::sniff(bytes) else {
            return decode_pcm_s16le(bytes, self.format);
        };

        match decoder::decode_container(bytes, kind, self.format.sample_rate) {
            Ok(audio) => Ok(audio),
            Err(e) if bytes.len() % self.format.frame_bytes() == 0 => {
                tracing::debug!("[Audio] Not a {:?} payload ({}), reading as raw PCM", kind, e);
                decode_pcm_s16le(bytes, self.format)
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::context::testing::FakeContext;
    use crate::error::PlaybackError;

    fn pcm_bytes(samples: &[i16]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    #[test]
    fn test_empty_base64_is_empty_payload() {
        assert_eq!(decode_base64("").unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn test_base64_round_trip() {
        for original in ["", "AA==", "AAE=", "AAEC", "aGVsbG8gd29ybGQ=", "/+8A"] {
            let bytes = decode_base64(original).unwrap();
            assert_eq!(general_purpose::STANDARD.encode(bytes), original);
        }
    }

    #[test]
    fn test_base64_ignores_line_breaks() {
        assert_eq!(decode_base64("aGVs\nbG8=\r\n").unwrap(), b"hello");
    }

    #[test]
    fn test_invalid_base64_fails() {
        assert!(decode_base64("not base64!").is_err());
        assert!(decode_base64("abc").is_err());
    }

    #[test]
    fn test_pcm_scaling_and_duration() {
        let bytes = pcm_bytes(&[0, 16384, -32768, 32767]);
        let audio = decode_pcm_s16le(&bytes, PcmFormat::default()).unwrap();

        assert_eq!(audio.len(), 4);
        assert_eq!(audio.samples()[0], 0.0);
        assert!((audio.samples()[1] - 0.5).abs() < 1e-6);
        assert_eq!(audio.samples()[2], -1.0);
        assert!((audio.duration() - 4.0 / 24_000.0).abs() < 1e-12);
    }

    #[test]
    fn test_one_second_of_pcm() {
        let bytes = pcm_bytes(&vec![100i16; 24_000]);
        let audio = decode_pcm_s16le(&bytes, PcmFormat::default()).unwrap();
        assert!((audio.duration() - 1.0).abs() < 1e-9);
        assert_eq!(audio.frame_at(0.5), 12_000);
        assert_eq!(audio.frame_at(5.0), 24_000);
    }

    #[test]
    fn test_stereo_pcm_is_downmixed() {
        let format = PcmFormat {
            sample_rate: 24_000,
            channels: 2,
        };
        let bytes = pcm_bytes(&[16384, 0, -16384, -16384]);
        let audio = decode_pcm_s16le(&bytes, format).unwrap();

        assert_eq!(audio.len(), 2);
        assert!((audio.samples()[0] - 0.25).abs() < 1e-6);
        assert!((audio.samples()[1] + 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_malformed_pcm_is_rejected() {
        assert_eq!(
            decode_pcm_s16le(&[], PcmFormat::default()),
            Err(AudioDecodeError::Empty)
        );
        assert_eq!(
            decode_pcm_s16le(&[1, 2, 3], PcmFormat::default()),
            Err(AudioDecodeError::PartialFrame {
                len: 3,
                frame_bytes: 2
            })
        );
    }

    #[test]
    fn test_pcm_resembling_mpeg_sync_still_decodes() {
        // -1025 is 0xFBFF, stored as FF FB: an MPEG layer III frame header
        let mut samples = vec![200i16; 24_000];
        samples[0] = -1025;
        let bytes = pcm_bytes(&samples);
        assert_eq!(&bytes[..2], &[0xFF, 0xFB]);
        assert!(ContainerKind::sniff(&bytes).is_some());

        let manager = Arc::new(AudioContextManager::with_factory(|| {
            Ok(FakeContext::new() as Arc<dyn AudioContext>)
        }));
        let builder = AudioBufferBuilder::new(manager, PcmFormat::default());
        let audio = builder.decode(&bytes).unwrap();

        assert_eq!(audio.len(), 24_000);
        assert!((audio.samples()[0] + 1025.0 / 32768.0).abs() < 1e-6);
    }

    #[test]
    fn test_pcm_starting_with_riff_still_decodes() {
        let mut bytes = b"RIFF\0\0\0\0WAVE".to_vec();
        bytes.resize(4_800, 0);

        let manager = Arc::new(AudioContextManager::with_factory(|| {
            Ok(FakeContext::new() as Arc<dyn AudioContext>)
        }));
        let builder = AudioBufferBuilder::new(manager, PcmFormat::default());
        assert_eq!(builder.decode(&bytes).unwrap().len(), 2_400);
    }

    #[test]
    fn test_builder_resumes_suspended_context() {
        let fake = FakeContext::new();
        fake.suspend().unwrap();
        let manager = Arc::new(AudioContextManager::with_factory({
            let fake = fake.clone();
            move || Ok(fake.clone() as Arc<dyn AudioContext>)
        }));
        let builder = AudioBufferBuilder::new(manager, PcmFormat::default());

        let (_, audio) = builder.build(&pcm_bytes(&[1, 2, 3, 4])).unwrap();
        assert_eq!(audio.len(), 4);
        assert_eq!(fake.resume_calls(), 1);
    }

    #[test]
    fn test_builder_reports_context_failure() {
        let manager = Arc::new(AudioContextManager::with_factory(|| {
            Err(PlaybackError::ContextUnavailable("no device".into()))
        }));
        let builder = AudioBufferBuilder::new(manager, PcmFormat::default());

        let Err(err) = builder.build_from_base64("AAEC") else {
            panic!("build succeeded without an audio output");
        };
        assert_eq!(err.user_notice(), "cannot play audio");
    }

    #[test]
    fn test_builder_reports_bad_base64() {
        let manager = Arc::new(AudioContextManager::with_factory(|| {
            Ok(FakeContext::new() as Arc<dyn AudioContext>)
        }));
        let builder = AudioBufferBuilder::new(manager, PcmFormat::default());

        let Err(err) = builder.build_from_base64("%%%") else {
            panic!("build accepted invalid base64");
        };
        assert!(matches!(err, NarrationAudioError::Decode(_)));
        assert_eq!(err.user_notice(), "narration unavailable");
    }
}
