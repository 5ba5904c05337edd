// Audio decoder using Symphonia
// Decodes container-encoded narration (WAV/MP3/FLAC/OGG) held in memory

use rubato::{FftFixedIn, Resampler};
use symphonia::core::audio::{AudioBufferRef, AudioPlanes, Signal};
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::sample::Sample;
use std::io::Cursor;

use super::pcm::DecodedAudio;
use crate::error::AudioDecodeError;

/// Frames fed to the resampler per chunk
const RESAMPLE_CHUNK: usize = 1024;

/// Container formats recognised by their leading bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerKind {
    Wav,
    Mp3,
    Flac,
    Ogg,
}

impl ContainerKind {
    /// Detect a container from its signature. Headerless PCM yields `None`.
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WAVE" {
            return Some(ContainerKind::Wav);
        }
        if bytes.starts_with(b"ID3") {
            return Some(ContainerKind::Mp3);
        }
        if bytes.starts_with(b"fLaC") {
            return Some(ContainerKind::Flac);
        }
        if bytes.starts_with(b"OggS") {
            return Some(ContainerKind::Ogg);
        }
        // MPEG audio frame sync: 11 set bits, layer III
        if bytes.len() >= 2 && bytes[0] == 0xFF && (bytes[1] & 0xE6) == 0xE2 {
            return Some(ContainerKind::Mp3);
        }
        None
    }

    fn extension(self) -> &'static str {
        match self {
            ContainerKind::Wav => "wav",
            ContainerKind::Mp3 => "mp3",
            ContainerKind::Flac => "flac",
            ContainerKind::Ogg => "ogg",
        }
    }
}

pub struct AudioDecoder {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    sample_rate: u32,
    channels: usize,
}

impl AudioDecoder {
    /// Probe an in-memory payload and prepare for decoding
    pub fn from_bytes(bytes: Vec<u8>, kind: ContainerKind) -> Result<Self, AudioDecodeError> {
        let mss = MediaSourceStream::new(Box::new(Cursor::new(bytes)), Default::default());

        let mut hint = Hint::new();
        hint.with_extension(kind.extension());

        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
            .map_err(|e| AudioDecodeError::Container(format!("failed to probe format: {}", e)))?;

        let format = probed.format;

        // Find the first audio track
        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| AudioDecodeError::Container("no audio track found".to_string()))?;

        let track_id = track.id;
        let sample_rate = track
            .codec_params
            .sample_rate
            .ok_or_else(|| AudioDecodeError::Container("unknown sample rate".to_string()))?;
        let channels = track.codec_params.channels.map(|c| c.count()).unwrap_or(1);

        let decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| AudioDecodeError::Container(format!("failed to create decoder: {}", e)))?;

        Ok(Self {
            format,
            decoder,
            track_id,
            sample_rate,
            channels,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Decode next packet, returns interleaved f32 samples
    /// Returns None when end of stream is reached
    pub fn decode_next(&mut self) -> Result<Option<Vec<f32>>, AudioDecodeError> {
        loop {
            let packet = match self.format.next_packet() {
                Ok(p) => p,
                Err(SymphoniaError::IoError(ref e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    return Ok(None);
                }
                Err(SymphoniaError::ResetRequired) => {
                    self.decoder.reset();
                    continue;
                }
                Err(e) => {
                    return Err(AudioDecodeError::Container(format!("failed to read packet: {}", e)))
                }
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            match self.decoder.decode(&packet) {
                Ok(decoded) => {
                    return Ok(Some(Self::audio_buf_to_f32(&decoded)));
                }
                Err(SymphoniaError::DecodeError(e)) => {
                    tracing::warn!("[Audio] Skipping undecodable packet: {}", e);
                    continue;
                }
                Err(e) => return Err(AudioDecodeError::Container(format!("decode failed: {}", e))),
            }
        }
    }

    /// Decode the whole stream into mono samples at the source rate
    pub fn decode_mono(&mut self) -> Result<Vec<f32>, AudioDecodeError> {
        let channels = self.channels.max(1);
        let mut mono = Vec::new();

        while let Some(interleaved) = self.decode_next()? {
            mono.extend(
                interleaved
                    .chunks_exact(channels)
                    .map(|frame| frame.iter().sum::<f32>() / channels as f32),
            );
        }

        Ok(mono)
    }

    /// Convert any AudioBufferRef to interleaved f32 samples
    fn audio_buf_to_f32(buf: &AudioBufferRef) -> Vec<f32> {
        match buf {
            AudioBufferRef::F32(b) => Self::interleave(b.planes(), b.frames(), |s: f32| s),
            AudioBufferRef::F64(b) => Self::interleave(b.planes(), b.frames(), |s: f64| s as f32),
            AudioBufferRef::S8(b) => {
                Self::interleave(b.planes(), b.frames(), |s: i8| s as f32 / 128.0)
            }
            AudioBufferRef::S16(b) => {
                Self::interleave(b.planes(), b.frames(), |s: i16| s as f32 / 32768.0)
            }
            AudioBufferRef::S24(b) => {
                Self::interleave(b.planes(), b.frames(), |s| s.inner() as f32 / 8388608.0)
            }
            AudioBufferRef::S32(b) => {
                Self::interleave(b.planes(), b.frames(), |s: i32| s as f32 / 2147483648.0)
            }
            AudioBufferRef::U8(b) => {
                Self::interleave(b.planes(), b.frames(), |s: u8| (s as f32 - 128.0) / 128.0)
            }
            AudioBufferRef::U16(b) => {
                Self::interleave(b.planes(), b.frames(), |s: u16| (s as f32 - 32768.0) / 32768.0)
            }
            AudioBufferRef::U24(b) => Self::interleave(b.planes(), b.frames(), |s| {
                (s.inner() as f32 - 8388608.0) / 8388608.0
            }),
            AudioBufferRef::U32(b) => Self::interleave(b.planes(), b.frames(), |s: u32| {
                ((s as f64 - 2147483648.0) / 2147483648.0) as f32
            }),
        }
    }

    fn interleave<T: Sample + Copy, F: Fn(T) -> f32>(
        planes: AudioPlanes<T>,
        frames: usize,
        convert: F,
    ) -> Vec<f32> {
        let num_channels = planes.planes().len();
        if num_channels == 0 || frames == 0 {
            return vec![];
        }

        let mut interleaved = Vec::with_capacity(frames * num_channels);

        for frame in 0..frames {
            for ch in 0..num_channels {
                interleaved.push(convert(planes.planes()[ch][frame]));
            }
        }

        interleaved
    }
}

/// Decode a container payload into mono audio at `target_rate`
pub fn decode_container(
    bytes: &[u8],
    kind: ContainerKind,
    target_rate: u32,
) -> Result<DecodedAudio, AudioDecodeError> {
    let mut decoder = AudioDecoder::from_bytes(bytes.to_vec(), kind)?;
    let source_rate = decoder.sample_rate();
    let mono = decoder.decode_mono()?;

    if mono.is_empty() {
        return Err(AudioDecodeError::Empty);
    }

    let samples = resample_mono(&mono, source_rate, target_rate)?;
    Ok(DecodedAudio::new(samples, target_rate))
}

/// Resample a mono signal. Equal rates pass through untouched.
pub fn resample_mono(input: &[f32], from: u32, to: u32) -> Result<Vec<f32>, AudioDecodeError> {
    if from == to || input.is_empty() {
        return Ok(input.to_vec());
    }
    if from == 0 || to == 0 {
        return Err(AudioDecodeError::Resample(format!("{} Hz -> {} Hz", from, to)));
    }

    let mut resampler = FftFixedIn::<f32>::new(from as usize, to as usize, RESAMPLE_CHUNK, 2, 1)
        .map_err(|e| AudioDecodeError::Resample(e.to_string()))?;

    let expected = (input.len() as f64 * to as f64 / from as f64).round() as usize;
    let mut output = Vec::with_capacity(expected + RESAMPLE_CHUNK);
    let mut pos = 0;

    while input.len() - pos >= resampler.input_frames_next() {
        let needed = resampler.input_frames_next();
        let chunk = &input[pos..pos + needed];
        let out = resampler
            .process(&[chunk], None)
            .map_err(|e| AudioDecodeError::Resample(e.to_string()))?;
        output.extend_from_slice(&out[0]);
        pos += needed;
    }

    if pos < input.len() {
        let tail = &input[pos..];
        let out = resampler
            .process_partial(Some(&[tail][..]), None)
            .map_err(|e| AudioDecodeError::Resample(e.to_string()))?;
        output.extend_from_slice(&out[0]);
    }

    // Flush what is still held back by the filter delay
    let flushed = resampler
        .process_partial(None::<&[&[f32]]>, None)
        .map_err(|e| AudioDecodeError::Resample(e.to_string()))?;
    output.extend_from_slice(&flushed[0]);

    // Skip the resampler's group delay so playback starts on time
    let delay = resampler.output_delay().min(output.len());
    output.drain(..delay);
    output.truncate(expected);

    Ok(output)
}
