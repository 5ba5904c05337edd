// Error types for the narration pipeline
// Every variant is recoverable: the session turns them into a status or notice

use thiserror::Error;

/// Narration audio payload is not valid base64
#[derive(Debug, Error)]
#[error("invalid base64 narration audio: {0}")]
pub struct DecodeError(#[from] base64::DecodeError);

/// Raw bytes could not be turned into playable PCM
#[derive(Debug, Error, Clone, PartialEq)]
pub enum AudioDecodeError {
    #[error("audio payload is empty")]
    Empty,

    #[error("{len} bytes is not a whole number of {frame_bytes}-byte PCM frames")]
    PartialFrame { len: usize, frame_bytes: usize },

    #[error("unsupported PCM layout: {0}")]
    Layout(String),

    #[error("container decode failed: {0}")]
    Container(String),

    #[error("resampling failed: {0}")]
    Resample(String),
}

/// The narration backend failed; no partial result is ever returned
#[derive(Debug, Error, Clone, PartialEq)]
#[error("narration fetch failed: {0}")]
pub struct FetchError(pub String);

impl FetchError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// A cache write was rejected; callers log it and carry on
#[derive(Debug, Error)]
pub enum CacheWriteError {
    #[error("storage quota exceeded: {needed} bytes needed, {limit} allowed")]
    QuotaExceeded { needed: usize, limit: usize },

    #[error("failed to serialize cache entry: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("storage backend error: {0}")]
    Storage(String),
}

/// Audio output could not be created, resumed or driven
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PlaybackError {
    #[error("audio output unavailable: {0}")]
    ContextUnavailable(String),

    #[error("failed to resume audio output: {0}")]
    ResumeFailed(String),

    #[error("audio output is closed")]
    ContextClosed,

    #[error("source node already stopped")]
    AlreadyStopped,

    #[error("failed to start source node: {0}")]
    StartFailed(String),
}

/// Failure while priming narration audio for playback
#[derive(Debug, Error)]
pub enum NarrationAudioError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Audio(#[from] AudioDecodeError),

    #[error(transparent)]
    Playback(#[from] PlaybackError),
}

impl NarrationAudioError {
    /// Message shown next to the narration text
    pub fn user_notice(&self) -> &'static str {
        match self {
            NarrationAudioError::Decode(_) | NarrationAudioError::Audio(_) => {
                "narration unavailable"
            }
            NarrationAudioError::Playback(_) => "cannot play audio",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_notice_by_kind() {
        let decode = NarrationAudioError::from(AudioDecodeError::Empty);
        assert_eq!(decode.user_notice(), "narration unavailable");

        let playback = NarrationAudioError::from(PlaybackError::ContextClosed);
        assert_eq!(playback.user_notice(), "cannot play audio");
    }

    #[test]
    fn test_quota_message() {
        let err = CacheWriteError::QuotaExceeded { needed: 10, limit: 5 };
        assert_eq!(
            err.to_string(),
            "storage quota exceeded: 10 bytes needed, 5 allowed"
        );
    }
}
