use serde::{Deserialize, Serialize};

/// Text and audio describing one location
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NarrationResult {
    pub text: String,
    /// Base64 encoded audio, empty when the backend produced text only
    #[serde(default, alias = "audio_base_64")]
    pub audio_base64: String,
}

impl NarrationResult {
    pub fn new(text: impl Into<String>, audio_base64: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            audio_base64: audio_base64.into(),
        }
    }

    pub fn has_audio(&self) -> bool {
        !self.audio_base64.trim().is_empty()
    }
}

/// Persisted cache record: `{ "timestamp": ms, "data": { .. } }`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub timestamp: i64,
    pub data: NarrationResult,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadStatus {
    Idle,
    Loading,
    Ready,
    Error,
}

/// What the UI renders for the active narration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NarrationView {
    pub location_key: Option<String>,
    pub status: LoadStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress_fraction: Option<f64>,
    pub is_playing: bool,
    pub audio_available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notice: Option<String>,
}

impl NarrationView {
    pub fn idle() -> Self {
        Self {
            location_key: None,
            status: LoadStatus::Idle,
            text: None,
            progress_fraction: None,
            is_playing: false,
            audio_available: false,
            notice: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CacheStats {
    pub total: usize,
    pub size: usize,
}
