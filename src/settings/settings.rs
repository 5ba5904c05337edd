// Settings management and persistence
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::audio::pcm::{PcmFormat, NARRATION_CHANNELS, NARRATION_SAMPLE_RATE};
use crate::audio::player::DEFAULT_COMPLETION_THRESHOLD;
use crate::narration::cache::{DEFAULT_EXPIRY_MS, DEFAULT_KEY_PREFIX};

/// Narration cache settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub expiry_ms: i64,
    pub max_bytes: usize,
    pub key_prefix: String,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            expiry_ms: DEFAULT_EXPIRY_MS,
            max_bytes: 16 * 1024 * 1024,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
        }
    }
}

/// Playback settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackSettings {
    pub sample_rate: u32,
    pub channels: u16,
    /// Progress fraction at which a natural end event finishes the narration
    pub completion_threshold: f64,
    pub frame_interval_ms: u64,
    pub volume: f32, // 0.0-1.0
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        Self {
            sample_rate: NARRATION_SAMPLE_RATE,
            channels: NARRATION_CHANNELS,
            completion_threshold: DEFAULT_COMPLETION_THRESHOLD,
            frame_interval_ms: 16,
            volume: 1.0,
        }
    }
}

impl PlaybackSettings {
    pub fn pcm_format(&self) -> PcmFormat {
        PcmFormat {
            sample_rate: self.sample_rate,
            channels: self.channels,
        }
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }
}

/// Main application settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NarrationSettings {
    pub version: i32, // Settings schema version for future migrations
    pub cache: CacheSettings,
    pub playback: PlaybackSettings,
}

impl Default for NarrationSettings {
    fn default() -> Self {
        Self {
            version: 1,
            cache: CacheSettings::default(),
            playback: PlaybackSettings::default(),
        }
    }
}

impl NarrationSettings {
    /// Get the settings file path
    pub fn get_settings_path(app_dir: &Path) -> PathBuf {
        app_dir.join("settings.json")
    }

    /// Load settings from file, or return defaults if file doesn't exist
    pub fn load(app_dir: &Path) -> Result<Self> {
        let path = Self::get_settings_path(app_dir);

        if !path.exists() {
            tracing::info!("[Settings] No settings file found, using defaults");
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read settings file {:?}", path))?;

        let mut settings: NarrationSettings =
            serde_json::from_str(&content).context("Failed to parse settings")?;
        settings.validate()?;

        tracing::info!("[Settings] Loaded settings from {:?}", path);
        Ok(settings)
    }

    /// Save settings to file
    pub fn save(&self, app_dir: &Path) -> Result<()> {
        // Ensure directory exists
        fs::create_dir_all(app_dir).context("Failed to create settings directory")?;

        let path = Self::get_settings_path(app_dir);
        let content = serde_json::to_string_pretty(self).context("Failed to serialize settings")?;

        fs::write(&path, content)
            .with_context(|| format!("Failed to write settings file {:?}", path))?;

        tracing::info!("[Settings] Saved settings to {:?}", path);
        Ok(())
    }

    /// Reject unusable values and pull the rest into range
    pub fn validate(&mut self) -> Result<()> {
        let playback = &mut self.playback;
        if playback.sample_rate == 0 {
            bail!("playback.sample_rate must be positive");
        }
        if playback.channels == 0 {
            bail!("playback.channels must be positive");
        }
        if self.cache.expiry_ms <= 0 {
            bail!("cache.expiry_ms must be positive");
        }

        if !(playback.completion_threshold > 0.0 && playback.completion_threshold <= 1.0) {
            tracing::warn!(
                "[Settings] completion_threshold {} out of range, clamping",
                playback.completion_threshold
            );
            playback.completion_threshold = if playback.completion_threshold > 1.0 {
                1.0
            } else {
                DEFAULT_COMPLETION_THRESHOLD
            };
        }
        playback.frame_interval_ms = playback.frame_interval_ms.max(1);
        playback.volume = playback.volume.clamp(0.0, 1.0);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("village-guide-settings-{}-{}", name, std::process::id()))
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let settings = NarrationSettings::load(&temp_dir("missing")).unwrap();
        assert_eq!(settings, NarrationSettings::default());
        assert_eq!(settings.cache.expiry_ms, 259_200_000);
        assert_eq!(settings.cache.key_prefix, "narration_cache_");
    }

    #[test]
    fn test_save_then_load() {
        let dir = temp_dir("roundtrip");
        let mut settings = NarrationSettings::default();
        settings.playback.completion_threshold = 0.95;
        settings.cache.max_bytes = 1024;
        settings.save(&dir).unwrap();

        assert_eq!(NarrationSettings::load(&dir).unwrap(), settings);
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = temp_dir("partial");
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            NarrationSettings::get_settings_path(&dir),
            r#"{"playback":{"completion_threshold":4.0}}"#,
        )
        .unwrap();

        let settings = NarrationSettings::load(&dir).unwrap();
        assert_eq!(settings.playback.completion_threshold, 1.0);
        assert_eq!(settings.playback.sample_rate, 24_000);
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_validate_rejects_zero_rate() {
        let mut settings = NarrationSettings::default();
        settings.playback.sample_rate = 0;
        assert!(settings.validate().is_err());

        let mut settings = NarrationSettings::default();
        settings.playback.completion_threshold = 0.0;
        settings.validate().unwrap();
        assert_eq!(settings.playback.completion_threshold, DEFAULT_COMPLETION_THRESHOLD);
    }
}
