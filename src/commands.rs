// Command handlers exposed to the UI
// Each returns the narration view (or data) on success and a display string on failure

use crate::narration::models::{CacheStats, NarrationView};
use crate::settings::NarrationSettings;
use crate::state::AppState;

pub async fn load_narration(location_key: String, state: &AppState) -> Result<NarrationView, String> {
    let key = location_key.trim();
    if key.is_empty() {
        return Err("Location key must not be empty".to_string());
    }
    Ok(state.session.load(key).await)
}

pub fn toggle_playback(state: &AppState) -> Result<NarrationView, String> {
    Ok(state.session.toggle_playback())
}

pub fn seek_narration(seconds: f64, state: &AppState) -> Result<NarrationView, String> {
    if !seconds.is_finite() {
        return Err(format!("Invalid seek position: {}", seconds));
    }
    Ok(state.session.seek(seconds))
}

pub fn teardown(state: &AppState) -> Result<NarrationView, String> {
    Ok(state.session.teardown())
}

pub fn get_narration_state(state: &AppState) -> Result<NarrationView, String> {
    Ok(state.session.view())
}

// ===== Cache Management Commands =====

pub fn get_cache_stats(state: &AppState) -> Result<CacheStats, String> {
    Ok(state.session.cache().stats())
}

pub fn clean_expired_cache(state: &AppState) -> Result<usize, String> {
    Ok(state.session.cache().clean_expired())
}

pub fn clear_narration_cache(state: &AppState) -> Result<usize, String> {
    Ok(state.session.cache().clear())
}

// ===== Settings Commands =====

pub fn get_settings(state: &AppState) -> Result<NarrationSettings, String> {
    Ok(state.settings.clone())
}

/// Persist the settings in effect to `settings.json` in the app directory
pub fn save_settings(state: &AppState) -> Result<(), String> {
    state
        .settings
        .save(&state.app_dir)
        .map_err(|e| format!("Failed to save settings: {:#}", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::context::testing::FakeContext;
    use crate::audio::context::{AudioContext, AudioContextManager};
    use crate::db::connection::DatabaseConnection;
    use crate::narration::fetcher::LocalNarrationFetcher;
    use crate::narration::models::LoadStatus;
    use base64::{engine::general_purpose, Engine as _};
    use std::path::PathBuf;
    use std::sync::Arc;

    fn state_for(name: &str) -> (AppState, PathBuf) {
        let dir = std::env::temp_dir().join(format!("village-guide-cmd-{}-{}", name, std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let audio = general_purpose::STANDARD.encode(vec![0u8; 4_800]);
        std::fs::write(
            dir.join("temple.json"),
            format!(r#"{{"text":"Earth god temple","audioBase64":"{}"}}"#, audio),
        )
        .unwrap();

        let fake = FakeContext::new();
        let contexts = Arc::new(AudioContextManager::with_factory(move || {
            Ok(fake.clone() as Arc<dyn AudioContext>)
        }));
        let state = AppState::new(
            NarrationSettings::default(),
            DatabaseConnection::in_memory().unwrap(),
            Arc::new(LocalNarrationFetcher::new(&dir)),
            contexts,
            dir.clone(),
        );
        (state, dir)
    }

    #[tokio::test]
    async fn test_load_play_and_cache_stats() {
        let (state, dir) = state_for("load");

        let view = load_narration(" temple ".to_string(), &state).await.unwrap();
        assert_eq!(view.status, LoadStatus::Ready);
        assert_eq!(view.location_key.as_deref(), Some("temple"));
        assert_eq!(view.progress_fraction, Some(0.0));

        assert!(toggle_playback(&state).unwrap().is_playing);
        assert!(!teardown(&state).unwrap().is_playing);
        assert_eq!(get_narration_state(&state).unwrap().status, LoadStatus::Idle);

        assert_eq!(get_cache_stats(&state).unwrap().total, 1);
        assert_eq!(clean_expired_cache(&state).unwrap(), 0);
        assert_eq!(clear_narration_cache(&state).unwrap(), 1);
        assert_eq!(get_cache_stats(&state).unwrap().total, 0);

        state.shutdown();
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_save_settings_writes_app_dir() {
        let (state, dir) = state_for("settings");

        save_settings(&state).unwrap();
        let loaded = NarrationSettings::load(&dir).unwrap();
        assert_eq!(loaded, get_settings(&state).unwrap());
        assert!(NarrationSettings::get_settings_path(&dir).exists());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_rejects_bad_arguments() {
        let (state, dir) = state_for("args");

        assert!(load_narration("  ".to_string(), &state).await.is_err());
        assert!(seek_narration(f64::NAN, &state).is_err());

        let missing = load_narration("harbour".to_string(), &state).await.unwrap();
        assert_eq!(missing.status, LoadStatus::Error);

        std::fs::remove_dir_all(&dir).ok();
    }
}
