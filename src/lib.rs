// Village Guide - narration playback core
// Module declarations
pub mod audio;
pub mod commands;
pub mod db;
pub mod error;
pub mod narration;
pub mod settings;
pub mod state;

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use audio::context::{AudioContext, AudioContextManager};
use audio::output::CpalContext;
use db::connection::DatabaseConnection;
use narration::fetcher::LocalNarrationFetcher;
use settings::NarrationSettings;
use state::AppState;

/// Install the log subscriber. `RUST_LOG` overrides the default filter.
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "village_guide=info,village_guide_lib=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Per-user data directory holding settings and the cache database
pub fn app_data_dir() -> Result<PathBuf> {
    let base = dirs::data_dir().context("Failed to get app data directory")?;
    Ok(base.join("village-guide"))
}

/// Audio output manager opening the default device on first use
pub fn default_audio_contexts(volume: f32) -> AudioContextManager {
    AudioContextManager::with_factory(move || {
        let context = CpalContext::new()?;
        context.set_volume(volume);
        Ok(context as Arc<dyn AudioContext>)
    })
}

/// Load settings, open the cache database and wire up the narration session
pub fn build_state(app_dir: PathBuf, narration_dir: PathBuf) -> Result<AppState> {
    std::fs::create_dir_all(&app_dir)
        .with_context(|| format!("Failed to create app directory {:?}", app_dir))?;

    let settings = NarrationSettings::load(&app_dir)?;
    let db = DatabaseConnection::new(app_dir.join("narration.db"))
        .context("Failed to initialize database")?;
    let contexts = Arc::new(default_audio_contexts(settings.playback.volume));
    let fetcher = Arc::new(LocalNarrationFetcher::new(narration_dir));

    Ok(AppState::new(settings, db, fetcher, contexts, app_dir))
}
