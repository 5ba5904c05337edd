// Application state management
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::audio::context::AudioContextManager;
use crate::audio::pcm::AudioBufferBuilder;
use crate::audio::scheduler::spawn_frame_loop;
use crate::db::connection::DatabaseConnection;
use crate::db::store::SqliteStore;
use crate::narration::cache::{NarrationCache, SystemClock};
use crate::narration::fetcher::NarrationFetcher;
use crate::narration::session::NarrationSession;
use crate::settings::NarrationSettings;

pub struct AppState {
    pub session: Arc<NarrationSession>,
    pub contexts: Arc<AudioContextManager>,
    pub settings: NarrationSettings,
    pub app_dir: PathBuf,
}

impl AppState {
    pub fn new(
        settings: NarrationSettings,
        db: DatabaseConnection,
        fetcher: Arc<dyn NarrationFetcher>,
        contexts: Arc<AudioContextManager>,
        app_dir: PathBuf,
    ) -> Self {
        let store = Arc::new(SqliteStore::new(db, Some(settings.cache.max_bytes)));
        let cache = Arc::new(NarrationCache::with_options(
            store,
            Arc::new(SystemClock),
            settings.cache.expiry_ms,
            settings.cache.key_prefix.clone(),
        ));
        let builder = AudioBufferBuilder::new(contexts.clone(), settings.playback.pcm_format());
        let session = Arc::new(NarrationSession::new(
            fetcher,
            cache,
            builder,
            settings.playback.completion_threshold,
        ));

        Self {
            session,
            contexts,
            settings,
            app_dir,
        }
    }

    /// Drive progress ticks at the configured frame interval
    pub fn start_frame_loop(&self) -> JoinHandle<()> {
        let session = self.session.clone();
        spawn_frame_loop(self.settings.playback.frame_interval(), move || session.on_frame())
    }

    /// Silence the active narration and release the audio output
    pub fn shutdown(&self) {
        self.session.teardown();
        self.contexts.close();
    }
}
