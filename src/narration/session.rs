// Narration session
// Cache -> fetch -> write-through -> audio priming for one active location at a time

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::OnceCell;

use super::cache::NarrationCache;
use super::fetcher::NarrationFetcher;
use super::models::{LoadStatus, NarrationResult, NarrationView};
use crate::audio::pcm::AudioBufferBuilder;
use crate::audio::player::{PlaybackController, PlayerPhase};
use crate::error::{FetchError, NarrationAudioError, PlaybackError};

const FETCH_FAILED_NOTICE: &str = "narration failed to load, tap to retry";

type SharedFetch = Arc<OnceCell<Result<NarrationResult, FetchError>>>;

struct ActiveSession {
    /// Bumped on every load and teardown; results from older generations are dropped
    generation: u64,
    location_key: Option<String>,
    status: LoadStatus,
    narration: Option<NarrationResult>,
    notice: Option<String>,
    /// Audio could not be primed because the output failed; retried on toggle
    retry_audio: bool,
    controller: PlaybackController,
}

impl ActiveSession {
    fn reset(&mut self, location_key: Option<String>, status: LoadStatus) -> u64 {
        self.controller.teardown();
        self.generation += 1;
        self.location_key = location_key;
        self.status = status;
        self.narration = None;
        self.notice = None;
        self.retry_audio = false;
        self.generation
    }

    fn view(&self) -> NarrationView {
        let audio_available = self.controller.has_audio();
        let progress_fraction = match self.controller.phase() {
            PlayerPhase::Completed => Some(1.0),
            _ if audio_available => Some(self.controller.progress().min(1.0)),
            _ => None,
        };

        NarrationView {
            location_key: self.location_key.clone(),
            status: self.status,
            text: self.narration.as_ref().map(|n| n.text.clone()),
            progress_fraction,
            is_playing: self.controller.is_playing(),
            audio_available,
            notice: self.notice.clone(),
        }
    }
}

pub struct NarrationSession {
    fetcher: Arc<dyn NarrationFetcher>,
    cache: Arc<NarrationCache>,
    builder: AudioBufferBuilder,
    inflight: Mutex<HashMap<String, SharedFetch>>,
    active: Mutex<ActiveSession>,
}

impl NarrationSession {
    pub fn new(
        fetcher: Arc<dyn NarrationFetcher>,
        cache: Arc<NarrationCache>,
        builder: AudioBufferBuilder,
        completion_threshold: f64,
    ) -> Self {
        Self {
            fetcher,
            cache,
            builder,
            inflight: Mutex::new(HashMap::new()),
            active: Mutex::new(ActiveSession {
                generation: 0,
                location_key: None,
                status: LoadStatus::Idle,
                narration: None,
                notice: None,
                retry_audio: false,
                controller: PlaybackController::new(completion_threshold),
            }),
        }
    }

    pub fn cache(&self) -> &Arc<NarrationCache> {
        &self.cache
    }

    /// Load the narration for `location_key`, replacing the active one.
    ///
    /// The previous narration is silenced before anything else happens. If
    /// another load or a teardown starts while this one waits on the backend,
    /// its result is discarded and the newer session's view is returned.
    pub async fn load(&self, location_key: &str) -> NarrationView {
        let generation = self
            .active
            .lock()
            .reset(Some(location_key.to_string()), LoadStatus::Loading);
        tracing::info!("[Session] Loading narration for {}", location_key);

        let fetched = match self.cache.get(location_key) {
            Some(cached) => {
                tracing::debug!("[Session] Cache hit for {}", location_key);
                Ok(cached)
            }
            None => self.fetch_shared(location_key).await,
        };

        if self.active.lock().generation != generation {
            return self.stale(location_key);
        }

        let narration = match fetched {
            Ok(narration) => narration,
            Err(e) => {
                tracing::error!("[Session] Failed to load {}: {}", location_key, e);
                let mut active = self.active.lock();
                active.status = LoadStatus::Error;
                active.notice = Some(FETCH_FAILED_NOTICE.to_string());
                return active.view();
            }
        };

        let primed = if narration.has_audio() {
            Some(self.builder.build_from_base64(&narration.audio_base64))
        } else {
            None
        };

        let mut active = self.active.lock();
        if active.generation != generation {
            drop(active);
            return self.stale(location_key);
        }

        match primed {
            Some(Ok((context, audio))) => active.controller.prepare(context, audio),
            Some(Err(e)) => {
                tracing::warn!("[Session] Narration audio for {} unusable: {}", location_key, e);
                active.retry_audio = matches!(e, NarrationAudioError::Playback(_));
                active.notice = Some(e.user_notice().to_string());
            }
            None => tracing::debug!("[Session] {} has no narration audio", location_key),
        }
        active.narration = Some(narration);
        active.status = LoadStatus::Ready;
        active.view()
    }

    fn stale(&self, location_key: &str) -> NarrationView {
        tracing::debug!("[Session] Discarding stale result for {}", location_key);
        self.active.lock().view()
    }

    /// Fetch through the backend, sharing one request among concurrent loads of a key
    async fn fetch_shared(&self, location_key: &str) -> Result<NarrationResult, FetchError> {
        let cell = self
            .inflight
            .lock()
            .entry(location_key.to_string())
            .or_default()
            .clone();

        let result = cell
            .get_or_init(|| async {
                let result = self.fetcher.fetch_narration(location_key).await;
                if let Ok(narration) = &result {
                    self.write_through(location_key, narration);
                }
                result
            })
            .await
            .clone();

        let mut inflight = self.inflight.lock();
        if inflight
            .get(location_key)
            .is_some_and(|current| Arc::ptr_eq(current, &cell))
        {
            inflight.remove(location_key);
        }

        result
    }

    fn write_through(&self, location_key: &str, narration: &NarrationResult) {
        if let Err(e) = self.cache.set(location_key, narration) {
            tracing::warn!("[Cache] Not caching narration for {}: {}", location_key, e);
        }
    }

    /// Play or pause the active narration
    pub fn toggle_playback(&self) -> NarrationView {
        let mut active = self.active.lock();

        if !active.controller.has_audio() && active.retry_audio {
            self.retry_audio(&mut active);
        }
        if !active.controller.has_audio() {
            return active.view();
        }

        match active.controller.toggle() {
            Ok(()) => {
                if active.controller.is_playing() {
                    active.notice = None;
                }
            }
            Err(e) => Self::playback_failed(&mut active, e),
        }
        active.view()
    }

    fn retry_audio(&self, active: &mut ActiveSession) {
        let Some(narration) = active.narration.as_ref() else {
            return;
        };
        match self.builder.build_from_base64(&narration.audio_base64) {
            Ok((context, audio)) => {
                active.controller.prepare(context, audio);
                active.retry_audio = false;
                active.notice = None;
            }
            Err(e) => {
                tracing::warn!("[Session] Audio output still unavailable: {}", e);
                active.retry_audio = matches!(e, NarrationAudioError::Playback(_));
                active.notice = Some(e.user_notice().to_string());
            }
        }
    }

    fn playback_failed(active: &mut ActiveSession, e: PlaybackError) {
        tracing::warn!("[Session] Playback failed: {}", e);
        active.notice = Some(NarrationAudioError::from(e).user_notice().to_string());
    }

    /// Jump to `seconds` into the active narration
    pub fn seek(&self, seconds: f64) -> NarrationView {
        let mut active = self.active.lock();
        if let Err(e) = active.controller.seek(seconds) {
            Self::playback_failed(&mut active, e);
        }
        active.view()
    }

    /// Silence and forget the active narration
    pub fn teardown(&self) -> NarrationView {
        let mut active = self.active.lock();
        if let Some(key) = active.location_key.as_deref() {
            tracing::info!("[Session] Tearing down narration for {}", key);
        }
        active.reset(None, LoadStatus::Idle);
        active.view()
    }

    pub fn view(&self) -> NarrationView {
        self.active.lock().view()
    }

    /// Advance the progress tick; call once per frame
    pub fn on_frame(&self) {
        self.active.lock().controller.on_frame();
    }
}
