// Narration playback controller
// Owns one source node at a time and tracks elapsed time across pause/resume

use serde::Serialize;
use std::sync::Arc;

use super::context::{AudioContext, ContextState, SourceNode};
use super::pcm::DecodedAudio;
use super::scheduler::ProgressScheduler;
use crate::error::PlaybackError;

/// Fraction of the narration that must have elapsed before a natural end
/// event is trusted; earlier end events from very short buffers are ignored
pub const DEFAULT_COMPLETION_THRESHOLD: f64 = 0.99;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayerPhase {
    Idle,
    Prepared,
    Playing,
    Paused,
    Stopped,
    Completed,
}

/// Transport bookkeeping, in seconds on the audio context's clock
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PlaybackState {
    pub is_playing: bool,
    pub pause_offset_seconds: f64,
    pub playback_start_clock_time: f64,
    pub progress_fraction: f64,
}

pub struct PlaybackController {
    context: Option<Arc<dyn AudioContext>>,
    audio: Option<Arc<DecodedAudio>>,
    node: Option<Box<dyn SourceNode>>,
    scheduler: ProgressScheduler,
    state: PlaybackState,
    phase: PlayerPhase,
    completion_threshold: f64,
}

impl Default for PlaybackController {
    fn default() -> Self {
        Self::new(DEFAULT_COMPLETION_THRESHOLD)
    }
}

impl PlaybackController {
    pub fn new(completion_threshold: f64) -> Self {
        Self {
            context: None,
            audio: None,
            node: None,
            scheduler: ProgressScheduler::new(),
            state: PlaybackState::default(),
            phase: PlayerPhase::Idle,
            completion_threshold,
        }
    }

    /// Load a buffer, discarding whatever was playing before
    pub fn prepare(&mut self, context: Arc<dyn AudioContext>, audio: DecodedAudio) {
        self.teardown();
        self.context = Some(context);
        self.audio = Some(Arc::new(audio));
        self.phase = PlayerPhase::Prepared;
    }

    /// Start or resume playback. Without a prepared buffer this does nothing.
    pub fn play(&mut self) -> Result<(), PlaybackError> {
        if self.phase == PlayerPhase::Playing {
            return Ok(());
        }

        let (context, audio) = match (self.context.clone(), self.audio.clone()) {
            (Some(context), Some(audio)) => (context, audio),
            _ => {
                tracing::debug!("[Player] play() ignored, no narration prepared");
                return Ok(());
            }
        };

        match context.state() {
            ContextState::Closed => return Err(PlaybackError::ContextClosed),
            ContextState::Suspended => context.resume()?,
            ContextState::Running => {}
        }

        let duration = audio.duration();
        let offset = if duration > 0.0 {
            self.state.pause_offset_seconds % duration
        } else {
            0.0
        };

        let mut node = context.create_source(audio)?;
        if let Err(e) = node.start(offset) {
            node.disconnect();
            return Err(e);
        }

        self.node = Some(node);
        self.state.pause_offset_seconds = offset;
        self.state.playback_start_clock_time = context.current_time();
        self.state.is_playing = true;
        self.phase = PlayerPhase::Playing;
        self.scheduler.request_frame();
        Ok(())
    }

    /// Pause, remembering how far playback got
    pub fn pause(&mut self) {
        if self.phase != PlayerPhase::Playing {
            return;
        }

        let now = self.clock_time();
        self.release_node();
        self.scheduler.cancel();
        self.state.pause_offset_seconds += now - self.state.playback_start_clock_time;
        self.state.is_playing = false;
        self.phase = PlayerPhase::Paused;

        let progress = self.fraction_at(self.state.pause_offset_seconds);
        if progress >= 1.0 {
            self.complete();
            return;
        }
        self.state.progress_fraction = self.state.progress_fraction.max(progress);
    }

    /// Stop and rewind. Safe from any phase; the buffer is kept for replay.
    pub fn stop(&mut self) {
        self.release_node();
        self.scheduler.cancel();
        self.state = PlaybackState::default();
        self.phase = if self.audio.is_some() {
            PlayerPhase::Stopped
        } else {
            PlayerPhase::Idle
        };
    }

    /// Stop and drop the buffer
    pub fn teardown(&mut self) {
        self.stop();
        self.audio = None;
        self.context = None;
        self.phase = PlayerPhase::Idle;
    }

    pub fn toggle(&mut self) -> Result<(), PlaybackError> {
        if self.state.is_playing {
            self.pause();
            Ok(())
        } else {
            self.play()
        }
    }

    /// Jump to `seconds` into the narration. Seeking to or past the end completes it.
    pub fn seek(&mut self, seconds: f64) -> Result<(), PlaybackError> {
        let duration = match self.audio.as_ref() {
            Some(audio) => audio.duration(),
            None => return Ok(()),
        };
        if seconds >= duration {
            self.complete();
            return Ok(());
        }

        let target = seconds.max(0.0);
        let was_playing = self.state.is_playing;
        if was_playing {
            self.release_node();
            self.scheduler.cancel();
            self.state.is_playing = false;
        }

        self.state.pause_offset_seconds = target;
        self.state.progress_fraction = self.fraction_at(target);
        self.phase = PlayerPhase::Paused;

        if was_playing {
            self.play()?;
        }
        Ok(())
    }

    /// Run the pending progress tick, if one is armed
    pub fn on_frame(&mut self) {
        if !self.state.is_playing {
            self.scheduler.cancel();
            return;
        }
        if self.scheduler.take_due().is_none() {
            return;
        }

        let progress = self.fraction_at(self.elapsed());
        if progress >= 1.0 {
            self.complete();
            return;
        }

        let ended = self.node.as_ref().is_some_and(|node| node.has_ended());
        if ended && progress >= self.completion_threshold {
            self.complete();
            return;
        }

        self.state.progress_fraction = self.state.progress_fraction.max(progress);
        self.scheduler.request_frame();
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn phase(&self) -> PlayerPhase {
        self.phase
    }

    pub fn is_playing(&self) -> bool {
        self.state.is_playing
    }

    pub fn progress(&self) -> f64 {
        self.state.progress_fraction
    }

    pub fn has_audio(&self) -> bool {
        self.audio.is_some()
    }

    /// Seconds of narration heard so far
    pub fn elapsed(&self) -> f64 {
        if self.state.is_playing {
            self.clock_time() - self.state.playback_start_clock_time
                + self.state.pause_offset_seconds
        } else {
            self.state.pause_offset_seconds
        }
    }

    fn complete(&mut self) {
        self.stop();
        if self.audio.is_some() {
            self.phase = PlayerPhase::Completed;
            tracing::debug!("[Player] Narration finished");
        }
    }

    fn release_node(&mut self) {
        if let Some(mut node) = self.node.take() {
            match node.stop() {
                Ok(()) | Err(PlaybackError::AlreadyStopped) => {}
                Err(e) => tracing::warn!("[Player] Failed to stop source node: {}", e),
            }
            node.disconnect();
        }
    }

    fn clock_time(&self) -> f64 {
        self.context
            .as_ref()
            .map(|c| c.current_time())
            .unwrap_or(self.state.playback_start_clock_time)
    }

    fn fraction_at(&self, elapsed: f64) -> f64 {
        match self.audio.as_ref().map(|a| a.duration()) {
            Some(duration) if duration > 0.0 => (elapsed / duration).max(0.0),
            _ => 1.0,
        }
    }
}

impl Drop for PlaybackController {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::context::testing::FakeContext;

    fn one_second() -> DecodedAudio {
        DecodedAudio::new(vec![0.0; 24_000], 24_000)
    }

    fn prepared(fake: &Arc<FakeContext>) -> PlaybackController {
        let mut player = PlaybackController::default();
        player.prepare(fake.clone(), one_second());
        player
    }

    #[test]
    fn test_play_without_buffer_is_noop() {
        let mut player = PlaybackController::default();
        assert!(player.play().is_ok());
        assert!(!player.is_playing());
        assert_eq!(player.phase(), PlayerPhase::Idle);
    }

    #[test]
    fn test_play_starts_node_at_zero() {
        let fake = FakeContext::new();
        let mut player = prepared(&fake);
        assert_eq!(player.phase(), PlayerPhase::Prepared);

        player.play().unwrap();

        assert!(player.is_playing());
        assert_eq!(player.phase(), PlayerPhase::Playing);
        assert_eq!(fake.last_node().unwrap().start_offset(), Some(0.0));
        assert_eq!(fake.live_nodes(), 1);
    }

    #[test]
    fn test_pause_then_play_resumes_at_offset() {
        let fake = FakeContext::new();
        let mut player = prepared(&fake);
        player.play().unwrap();

        fake.advance(0.4);
        let before = player.elapsed();
        player.pause();

        assert!(!player.is_playing());
        assert!((player.state().pause_offset_seconds - 0.4).abs() < 1e-9);
        assert!(fake.nodes()[0].is_stopped());
        assert_eq!(fake.live_nodes(), 0);

        player.play().unwrap();
        let after = player.elapsed();

        assert!((before - after).abs() < 1e-9);
        assert_eq!(fake.nodes().len(), 2);
        assert!((fake.last_node().unwrap().start_offset().unwrap() - 0.4).abs() < 1e-9);
        assert_eq!(fake.live_nodes(), 1);
    }

    #[test]
    fn test_progress_monotonic_until_completion() {
        let fake = FakeContext::new();
        let mut player = prepared(&fake);
        player.play().unwrap();

        let mut last = 0.0;
        for _ in 0..3 {
            fake.advance(0.25);
            player.on_frame();
            let progress = player.progress();
            assert!(progress >= last && progress <= 1.0);
            last = progress;
        }
        assert!((last - 0.75).abs() < 1e-9);

        fake.advance(0.3);
        player.on_frame();

        assert!(!player.is_playing());
        assert_eq!(player.phase(), PlayerPhase::Completed);
        assert_eq!(player.progress(), 0.0);
        assert_eq!(player.state().pause_offset_seconds, 0.0);
        assert_eq!(fake.live_nodes(), 0);

        // Completion does not reschedule
        fake.advance(0.1);
        player.on_frame();
        assert_eq!(player.progress(), 0.0);
    }

    #[test]
    fn test_progress_survives_pause_resume() {
        let fake = FakeContext::new();
        let mut player = prepared(&fake);
        player.play().unwrap();

        fake.advance(0.5);
        player.on_frame();
        player.pause();
        fake.advance(3.0);
        player.play().unwrap();
        fake.advance(0.1);
        player.on_frame();

        assert!((player.progress() - 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_no_tick_after_pause() {
        let fake = FakeContext::new();
        let mut player = prepared(&fake);
        player.play().unwrap();
        fake.advance(0.2);
        player.pause();
        let paused_progress = player.progress();

        fake.advance(0.5);
        player.on_frame();

        assert_eq!(player.progress(), paused_progress);
        assert!(!player.is_playing());
    }

    #[test]
    fn test_premature_end_event_ignored() {
        let fake = FakeContext::new();
        let mut player = prepared(&fake);
        player.play().unwrap();

        fake.advance(0.5);
        fake.last_node().unwrap().end();
        player.on_frame();
        assert!(player.is_playing());

        fake.advance(0.495);
        player.on_frame();
        assert_eq!(player.phase(), PlayerPhase::Completed);
    }

    #[test]
    fn test_stop_is_idempotent() {
        let fake = FakeContext::new();
        let mut player = prepared(&fake);
        player.play().unwrap();

        player.stop();
        player.stop();
        player.pause();

        assert_eq!(player.phase(), PlayerPhase::Stopped);
        assert!(player.has_audio());
        assert_eq!(fake.live_nodes(), 0);
    }

    #[test]
    fn test_replay_after_completion_starts_over() {
        let fake = FakeContext::new();
        let mut player = prepared(&fake);
        player.play().unwrap();
        fake.advance(2.0);
        player.on_frame();
        assert_eq!(player.phase(), PlayerPhase::Completed);

        player.play().unwrap();
        assert_eq!(fake.last_node().unwrap().start_offset(), Some(0.0));
    }

    #[test]
    fn test_resume_failure_leaves_player_stopped() {
        let fake = FakeContext::new();
        let mut player = prepared(&fake);
        fake.suspend().unwrap();
        fake.fail_resume(true);

        assert!(player.play().is_err());
        assert!(!player.is_playing());
        assert!(fake.nodes().is_empty());
    }

    #[test]
    fn test_prepare_replaces_live_node() {
        let fake = FakeContext::new();
        let mut player = prepared(&fake);
        player.play().unwrap();
        fake.advance(0.3);
        player.on_frame();

        player.prepare(fake.clone(), one_second());

        assert_eq!(fake.live_nodes(), 0);
        assert_eq!(player.phase(), PlayerPhase::Prepared);
        assert_eq!(player.progress(), 0.0);
    }

    #[test]
    fn test_seek_while_playing_restarts_node() {
        let fake = FakeContext::new();
        let mut player = prepared(&fake);
        player.play().unwrap();

        player.seek(0.75).unwrap();

        assert!(player.is_playing());
        assert_eq!(fake.live_nodes(), 1);
        assert!((fake.last_node().unwrap().start_offset().unwrap() - 0.75).abs() < 1e-9);
        assert!((player.progress() - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_seek_while_paused_moves_offset() {
        let fake = FakeContext::new();
        let mut player = prepared(&fake);

        player.seek(0.5).unwrap();
        assert_eq!(player.phase(), PlayerPhase::Paused);
        assert!(fake.nodes().is_empty());

        player.play().unwrap();
        assert!((fake.last_node().unwrap().start_offset().unwrap() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_teardown_releases_buffer() {
        let fake = FakeContext::new();
        let mut player = prepared(&fake);
        player.play().unwrap();

        player.teardown();

        assert_eq!(player.phase(), PlayerPhase::Idle);
        assert!(!player.has_audio());
        assert_eq!(fake.live_nodes(), 0);
        assert!(player.play().is_ok());
        assert!(!player.is_playing());
    }
}
