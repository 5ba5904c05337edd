// Audio output context and source nodes
// One process-wide context is created lazily and shared by every narration

use parking_lot::Mutex;
use std::sync::Arc;

use super::pcm::DecodedAudio;
use crate::error::PlaybackError;

/// Lifecycle of an audio output context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    Running,
    /// Created but not yet allowed to produce sound, or explicitly suspended
    Suspended,
    Closed,
}

/// A running audio output with its own clock
pub trait AudioContext: Send + Sync {
    fn state(&self) -> ContextState;

    fn resume(&self) -> Result<(), PlaybackError>;

    fn suspend(&self) -> Result<(), PlaybackError>;

    /// Release the output device. A closed context never runs again.
    fn close(&self);

    /// Seconds of audio rendered since the context was created
    fn current_time(&self) -> f64;

    /// Create a fresh, unstarted source bound to `audio`
    fn create_source(&self, audio: Arc<DecodedAudio>) -> Result<Box<dyn SourceNode>, PlaybackError>;
}

/// A one-shot playable source. Never restarted once stopped.
pub trait SourceNode: Send {
    /// Begin output `offset` seconds into the buffer
    fn start(&mut self, offset: f64) -> Result<(), PlaybackError>;

    /// Stop output. Stopping twice yields `PlaybackError::AlreadyStopped`.
    fn stop(&mut self) -> Result<(), PlaybackError>;

    /// Detach from the output so no queued samples are heard
    fn disconnect(&mut self);

    /// Natural end of the buffer was reached
    fn has_ended(&self) -> bool;
}

type ContextFactory = Box<dyn Fn() -> Result<Arc<dyn AudioContext>, PlaybackError> + Send + Sync>;

/// Owns the shared audio context: create once, resume on demand,
/// recreate only after it was closed
pub struct AudioContextManager {
    factory: ContextFactory,
    context: Mutex<Option<Arc<dyn AudioContext>>>,
}

impl AudioContextManager {
    pub fn with_factory<F>(factory: F) -> Self
    where
        F: Fn() -> Result<Arc<dyn AudioContext>, PlaybackError> + Send + Sync + 'static,
    {
        Self {
            factory: Box::new(factory),
            context: Mutex::new(None),
        }
    }

    /// Get the shared context, creating it on first use and resuming it if suspended
    pub fn acquire(&self) -> Result<Arc<dyn AudioContext>, PlaybackError> {
        let mut slot = self.context.lock();

        let context = match slot.as_ref() {
            Some(existing) if existing.state() != ContextState::Closed => existing.clone(),
            _ => {
                let created = (self.factory)()?;
                tracing::info!("[Audio] Created audio output context");
                *slot = Some(created.clone());
                created
            }
        };

        if context.state() == ContextState::Suspended {
            context.resume()?;
        }

        Ok(context)
    }

    /// The context if one was already created
    pub fn current(&self) -> Option<Arc<dyn AudioContext>> {
        self.context.lock().clone()
    }

    pub fn close(&self) {
        if let Some(context) = self.context.lock().take() {
            context.close();
            tracing::info!("[Audio] Closed audio output context");
        }
    }
}
