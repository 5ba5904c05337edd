// Progress scheduling
// A cooperative per-frame tick: at most one pending tick, re-armed by the tick itself

use std::time::Duration;
use tokio::task::JoinHandle;

/// Identifies one armed tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickHandle(u64);

/// Single-slot frame scheduler
///
/// `request_frame` arms the next tick, replacing any pending one. The frame
/// source calls `take_due` once per frame; a cancelled tick is never returned.
#[derive(Debug, Default)]
pub struct ProgressScheduler {
    pending: Option<TickHandle>,
    next_id: u64,
}

impl ProgressScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_frame(&mut self) -> TickHandle {
        self.next_id += 1;
        let handle = TickHandle(self.next_id);
        self.pending = Some(handle);
        handle
    }

    pub fn cancel(&mut self) {
        self.pending = None;
    }

    pub fn is_armed(&self) -> bool {
        self.pending.is_some()
    }

    /// Consume the pending tick for this frame, if any
    pub fn take_due(&mut self) -> Option<TickHandle> {
        self.pending.take()
    }
}

/// Drive `on_frame` at a fixed interval for hosts without their own frame loop.
/// Aborting the returned handle stops the loop.
pub fn spawn_frame_loop<F>(interval: Duration, mut on_frame: F) -> JoinHandle<()>
where
    F: FnMut() + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            on_frame();
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_single_pending_tick() {
        let mut scheduler = ProgressScheduler::new();
        let first = scheduler.request_frame();
        let second = scheduler.request_frame();

        assert_ne!(first, second);
        assert_eq!(scheduler.take_due(), Some(second));
        assert_eq!(scheduler.take_due(), None);
    }

    #[test]
    fn test_cancel_drops_pending_tick() {
        let mut scheduler = ProgressScheduler::new();
        scheduler.request_frame();
        scheduler.cancel();

        assert!(!scheduler.is_armed());
        assert_eq!(scheduler.take_due(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_frame_loop_runs_until_aborted() {
        let frames = Arc::new(AtomicUsize::new(0));
        let counter = frames.clone();
        let handle = spawn_frame_loop(Duration::from_millis(16), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.abort();
        let seen = frames.load(Ordering::SeqCst);
        assert!(seen >= 5, "only {} frames", seen);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(frames.load(Ordering::SeqCst), seen);
    }
}
