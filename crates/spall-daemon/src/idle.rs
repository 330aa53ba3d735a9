//! Idle-timeout auto-shutdown.
//!
//! The daemon tracks in-flight HTTP requests and live SSE streams.
//! While both counters are zero, a timer runs; if it expires with the
//! counters still zero the server stops. `persist` mode skips the
//! watcher entirely.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tracing::info;

#[derive(Default)]
pub struct IdleTracker {
    active_requests: AtomicUsize,
    active_sse: AtomicUsize,
    activity: Notify,
}

impl IdleTracker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn request_guard(self: &Arc<Self>) -> CounterGuard {
        CounterGuard::acquire(self.clone(), Counter::Requests)
    }

    pub fn sse_guard(self: &Arc<Self>) -> CounterGuard {
        CounterGuard::acquire(self.clone(), Counter::Sse)
    }

    pub fn active_requests(&self) -> usize {
        self.active_requests.load(Ordering::SeqCst)
    }

    pub fn active_sse(&self) -> usize {
        self.active_sse.load(Ordering::SeqCst)
    }

    pub fn is_idle(&self) -> bool {
        self.active_requests() == 0 && self.active_sse() == 0
    }

    /// Watches the counters and fires `shutdown` after `timeout` of
    /// uninterrupted idleness.
    pub async fn watch(self: Arc<Self>, timeout: Duration, shutdown: Arc<Notify>) {
        loop {
            if self.is_idle() {
                tokio::select! {
                    _ = tokio::time::sleep(timeout) => {
                        if self.is_idle() {
                            info!(timeout_ms = timeout.as_millis() as u64, "idle timeout; stopping");
                            shutdown.notify_one();
                            return;
                        }
                    }
                    _ = self.activity.notified() => {}
                }
            } else {
                self.activity.notified().await;
            }
        }
    }
}

enum Counter {
    Requests,
    Sse,
}

impl Counter {
    fn cell<'a>(&self, tracker: &'a IdleTracker) -> &'a AtomicUsize {
        match self {
            Counter::Requests => &tracker.active_requests,
            Counter::Sse => &tracker.active_sse,
        }
    }
}

/// Holds one unit of activity; releasing it may restart the idle timer.
pub struct CounterGuard {
    tracker: Arc<IdleTracker>,
    counter: Counter,
}

impl CounterGuard {
    fn acquire(tracker: Arc<IdleTracker>, counter: Counter) -> Self {
        counter.cell(&tracker).fetch_add(1, Ordering::SeqCst);
        tracker.activity.notify_one();
        Self { tracker, counter }
    }
}

impl Drop for CounterGuard {
    fn drop(&mut self) {
        self.counter.cell(&self.tracker).fetch_sub(1, Ordering::SeqCst);
        self.tracker.activity.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guards_move_the_counters() {
        let tracker = IdleTracker::new();
        assert!(tracker.is_idle());

        let request = tracker.request_guard();
        let sse = tracker.sse_guard();
        assert_eq!(tracker.active_requests(), 1);
        assert_eq!(tracker.active_sse(), 1);
        assert!(!tracker.is_idle());

        drop(request);
        assert!(!tracker.is_idle());
        drop(sse);
        assert!(tracker.is_idle());
    }

    #[tokio::test(start_paused = true)]
    async fn watcher_fires_after_quiet_period() {
        let tracker = IdleTracker::new();
        let shutdown = Arc::new(Notify::new());
        let handle = tokio::spawn(
            tracker
                .clone()
                .watch(Duration::from_millis(100), shutdown.clone()),
        );

        shutdown.notified().await;
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn activity_resets_the_timer() {
        let tracker = IdleTracker::new();
        let shutdown = Arc::new(Notify::new());
        let watcher = tokio::spawn(
            tracker
                .clone()
                .watch(Duration::from_millis(100), shutdown.clone()),
        );

        // Occupy the server before the timer can expire.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let guard = tracker.sse_guard();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!watcher.is_finished());

        drop(guard);
        shutdown.notified().await;
        watcher.await.unwrap();
    }
}
