//! Timer service for subscription refresh and expiry
//!
//! Timers are single-fire: [`TimerService::schedule`] runs a future once on
//! a spawned tokio task after the given delay, never on the caller's stack.
//! A [`TimerHandle`] can cancel the task before it fires.
//!
//! Cancellation is best effort. A timer that already started running cannot
//! be recalled, so the engines re-validate on firing (see
//! [`Subscription::claim_timer`](crate::subscription::Subscription::claim_timer)).

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::task::AbortHandle;
use tracing::trace;

/// Schedules one-shot timer tasks
#[derive(Debug, Default)]
pub struct TimerService {
    next_id: AtomicU64,
}

impl TimerService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `task` once after `delay`
    ///
    /// Must be called from within a tokio runtime.
    pub fn schedule<F>(&self, delay: Duration, task: F) -> TimerHandle
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        trace!("Scheduling timer {} in {:?}", id, delay);

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            trace!("Timer {} fired", id);
            task.await;
        });

        TimerHandle {
            id,
            delay,
            task: handle.abort_handle(),
        }
    }
}

/// Handle to a scheduled timer task
#[derive(Debug)]
pub struct TimerHandle {
    id: u64,
    delay: Duration,
    task: AbortHandle,
}

impl TimerHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The delay the timer was scheduled with
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Cancel the timer if it has not fired yet
    pub fn cancel(&self) {
        trace!("Cancelling timer {}", self.id);
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_fires_once_after_delay() {
        let timers = TimerService::new();
        let fired = Arc::new(AtomicUsize::new(0));

        let counter = fired.clone();
        let handle = timers.schedule(Duration::from_secs(5), async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(handle.delay(), Duration::from_secs(5));

        tokio::time::sleep(Duration::from_secs(4)).await;
        settle().await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        settle().await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(handle.is_finished());

        tokio::time::sleep(Duration::from_secs(60)).await;
        settle().await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_timer_never_fires() {
        let timers = TimerService::new();
        let fired = Arc::new(AtomicUsize::new(0));

        let counter = fired.clone();
        let handle = timers.schedule(Duration::from_secs(5), async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        handle.cancel();

        tokio::time::sleep(Duration::from_secs(10)).await;
        settle().await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_timer_ids_are_unique() {
        let timers = TimerService::new();
        let a = timers.schedule(Duration::from_secs(60), async {});
        let b = timers.schedule(Duration::from_secs(60), async {});
        assert_ne!(a.id(), b.id());
        a.cancel();
        b.cancel();
    }
}
