//! Per-pool lease expiration scheduling.
//!
//! Each pool owns one [`ExpirationScheduler`]. Every pending expiration is a
//! one-shot tokio task sleeping until its deadline; all of them share the
//! scheduler's [`CancellationToken`], so tearing the pool down stops every
//! timer at once.
//!
//! The scheduler lives inside the pool's locked state. A firing task must
//! re-acquire that lock and confirm through [`ExpirationScheduler::complete`]
//! that it is still the current task for its key before doing anything, so
//! a timer that lost a race with a renewal or a release is a no-op.

use std::collections::HashMap;
use std::time::Duration;

use tokio::task::AbortHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Longest delay a timer is armed for; longer delays are clamped to it.
pub const MAX_DELAY: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// Identifies one scheduled task. Ids are never reused within a scheduler.
pub type TaskId = u64;

/// Result of [`ExpirationScheduler::schedule`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleOutcome {
    /// No task was pending for the key.
    Installed(TaskId),
    /// A pending task for the key was cancelled and replaced.
    Replaced(TaskId),
    /// The scheduler has been shut down; nothing was scheduled.
    Closed,
}

#[derive(Debug)]
struct PendingExpiration {
    id: TaskId,
    deadline: Instant,
    handle: AbortHandle,
}

/// One-shot expiration timers keyed by numeric address.
#[derive(Debug)]
pub struct ExpirationScheduler {
    name: String,
    pending: HashMap<u128, PendingExpiration>,
    next_id: TaskId,
    token: CancellationToken,
}

impl ExpirationScheduler {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            pending: HashMap::new(),
            next_id: 0,
            token: CancellationToken::new(),
        }
    }

    /// Arms a timer for `key` that runs `fire` after `delay`.
    ///
    /// Any task already pending for `key` is cancelled first. `fire`
    /// receives the new task's id and should pass it back to
    /// [`ExpirationScheduler::complete`] under the pool lock.
    ///
    /// Delays beyond [`MAX_DELAY`] are clamped to it.
    ///
    /// Must be called from within a tokio runtime.
    pub fn schedule<F, Fut>(&mut self, key: u128, delay: Duration, fire: F) -> ScheduleOutcome
    where
        F: FnOnce(TaskId) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if self.token.is_cancelled() {
            debug!("{}: scheduler closed, not scheduling {:#x}", self.name, key);
            return ScheduleOutcome::Closed;
        }

        let replaced = self.cancel(key);

        let id = self.next_id;
        self.next_id += 1;
        let now = Instant::now();
        let deadline = now
            .checked_add(delay.min(MAX_DELAY))
            .unwrap_or_else(|| now + Duration::from_secs(365 * 24 * 60 * 60));
        let token = self.token.clone();

        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep_until(deadline) => fire(id).await,
            }
        })
        .abort_handle();

        self.pending.insert(
            key,
            PendingExpiration {
                id,
                deadline,
                handle,
            },
        );

        if replaced {
            ScheduleOutcome::Replaced(id)
        } else {
            ScheduleOutcome::Installed(id)
        }
    }

    /// Cancels the pending task for `key`.
    ///
    /// Returns false if nothing was pending.
    pub fn cancel(&mut self, key: u128) -> bool {
        match self.pending.remove(&key) {
            Some(pending) => {
                pending.handle.abort();
                true
            }
            None => false,
        }
    }

    /// Retires the task `id` for `key` if it is still the current one.
    ///
    /// Called by the firing task itself, so the task is not aborted.
    pub fn complete(&mut self, key: u128, id: TaskId) -> bool {
        match self.pending.get(&key) {
            Some(pending) if pending.id == id => {
                self.pending.remove(&key);
                true
            }
            _ => false,
        }
    }

    /// Removes and cancels every task whose deadline is at or before `now`.
    ///
    /// Returns their keys in ascending order; the caller reclaims them.
    pub fn take_overdue(&mut self, now: Instant) -> Vec<u128> {
        let mut overdue: Vec<u128> = self
            .pending
            .iter()
            .filter(|(_, pending)| pending.deadline <= now)
            .map(|(key, _)| *key)
            .collect();
        overdue.sort_unstable();

        for key in &overdue {
            self.cancel(*key);
        }
        overdue
    }

    /// Cancels every task whose key falls outside `[low, high]`.
    pub fn retain_within(&mut self, low: u128, high: u128) -> usize {
        let outside: Vec<u128> = self
            .pending
            .keys()
            .copied()
            .filter(|key| *key < low || *key > high)
            .collect();
        for key in &outside {
            self.cancel(*key);
        }
        outside.len()
    }

    pub fn deadline(&self, key: u128) -> Option<Instant> {
        self.pending.get(&key).map(|pending| pending.deadline)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_closed(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Cancels every pending task and refuses new ones.
    pub fn shutdown(&mut self) {
        self.token.cancel();
        let count = self.pending.len();
        for (_, pending) in self.pending.drain() {
            pending.handle.abort();
        }
        if count > 0 {
            debug!("{}: cancelled {} pending expiration(s)", self.name, count);
        }
    }
}

impl Drop for ExpirationScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn counting(
        counter: &Arc<AtomicUsize>,
    ) -> impl FnOnce(TaskId) -> std::future::Ready<()> + Send + 'static {
        let counter = Arc::clone(counter);
        move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            std::future::ready(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fires_once_after_delay() {
        let fired = Arc::new(AtomicUsize::new(0));
        let mut scheduler = ExpirationScheduler::new("test");

        let outcome = scheduler.schedule(1, Duration::from_secs(10), counting(&fired));
        assert!(matches!(outcome, ScheduleOutcome::Installed(_)));

        tokio::time::sleep(Duration::from_secs(9)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reschedule_replaces() {
        let fired = Arc::new(AtomicUsize::new(0));
        let mut scheduler = ExpirationScheduler::new("test");

        scheduler.schedule(7, Duration::from_secs(5), counting(&fired));
        let outcome = scheduler.schedule(7, Duration::from_secs(20), counting(&fired));
        assert!(matches!(outcome, ScheduleOutcome::Replaced(_)));
        assert_eq!(scheduler.pending_count(), 1);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(15)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel() {
        let fired = Arc::new(AtomicUsize::new(0));
        let mut scheduler = ExpirationScheduler::new("test");

        scheduler.schedule(3, Duration::from_secs(1), counting(&fired));
        assert!(scheduler.cancel(3));
        assert!(!scheduler.cancel(3));

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_complete_checks_current_id() {
        let mut scheduler = ExpirationScheduler::new("test");
        let first = match scheduler.schedule(9, Duration::from_secs(60), |_| async {}) {
            ScheduleOutcome::Installed(id) => id,
            other => panic!("unexpected outcome {:?}", other),
        };
        let second = match scheduler.schedule(9, Duration::from_secs(60), |_| async {}) {
            ScheduleOutcome::Replaced(id) => id,
            other => panic!("unexpected outcome {:?}", other),
        };

        assert!(!scheduler.complete(9, first));
        assert_eq!(scheduler.pending_count(), 1);
        assert!(scheduler.complete(9, second));
        assert_eq!(scheduler.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_take_overdue() {
        let mut scheduler = ExpirationScheduler::new("test");
        scheduler.schedule(1, Duration::from_secs(0), |_| async {});
        scheduler.schedule(2, Duration::from_secs(100), |_| async {});
        scheduler.schedule(3, Duration::from_secs(0), |_| async {});

        let overdue = scheduler.take_overdue(Instant::now());
        assert_eq!(overdue, vec![1, 3]);
        assert_eq!(scheduler.pending_count(), 1);
        assert!(scheduler.deadline(2).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_everything() {
        let fired = Arc::new(AtomicUsize::new(0));
        let mut scheduler = ExpirationScheduler::new("test");
        for key in 0..4 {
            scheduler.schedule(key, Duration::from_secs(1), counting(&fired));
        }

        scheduler.shutdown();
        assert!(scheduler.is_closed());
        assert_eq!(scheduler.pending_count(), 0);
        assert_eq!(
            scheduler.schedule(9, Duration::from_secs(1), counting(&fired)),
            ScheduleOutcome::Closed
        );

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_cancels_everything() {
        let fired = Arc::new(AtomicUsize::new(0));
        {
            let mut scheduler = ExpirationScheduler::new("test");
            scheduler.schedule(1, Duration::from_secs(1), counting(&fired));
        }
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_huge_delay_is_clamped() {
        let fired = Arc::new(AtomicUsize::new(0));
        let mut scheduler = ExpirationScheduler::new("test");
        let now = Instant::now();

        let outcome = scheduler.schedule(1, Duration::from_secs(u64::MAX), counting(&fired));
        assert!(matches!(outcome, ScheduleOutcome::Installed(_)));
        assert_eq!(scheduler.deadline(1), Some(now + MAX_DELAY));

        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert_eq!(scheduler.pending_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retain_within() {
        let mut scheduler = ExpirationScheduler::new("test");
        for key in [1, 5, 10, 20] {
            scheduler.schedule(key, Duration::from_secs(30), |_| async {});
        }
        assert_eq!(scheduler.retain_within(5, 10), 2);
        assert_eq!(scheduler.pending_count(), 2);
        assert!(scheduler.deadline(5).is_some());
        assert!(scheduler.deadline(1).is_none());
    }
}
