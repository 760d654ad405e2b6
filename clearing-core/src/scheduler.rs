//! Automatic closure scheduler
//!
//! One deferred closure task per open cycle. Tasks are tracked in a
//! per-cycle registry (cycle id → abortable handle) guarded by its own
//! lock, so arm/cancel calls from different paths cannot race on a shared
//! global handle. Arming a cycle replaces any previous unfired task for
//! it; cancelling is idempotent. A task deregisters itself before
//! invoking its callback, so a `cancel` issued by the closure sequence
//! the task itself is driving never aborts that task mid-closure.

use crate::types::CycleId;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

struct ArmedTask {
    /// Identifies which spawned task owns the registry slot
    token: u64,
    handle: JoinHandle<()>,
}

/// Scheduler for automatic cycle closure
pub struct SettlementScheduler {
    /// Outstanding deferred tasks by cycle id
    tasks: Arc<Mutex<HashMap<CycleId, ArmedTask>>>,

    /// Distinguishes a task from its replacement after a re-arm
    next_token: AtomicU64,

    /// Delay used when the requested deadline is already in the past
    /// (process restart after downtime): fire imminently, never inline,
    /// to avoid reentrant closure during startup
    fallback_delay: Duration,
}

impl SettlementScheduler {
    /// Create new scheduler
    pub fn new(fallback_delay: Duration) -> Self {
        Self {
            tasks: Arc::new(Mutex::new(HashMap::new())),
            next_token: AtomicU64::new(0),
            fallback_delay,
        }
    }

    /// Schedule `on_fire` to run at `fire_at`, superseding any previous
    /// task for the same cycle
    pub fn arm<F>(&self, cycle_id: CycleId, fire_at: DateTime<Utc>, on_fire: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let delay = (fire_at - Utc::now())
            .to_std()
            .unwrap_or(self.fallback_delay);
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);

        let registry = Arc::clone(&self.tasks);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;

            // Leave the registry before firing: once the callback runs,
            // this task is no longer cancellable, and a cancel issued
            // from inside the callback must not abort it
            {
                let mut tasks = registry.lock();
                match tasks.get(&cycle_id) {
                    Some(armed) if armed.token == token => {
                        tasks.remove(&cycle_id);
                    }
                    // Superseded by a re-arm; the replacement owns the slot
                    _ => return,
                }
            }

            on_fire.await;
        });

        let mut tasks = self.tasks.lock();
        tasks.retain(|_, t| !t.handle.is_finished());
        if let Some(previous) = tasks.insert(cycle_id, ArmedTask { token, handle }) {
            previous.handle.abort();
            debug!("Superseded scheduled closure for cycle {}", cycle_id);
        }

        info!(
            "Armed automatic closure for cycle {} at {}",
            cycle_id,
            fire_at.to_rfc3339()
        );
    }

    /// Cancel the outstanding task for a cycle. No-op if none exists, it
    /// already fired, or it is currently executing its callback.
    pub fn cancel(&self, cycle_id: CycleId) {
        if let Some(armed) = self.tasks.lock().remove(&cycle_id) {
            armed.handle.abort();
            debug!("Cancelled scheduled closure for cycle {}", cycle_id);
        }
    }

    /// Whether an unfired task is outstanding for a cycle
    pub fn is_armed(&self, cycle_id: CycleId) -> bool {
        self.tasks
            .lock()
            .get(&cycle_id)
            .map(|t| !t.handle.is_finished())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_armed_task_fires() {
        let scheduler = SettlementScheduler::new(Duration::from_millis(50));
        let fired = Arc::new(AtomicUsize::new(0));

        let counter = fired.clone();
        scheduler.arm(1, Utc::now() + ChronoDuration::milliseconds(50), async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(scheduler.is_armed(1));
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!scheduler.is_armed(1));
    }

    #[tokio::test]
    async fn test_rearming_supersedes_previous_task() {
        let scheduler = SettlementScheduler::new(Duration::from_millis(50));
        let fired = Arc::new(AtomicUsize::new(0));

        let first = fired.clone();
        scheduler.arm(1, Utc::now() + ChronoDuration::milliseconds(100), async move {
            first.fetch_add(1, Ordering::SeqCst);
        });

        let second = fired.clone();
        scheduler.arm(1, Utc::now() + ChronoDuration::milliseconds(100), async move {
            second.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(400)).await;

        // Only the replacement may fire; two fire events for the same
        // cycle are impossible
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancel_prevents_firing_and_is_idempotent() {
        let scheduler = SettlementScheduler::new(Duration::from_millis(50));
        let fired = Arc::new(AtomicUsize::new(0));

        let counter = fired.clone();
        scheduler.arm(1, Utc::now() + ChronoDuration::milliseconds(100), async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        scheduler.cancel(1);
        scheduler.cancel(1); // second cancel is a no-op

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert!(!scheduler.is_armed(1));
    }

    #[tokio::test]
    async fn test_cancel_from_inside_the_callback_does_not_abort_it() {
        let scheduler = Arc::new(SettlementScheduler::new(Duration::from_millis(10)));
        let fired = Arc::new(AtomicUsize::new(0));

        // The closure sequence cancels its own cycle's task; the task
        // driving that sequence must survive its later await points
        let counter = fired.clone();
        let inner = scheduler.clone();
        scheduler.arm(1, Utc::now() + ChronoDuration::milliseconds(20), async move {
            inner.cancel(1);
            tokio::time::sleep(Duration::from_millis(50)).await;
            counter.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_past_deadline_uses_imminent_fallback() {
        let scheduler = SettlementScheduler::new(Duration::from_millis(50));
        let fired = Arc::new(AtomicUsize::new(0));

        let counter = fired.clone();
        scheduler.arm(1, Utc::now() - ChronoDuration::minutes(30), async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        // Not fired inline
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}
