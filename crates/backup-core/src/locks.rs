//! Per-user mutual exclusion shared by all sessions.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::debug;

/// Interval between retries when polling for a busy user.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(3000);

/// How a session waits for a user id held by another session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LockStrategy {
    /// Park until a release is signalled, then re-check.
    #[default]
    Notify,
    /// Re-check after a fixed sleep.
    Poll(Duration),
}

/// Registry of user ids that currently have a session past the header.
///
/// A single mutex covers both the lookup and the insert, so two sessions
/// can never both observe a user id as free.
#[derive(Debug, Default)]
pub struct LockRegistry {
    busy: Mutex<HashSet<u32>>,
    released: Notify,
    strategy: LockStrategy,
}

impl LockRegistry {
    pub fn new(strategy: LockStrategy) -> Self {
        Self {
            busy: Mutex::new(HashSet::new()),
            released: Notify::new(),
            strategy,
        }
    }

    pub fn strategy(&self) -> LockStrategy {
        self.strategy
    }

    fn table(&self) -> MutexGuard<'_, HashSet<u32>> {
        // Entries are inserted or removed whole, a poisoned table is still consistent.
        self.busy.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn try_mark(&self, user_id: u32) -> bool {
        self.table().insert(user_id)
    }

    /// Wait until `user_id` is free and take it. The returned lease
    /// releases the user id when dropped.
    pub async fn acquire(&self, user_id: u32) -> UserLease<'_> {
        match self.strategy {
            LockStrategy::Notify => loop {
                let notified = self.released.notified();
                tokio::pin!(notified);
                // Register before checking so a release in between is not missed.
                notified.as_mut().enable();
                if self.try_mark(user_id) {
                    break;
                }
                debug!(user_id, "user busy, waiting for release");
                notified.await;
            },
            LockStrategy::Poll(interval) => {
                while !self.try_mark(user_id) {
                    debug!(user_id, ?interval, "user busy, polling");
                    tokio::time::sleep(interval).await;
                }
            }
        }

        UserLease {
            registry: self,
            user_id,
        }
    }

    /// Take `user_id` only if it is free right now.
    pub fn try_acquire(&self, user_id: u32) -> Option<UserLease<'_>> {
        self.try_mark(user_id).then_some(UserLease {
            registry: self,
            user_id,
        })
    }

    pub fn is_held(&self, user_id: u32) -> bool {
        self.table().contains(&user_id)
    }

    fn release(&self, user_id: u32) {
        self.table().remove(&user_id);
        self.released.notify_waiters();
        debug!(user_id, "user released");
    }
}

/// Proof of holding a user id. Dropping it releases the id exactly once.
#[derive(Debug)]
pub struct UserLease<'a> {
    registry: &'a LockRegistry,
    user_id: u32,
}

impl Drop for UserLease<'_> {
    fn drop(&mut self) {
        self.registry.release(self.user_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::{Instant, timeout};

    #[tokio::test]
    async fn test_lease_releases_on_drop() {
        let registry = LockRegistry::new(LockStrategy::Notify);
        let lease = registry.acquire(1).await;
        assert!(registry.is_held(1));
        assert!(registry.try_acquire(1).is_none());
        drop(lease);
        assert!(!registry.is_held(1));
        assert!(registry.try_acquire(1).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_notify_wakes_waiter_immediately() {
        let registry = Arc::new(LockRegistry::new(LockStrategy::Notify));
        let lease = registry.acquire(7).await;

        let waiter = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move {
                let start = Instant::now();
                let _lease = registry.acquire(7).await;
                start.elapsed()
            })
        };

        tokio::time::sleep(Duration::from_millis(500)).await;
        drop(lease);
        let waited = waiter.await.unwrap();
        assert_eq!(waited, Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_retries_on_interval() {
        let registry = Arc::new(LockRegistry::new(LockStrategy::Poll(DEFAULT_POLL_INTERVAL)));
        let lease = registry.acquire(7).await;

        let waiter = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move {
                let start = Instant::now();
                let _lease = registry.acquire(7).await;
                start.elapsed()
            })
        };

        tokio::time::sleep(Duration::from_millis(1000)).await;
        drop(lease);
        // The waiter only notices on its next poll.
        let waited = waiter.await.unwrap();
        assert_eq!(waited, DEFAULT_POLL_INTERVAL);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_same_user_is_serialized() {
        let registry = Arc::new(LockRegistry::new(LockStrategy::Notify));
        let inside = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..16 {
            let registry = Arc::clone(&registry);
            let inside = Arc::clone(&inside);
            let peak = Arc::clone(&peak);
            tasks.push(tokio::spawn(async move {
                let _lease = registry.acquire(99).await;
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                for _ in 0..5 {
                    tokio::task::yield_now().await;
                }
                inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert!(!registry.is_held(99));
    }

    #[tokio::test]
    async fn test_different_users_do_not_block() {
        let registry = LockRegistry::new(LockStrategy::Poll(DEFAULT_POLL_INTERVAL));
        let _a = registry.acquire(1).await;
        let b = timeout(Duration::from_millis(50), registry.acquire(2)).await;
        assert!(b.is_ok());
    }
}
