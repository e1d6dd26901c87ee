//! Per-session locking: a second message for the same session must not
//! begin processing until the prior turn's record mutation has committed.
//! Distinct sessions proceed fully in parallel.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};

#[derive(Clone)]
pub struct SessionLockManager {
    locks: Arc<Mutex<HashMap<String, Arc<Semaphore>>>>,
}

impl SessionLockManager {
    pub fn new() -> Self {
        Self {
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Acquire exclusive access to a session's turn pipeline. The guard
    /// releases on drop.
    pub async fn acquire(&self, session_key: &str) -> SessionLockGuard {
        let session_sem = {
            let mut locks = self.locks.lock().await;
            locks
                .entry(session_key.to_string())
                .or_insert_with(|| Arc::new(Semaphore::new(1)))
                .clone()
        };

        let permit = session_sem.acquire_owned().await.expect("semaphore closed");
        SessionLockGuard { _permit: permit }
    }

    /// Drop lock entries nobody holds or waits on.
    pub async fn cleanup_unused(&self) {
        let mut locks = self.locks.lock().await;
        locks.retain(|_, sem| sem.available_permits() < 1);
    }
}

impl Default for SessionLockManager {
    fn default() -> Self {
        Self::new()
    }
}

pub struct SessionLockGuard {
    _permit: OwnedSemaphorePermit,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn same_session_is_sequential() {
        let manager = SessionLockManager::new();
        let counter = Arc::new(AtomicUsize::new(0));

        let counter1 = counter.clone();
        let manager1 = manager.clone();
        let t1 = tokio::spawn(async move {
            let _guard = manager1.acquire("session1").await;
            counter1.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            counter1.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(10)).await;

        let counter2 = counter.clone();
        let manager2 = manager.clone();
        let t2 = tokio::spawn(async move {
            let _guard = manager2.acquire("session1").await;
            // runs only after t1 released the lock
            assert!(counter2.load(Ordering::SeqCst) >= 2);
            counter2.fetch_add(1, Ordering::SeqCst);
        });

        t1.await.unwrap();
        t2.await.unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn different_sessions_run_in_parallel() {
        let manager = SessionLockManager::new();
        let counter = Arc::new(AtomicUsize::new(0));

        let counter1 = counter.clone();
        let manager1 = manager.clone();
        let t1 = tokio::spawn(async move {
            let _guard = manager1.acquire("session1").await;
            tokio::time::sleep(Duration::from_millis(50)).await;
            counter1.fetch_add(1, Ordering::SeqCst);
        });

        let counter2 = counter.clone();
        let manager2 = manager.clone();
        let t2 = tokio::spawn(async move {
            let _guard = manager2.acquire("session2").await;
            counter2.fetch_add(1, Ordering::SeqCst);
        });

        t2.await.unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        t1.await.unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn cleanup_retains_held_locks() {
        let manager = SessionLockManager::new();
        let guard = manager.acquire("held").await;
        {
            let _released = manager.acquire("released").await;
        }

        manager.cleanup_unused().await;
        let locks = manager.locks.lock().await;
        assert!(locks.contains_key("held"));
        assert!(!locks.contains_key("released"));
        drop(locks);
        drop(guard);
    }
}
