//! Per-digest write serialization

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Table of per-digest write locks
///
/// A slot is created the first time a digest is locked and removed when the
/// last guard or waiter for it goes away, so the table only holds digests
/// with a write in flight.
#[derive(Default)]
pub(crate) struct WriteLocks {
    slots: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

/// Exclusive write access to one digest, released on drop
pub(crate) struct WriteGuard<'a> {
    locks: &'a WriteLocks,
    digest: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl WriteLocks {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive write access to `digest`
    pub(crate) async fn acquire(&self, digest: &str) -> WriteGuard<'_> {
        let slot = self
            .slots
            .lock()
            .entry(digest.to_string())
            .or_default()
            .clone();
        let guard = slot.lock_owned().await;

        WriteGuard {
            locks: self,
            digest: digest.to_string(),
            guard: Some(guard),
        }
    }

    /// Take write access to `digest` only if nobody else holds it
    pub(crate) fn try_acquire(&self, digest: &str) -> Option<WriteGuard<'_>> {
        let mut slots = self.slots.lock();
        let slot = slots.entry(digest.to_string()).or_default().clone();
        let guard = slot.try_lock_owned().ok()?;

        Some(WriteGuard {
            locks: self,
            digest: digest.to_string(),
            guard: Some(guard),
        })
    }

    /// Number of digests with a write in flight
    #[cfg(test)]
    pub(crate) fn in_flight(&self) -> usize {
        self.slots.lock().len()
    }
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        let mut slots = self.locks.slots.lock();
        self.guard.take();

        if let Some(slot) = slots.get(&self.digest)
            && Arc::strong_count(slot) == 1
        {
            slots.remove(&self.digest);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_try_acquire_fails_while_held() {
        let locks = WriteLocks::new();

        let guard = locks.acquire("aa").await;
        assert!(locks.try_acquire("aa").is_none());
        assert!(locks.try_acquire("bb").is_some());
        assert_eq!(locks.in_flight(), 1);

        drop(guard);
        assert_eq!(locks.in_flight(), 0);
        assert!(locks.try_acquire("aa").is_some());
        assert_eq!(locks.in_flight(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_acquire_serializes_writers() {
        let locks = Arc::new(WriteLocks::new());
        let active = Arc::new(std::sync::atomic::AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let locks = locks.clone();
            let active = active.clone();
            handles.push(tokio::spawn(async move {
                let _guard = locks.acquire("same").await;
                let now = active.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                assert_eq!(now, 0, "two writers held the same digest");
                tokio::time::sleep(Duration::from_millis(5)).await;
                active.fetch_sub(1, std::sync::atomic::Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(locks.in_flight(), 0);
    }
}
