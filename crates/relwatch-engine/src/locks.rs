//! Per-coordinate lock pool.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Hands out one async mutex per (group, artifact) key, created lazily.
///
/// All cache and upstream work for a coordinate runs under its lock. That
/// is what makes identical concurrent queries coalesce: the second caller
/// waits on the first, then sees the freshly updated record and performs
/// no upstream I/O. Do not replace this with a single global lock.
#[derive(Debug, Default)]
pub struct LockCache {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl LockCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock for a coordinate. The guard releases on drop, no
    /// matter how the protected work ends.
    pub async fn lock(&self, group: &str, artifact: &str) -> OwnedMutexGuard<()> {
        self.entry(group, artifact).lock_owned().await
    }

    /// How many coordinate locks have been created so far.
    pub fn len(&self) -> usize {
        lock_map(&self.locks).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn entry(&self, group: &str, artifact: &str) -> Arc<AsyncMutex<()>> {
        let key = format!("{group}:{artifact}");
        let mut locks = lock_map(&self.locks);
        Arc::clone(locks.entry(key).or_default())
    }
}

fn lock_map<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn same_coordinate_work_is_serialized() {
        let locks = Arc::new(LockCache::new());
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let locks = Arc::clone(&locks);
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            handles.push(tokio::spawn(async move {
                let _guard = locks.lock("com.example", "lib").await;
                let current = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(current, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                running.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn different_coordinates_do_not_block_each_other() {
        let locks = Arc::new(LockCache::new());
        let _a = locks.lock("com.example", "a").await;
        // acquiring another coordinate's lock must not deadlock
        let _b = locks.lock("com.example", "b").await;
        assert_eq!(locks.len(), 2);
    }

    #[tokio::test]
    async fn locks_are_created_once_per_key() {
        let locks = LockCache::new();
        drop(locks.lock("g", "a").await);
        drop(locks.lock("g", "a").await);
        assert_eq!(locks.len(), 1);
    }
}
