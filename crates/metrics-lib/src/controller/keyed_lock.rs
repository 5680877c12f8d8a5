//! Per-key async lock whose entries disappear once nobody holds or awaits them

use dashmap::DashMap;
use std::hash::Hash;
use std::sync::{Arc, Weak};
use tokio::sync::{Mutex, OwnedMutexGuard};

type LockMap<K> = Arc<DashMap<K, Weak<Mutex<()>>>>;

/// Holds the lock for one key until dropped
pub struct KeyedLockGuard<K>
where
    K: Hash + Eq + Clone,
{
    guard: Option<OwnedMutexGuard<()>>,
    mutex: Arc<Mutex<()>>,
    key: K,
    locks: LockMap<K>,
}

impl<K> Drop for KeyedLockGuard<K>
where
    K: Hash + Eq + Clone,
{
    fn drop(&mut self) {
        drop(self.guard.take());

        // The count is re-checked under the shard lock, so a waiter that
        // upgraded the entry in the meantime keeps it alive.
        let mutex = &self.mutex;
        self.locks
            .remove_if(&self.key, |_, _| Arc::strong_count(mutex) == 1);
    }
}

/// Serializes work per key while letting distinct keys proceed in parallel
pub struct KeyedLock<K>
where
    K: Hash + Eq + Clone,
{
    locks: LockMap<K>,
}

impl<K> KeyedLock<K>
where
    K: Hash + Eq + Clone,
{
    pub fn new() -> Self {
        Self {
            locks: Arc::new(DashMap::new()),
        }
    }

    /// Wait for exclusive access to `key`
    pub async fn lock(&self, key: &K) -> KeyedLockGuard<K> {
        let mutex = self.mutex_for(key);
        let guard = Arc::clone(&mutex).lock_owned().await;

        KeyedLockGuard {
            guard: Some(guard),
            mutex,
            key: key.clone(),
            locks: Arc::clone(&self.locks),
        }
    }

    fn mutex_for(&self, key: &K) -> Arc<Mutex<()>> {
        let mut entry = self.locks.entry(key.clone()).or_insert_with(Weak::new);
        if let Some(strong) = entry.upgrade() {
            return strong;
        }
        let strong = Arc::new(Mutex::new(()));
        *entry = Arc::downgrade(&strong);
        strong
    }

    /// Number of keys with a live lock entry
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

impl<K> Default for KeyedLock<K>
where
    K: Hash + Eq + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::time::sleep;

    #[tokio::test]
    async fn test_same_key_is_serialized() {
        let locks = Arc::new(KeyedLock::<String>::new());
        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_in_flight = Arc::new(AtomicUsize::new(0));

        let mut handles = vec![];
        for _ in 0..10 {
            let locks = Arc::clone(&locks);
            let in_flight = Arc::clone(&in_flight);
            let max_in_flight = Arc::clone(&max_in_flight);
            handles.push(tokio::spawn(async move {
                let _guard = locks.lock(&"node-a".to_string()).await;
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                max_in_flight.fetch_max(now, Ordering::SeqCst);
                sleep(Duration::from_millis(1)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(max_in_flight.load(Ordering::SeqCst), 1);
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn test_distinct_keys_do_not_block() {
        let locks = KeyedLock::<u32>::new();

        let first = locks.lock(&1).await;
        let second = tokio::time::timeout(Duration::from_secs(1), locks.lock(&2)).await;
        assert!(second.is_ok());
        assert_eq!(locks.len(), 2);

        drop(first);
        drop(second);
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn test_entry_survives_while_waiter_pending() {
        let locks = Arc::new(KeyedLock::<u32>::new());
        let guard = locks.lock(&7).await;

        let waiter = {
            let locks = Arc::clone(&locks);
            tokio::spawn(async move {
                let _guard = locks.lock(&7).await;
            })
        };
        tokio::task::yield_now().await;

        drop(guard);
        assert_eq!(locks.len(), 1);

        waiter.await.unwrap();
        assert!(locks.is_empty());
    }
}
