use std::{collections::HashMap, hash::Hash, sync::Arc};

use tokio::sync::{Mutex, OwnedMutexGuard};

/// Per-key async mutexes.
///
/// Every read-decide-write on a subject and every mutation of its announcement
/// runs under the subject's lock, so the two share one serialization point.
pub struct KeyLocks<K> {
    inner: Mutex<HashMap<K, Arc<Mutex<()>>>>,
}

impl<K> Default for KeyLocks<K> {
    fn default() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }
}

/// Proof that the holder owns the lock for `key`.
pub struct KeyGuard<K> {
    key: K,
    _guard: OwnedMutexGuard<()>,
}

impl<K> KeyGuard<K> {
    pub fn key(&self) -> &K {
        &self.key
    }
}

impl<K> KeyLocks<K>
where
    K: Clone + Eq + Hash,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, key: &K) -> KeyGuard<K> {
        let lock = {
            let mut map = self.inner.lock().await;
            map.entry(key.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        KeyGuard {
            key: key.clone(),
            _guard: lock.lock_owned().await,
        }
    }

    /// Drop the mutex for `key` if nobody holds or waits on it.
    pub async fn forget(&self, key: &K) {
        let mut map = self.inner.lock().await;
        if map
            .get(key)
            .map(|lock| Arc::strong_count(lock) == 1)
            .unwrap_or(false)
        {
            map.remove(key);
        }
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }
}
