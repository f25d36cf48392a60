use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Per-key async mutexes used to serialize check-then-write sequences on a
/// unique value within this process.
#[derive(Clone, Default)]
pub struct KeyedLocks {
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for exclusive access to `key`. The entry is released when the
    /// guard drops, including when the holding future is cancelled.
    pub async fn lock(&self, key: &str) -> KeyGuard {
        let mutex = self
            .locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        KeyGuard {
            guard: Some(mutex.lock_owned().await),
            locks: self.clone(),
            key: key.to_string(),
        }
    }

    /// Drops the entry for `key` once nobody holds or waits on it.
    fn release(&self, key: &str) {
        self.locks
            .remove_if(key, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

pub struct KeyGuard {
    guard: Option<OwnedMutexGuard<()>>,
    locks: KeyedLocks,
    key: String,
}

impl Drop for KeyGuard {
    fn drop(&mut self) {
        // the mutex must be unlocked before its entry can look unused
        drop(self.guard.take());
        self.locks.release(&self.key);
    }
}
