//! Keyed async locks.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;

/// A set of async mutexes addressed by string key.
///
/// Holders of different keys never contend; holders of the same key are
/// serialized in acquisition order.
#[derive(Clone, Default)]
pub struct KeyedLocks {
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the lock for `key`, creating it on first use.
    ///
    /// The returned `Arc` must be locked by the caller; the map entry itself
    /// is released before this returns.
    pub fn get(&self, key: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drop the lock for `key` if nobody is holding or waiting on it.
    pub fn remove(&self, key: &str) {
        self.locks
            .remove_if(key, |_, lock| Arc::strong_count(lock) == 1);
    }

    /// Drop every lock nobody is holding or waiting on.
    pub fn prune(&self) {
        self.locks.retain(|_, lock| Arc::strong_count(lock) > 1);
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn same_key_returns_same_lock() {
        let locks = KeyedLocks::new();
        let a = locks.get("session-a");
        let b = locks.get("session-a");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(locks.len(), 1);
    }

    #[test]
    fn remove_skips_held_lock() {
        let locks = KeyedLocks::new();
        let held = locks.get("busy");
        locks.get("idle");

        locks.remove("busy");
        locks.remove("idle");

        assert_eq!(locks.len(), 1);
        drop(held);
        locks.prune();
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn different_keys_do_not_block() {
        let locks = KeyedLocks::new();
        let a = locks.get("a");
        let _guard_a = a.lock().await;

        let b = locks.get("b");
        let acquired = tokio::time::timeout(Duration::from_millis(100), b.lock()).await;
        assert!(acquired.is_ok());
    }

    #[tokio::test]
    async fn same_key_serializes() {
        let locks = KeyedLocks::new();
        let first = locks.get("a");
        let guard = first.lock().await;

        let second = locks.get("a");
        let blocked = tokio::time::timeout(Duration::from_millis(50), second.lock()).await;
        assert!(blocked.is_err());

        drop(guard);
        let acquired = tokio::time::timeout(Duration::from_millis(100), second.lock()).await;
        assert!(acquired.is_ok());
    }
}
