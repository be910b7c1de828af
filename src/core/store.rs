//! Keyed Registries
//!
//! Concurrent name-keyed maps for lobbies and game sessions.
//!
//! The map itself sits behind an async `RwLock`; each entry sits behind its
//! own `Mutex`, so mutations of one lobby or session never wait on another.
//! Holding an entry guard is the per-key mutual exclusion boundary.

use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

use crate::game::lobby::Lobby;
use crate::game::session::GameSession;

/// Shared handle to a single registry entry.
pub type Entry<T> = Arc<Mutex<T>>;

/// A concurrent registry keyed by lobby name.
#[derive(Debug)]
pub struct Registry<T> {
    entries: RwLock<BTreeMap<String, Entry<T>>>,
}

/// Registry of open lobbies.
pub type LobbyStore = Registry<Lobby>;

/// Registry of active game sessions.
pub type SessionStore = Registry<GameSession>;

impl<T> Registry<T> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
        }
    }

    /// Insert `value` under `key` unless the key is taken.
    ///
    /// Returns the new entry, or `None` if an entry already existed (the
    /// existing entry is left untouched).
    pub async fn insert_if_absent(&self, key: &str, value: T) -> Option<Entry<T>> {
        let mut entries = self.entries.write().await;
        if entries.contains_key(key) {
            return None;
        }
        let entry = Arc::new(Mutex::new(value));
        entries.insert(key.to_string(), entry.clone());
        Some(entry)
    }

    /// Look up an entry.
    pub async fn get(&self, key: &str) -> Option<Entry<T>> {
        self.entries.read().await.get(key).cloned()
    }

    /// Check whether a key is present.
    pub async fn contains(&self, key: &str) -> bool {
        self.entries.read().await.contains_key(key)
    }

    /// Remove an entry, returning it if present.
    pub async fn remove(&self, key: &str) -> Option<Entry<T>> {
        self.entries.write().await.remove(key)
    }

    /// Remove `key` only if it still maps to `entry`.
    ///
    /// Guards against deleting a replacement inserted after `entry` was
    /// looked up.
    pub async fn remove_entry(&self, key: &str, entry: &Entry<T>) -> bool {
        let mut entries = self.entries.write().await;
        match entries.get(key) {
            Some(current) if Arc::ptr_eq(current, entry) => {
                entries.remove(key);
                true
            }
            _ => false,
        }
    }

    /// Atomically read-modify-write a single entry.
    ///
    /// Returns `None` if the key is absent.
    pub async fn update<R>(&self, key: &str, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        let entry = self.get(key).await?;
        let mut guard = entry.lock().await;
        Some(f(&mut guard))
    }

    /// Point-in-time snapshot of all entries.
    ///
    /// Safe to walk while other tasks insert or remove keys; removed entries
    /// stay alive until the snapshot is dropped.
    pub async fn snapshot(&self) -> Vec<(String, Entry<T>)> {
        self.entries
            .read()
            .await
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Number of entries.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether the registry is empty.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_insert_if_absent_never_overwrites() {
        let store: Registry<u32> = Registry::new();

        assert!(store.insert_if_absent("arena", 1).await.is_some());
        assert!(store.insert_if_absent("arena", 2).await.is_none());

        let entry = store.get("arena").await.unwrap();
        assert_eq!(*entry.lock().await, 1);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_update_and_remove() {
        let store: Registry<u32> = Registry::new();
        store.insert_if_absent("arena", 10).await;

        let result = store.update("arena", |v| {
            *v += 5;
            *v
        }).await;
        assert_eq!(result, Some(15));
        assert_eq!(store.update("missing", |v| *v).await, None);

        assert!(store.remove("arena").await.is_some());
        assert!(store.is_empty().await);
        assert!(store.remove("arena").await.is_none());
    }

    #[tokio::test]
    async fn test_remove_entry_ignores_replacement() {
        let store: Registry<u32> = Registry::new();
        let old = store.insert_if_absent("arena", 1).await.unwrap();
        store.remove("arena").await;
        store.insert_if_absent("arena", 2).await.unwrap();

        assert!(!store.remove_entry("arena", &old).await);
        assert!(store.contains("arena").await);
    }

    #[tokio::test]
    async fn test_snapshot_survives_concurrent_removal() {
        let store: Registry<u32> = Registry::new();
        for i in 0..10 {
            store.insert_if_absent(&format!("lobby-{}", i), i).await;
        }

        let snapshot = store.snapshot().await;
        for (key, _) in &snapshot {
            store.remove(key).await;
        }

        assert_eq!(snapshot.len(), 10);
        assert!(store.is_empty().await);
        // Entries in the snapshot stay usable
        assert_eq!(*snapshot[3].1.lock().await, 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_insert_single_winner() {
        let store: Arc<Registry<usize>> = Arc::new(Registry::new());

        let handles: Vec<_> = (0..32)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move { store.insert_if_absent("arena", i).await.is_some() })
            })
            .collect();

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }
}
