//! In-memory record storage shared by the document, collection and evaluation services.

use std::collections::HashMap;
use std::hash::Hash;
use time::OffsetDateTime;
use tokio::sync::RwLock;

/// Keyed record store guarded by an async read/write lock.
pub struct MemoryStore<K, V> {
    records: RwLock<HashMap<K, V>>,
}

impl<K, V> MemoryStore<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
        }
    }

    /// Insert or replace a record.
    pub async fn insert(&self, key: K, value: V) {
        self.records.write().await.insert(key, value);
    }

    /// Clone a record out of the store.
    pub async fn get(&self, key: &K) -> Option<V> {
        self.records.read().await.get(key).cloned()
    }

    /// Whether a record exists.
    pub async fn contains(&self, key: &K) -> bool {
        self.records.read().await.contains_key(key)
    }

    /// Mutate a record in place and return the updated copy.
    pub async fn update<F>(&self, key: &K, apply: F) -> Option<V>
    where
        F: FnOnce(&mut V),
    {
        let mut guard = self.records.write().await;
        let record = guard.get_mut(key)?;
        apply(record);
        Some(record.clone())
    }

    /// Mutate a record only when `allow` accepts its current state, under one write lock.
    pub async fn update_if<P, F>(&self, key: &K, allow: P, apply: F) -> Option<V>
    where
        P: FnOnce(&V) -> bool,
        F: FnOnce(&mut V),
    {
        let mut guard = self.records.write().await;
        let record = guard.get_mut(key).filter(|record| allow(record))?;
        apply(record);
        Some(record.clone())
    }

    /// Snapshot every record, unordered.
    pub async fn values(&self) -> Vec<V> {
        self.records.read().await.values().cloned().collect()
    }

    /// Number of stored records.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }
}

impl<K, V> Default for MemoryStore<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Current UTC timestamp used for `inserted_at`/`updated_at` columns.
pub fn now() -> OffsetDateTime {
    OffsetDateTime::now_utc()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn update_returns_modified_copy() {
        let store: MemoryStore<u32, String> = MemoryStore::new();
        store.insert(1, "a".into()).await;

        let updated = store.update(&1, |value| value.push('b')).await;
        assert_eq!(updated.as_deref(), Some("ab"));
        assert_eq!(store.get(&1).await.as_deref(), Some("ab"));
    }

    #[tokio::test]
    async fn conditional_update_applies_once() {
        let store: MemoryStore<u32, bool> = MemoryStore::new();
        store.insert(1, false).await;

        let first = store.update_if(&1, |taken| !*taken, |taken| *taken = true).await;
        let second = store.update_if(&1, |taken| !*taken, |taken| *taken = true).await;
        assert_eq!(first, Some(true));
        assert_eq!(second, None);
        assert_eq!(store.get(&1).await, Some(true));
    }

    #[tokio::test]
    async fn update_of_missing_key_is_none() {
        let store: MemoryStore<u32, String> = MemoryStore::new();
        assert!(store.update(&7, |value| value.clear()).await.is_none());
        assert_eq!(store.len().await, 0);
    }
}
