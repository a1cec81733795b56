use super::BufferStore;
use crate::core::{Result, XpError};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// In-process keyspace with the same per-command atomicity as a cache server.
pub struct InMemoryBufferStore {
    keyspace: RwLock<HashMap<String, HashMap<String, i64>>>,
}

impl InMemoryBufferStore {
    pub fn new() -> Self {
        Self {
            keyspace: RwLock::new(HashMap::new()),
        }
    }

    pub async fn key_count(&self) -> usize {
        self.keyspace.read().await.len()
    }
}

impl Default for InMemoryBufferStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BufferStore for InMemoryBufferStore {
    async fn incr_by(&self, key: &str, field: &str, delta: i64) -> Result<i64> {
        let mut keyspace = self.keyspace.write().await;
        let value = keyspace
            .entry(key.to_string())
            .or_default()
            .entry(field.to_string())
            .or_insert(0);
        *value = value.checked_add(delta).ok_or_else(|| {
            XpError::BufferError(format!("increment on {}/{} would overflow", key, field))
        })?;
        Ok(*value)
    }

    async fn get_field(&self, key: &str, field: &str) -> Result<Option<i64>> {
        let keyspace = self.keyspace.read().await;
        Ok(keyspace.get(key).and_then(|hash| hash.get(field)).copied())
    }

    async fn get_all(&self, key: &str) -> Result<HashMap<String, i64>> {
        let keyspace = self.keyspace.read().await;
        Ok(keyspace.get(key).cloned().unwrap_or_default())
    }

    async fn delete_field(&self, key: &str, field: &str) -> Result<bool> {
        let mut keyspace = self.keyspace.write().await;
        let Some(hash) = keyspace.get_mut(key) else {
            return Ok(false);
        };
        let removed = hash.remove(field).is_some();
        if hash.is_empty() {
            keyspace.remove(key);
        }
        Ok(removed)
    }

    async fn rename(&self, from: &str, to: &str) -> Result<bool> {
        let mut keyspace = self.keyspace.write().await;
        match keyspace.remove(from) {
            Some(hash) => {
                keyspace.insert(to.to_string(), hash);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.keyspace.write().await.remove(key).is_some())
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let keyspace = self.keyspace.read().await;
        Ok(keyspace
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_incr_by_accumulates() {
        let store = InMemoryBufferStore::new();
        assert_eq!(store.incr_by("k", "a", 5).await.unwrap(), 5);
        assert_eq!(store.incr_by("k", "a", -2).await.unwrap(), 3);
        assert_eq!(store.get_field("k", "a").await.unwrap(), Some(3));
        assert_eq!(store.get_field("k", "b").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_rename_detaches_key() {
        let store = InMemoryBufferStore::new();
        store.incr_by("live", "a", 5).await.unwrap();

        assert!(store.rename("live", "tmp").await.unwrap());
        assert!(store.get_all("live").await.unwrap().is_empty());
        assert_eq!(store.get_all("tmp").await.unwrap().get("a"), Some(&5));

        store.incr_by("live", "a", 1).await.unwrap();
        assert_eq!(store.get_field("live", "a").await.unwrap(), Some(1));
        assert_eq!(store.get_field("tmp", "a").await.unwrap(), Some(5));
    }

    #[tokio::test]
    async fn test_rename_missing_key() {
        let store = InMemoryBufferStore::new();
        assert!(!store.rename("nothing", "tmp").await.unwrap());
        assert_eq!(store.key_count().await, 0);
    }

    #[tokio::test]
    async fn test_delete_last_field_drops_key() {
        let store = InMemoryBufferStore::new();
        store.incr_by("k", "a", 1).await.unwrap();
        assert!(store.delete_field("k", "a").await.unwrap());
        assert_eq!(store.key_count().await, 0);
    }

    #[tokio::test]
    async fn test_overflow_is_rejected() {
        let store = InMemoryBufferStore::new();
        store.incr_by("k", "a", i64::MAX).await.unwrap();
        assert!(store.incr_by("k", "a", 1).await.is_err());
        assert_eq!(store.get_field("k", "a").await.unwrap(), Some(i64::MAX));
    }

    #[tokio::test]
    async fn test_keys_with_prefix() {
        let store = InMemoryBufferStore::new();
        store.incr_by("xp_buffer:1", "a", 1).await.unwrap();
        store.incr_by("xp_buffer_processing:1:0:x", "a", 1).await.unwrap();

        let keys = store.keys_with_prefix("xp_buffer:").await.unwrap();
        assert_eq!(keys, vec!["xp_buffer:1".to_string()]);
    }
}
