use crate::core::Result;
use async_trait::async_trait;
use std::collections::HashMap;

/// Keyspace of hash maps, shaped after a networked cache service.
///
/// Each call is atomic on its own. Callers never take locks around a
/// sequence of calls; the drain protocol relies only on `rename` being
/// atomic with respect to `incr_by`.
#[async_trait]
pub trait BufferStore: Send + Sync {
    /// Add `delta` to `field` of hash `key`, creating both as needed. Returns the new value.
    async fn incr_by(&self, key: &str, field: &str, delta: i64) -> Result<i64>;

    async fn get_field(&self, key: &str, field: &str) -> Result<Option<i64>>;

    /// All fields of `key`; empty when the key does not exist.
    async fn get_all(&self, key: &str) -> Result<HashMap<String, i64>>;

    async fn delete_field(&self, key: &str, field: &str) -> Result<bool>;

    /// Atomically move `from` to `to`, replacing `to`. `Ok(false)` when `from` does not exist.
    async fn rename(&self, from: &str, to: &str) -> Result<bool>;

    async fn delete(&self, key: &str) -> Result<bool>;

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>>;
}
