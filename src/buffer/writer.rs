use super::{BufferKeys, BufferStore};
use crate::core::{EntityId, Result, TenantId};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{Level, event};

/// Front door for score increments: one hash per tenant, one field per entity.
#[derive(Clone)]
pub struct ScoreBuffer {
    store: Arc<dyn BufferStore>,
    keys: BufferKeys,
}

impl ScoreBuffer {
    pub fn new(store: Arc<dyn BufferStore>, keys: BufferKeys) -> Self {
        Self { store, keys }
    }

    pub fn keys(&self) -> &BufferKeys {
        &self.keys
    }

    pub fn store(&self) -> &Arc<dyn BufferStore> {
        &self.store
    }

    /// Fire-and-forget increment. A failed write is logged and the delta is lost.
    pub async fn increment(&self, tenant: &TenantId, entity: &EntityId, delta: i64) {
        if delta == 0 {
            return;
        }
        if let Err(err) = self.try_increment(tenant, entity, delta).await {
            event!(
                Level::WARN,
                tenant = %tenant,
                entity = %entity,
                delta,
                error = %err,
                "dropping buffered score increment"
            );
        }
    }

    /// Same as [`increment`](Self::increment) but surfaces the error.
    /// Returns the new buffered value.
    pub async fn try_increment(
        &self,
        tenant: &TenantId,
        entity: &EntityId,
        delta: i64,
    ) -> Result<i64> {
        self.store
            .incr_by(&self.keys.live_key(tenant), entity.as_str(), delta)
            .await
    }

    /// Every unflushed delta for `tenant`.
    pub async fn pending(&self, tenant: &TenantId) -> Result<HashMap<EntityId, i64>> {
        let raw = self.store.get_all(&self.keys.live_key(tenant)).await?;
        Ok(raw
            .into_iter()
            .map(|(entity, delta)| (EntityId::from(entity), delta))
            .collect())
    }

    pub async fn pending_for(&self, tenant: &TenantId, entity: &EntityId) -> Result<i64> {
        Ok(self
            .store
            .get_field(&self.keys.live_key(tenant), entity.as_str())
            .await?
            .unwrap_or(0))
    }

    /// Drop the whole live buffer of a tenant.
    pub async fn discard(&self, tenant: &TenantId) -> Result<bool> {
        self.store.delete(&self.keys.live_key(tenant)).await
    }

    pub async fn discard_entity(&self, tenant: &TenantId, entity: &EntityId) -> Result<bool> {
        self.store
            .delete_field(&self.keys.live_key(tenant), entity.as_str())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::InMemoryBufferStore;

    fn buffer() -> ScoreBuffer {
        ScoreBuffer::new(Arc::new(InMemoryBufferStore::new()), BufferKeys::default())
    }

    #[tokio::test]
    async fn test_increment_and_pending() {
        let buffer = buffer();
        let tenant = TenantId::from("g1");
        buffer.increment(&tenant, &"u1".into(), 10).await;
        buffer.increment(&tenant, &"u1".into(), -3).await;
        buffer.increment(&tenant, &"u2".into(), 4).await;

        let pending = buffer.pending(&tenant).await.unwrap();
        assert_eq!(pending.get(&EntityId::from("u1")), Some(&7));
        assert_eq!(pending.get(&EntityId::from("u2")), Some(&4));
        assert_eq!(buffer.pending_for(&tenant, &"u3".into()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_zero_delta_is_ignored() {
        let buffer = buffer();
        buffer.increment(&"g1".into(), &"u1".into(), 0).await;
        assert!(buffer.pending(&"g1".into()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_tenants_are_isolated() {
        let buffer = buffer();
        buffer.increment(&"g1".into(), &"u1".into(), 10).await;
        assert!(buffer.pending(&"g2".into()).await.unwrap().is_empty());
    }
}
