#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use xpcache::{
    BatchOutcome, BufferStore, EntityId, InMemoryBufferStore, InMemoryScoreStore,
    LeaderboardVariant, Result, ScoreDelta, ScoreRecord, ScoreStore, TenantId, XpConfig, XpError,
    XpService,
};

/// Durable store wrapper with switchable batch failures, batch latency and call counting.
#[derive(Default)]
pub struct FaultyStore {
    pub inner: InMemoryScoreStore,
    fail_batches: AtomicBool,
    batch_delay_ms: AtomicU64,
    batch_calls: AtomicUsize,
    applied_batches: AtomicUsize,
}

impl FaultyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_batches(&self, fail: bool) {
        self.fail_batches.store(fail, Ordering::SeqCst);
    }

    pub fn delay_batches(&self, delay: Duration) {
        self.batch_delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Every `apply_batch` call, successful or not.
    pub fn batch_calls(&self) -> usize {
        self.batch_calls.load(Ordering::SeqCst)
    }

    /// Calls that committed new data.
    pub fn applied_batches(&self) -> usize {
        self.applied_batches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ScoreStore for FaultyStore {
    async fn get(&self, tenant: &TenantId, entity: &EntityId) -> Result<Option<ScoreRecord>> {
        self.inner.get(tenant, entity).await
    }

    async fn increment(
        &self,
        tenant: &TenantId,
        entity: &EntityId,
        delta: i64,
    ) -> Result<Option<ScoreRecord>> {
        self.inner.increment(tenant, entity, delta).await
    }

    async fn apply_batch(
        &self,
        tenant: &TenantId,
        batch_id: Option<&str>,
        deltas: &[ScoreDelta],
    ) -> Result<BatchOutcome> {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);

        let delay = self.batch_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.fail_batches.load(Ordering::SeqCst) {
            return Err(XpError::StoreError("injected batch failure".to_string()));
        }

        let outcome = self.inner.apply_batch(tenant, batch_id, deltas).await?;
        if matches!(outcome, BatchOutcome::Applied(_)) {
            self.applied_batches.fetch_add(1, Ordering::SeqCst);
        }
        Ok(outcome)
    }

    async fn decrement_lifetime(
        &self,
        tenant: &TenantId,
        entity: &EntityId,
        amount: u64,
    ) -> Result<Option<ScoreRecord>> {
        self.inner.decrement_lifetime(tenant, entity, amount).await
    }

    async fn set_lifetime(
        &self,
        tenant: &TenantId,
        entity: &EntityId,
        value: u64,
    ) -> Result<Option<ScoreRecord>> {
        self.inner.set_lifetime(tenant, entity, value).await
    }

    async fn set_clan(
        &self,
        tenant: &TenantId,
        entity: &EntityId,
        clan_id: Option<u16>,
    ) -> Result<bool> {
        self.inner.set_clan(tenant, entity, clan_id).await
    }

    async fn top(
        &self,
        tenant: &TenantId,
        variant: LeaderboardVariant,
        limit: usize,
        skip: usize,
    ) -> Result<Vec<ScoreRecord>> {
        self.inner.top(tenant, variant, limit, skip).await
    }

    async fn count_active(&self, tenant: &TenantId, variant: LeaderboardVariant) -> Result<u64> {
        self.inner.count_active(tenant, variant).await
    }

    async fn count_above(
        &self,
        tenant: &TenantId,
        variant: LeaderboardVariant,
        score: u64,
    ) -> Result<u64> {
        self.inner.count_above(tenant, variant, score).await
    }

    async fn reset_period(
        &self,
        tenant: Option<&TenantId>,
        variant: LeaderboardVariant,
    ) -> Result<usize> {
        self.inner.reset_period(tenant, variant).await
    }

    async fn reset_tenant(&self, tenant: &TenantId) -> Result<usize> {
        self.inner.reset_tenant(tenant).await
    }

    async fn delete_entity(&self, tenant: &TenantId, entity: &EntityId) -> Result<bool> {
        self.inner.delete_entity(tenant, entity).await
    }

    async fn all(&self, tenant: &TenantId) -> Result<Vec<ScoreRecord>> {
        self.inner.all(tenant).await
    }
}

/// Buffer wrapper whose writes and key deletes can be made to fail.
#[derive(Default)]
pub struct FlakyBuffer {
    pub inner: InMemoryBufferStore,
    fail_writes: AtomicBool,
    fail_deletes: AtomicBool,
}

impl FlakyBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl BufferStore for FlakyBuffer {
    async fn incr_by(&self, key: &str, field: &str, delta: i64) -> Result<i64> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(XpError::BufferError("injected write failure".to_string()));
        }
        self.inner.incr_by(key, field, delta).await
    }

    async fn get_field(&self, key: &str, field: &str) -> Result<Option<i64>> {
        self.inner.get_field(key, field).await
    }

    async fn get_all(&self, key: &str) -> Result<HashMap<String, i64>> {
        self.inner.get_all(key).await
    }

    async fn delete_field(&self, key: &str, field: &str) -> Result<bool> {
        self.inner.delete_field(key, field).await
    }

    async fn rename(&self, from: &str, to: &str) -> Result<bool> {
        self.inner.rename(from, to).await
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(XpError::BufferError("injected delete failure".to_string()));
        }
        self.inner.delete(key).await
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        self.inner.keys_with_prefix(prefix).await
    }
}

pub struct Harness {
    pub service: XpService,
    pub store: Arc<FaultyStore>,
    pub buffer: Arc<FlakyBuffer>,
}

pub fn harness(config: XpConfig) -> Harness {
    let store = Arc::new(FaultyStore::new());
    let buffer = Arc::new(FlakyBuffer::new());
    let service = XpService::new(buffer.clone(), store.clone(), config).unwrap();
    Harness { service, store, buffer }
}

pub async fn seed(store: &dyn ScoreStore, tenant: &TenantId, scores: &[(&str, i64)]) {
    for (entity, score) in scores {
        store.increment(tenant, &EntityId::from(*entity), *score).await.unwrap();
    }
}
