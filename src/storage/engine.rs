use crate::core::{
    BatchOutcome, EntityId, LeaderboardVariant, Result, ScoreDelta, ScoreRecord, TenantId,
};
use async_trait::async_trait;

/// The durable system of record for scores.
///
/// Implementations must apply `apply_batch` all-or-nothing. Lookups of
/// missing entities are not errors.
#[async_trait]
pub trait ScoreStore: Send + Sync {
    async fn get(&self, tenant: &TenantId, entity: &EntityId) -> Result<Option<ScoreRecord>>;

    /// Point upsert-or-increment of all three counters.
    async fn increment(
        &self,
        tenant: &TenantId,
        entity: &EntityId,
        delta: i64,
    ) -> Result<Option<ScoreRecord>>;

    /// Transactionally apply a batch of increments for one tenant.
    ///
    /// When `batch_id` is given and the store has already committed a batch
    /// with that id for this tenant, nothing is applied.
    async fn apply_batch(
        &self,
        tenant: &TenantId,
        batch_id: Option<&str>,
        deltas: &[ScoreDelta],
    ) -> Result<BatchOutcome>;

    /// Lifetime-only decrement floored at zero; the record is dropped at zero.
    async fn decrement_lifetime(
        &self,
        tenant: &TenantId,
        entity: &EntityId,
        amount: u64,
    ) -> Result<Option<ScoreRecord>>;

    async fn set_lifetime(
        &self,
        tenant: &TenantId,
        entity: &EntityId,
        value: u64,
    ) -> Result<Option<ScoreRecord>>;

    async fn set_clan(
        &self,
        tenant: &TenantId,
        entity: &EntityId,
        clan_id: Option<u16>,
    ) -> Result<bool>;

    /// Records with score > 0 for `variant`, descending.
    async fn top(
        &self,
        tenant: &TenantId,
        variant: LeaderboardVariant,
        limit: usize,
        skip: usize,
    ) -> Result<Vec<ScoreRecord>>;

    async fn count_active(&self, tenant: &TenantId, variant: LeaderboardVariant) -> Result<u64>;

    /// Records whose `variant` score is strictly greater than `score`.
    async fn count_above(
        &self,
        tenant: &TenantId,
        variant: LeaderboardVariant,
        score: u64,
    ) -> Result<u64>;

    /// Zero a periodic column for one tenant, or every tenant when `tenant` is `None`.
    async fn reset_period(
        &self,
        tenant: Option<&TenantId>,
        variant: LeaderboardVariant,
    ) -> Result<usize>;

    async fn reset_tenant(&self, tenant: &TenantId) -> Result<usize>;

    async fn delete_entity(&self, tenant: &TenantId, entity: &EntityId) -> Result<bool>;

    async fn all(&self, tenant: &TenantId) -> Result<Vec<ScoreRecord>>;
}
