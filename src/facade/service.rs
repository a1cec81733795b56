use crate::buffer::{BufferStore, InMemoryBufferStore, ScoreBuffer};
use crate::config::XpConfig;
use crate::core::{
    EntityId, LeaderboardRow, LeaderboardVariant, LiveStats, Result, ScoreRecord, TenantId, XpError,
};
use crate::leaderboard::{LiveLeaderboard, RankResolver};
use crate::storage::{InMemoryScoreStore, ScoreStore};
use crate::sync::{SyncEngine, SyncReport, SyncWorker};
use std::sync::Arc;
use tracing::{Level, event};

/// Entry point for command handlers: buffered writes, live reads, ranks and sync.
///
/// # Examples
///
/// ```
/// use xpcache::{LeaderboardVariant, XpConfig, XpService};
///
/// # #[tokio::main]
/// # async fn main() -> xpcache::Result<()> {
/// let service = XpService::in_memory(XpConfig::default())?;
/// let guild = "guild-1".into();
///
/// service.increment_score(&guild, &"alice".into(), 25).await;
/// let top = service.get_live_top(&guild, LeaderboardVariant::Daily, 10, None).await?;
/// assert!(top.is_empty()); // not synced yet, and alice has no durable row
///
/// service.run_sync_cycle().await?;
/// let top = service.get_live_top(&guild, LeaderboardVariant::Daily, 10, None).await?;
/// assert_eq!(top[0].daily_score, 25);
/// # Ok(())
/// # }
/// ```
pub struct XpService {
    config: XpConfig,
    store: Arc<dyn ScoreStore>,
    buffer: ScoreBuffer,
    engine: Arc<SyncEngine>,
    live: LiveLeaderboard,
    ranks: RankResolver,
}

impl XpService {
    pub fn new(
        buffer_store: Arc<dyn BufferStore>,
        store: Arc<dyn ScoreStore>,
        config: XpConfig,
    ) -> Result<Self> {
        config.validate()?;

        let keys = config.buffer_keys();
        let buffer = ScoreBuffer::new(buffer_store.clone(), keys.clone());
        let engine = SyncEngine::new(buffer_store, store.clone(), keys)
            .transaction_timeout(config.transaction_timeout)
            .flush_concurrency(config.flush_concurrency);
        let live = LiveLeaderboard::new(store.clone(), buffer.clone(), config.overfetch_margin);
        let ranks = RankResolver::new(store.clone());

        Ok(Self {
            config,
            store,
            buffer,
            engine: Arc::new(engine),
            live,
            ranks,
        })
    }

    /// Memory-only buffer and durable store.
    pub fn in_memory(config: XpConfig) -> Result<Self> {
        Self::new(
            Arc::new(InMemoryBufferStore::new()),
            Arc::new(InMemoryScoreStore::new()),
            config,
        )
    }

    /// Like [`in_memory`](Self::in_memory), but the durable store is recovered
    /// from and persisted to `config.data_dir` when one is set.
    pub async fn open(config: XpConfig) -> Result<Self> {
        config.validate()?;
        let store = match &config.data_dir {
            Some(dir) => {
                InMemoryScoreStore::open(
                    dir,
                    config.durability_mode,
                    config.checkpoint_threshold,
                )
                .await?
            }
            None => InMemoryScoreStore::new(),
        };
        Self::new(Arc::new(InMemoryBufferStore::new()), Arc::new(store), config)
    }

    pub fn config(&self) -> &XpConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn ScoreStore> {
        &self.store
    }

    pub fn buffer(&self) -> &ScoreBuffer {
        &self.buffer
    }

    pub fn sync_engine(&self) -> &Arc<SyncEngine> {
        &self.engine
    }

    // ------------------------------------------------------------------
    // Buffered writes and live reads
    // ------------------------------------------------------------------

    /// Buffer a score change. Never fails; a lost write is logged.
    pub async fn increment_score(&self, tenant: &TenantId, entity: &EntityId, delta: i64) {
        self.buffer.increment(tenant, entity, delta).await;
    }

    pub async fn get_live_top(
        &self,
        tenant: &TenantId,
        variant: LeaderboardVariant,
        limit: usize,
        skip: Option<usize>,
    ) -> Result<Vec<LeaderboardRow>> {
        self.live.top(tenant, variant, limit, skip.unwrap_or(0)).await
    }

    pub async fn get_live_stats(&self, tenant: &TenantId, entity: &EntityId) -> Result<LiveStats> {
        self.live.stats(tenant, entity).await
    }

    /// Durable rank, `None` when the entity is unranked.
    pub async fn get_rank(
        &self,
        tenant: &TenantId,
        entity: &EntityId,
        variant: LeaderboardVariant,
    ) -> Result<Option<u64>> {
        self.ranks.rank(tenant, entity, variant).await
    }

    /// Durable records with a positive `variant` score.
    pub async fn leaderboard_size(
        &self,
        tenant: &TenantId,
        variant: LeaderboardVariant,
    ) -> Result<u64> {
        self.store.count_active(tenant, variant).await
    }

    // ------------------------------------------------------------------
    // Sync
    // ------------------------------------------------------------------

    pub async fn run_sync_cycle(&self) -> Result<SyncReport> {
        self.engine.run_cycle().await
    }

    /// Start the background sync loop at `config.sync_interval`.
    pub fn spawn_sync_worker(&self) -> SyncWorker {
        SyncWorker::spawn(self.engine.clone(), self.config.sync_interval)
    }

    // ------------------------------------------------------------------
    // Direct durable operations
    // ------------------------------------------------------------------

    /// Lower the lifetime score without touching daily and weekly. Floors at
    /// zero and removes the record when lifetime hits zero.
    pub async fn deduct_score(
        &self,
        tenant: &TenantId,
        entity: &EntityId,
        amount: u64,
    ) -> Result<Option<ScoreRecord>> {
        self.store.decrement_lifetime(tenant, entity, amount).await
    }

    /// Overwrite the lifetime score. Zero removes the record.
    pub async fn set_score(
        &self,
        tenant: &TenantId,
        entity: &EntityId,
        value: u64,
    ) -> Result<Option<ScoreRecord>> {
        self.store.set_lifetime(tenant, entity, value).await
    }

    pub async fn set_clan(
        &self,
        tenant: &TenantId,
        entity: &EntityId,
        clan_id: Option<u16>,
    ) -> Result<bool> {
        self.store.set_clan(tenant, entity, clan_id).await
    }

    /// Zero the daily or weekly column of one tenant, or of every tenant.
    pub async fn reset_period(
        &self,
        tenant: Option<&TenantId>,
        variant: LeaderboardVariant,
    ) -> Result<usize> {
        if !variant.is_periodic() {
            return Err(XpError::InvalidArgument(format!(
                "{} scores cannot be reset",
                variant
            )));
        }
        self.store.reset_period(tenant, variant).await
    }

    /// Drop every durable record of `tenant` together with its unflushed deltas.
    pub async fn reset_tenant(&self, tenant: &TenantId) -> Result<usize> {
        self.buffer.discard(tenant).await?;
        self.discard_snapshots(tenant).await?;
        let removed = self.store.reset_tenant(tenant).await?;
        event!(Level::INFO, tenant = %tenant, removed, "tenant reset");
        Ok(removed)
    }

    /// Remove an entity's durable record and buffered delta. True if either existed.
    pub async fn delete_entity(&self, tenant: &TenantId, entity: &EntityId) -> Result<bool> {
        let buffered = self.buffer.discard_entity(tenant, entity).await?;
        let stored = self.store.delete_entity(tenant, entity).await?;
        Ok(buffered || stored)
    }

    async fn discard_snapshots(&self, tenant: &TenantId) -> Result<()> {
        let keys = self.buffer.keys();
        let store = self.buffer.store();
        for key in store.keys_with_prefix(&keys.processing_scan_prefix()).await? {
            if keys.tenant_of_processing(&key).as_ref() == Some(tenant) {
                store.delete(&key).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> XpService {
        XpService::in_memory(XpConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn test_rejects_invalid_config() {
        let config = XpConfig::default().flush_concurrency(0);
        assert!(XpService::in_memory(config).is_err());
    }

    #[tokio::test]
    async fn test_reset_lifetime_rejected() {
        let service = service();
        let result = service.reset_period(None, LeaderboardVariant::Lifetime).await;
        assert!(matches!(result, Err(XpError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn test_delete_entity_clears_buffer_and_store() {
        let service = service();
        let tenant = TenantId::from("g");
        let entity = EntityId::from("u");

        service.increment_score(&tenant, &entity, 10).await;
        service.run_sync_cycle().await.unwrap();
        service.increment_score(&tenant, &entity, 5).await;

        assert!(service.delete_entity(&tenant, &entity).await.unwrap());
        assert_eq!(service.get_live_stats(&tenant, &entity).await.unwrap(), LiveStats::default());
        assert!(!service.delete_entity(&tenant, &entity).await.unwrap());
    }

    #[tokio::test]
    async fn test_reset_tenant_discards_pending() {
        let service = service();
        let tenant = TenantId::from("g");

        service.increment_score(&tenant, &"a".into(), 10).await;
        service.run_sync_cycle().await.unwrap();
        service.increment_score(&tenant, &"b".into(), 10).await;

        assert_eq!(service.reset_tenant(&tenant).await.unwrap(), 1);
        service.run_sync_cycle().await.unwrap();
        let size = service
            .leaderboard_size(&tenant, LeaderboardVariant::Lifetime)
            .await
            .unwrap();
        assert_eq!(size, 0);
    }
}
