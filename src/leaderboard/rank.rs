use crate::core::{EntityId, LeaderboardVariant, Result, TenantId};
use crate::storage::ScoreStore;
use std::sync::Arc;

/// Rank lookups against durable data only. Lags the live board by up to one sync interval.
///
/// Rank is one plus the number of records with a strictly greater score, so
/// equal scores share a rank and the next distinct score skips ahead
/// (100, 90, 90, 80 ranks as 1, 2, 2, 4).
#[derive(Clone)]
pub struct RankResolver {
    store: Arc<dyn ScoreStore>,
}

impl RankResolver {
    pub fn new(store: Arc<dyn ScoreStore>) -> Self {
        Self { store }
    }

    /// `None` when the entity has no durable record.
    pub async fn rank(
        &self,
        tenant: &TenantId,
        entity: &EntityId,
        variant: LeaderboardVariant,
    ) -> Result<Option<u64>> {
        let Some(record) = self.store.get(tenant, entity).await? else {
            return Ok(None);
        };
        let score = variant.score_of(&record);
        let above = self.store.count_above(tenant, variant, score).await?;
        Ok(Some(above + 1))
    }
}
