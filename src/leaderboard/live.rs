// Live read merger
//
// A live page is the durable top `skip + limit + margin` rows with the
// tenant's unflushed buffer folded in, re-sorted and cut to the window.
//
// Only entities already inside the overfetched durable window can be
// lifted by their buffered delta. An entity ranked below the window does
// not show up until the next sync, however large its pending delta. This
// keeps a page read bounded by the window size instead of the tenant size.

use crate::buffer::ScoreBuffer;
use crate::core::{
    EntityId, LeaderboardRow, LeaderboardVariant, LiveStats, Result, TenantId, apply_delta,
};
use crate::storage::ScoreStore;
use std::cmp::Reverse;
use std::sync::Arc;
use tracing::trace;

#[derive(Clone)]
pub struct LiveLeaderboard {
    store: Arc<dyn ScoreStore>,
    buffer: ScoreBuffer,
    overfetch_margin: usize,
}

impl LiveLeaderboard {
    pub fn new(store: Arc<dyn ScoreStore>, buffer: ScoreBuffer, overfetch_margin: usize) -> Self {
        Self {
            store,
            buffer,
            overfetch_margin,
        }
    }

    /// Ranked page `[skip, skip + limit)` of `variant`, buffered deltas included.
    pub async fn top(
        &self,
        tenant: &TenantId,
        variant: LeaderboardVariant,
        limit: usize,
        skip: usize,
    ) -> Result<Vec<LeaderboardRow>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let window = skip
            .saturating_add(limit)
            .saturating_add(self.overfetch_margin);

        let (durable, pending) = tokio::try_join!(
            self.store.top(tenant, variant, window, 0),
            self.buffer.pending(tenant),
        )?;

        trace!(
            tenant = %tenant,
            durable = durable.len(),
            pending = pending.len(),
            "merging live page"
        );

        let mut merged: Vec<LeaderboardRow> = durable
            .into_iter()
            .map(|record| {
                let delta = pending.get(&record.entity_id).copied().unwrap_or(0);
                LeaderboardRow {
                    entity_id: record.entity_id,
                    rank: 0,
                    daily_score: apply_delta(record.daily_score, delta),
                    weekly_score: apply_delta(record.weekly_score, delta),
                    lifetime_score: apply_delta(record.lifetime_score, delta),
                }
            })
            .filter(|row| row.score(variant) > 0)
            .collect();

        // Stable: equal merged scores keep the durable order.
        merged.sort_by_key(|row| Reverse(row.score(variant)));

        Ok(merged
            .into_iter()
            .skip(skip)
            .take(limit)
            .enumerate()
            .map(|(index, mut row)| {
                row.rank = (skip + index + 1) as u64;
                row
            })
            .collect())
    }

    /// Durable counters plus the entity's buffered delta. Zeroed when nothing is known.
    pub async fn stats(&self, tenant: &TenantId, entity: &EntityId) -> Result<LiveStats> {
        let (record, delta) = tokio::try_join!(
            self.store.get(tenant, entity),
            self.buffer.pending_for(tenant, entity),
        )?;

        Ok(match record {
            Some(record) => LiveStats {
                daily_score: apply_delta(record.daily_score, delta),
                weekly_score: apply_delta(record.weekly_score, delta),
                lifetime_score: apply_delta(record.lifetime_score, delta),
                clan_id: record.clan_id,
            },
            None => LiveStats {
                daily_score: apply_delta(0, delta),
                weekly_score: apply_delta(0, delta),
                lifetime_score: apply_delta(0, delta),
                clan_id: None,
            },
        })
    }
}
