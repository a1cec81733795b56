use crate::core::{EntityId, LeaderboardVariant, ScoreDelta, ScoreRecord, TenantId};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::cmp::Reverse;

/// Ordered index entry: score descending, then entity id ascending.
type IndexKey = (Reverse<u64>, EntityId);

/// How long applied batch ids are remembered for duplicate detection.
const BATCH_ID_RETENTION_HOURS: i64 = 24;

/// All score records of one tenant.
///
/// Backed by persistent maps so that `clone()` is O(1); writers stage
/// changes on a clone and swap it in on commit, which gives all-or-nothing
/// batches without undo logs.
#[derive(Debug, Clone)]
pub struct ScoreTable {
    tenant_id: TenantId,
    records: im::HashMap<EntityId, ScoreRecord>,
    daily: im::OrdSet<IndexKey>,
    weekly: im::OrdSet<IndexKey>,
    lifetime: im::OrdSet<IndexKey>,
    applied_batches: im::HashMap<String, DateTime<Utc>>,
}

impl ScoreTable {
    pub fn new(tenant_id: TenantId) -> Self {
        Self {
            tenant_id,
            records: im::HashMap::new(),
            daily: im::OrdSet::new(),
            weekly: im::OrdSet::new(),
            lifetime: im::OrdSet::new(),
            applied_batches: im::HashMap::new(),
        }
    }

    /// Rebuild a table (and its indexes) from stored records.
    pub fn from_records(
        tenant_id: TenantId,
        records: impl IntoIterator<Item = ScoreRecord>,
        applied_batches: impl IntoIterator<Item = (String, DateTime<Utc>)>,
    ) -> Self {
        let mut table = Self::new(tenant_id);
        for record in records {
            table.put(record);
        }
        table.applied_batches = applied_batches.into_iter().collect();
        table
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, entity_id: &EntityId) -> Option<&ScoreRecord> {
        self.records.get(entity_id)
    }

    pub fn records(&self) -> impl Iterator<Item = &ScoreRecord> {
        self.records.values()
    }

    pub fn applied_batches(&self) -> impl Iterator<Item = (&String, &DateTime<Utc>)> {
        self.applied_batches.iter()
    }

    pub fn has_applied(&self, batch_id: &str) -> bool {
        self.applied_batches.contains_key(batch_id)
    }

    fn index_mut(&mut self, variant: LeaderboardVariant) -> &mut im::OrdSet<IndexKey> {
        match variant {
            LeaderboardVariant::Daily => &mut self.daily,
            LeaderboardVariant::Weekly => &mut self.weekly,
            LeaderboardVariant::Lifetime => &mut self.lifetime,
        }
    }

    fn index(&self, variant: LeaderboardVariant) -> &im::OrdSet<IndexKey> {
        match variant {
            LeaderboardVariant::Daily => &self.daily,
            LeaderboardVariant::Weekly => &self.weekly,
            LeaderboardVariant::Lifetime => &self.lifetime,
        }
    }

    /// Insert or replace a record, keeping the indexes in step.
    fn put(&mut self, record: ScoreRecord) {
        self.unindex(&record.entity_id);
        for variant in LeaderboardVariant::ALL {
            let key = (Reverse(variant.score_of(&record)), record.entity_id.clone());
            self.index_mut(variant).insert(key);
        }
        self.records.insert(record.entity_id.clone(), record);
    }

    fn unindex(&mut self, entity_id: &EntityId) {
        if let Some(old) = self.records.get(entity_id).cloned() {
            for variant in LeaderboardVariant::ALL {
                let key = (Reverse(variant.score_of(&old)), old.entity_id.clone());
                self.index_mut(variant).remove(&key);
            }
        }
    }

    pub fn remove(&mut self, entity_id: &EntityId) -> Option<ScoreRecord> {
        self.unindex(entity_id);
        self.records.remove(entity_id)
    }

    /// Upsert-or-increment all three counters by `delta`.
    ///
    /// A non-positive delta never creates a record, and a record whose
    /// lifetime score reaches zero is dropped.
    pub fn increment(
        &mut self,
        entity_id: &EntityId,
        delta: i64,
        at: DateTime<Utc>,
    ) -> Option<ScoreRecord> {
        if delta == 0 {
            return self.records.get(entity_id).cloned();
        }

        let mut record = match self.records.get(entity_id) {
            Some(existing) => existing.clone(),
            None if delta > 0 => ScoreRecord::new(self.tenant_id.clone(), entity_id.clone(), at),
            None => return None,
        };

        record.apply_delta(delta, at);
        if record.lifetime_score == 0 {
            self.remove(entity_id);
            return None;
        }

        self.put(record.clone());
        Some(record)
    }

    /// Apply a whole batch. Returns the number of entity rows touched.
    pub fn apply_batch(&mut self, deltas: &[ScoreDelta], at: DateTime<Utc>) -> usize {
        let mut touched = 0;
        for entry in deltas.iter().filter(|d| d.delta != 0) {
            let existed = self.records.contains_key(&entry.entity_id);
            let after = self.increment(&entry.entity_id, entry.delta, at);
            if existed || after.is_some() {
                touched += 1;
            }
        }
        touched
    }

    /// Remember a committed batch id and forget ids past retention.
    pub fn record_batch(&mut self, batch_id: &str, at: DateTime<Utc>) {
        let horizon = at - ChronoDuration::hours(BATCH_ID_RETENTION_HOURS);
        self.applied_batches.retain(|_, applied_at| *applied_at >= horizon);
        self.applied_batches.insert(batch_id.to_string(), at);
    }

    /// Lifetime-only decrement with a zero floor. Daily and weekly are untouched.
    pub fn decrement_lifetime(
        &mut self,
        entity_id: &EntityId,
        amount: u64,
        at: DateTime<Utc>,
    ) -> Option<ScoreRecord> {
        let mut record = self.records.get(entity_id)?.clone();
        record.lifetime_score = record.lifetime_score.saturating_sub(amount);
        record.updated_at = at;

        if record.lifetime_score == 0 {
            self.remove(entity_id);
        } else {
            self.put(record.clone());
        }
        Some(record)
    }

    /// Overwrite the lifetime score. Zero deletes the record.
    pub fn set_lifetime(
        &mut self,
        entity_id: &EntityId,
        value: u64,
        at: DateTime<Utc>,
    ) -> Option<ScoreRecord> {
        if value == 0 {
            self.remove(entity_id);
            return None;
        }

        let mut record = self
            .records
            .get(entity_id)
            .cloned()
            .unwrap_or_else(|| ScoreRecord::new(self.tenant_id.clone(), entity_id.clone(), at));
        record.lifetime_score = value;
        record.updated_at = at;
        self.put(record.clone());
        Some(record)
    }

    pub fn set_clan(
        &mut self,
        entity_id: &EntityId,
        clan_id: Option<u16>,
        at: DateTime<Utc>,
    ) -> bool {
        let Some(mut record) = self.records.get(entity_id).cloned() else {
            return false;
        };
        record.clan_id = clan_id;
        record.updated_at = at;
        self.put(record);
        true
    }

    /// Zero one periodic column for every record. Returns how many changed.
    pub fn reset_period(&mut self, variant: LeaderboardVariant, at: DateTime<Utc>) -> usize {
        let dirty: Vec<EntityId> = self
            .index(variant)
            .range(..(Reverse(0), EntityId::default()))
            .map(|(_, entity_id)| entity_id.clone())
            .collect();

        for entity_id in &dirty {
            if let Some(mut record) = self.records.get(entity_id).cloned() {
                match variant {
                    LeaderboardVariant::Daily => record.daily_score = 0,
                    LeaderboardVariant::Weekly => record.weekly_score = 0,
                    LeaderboardVariant::Lifetime => record.lifetime_score = 0,
                }
                record.updated_at = at;
                self.put(record);
            }
        }
        dirty.len()
    }

    /// Records with a positive score for `variant`, best first.
    pub fn top(&self, variant: LeaderboardVariant, limit: usize, skip: usize) -> Vec<ScoreRecord> {
        self.index(variant)
            .iter()
            .take_while(|(Reverse(score), _)| *score > 0)
            .skip(skip)
            .take(limit)
            .filter_map(|(_, entity_id)| self.records.get(entity_id).cloned())
            .collect()
    }

    /// Number of records with a positive score for `variant`.
    pub fn count_active(&self, variant: LeaderboardVariant) -> u64 {
        self.count_above(variant, 0)
    }

    /// Number of records whose `variant` score is strictly greater than `score`.
    pub fn count_above(&self, variant: LeaderboardVariant, score: u64) -> u64 {
        self.index(variant)
            .range(..(Reverse(score), EntityId::default()))
            .count() as u64
    }
}
