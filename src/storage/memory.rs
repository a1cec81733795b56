use super::persistence::{DurabilityMode, PersistenceManager, StoreSnapshot, WalEntry};
use super::{ScoreStore, ScoreTable};
use crate::core::{
    BatchOutcome, EntityId, LeaderboardVariant, Result, ScoreDelta, ScoreRecord, TenantId, XpError,
};
use async_trait::async_trait;
use chrono::Utc;
use std::path::Path;
use tokio::sync::{Mutex, RwLock};
use tracing::{Level, event};

type Tables = im::HashMap<TenantId, ScoreTable>;

/// What applying one WAL entry produced.
#[derive(Debug)]
enum Applied {
    Batch(BatchOutcome),
    Record(Option<ScoreRecord>),
    Flag(bool),
    Count(usize),
}

impl Applied {
    fn is_noop(&self) -> bool {
        matches!(
            self,
            Applied::Batch(BatchOutcome::Duplicate) | Applied::Batch(BatchOutcome::Applied(0))
        )
    }
}

/// Durable score store held in memory, optionally backed by WAL + snapshots.
///
/// Every mutation is staged on an O(1) clone of the table map, written to
/// the WAL, and only then swapped in. A failure anywhere before the swap
/// leaves the visible state untouched.
pub struct InMemoryScoreStore {
    tables: RwLock<Tables>,
    persistence: Option<Mutex<PersistenceManager>>,
}

impl InMemoryScoreStore {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables::new()),
            persistence: None,
        }
    }

    /// Open (or create) a persistent store under `data_dir`, replaying the
    /// last snapshot and any WAL written after it.
    pub async fn open<P: AsRef<Path>>(
        data_dir: P,
        durability_mode: DurabilityMode,
        checkpoint_threshold: usize,
    ) -> Result<Self> {
        let mut persistence = PersistenceManager::new(data_dir.as_ref(), durability_mode)?;
        persistence.wal_mut().set_checkpoint_threshold(checkpoint_threshold);

        let (snapshot, entries) = persistence.recover()?;
        let mut tables = match snapshot {
            Some(snapshot) => tables_from_snapshot(snapshot),
            None => Tables::new(),
        };

        let replayed = entries.len();
        for entry in &entries {
            apply_entry(&mut tables, entry);
        }

        event!(
            Level::INFO,
            data_dir = %data_dir.as_ref().display(),
            tenants = tables.len(),
            replayed,
            "score store recovered"
        );

        Ok(Self {
            tables: RwLock::new(tables),
            persistence: Some(Mutex::new(persistence)),
        })
    }

    /// Write a snapshot of the current state and truncate the WAL.
    pub async fn checkpoint(&self) -> Result<()> {
        let Some(persistence) = &self.persistence else {
            return Ok(());
        };
        let tables = self.tables.read().await;
        let mut guard = persistence.lock().await;
        guard.checkpoint(snapshot_of(&tables))
    }

    pub async fn record_count(&self) -> usize {
        self.tables.read().await.values().map(|t| t.len()).sum()
    }

    async fn commit(&self, entry: WalEntry) -> Result<Applied> {
        let mut tables = self.tables.write().await;
        let mut staged = tables.clone();
        let applied = apply_entry(&mut staged, &entry);
        if applied.is_noop() {
            return Ok(applied);
        }

        if let Some(persistence) = &self.persistence {
            let mut guard = persistence.lock().await;
            guard.log(&entry)?;
            *tables = staged;

            if guard.needs_checkpoint() {
                if let Err(err) = guard.checkpoint(snapshot_of(&tables)) {
                    event!(Level::ERROR, error = %err, "score store checkpoint failed");
                }
            }
        } else {
            *tables = staged;
        }

        Ok(applied)
    }

    async fn read<T>(&self, tenant: &TenantId, f: impl FnOnce(&ScoreTable) -> T) -> Option<T> {
        let tables = self.tables.read().await;
        tables.get(tenant).map(f)
    }
}

impl Default for InMemoryScoreStore {
    fn default() -> Self {
        Self::new()
    }
}

fn snapshot_of(tables: &Tables) -> StoreSnapshot {
    let mut records = Vec::new();
    let mut applied_batches = Vec::new();
    for (tenant, table) in tables.iter() {
        records.extend(table.records().cloned());
        applied_batches.extend(
            table
                .applied_batches()
                .map(|(id, at)| (tenant.clone(), id.clone(), *at)),
        );
    }
    StoreSnapshot::new(records, applied_batches)
}

fn tables_from_snapshot(snapshot: StoreSnapshot) -> Tables {
    let mut grouped: std::collections::HashMap<TenantId, (Vec<ScoreRecord>, Vec<_>)> =
        std::collections::HashMap::new();
    for record in snapshot.records {
        grouped.entry(record.tenant_id.clone()).or_default().0.push(record);
    }
    for (tenant, batch_id, at) in snapshot.applied_batches {
        grouped.entry(tenant).or_default().1.push((batch_id, at));
    }

    grouped
        .into_iter()
        .map(|(tenant, (records, batches))| {
            let table = ScoreTable::from_records(tenant.clone(), records, batches);
            (tenant, table)
        })
        .collect()
}

/// Clone the tenant's table (O(1)), mutate it, and put it back.
fn with_table<T>(
    tables: &mut Tables,
    tenant: &TenantId,
    f: impl FnOnce(&mut ScoreTable) -> T,
) -> T {
    let mut table = tables
        .get(tenant)
        .cloned()
        .unwrap_or_else(|| ScoreTable::new(tenant.clone()));
    let out = f(&mut table);
    tables.insert(tenant.clone(), table);
    out
}

/// Single code path for live mutations and WAL replay.
fn apply_entry(tables: &mut Tables, entry: &WalEntry) -> Applied {
    match entry {
        WalEntry::Batch {
            tenant,
            batch_id,
            deltas,
            at,
        } => {
            if let Some(id) = batch_id
                && tables.get(tenant).is_some_and(|t| t.has_applied(id))
            {
                return Applied::Batch(BatchOutcome::Duplicate);
            }
            if deltas.iter().all(|d| d.delta == 0) && batch_id.is_none() {
                return Applied::Batch(BatchOutcome::Applied(0));
            }
            with_table(tables, tenant, |table| {
                let touched = table.apply_batch(deltas, *at);
                if let Some(id) = batch_id {
                    table.record_batch(id, *at);
                }
                Applied::Batch(BatchOutcome::Applied(touched))
            })
        }
        WalEntry::DecrementLifetime {
            tenant,
            entity,
            amount,
            at,
        } => {
            if !tables.get(tenant).is_some_and(|t| t.get(entity).is_some()) {
                return Applied::Record(None);
            }
            with_table(tables, tenant, |table| {
                Applied::Record(table.decrement_lifetime(entity, *amount, *at))
            })
        }
        WalEntry::SetLifetime {
            tenant,
            entity,
            value,
            at,
        } => with_table(tables, tenant, |table| {
            Applied::Record(table.set_lifetime(entity, *value, *at))
        }),
        WalEntry::SetClan {
            tenant,
            entity,
            clan_id,
            at,
        } => {
            if !tables.contains_key(tenant) {
                return Applied::Flag(false);
            }
            with_table(tables, tenant, |table| Applied::Flag(table.set_clan(entity, *clan_id, *at)))
        }
        WalEntry::ResetPeriod { tenant, variant, at } => {
            let targets: Vec<TenantId> = match tenant {
                Some(tenant) if tables.contains_key(tenant) => vec![tenant.clone()],
                Some(_) => Vec::new(),
                None => tables.keys().cloned().collect(),
            };
            let changed: usize = targets
                .iter()
                .map(|tenant| with_table(tables, tenant, |table| table.reset_period(*variant, *at)))
                .sum();
            Applied::Count(changed)
        }
        WalEntry::ResetTenant { tenant } => {
            Applied::Count(tables.remove(tenant).map(|t| t.len()).unwrap_or(0))
        }
        WalEntry::DeleteEntity { tenant, entity } => {
            if !tables.get(tenant).is_some_and(|t| t.get(entity).is_some()) {
                return Applied::Flag(false);
            }
            with_table(tables, tenant, |table| Applied::Flag(table.remove(entity).is_some()))
        }
    }
}

fn unexpected(applied: Applied) -> XpError {
    XpError::StoreError(format!("unexpected apply result {:?}", applied))
}

#[async_trait]
impl ScoreStore for InMemoryScoreStore {
    async fn get(&self, tenant: &TenantId, entity: &EntityId) -> Result<Option<ScoreRecord>> {
        Ok(self.read(tenant, |t| t.get(entity).cloned()).await.flatten())
    }

    async fn increment(
        &self,
        tenant: &TenantId,
        entity: &EntityId,
        delta: i64,
    ) -> Result<Option<ScoreRecord>> {
        self.apply_batch(tenant, None, &[ScoreDelta::new(entity.clone(), delta)])
            .await?;
        self.get(tenant, entity).await
    }

    async fn apply_batch(
        &self,
        tenant: &TenantId,
        batch_id: Option<&str>,
        deltas: &[ScoreDelta],
    ) -> Result<BatchOutcome> {
        let entry = WalEntry::Batch {
            tenant: tenant.clone(),
            batch_id: batch_id.map(str::to_string),
            deltas: deltas.to_vec(),
            at: Utc::now(),
        };
        match self.commit(entry).await? {
            Applied::Batch(outcome) => Ok(outcome),
            other => Err(unexpected(other)),
        }
    }

    async fn decrement_lifetime(
        &self,
        tenant: &TenantId,
        entity: &EntityId,
        amount: u64,
    ) -> Result<Option<ScoreRecord>> {
        let entry = WalEntry::DecrementLifetime {
            tenant: tenant.clone(),
            entity: entity.clone(),
            amount,
            at: Utc::now(),
        };
        match self.commit(entry).await? {
            Applied::Record(record) => Ok(record),
            other => Err(unexpected(other)),
        }
    }

    async fn set_lifetime(
        &self,
        tenant: &TenantId,
        entity: &EntityId,
        value: u64,
    ) -> Result<Option<ScoreRecord>> {
        let entry = WalEntry::SetLifetime {
            tenant: tenant.clone(),
            entity: entity.clone(),
            value,
            at: Utc::now(),
        };
        match self.commit(entry).await? {
            Applied::Record(record) => Ok(record),
            other => Err(unexpected(other)),
        }
    }

    async fn set_clan(
        &self,
        tenant: &TenantId,
        entity: &EntityId,
        clan_id: Option<u16>,
    ) -> Result<bool> {
        let entry = WalEntry::SetClan {
            tenant: tenant.clone(),
            entity: entity.clone(),
            clan_id,
            at: Utc::now(),
        };
        match self.commit(entry).await? {
            Applied::Flag(found) => Ok(found),
            other => Err(unexpected(other)),
        }
    }

    async fn top(
        &self,
        tenant: &TenantId,
        variant: LeaderboardVariant,
        limit: usize,
        skip: usize,
    ) -> Result<Vec<ScoreRecord>> {
        Ok(self
            .read(tenant, |t| t.top(variant, limit, skip))
            .await
            .unwrap_or_default())
    }

    async fn count_active(&self, tenant: &TenantId, variant: LeaderboardVariant) -> Result<u64> {
        Ok(self.read(tenant, |t| t.count_active(variant)).await.unwrap_or(0))
    }

    async fn count_above(
        &self,
        tenant: &TenantId,
        variant: LeaderboardVariant,
        score: u64,
    ) -> Result<u64> {
        Ok(self
            .read(tenant, |t| t.count_above(variant, score))
            .await
            .unwrap_or(0))
    }

    async fn reset_period(
        &self,
        tenant: Option<&TenantId>,
        variant: LeaderboardVariant,
    ) -> Result<usize> {
        if !variant.is_periodic() {
            return Err(XpError::InvalidArgument(
                "lifetime scores are never reset by period rollover".to_string(),
            ));
        }
        let entry = WalEntry::ResetPeriod {
            tenant: tenant.cloned(),
            variant,
            at: Utc::now(),
        };
        match self.commit(entry).await? {
            Applied::Count(changed) => {
                event!(
                    Level::INFO,
                    tenant = tenant.map(|t| t.as_str()).unwrap_or("*"),
                    %variant,
                    changed,
                    "period scores reset"
                );
                Ok(changed)
            }
            other => Err(unexpected(other)),
        }
    }

    async fn reset_tenant(&self, tenant: &TenantId) -> Result<usize> {
        let entry = WalEntry::ResetTenant { tenant: tenant.clone() };
        match self.commit(entry).await? {
            Applied::Count(removed) => Ok(removed),
            other => Err(unexpected(other)),
        }
    }

    async fn delete_entity(&self, tenant: &TenantId, entity: &EntityId) -> Result<bool> {
        let entry = WalEntry::DeleteEntity {
            tenant: tenant.clone(),
            entity: entity.clone(),
        };
        match self.commit(entry).await? {
            Applied::Flag(found) => Ok(found),
            other => Err(unexpected(other)),
        }
    }

    async fn all(&self, tenant: &TenantId) -> Result<Vec<ScoreRecord>> {
        Ok(self
            .read(tenant, |t| t.records().cloned().collect())
            .await
            .unwrap_or_default())
    }
}
