// ============================================================================
// Sync Engine
// ============================================================================
//
// Drains tenant buffers into the durable store:
//
//   1. re-flush snapshots left behind by earlier failed cycles
//   2. RENAME every live buffer to a unique snapshot key (the drain)
//   3. read the snapshot, apply it as one batch, delete it on commit
//
// A snapshot is only ever deleted after its batch committed. The snapshot
// key doubles as the batch id, so a snapshot that is flushed twice (e.g.
// the delete failed after commit) is recognised by the store and skipped.
//
// ============================================================================

use crate::buffer::{BufferKeys, BufferStore};
use crate::core::{BatchOutcome, EntityId, Result, ScoreDelta, TenantId, XpError};
use crate::storage::ScoreStore;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{Instrument, Level, debug, event, info_span};

/// Totals for one sync cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Another cycle was already running; nothing was done.
    pub skipped: bool,
    /// Snapshots committed and deleted.
    pub snapshots_flushed: usize,
    /// Snapshots found empty and deleted.
    pub snapshots_empty: usize,
    /// Snapshots whose batch had already been committed.
    pub snapshots_duplicate: usize,
    /// Snapshots left in place for the next cycle.
    pub snapshots_retained: usize,
    /// Entity rows written.
    pub entities_flushed: usize,
    /// Sum of all deltas written. Wider than a single delta so extreme
    /// buffered values cannot overflow the total.
    pub net_delta: i128,
}

impl SyncReport {
    fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }

    fn absorb(&mut self, outcome: FlushOutcome) {
        match outcome {
            FlushOutcome::Empty => self.snapshots_empty += 1,
            FlushOutcome::Duplicate => self.snapshots_duplicate += 1,
            FlushOutcome::Retained => self.snapshots_retained += 1,
            FlushOutcome::Flushed { entities, net_delta } => {
                self.snapshots_flushed += 1;
                self.entities_flushed += entities;
                self.net_delta = self.net_delta.saturating_add(net_delta);
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FlushOutcome {
    Empty,
    Duplicate,
    Retained,
    Flushed { entities: usize, net_delta: i128 },
}

/// Resets the running flag when a cycle ends, including on early return or cancellation.
struct CycleGuard<'a>(&'a AtomicBool);

impl<'a> CycleGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| CycleGuard(flag))
    }
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct SyncEngine {
    buffer: Arc<dyn BufferStore>,
    store: Arc<dyn ScoreStore>,
    keys: BufferKeys,
    transaction_timeout: Duration,
    flush_concurrency: usize,
    running: AtomicBool,
}

impl SyncEngine {
    pub fn new(buffer: Arc<dyn BufferStore>, store: Arc<dyn ScoreStore>, keys: BufferKeys) -> Self {
        Self {
            buffer,
            store,
            keys,
            transaction_timeout: Duration::from_secs(10),
            flush_concurrency: 4,
            running: AtomicBool::new(false),
        }
    }

    pub fn transaction_timeout(mut self, timeout: Duration) -> Self {
        self.transaction_timeout = timeout;
        self
    }

    pub fn flush_concurrency(mut self, concurrency: usize) -> Self {
        self.flush_concurrency = concurrency.max(1);
        self
    }

    /// Run one full sync pass. Returns a skipped report if a pass is already in flight.
    pub async fn run_cycle(&self) -> Result<SyncReport> {
        let Some(_guard) = CycleGuard::acquire(&self.running) else {
            debug!("sync cycle already running, skipping");
            return Ok(SyncReport::skipped());
        };

        let mut snapshots = self.orphaned_snapshots().await?;
        snapshots.extend(self.drain_live_buffers().await?);

        let mut report = SyncReport::default();
        if snapshots.is_empty() {
            return Ok(report);
        }

        let outcomes: Vec<FlushOutcome> = stream::iter(snapshots)
            .map(|(tenant, key)| {
                let span = info_span!("flush_snapshot", tenant = %tenant, key = %key);
                async move { self.flush_snapshot(&tenant, &key).await }.instrument(span)
            })
            .buffer_unordered(self.flush_concurrency)
            .collect()
            .await;

        for outcome in outcomes {
            report.absorb(outcome);
        }

        event!(
            Level::DEBUG,
            flushed = report.snapshots_flushed,
            retained = report.snapshots_retained,
            entities = report.entities_flushed,
            net_delta = report.net_delta,
            "sync cycle finished"
        );
        Ok(report)
    }

    /// Snapshots left under the processing prefix by earlier cycles.
    async fn orphaned_snapshots(&self) -> Result<Vec<(TenantId, String)>> {
        let keys = self
            .buffer
            .keys_with_prefix(&self.keys.processing_scan_prefix())
            .await?;

        Ok(keys
            .into_iter()
            .filter_map(|key| match self.keys.tenant_of_processing(&key) {
                Some(tenant) => Some((tenant, key)),
                None => {
                    event!(Level::WARN, key = %key, "ignoring malformed snapshot key");
                    None
                }
            })
            .collect())
    }

    /// Detach every live buffer by renaming it to a fresh snapshot key.
    async fn drain_live_buffers(&self) -> Result<Vec<(TenantId, String)>> {
        let live_keys = self
            .buffer
            .keys_with_prefix(&self.keys.live_scan_prefix())
            .await?;

        let mut detached = Vec::with_capacity(live_keys.len());
        for key in live_keys {
            let Some(tenant) = self.keys.tenant_of_live(&key) else {
                continue;
            };
            let snapshot_key = self.keys.processing_key(&tenant);
            match self.buffer.rename(&key, &snapshot_key).await {
                Ok(true) => detached.push((tenant, snapshot_key)),
                Ok(false) => debug!(key = %key, "buffer already drained"),
                Err(err) => {
                    event!(Level::ERROR, key = %key, error = %err, "failed to detach buffer");
                }
            }
        }
        Ok(detached)
    }

    async fn flush_snapshot(&self, tenant: &TenantId, key: &str) -> FlushOutcome {
        let contents = match self.buffer.get_all(key).await {
            Ok(contents) => contents,
            Err(err) => {
                event!(Level::ERROR, error = %err, "failed to read snapshot, retaining");
                return FlushOutcome::Retained;
            }
        };

        let deltas: Vec<ScoreDelta> = contents
            .into_iter()
            .filter(|(_, delta)| *delta != 0)
            .map(|(entity, delta)| ScoreDelta::new(EntityId::from(entity), delta))
            .collect();

        if deltas.is_empty() {
            self.delete_snapshot(key).await;
            return FlushOutcome::Empty;
        }

        let net_delta: i128 = deltas.iter().map(|d| i128::from(d.delta)).sum();
        let entities = deltas.len();

        let applied = tokio::time::timeout(
            self.transaction_timeout,
            self.store.apply_batch(tenant, Some(key), &deltas),
        )
        .await
        .unwrap_or(Err(XpError::Timeout(self.transaction_timeout)));

        match applied {
            Ok(BatchOutcome::Applied(_)) => {
                self.delete_snapshot(key).await;
                FlushOutcome::Flushed { entities, net_delta }
            }
            Ok(BatchOutcome::Duplicate) => {
                event!(Level::WARN, "snapshot was already committed, deleting");
                self.delete_snapshot(key).await;
                FlushOutcome::Duplicate
            }
            Err(err) => {
                event!(
                    Level::ERROR,
                    error = %err,
                    transient = err.is_transient(),
                    entities,
                    "batch apply failed, snapshot retained for retry"
                );
                FlushOutcome::Retained
            }
        }
    }

    async fn delete_snapshot(&self, key: &str) {
        if let Err(err) = self.buffer.delete(key).await {
            event!(
                Level::ERROR,
                key = %key,
                error = %err,
                "failed to delete snapshot; it will be recognised as a duplicate next cycle"
            );
        }
    }
}
