use super::engine::{SyncEngine, SyncReport};
use crate::core::{Result, XpError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{Level, event};

/// Background worker that runs a sync cycle on a fixed interval.
///
/// Cycles run one after another on a single task, so a slow cycle delays the
/// next tick instead of overlapping it.
pub struct SyncWorker {
    engine: Arc<SyncEngine>,
    stop_tx: Option<oneshot::Sender<()>>,
    join_handle: Option<JoinHandle<()>>,
}

impl SyncWorker {
    pub fn spawn(engine: Arc<SyncEngine>, interval: Duration) -> Self {
        let interval = interval.max(Duration::from_millis(10));
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let engine_for_worker = engine.clone();

        let join_handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut stop_rx => {
                        break;
                    }
                    _ = sleep(interval) => {
                        if let Err(err) = engine_for_worker.run_cycle().await {
                            event!(Level::ERROR, error = %err, "sync cycle failed");
                        }
                    }
                }
            }
        });

        event!(Level::INFO, interval_ms = interval.as_millis() as u64, "sync worker started");

        Self {
            engine,
            stop_tx: Some(stop_tx),
            join_handle: Some(join_handle),
        }
    }

    /// Signals the worker to stop, waits for it, then drains whatever is still buffered.
    pub async fn stop(mut self) -> Result<SyncReport> {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }

        if let Some(join_handle) = self.join_handle.take() {
            join_handle
                .await
                .map_err(|err| XpError::WorkerError(format!("sync worker join: {}", err)))?;
        }

        let report = self.engine.run_cycle().await?;
        event!(
            Level::INFO,
            flushed = report.snapshots_flushed,
            retained = report.snapshots_retained,
            "sync worker stopped"
        );
        Ok(report)
    }
}

impl Drop for SyncWorker {
    fn drop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(join_handle) = self.join_handle.take() {
            join_handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{BufferKeys, BufferStore, InMemoryBufferStore};
    use crate::storage::{InMemoryScoreStore, ScoreStore};

    #[tokio::test]
    async fn test_worker_flushes_on_tick() {
        let buffer = Arc::new(InMemoryBufferStore::new());
        let store = Arc::new(InMemoryScoreStore::new());
        let engine = Arc::new(SyncEngine::new(
            buffer.clone(),
            store.clone(),
            BufferKeys::default(),
        ));

        buffer.incr_by("xp_buffer:g1", "u1", 12).await.unwrap();
        let worker = SyncWorker::spawn(engine, Duration::from_millis(20));
        sleep(Duration::from_millis(150)).await;

        let record = store.get(&"g1".into(), &"u1".into()).await.unwrap().unwrap();
        assert_eq!(record.lifetime_score, 12);
        worker.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_drains_remaining_buffer() {
        let buffer = Arc::new(InMemoryBufferStore::new());
        let store = Arc::new(InMemoryScoreStore::new());
        let engine = Arc::new(SyncEngine::new(
            buffer.clone(),
            store.clone(),
            BufferKeys::default(),
        ));

        let worker = SyncWorker::spawn(engine, Duration::from_secs(3600));
        buffer.incr_by("xp_buffer:g1", "u1", 7).await.unwrap();

        let report = worker.stop().await.unwrap();
        assert_eq!(report.snapshots_flushed, 1);
        let record = store.get(&"g1".into(), &"u1".into()).await.unwrap().unwrap();
        assert_eq!(record.lifetime_score, 7);
    }
}
