/// Write buffer tests
///
/// The rename-based drain against concurrent increments.
/// Run with: cargo test --test write_buffer_tests

use std::sync::Arc;
use tokio::sync::Barrier;
use xpcache::{BufferKeys, BufferStore, EntityId, InMemoryBufferStore, ScoreBuffer, TenantId};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_rename_drain_partitions_increments() {
    let store = Arc::new(InMemoryBufferStore::new());
    let keys = BufferKeys::default();
    let buffer = ScoreBuffer::new(store.clone(), keys.clone());
    let tenant = TenantId::from("guild");

    let writers = 4;
    let writes = 500;
    let barrier = Arc::new(Barrier::new(writers + 1));
    let mut handles = vec![];

    for _ in 0..writers {
        let buffer = buffer.clone();
        let tenant = tenant.clone();
        let barrier = Arc::clone(&barrier);
        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            for i in 0..writes {
                buffer.increment(&tenant, &EntityId::from(format!("u{}", i % 3)), 1).await;
            }
        }));
    }

    barrier.wait().await;
    let mut snapshots = vec![];
    for _ in 0..50 {
        let snapshot = keys.processing_key(&tenant);
        if store.rename(&keys.live_key(&tenant), &snapshot).await.unwrap() {
            snapshots.push(snapshot);
        }
        tokio::task::yield_now().await;
    }

    for handle in handles {
        handle.await.unwrap();
    }

    let mut total: i64 = buffer.pending(&tenant).await.unwrap().values().sum();
    for snapshot in &snapshots {
        total += store.get_all(snapshot).await.unwrap().values().sum::<i64>();
    }
    assert_eq!(total, (writers * writes) as i64);
}

#[tokio::test]
async fn test_snapshot_keys_map_back_to_tenant() {
    let keys = BufferKeys::new("xp", "xp_proc");
    let tenant = TenantId::from("guild:with:colons");

    let live = keys.live_key(&tenant);
    assert_eq!(keys.tenant_of_live(&live), Some(tenant.clone()));

    let first = keys.processing_key(&tenant);
    let second = keys.processing_key(&tenant);
    assert_ne!(first, second);
    assert_eq!(keys.tenant_of_processing(&first), Some(tenant));
    assert!(first.starts_with(&keys.processing_scan_prefix()));
    assert!(!first.starts_with(&keys.live_scan_prefix()));
}

#[tokio::test]
async fn test_live_buffer_recreated_after_drain() {
    let store = Arc::new(InMemoryBufferStore::new());
    let keys = BufferKeys::default();
    let buffer = ScoreBuffer::new(store.clone(), keys.clone());
    let tenant = TenantId::from("guild");
    let entity = EntityId::from("u1");

    buffer.increment(&tenant, &entity, 5).await;
    let snapshot = keys.processing_key(&tenant);
    assert!(store.rename(&keys.live_key(&tenant), &snapshot).await.unwrap());
    assert_eq!(buffer.pending_for(&tenant, &entity).await.unwrap(), 0);

    buffer.increment(&tenant, &entity, 7).await;
    assert_eq!(buffer.pending_for(&tenant, &entity).await.unwrap(), 7);
    assert_eq!(store.get_field(&snapshot, "u1").await.unwrap(), Some(5));

    assert!(!store.rename("xp_buffer:missing", "anywhere").await.unwrap());
}
