use std::sync::Arc;

use common::keys;
use common::store::{Batch, SqliteStore, Store};
use common::time::FixedClock;

/// Concurrent increments to the same counter must never be lost.
#[tokio::test]
async fn concurrent_batches_commute_on_shared_counters() {
    let clock = Arc::new(FixedClock::at_date("2025-01-01").unwrap());
    let store = Arc::new(SqliteStore::open_memory(clock).await.unwrap());

    let mut handles = Vec::new();
    for i in 0..20 {
        let store = Arc::clone(&store);
        handles.push(tokio::spawn(async move {
            let mut batch = Batch::new();
            batch
                .hincr(keys::GLOBAL_STATS, "total_events", 1)
                .zincr(keys::leaderboard(common::types::LeaderboardKind::Mints), format!("0x{}", i % 2), 1.0);
            store.commit(batch).await.unwrap();
        }));
    }
    for h in handles {
        h.await.unwrap();
    }

    let fields = store.hash_get_all(keys::GLOBAL_STATS).await.unwrap();
    assert_eq!(fields["total_events"], "20");
    let board = store
        .zset_rev_range(&keys::leaderboard(common::types::LeaderboardKind::Mints), 0, 10)
        .await
        .unwrap();
    assert_eq!(board.len(), 2);
    assert!(board.iter().all(|(_, score)| (*score - 10.0).abs() < 1e-9));
}

/// Exactly one of many concurrent claimants observes "newly set".
#[tokio::test]
async fn concurrent_set_if_absent_has_single_winner() {
    let clock = Arc::new(FixedClock::at_date("2025-01-01").unwrap());
    let store = Arc::new(SqliteStore::open_memory(clock).await.unwrap());

    let mut handles = Vec::new();
    for _ in 0..16 {
        let store = Arc::clone(&store);
        handles.push(tokio::spawn(async move {
            store
                .set_if_absent(&keys::processed_tx("0xdead"), "1", None)
                .await
                .unwrap()
        }));
    }
    let mut winners = 0;
    for h in handles {
        if h.await.unwrap() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
}
