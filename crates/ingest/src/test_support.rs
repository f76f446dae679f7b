use std::sync::Arc;

use common::store::SqliteStore;
use common::time::{Clock, FixedClock};

/// In-memory store and a clock pinned to noon UTC on `date`.
pub async fn store_at(date: &str) -> (Arc<SqliteStore>, Arc<FixedClock>) {
    let clock = Arc::new(FixedClock::at_date(date).unwrap());
    let store = SqliteStore::open_memory(Arc::clone(&clock) as Arc<dyn Clock>)
        .await
        .unwrap();
    (Arc::new(store), clock)
}
