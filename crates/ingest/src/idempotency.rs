use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use common::keys;
use common::store::Store;

/// One-credit-per-transaction guard for `mint_success`.
///
/// The marker is claimed before the mint's mutations are staged, so two
/// concurrent requests for the same hash cannot both credit it. If the
/// commit that follows fails, the claim is released so a client retry
/// still counts.
pub struct IdempotencyGuard<S> {
    store: Arc<S>,
    ttl: Duration,
}

impl<S: Store> IdempotencyGuard<S> {
    pub fn new(store: Arc<S>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// `true` when this caller is the first to report `tx_hash`.
    pub async fn claim(&self, tx_hash: &str) -> Result<bool> {
        self.store
            .set_if_absent(&keys::processed_tx(tx_hash), "1", Some(self.ttl))
            .await
    }

    pub async fn release(&self, tx_hash: &str) -> Result<()> {
        self.store.delete(&keys::processed_tx(tx_hash)).await?;
        Ok(())
    }
}
