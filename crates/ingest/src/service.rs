use std::sync::Arc;
use std::time::Duration;

use common::config::{Config, Retention};
use common::keys;
use common::store::{Batch, Store};
use common::time::{day_key, Clock};
use common::types::{Event, EventType, WalletProfile};
use rand::Rng;

use crate::chain::{ChainClient, ChainVerifier, Verification};
use crate::cleanup::Sweeper;
use crate::dispatch::{dispatch, DispatchContext, DispatchSummary, Gates};
use crate::error::TrackError;
use crate::idempotency::IdempotencyGuard;
use crate::rate_limit::RateLimiter;
use crate::scoring::recompute_reputation;
use crate::validate::TrackRequest;
use crate::wallet_tracker::track_wallet;

/// Daily view-points markers outlive their day by a margin, then expire.
const VIEW_MARKER_TTL: Duration = Duration::from_secs(2 * 86_400);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackOutcome {
    Recorded { event_id: String },
    /// Mint already credited for this transaction; nothing was written.
    AlreadyProcessed { event_id: String },
}

impl TrackOutcome {
    pub fn event_id(&self) -> &str {
        match self {
            Self::Recorded { event_id } | Self::AlreadyProcessed { event_id } => event_id,
        }
    }
}

/// `evt_{unix_ms}_{16 hex}`.
pub fn new_event_id(now_ms: i64) -> String {
    let suffix: [u8; 8] = rand::thread_rng().gen();
    format!("evt_{now_ms}_{}", hex::encode(suffix))
}

/// Rate-limit identity: the wallet when known, otherwise the client address.
pub fn client_identity(event: &Event, client_ip: Option<&str>) -> String {
    if event.is_anonymous() {
        client_ip.unwrap_or("unknown").to_string()
    } else {
        event.wallet.clone()
    }
}

/// Ingestion pipeline for one tracked event, from validation to commit.
pub struct IngestService<S, C> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    rate_limiter: RateLimiter<S>,
    verifier: ChainVerifier<C>,
    idempotency: IdempotencyGuard<S>,
    sweeper: Arc<Sweeper<S>>,
    retention: Retention,
}

impl<S: Store, C: ChainClient> IngestService<S, C> {
    pub fn new(store: Arc<S>, chain: Option<C>, clock: Arc<dyn Clock>, config: &Config) -> Self {
        let retention = config.retention.clone();
        Self {
            rate_limiter: RateLimiter::new(Arc::clone(&store), config.rate_limits.clone()),
            verifier: ChainVerifier::new(chain, Duration::from_millis(config.chain.timeout_ms)),
            idempotency: IdempotencyGuard::new(Arc::clone(&store), retention.idempotency_ttl()),
            sweeper: Arc::new(Sweeper::new(
                Arc::clone(&store),
                retention.clone(),
                config.cleanup.sweep_probability,
            )),
            store,
            clock,
            retention,
        }
    }

    pub async fn track(
        &self,
        request: TrackRequest,
        client_ip: Option<&str>,
    ) -> Result<TrackOutcome, TrackError> {
        let result = self.track_inner(request, client_ip).await;
        let (event_type, outcome) = match &result {
            Ok((event_type, TrackOutcome::Recorded { .. })) => (event_type.as_str(), "accepted"),
            Ok((event_type, TrackOutcome::AlreadyProcessed { .. })) => {
                (event_type.as_str(), "duplicate")
            }
            Err(e) => ("unknown", e.outcome()),
        };
        metrics::counter!("mintpulse_events_total", "type" => event_type, "outcome" => outcome)
            .increment(1);
        result.map(|(_, outcome)| outcome)
    }

    async fn track_inner(
        &self,
        request: TrackRequest,
        client_ip: Option<&str>,
    ) -> Result<(EventType, TrackOutcome), TrackError> {
        let now = self.clock.now();
        let now_ms = now.timestamp_millis();
        let event = request.validate(now_ms)?;
        let event_id = new_event_id(now_ms);

        let identity = client_identity(&event, client_ip);
        self.rate_limiter
            .check(&identity, event.event_type.as_str())
            .await?;

        let today = day_key(now);
        let mut gates = Gates::default();
        match self.resolve_gates(&event, &today, &mut gates).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::info!(
                    %event_id,
                    tx_hash = event.tx_hash.as_deref().unwrap_or_default(),
                    "mint already processed"
                );
                return Ok((event.event_type, TrackOutcome::AlreadyProcessed { event_id }));
            }
            Err(e) => {
                self.release_gates(&event, gates, &today).await;
                return Err(e);
            }
        }

        let profile = if event.is_anonymous() {
            WalletProfile::default()
        } else {
            let fields = self
                .store
                .hash_get_all(&keys::wallet_profile(&event.wallet))
                .await;
            match fields {
                Ok(fields) => WalletProfile::from_fields(&fields),
                Err(e) => return Err(self.abandon(&event, gates, &today, e).await),
            }
        };

        let ctx = DispatchContext::new(&event, &profile, gates, now, &self.retention);
        let mut batch = Batch::new();
        let staged = dispatch(&ctx, &mut batch).and_then(|summary| {
            track_wallet(&ctx, &mut batch)?;
            Ok(summary)
        });
        let summary = match staged {
            Ok(summary) => summary,
            Err(e) => return Err(self.abandon(&event, gates, &today, e).await),
        };

        let staged_ops = batch.len();
        if let Err(e) = self.store.commit(batch).await {
            return Err(self.abandon(&event, gates, &today, e).await);
        }
        tracing::debug!(
            %event_id,
            event_type = %event.event_type,
            wallet = %event.wallet,
            staged_ops,
            "event recorded"
        );

        self.after_commit(&event, &summary);
        self.sweeper.maybe_spawn(now);
        Ok((event.event_type, TrackOutcome::Recorded { event_id }))
    }

    /// Run the atomic guards for conditional mutations, recording each one
    /// won in `gates` as it lands. `false` means the event is a duplicate mint
    /// and must not be written at all.
    async fn resolve_gates(
        &self,
        event: &Event,
        today: &str,
        gates: &mut Gates,
    ) -> Result<bool, TrackError> {
        if event.is_anonymous() {
            return Ok(true);
        }
        let wallet = event.wallet.as_str();

        match event.event_type {
            EventType::MintSuccess => {
                if event.collection.is_none() {
                    tracing::debug!(wallet, "mint_success without collection, not credited");
                    return Ok(true);
                }
                let Some(tx_hash) = event.tx_hash.as_deref() else {
                    gates.credit_mint = true;
                    return Ok(true);
                };
                if let Verification::Invalid(reason) = self.verifier.verify(tx_hash, wallet).await {
                    tracing::warn!(tx_hash, wallet, %reason, "mint rejected by chain check");
                    return Err(TrackError::InvalidTransaction {
                        tx_hash: tx_hash.to_string(),
                        reason,
                    });
                }
                if !self.idempotency.claim(tx_hash).await? {
                    return Ok(false);
                }
                gates.credit_mint = true;
            }
            EventType::WalletConnect => {
                gates.newly_connected = self.store.set_add(keys::CONNECTED_WALLETS, wallet).await?;
                if gates.newly_connected {
                    gates.connect_bonus = self
                        .store
                        .set_if_absent(&keys::connect_bonus_marker(wallet), "1", None)
                        .await?;
                }
            }
            EventType::CollectionView => {
                gates.daily_view_points = self
                    .store
                    .set_if_absent(
                        &keys::view_points_marker(wallet, today),
                        "1",
                        Some(VIEW_MARKER_TTL),
                    )
                    .await?;
            }
            _ => {}
        }
        Ok(true)
    }

    /// Undo every guard this request won so a retry is credited as if the
    /// failed attempt never happened.
    async fn release_gates(&self, event: &Event, gates: Gates, today: &str) {
        let wallet = event.wallet.as_str();
        if gates.credit_mint {
            if let Some(tx_hash) = event.tx_hash.as_deref() {
                if let Err(e) = self.idempotency.release(tx_hash).await {
                    tracing::error!(tx_hash, error = %e, "failed to release mint claim");
                }
            }
        }

        let mut batch = Batch::new();
        if gates.newly_connected {
            batch.srem(keys::CONNECTED_WALLETS, wallet);
        }
        if gates.connect_bonus {
            batch.del(keys::connect_bonus_marker(wallet));
        }
        if gates.daily_view_points {
            batch.del(keys::view_points_marker(wallet, today));
        }
        if batch.is_empty() {
            return;
        }
        if let Err(e) = self.store.commit(batch).await {
            tracing::error!(wallet, error = %e, "failed to release event gates");
        }
    }

    async fn abandon(
        &self,
        event: &Event,
        gates: Gates,
        today: &str,
        error: anyhow::Error,
    ) -> TrackError {
        self.release_gates(event, gates, today).await;
        tracing::error!(event_type = %event.event_type, error = %error, "event not recorded");
        TrackError::Store(error)
    }

    fn after_commit(&self, event: &Event, summary: &DispatchSummary) {
        for award in &summary.awards {
            metrics::counter!("mintpulse_points_awarded_total", "reason" => award.reason)
                .increment(award.points.max(0) as u64);
        }
        if !summary.credited_mint {
            return;
        }
        let store = Arc::clone(&self.store);
        let wallet = event.wallet.clone();
        tokio::spawn(async move {
            if let Err(e) = recompute_reputation(&*store, &wallet).await {
                tracing::warn!(%wallet, error = %e, "reputation recompute failed");
            }
        });
    }
}
