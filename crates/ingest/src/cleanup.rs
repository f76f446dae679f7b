use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use common::config::Retention;
use common::keys;
use common::store::{Op, Store};
use common::time::{day_key_days_before, week_key};
use rand::Rng;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub daily_deleted: usize,
    pub weekly_deleted: usize,
    pub expired_purged: u64,
}

/// Deletes date-bucketed aggregates that fell out of retention, then purges
/// keys whose TTL elapsed. Runs opportunistically from the request path and
/// on demand from the CLI.
pub struct Sweeper<S> {
    store: Arc<S>,
    retention: Retention,
    probability: f64,
}

impl<S: Store> Sweeper<S> {
    pub fn new(store: Arc<S>, retention: Retention, probability: f64) -> Self {
        Self {
            store,
            retention,
            probability,
        }
    }

    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let day_cutoff = day_key_days_before(now, i64::from(self.retention.daily_days));
        let week_cutoff = week_key(now - chrono::Duration::days(i64::from(self.retention.weekly_days)));

        let mut stale = Vec::new();
        for prefix in [
            keys::DAILY_PREFIX,
            keys::HOURLY_PREFIX,
            keys::DAILY_FUNNEL_PREFIX,
        ] {
            for key in self.store.keys_with_prefix(prefix).await? {
                if keys::date_suffix(&key, prefix).is_some_and(|date| date < day_cutoff.as_str()) {
                    stale.push(key);
                }
            }
        }
        let daily_deleted = stale.len();

        for key in self.store.keys_with_prefix(keys::WEEKLY_PREFIX).await? {
            if keys::week_of(&key).is_some_and(|week| week < week_cutoff.as_str()) {
                stale.push(key);
            }
        }
        let weekly_deleted = stale.len() - daily_deleted;

        if !stale.is_empty() {
            let ops = stale.into_iter().map(|key| Op::Delete { key }).collect();
            self.store.execute(ops).await?;
        }
        let expired_purged = self.store.purge_expired().await?;

        let report = SweepReport {
            daily_deleted,
            weekly_deleted,
            expired_purged,
        };
        metrics::counter!("mintpulse_sweep_deleted_keys_total")
            .increment((daily_deleted + weekly_deleted) as u64 + expired_purged);
        tracing::info!(
            daily_deleted,
            weekly_deleted,
            expired_purged,
            %day_cutoff,
            %week_cutoff,
            "retention sweep finished"
        );
        Ok(report)
    }

    /// Roll the dice; on a hit, sweep in the background. Failures are logged.
    pub fn maybe_spawn(self: &Arc<Self>, now: DateTime<Utc>) -> bool {
        if self.probability <= 0.0 || !rand::thread_rng().gen_bool(self.probability.min(1.0)) {
            return false;
        }
        let sweeper = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = sweeper.sweep(now).await {
                tracing::warn!(error = %e, "retention sweep failed");
            }
        });
        true
    }
}
