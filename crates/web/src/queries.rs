/// Store reads for the API. All read-only.
use anyhow::Result;
use common::funnel::funnel_stages;
use common::keys;
use common::store::Store;
use common::types::{
    ActivityEntry, CollectionStats, GlobalStats, JourneyEntry, LeaderboardKind, LedgerEntry,
    WalletProfile,
};
use serde::de::DeserializeOwned;
use std::collections::{BTreeMap, HashMap};

use crate::models::*;

pub const RECENT_LIMIT: usize = 20;

fn ranked(rows: Vec<(String, f64)>) -> Vec<LeaderboardEntry> {
    rows.into_iter()
        .zip(1u64..)
        .map(|((wallet, score), rank)| LeaderboardEntry {
            rank,
            wallet,
            score,
        })
        .collect()
}

/// Decode a JSON list, skipping entries that no longer parse.
fn decode_all<T: DeserializeOwned>(raw: Vec<String>) -> Vec<T> {
    raw.into_iter()
        .filter_map(|entry| serde_json::from_str(&entry).ok())
        .collect()
}

fn count(value: &str) -> i64 {
    value.parse::<f64>().map_or(0, |v| v as i64)
}

pub async fn leaderboard<S: Store>(
    store: &S,
    kind: LeaderboardKind,
    period: Period,
    week: &str,
    limit: usize,
) -> Result<Leaderboard> {
    let (key, week) = match period {
        Period::All => (keys::leaderboard(kind), None),
        Period::Week => (
            keys::weekly_leaderboard(week, kind),
            Some(week.to_string()),
        ),
    };
    let rows = store.zset_rev_range(&key, 0, limit).await?;
    Ok(Leaderboard {
        kind: kind.as_str(),
        period,
        week,
        entries: ranked(rows),
    })
}

async fn rank_of<S: Store>(store: &S, key: &str, wallet: &str) -> Result<Option<u64>> {
    Ok(store.zset_rev_rank(key, wallet).await?.map(|r| r + 1))
}

/// `None` when nothing was ever recorded for the wallet.
pub async fn wallet_summary<S: Store>(
    store: &S,
    wallet: &str,
    week: &str,
) -> Result<Option<WalletSummary>> {
    let fields = store.hash_get_all(&keys::wallet_profile(wallet)).await?;
    if fields.is_empty() {
        return Ok(None);
    }

    let mut ranks = BTreeMap::new();
    let mut weekly_ranks = BTreeMap::new();
    for kind in LeaderboardKind::ALL {
        ranks.insert(
            kind.as_str(),
            rank_of(store, &keys::leaderboard(kind), wallet).await?,
        );
        if kind.has_weekly() {
            weekly_ranks.insert(
                kind.as_str(),
                rank_of(store, &keys::weekly_leaderboard(week, kind), wallet).await?,
            );
        }
    }

    let journey: Vec<JourneyEntry> = decode_all(
        store
            .list_range(&keys::journey(wallet), 0, RECENT_LIMIT)
            .await?,
    );
    let points_ledger: Vec<LedgerEntry> = decode_all(
        store
            .list_range(&keys::points_ledger(wallet), 0, RECENT_LIMIT)
            .await?,
    );

    Ok(Some(WalletSummary {
        address: wallet.to_string(),
        profile: WalletProfile::from_fields(&fields),
        ranks,
        weekly_ranks,
        journey,
        points_ledger,
    }))
}

pub async fn collection_summary<S: Store>(store: &S, slug: &str) -> Result<CollectionSummary> {
    let stats = CollectionStats::from_fields(
        &store.hash_get_all(&keys::collection_stats(slug)).await?,
    );
    let unique_minters = store.set_card(&keys::collection_minters(slug)).await?;
    let top_minters = ranked(
        store
            .zset_rev_range(&keys::collection_leaderboard(slug), 0, 10)
            .await?,
    );
    let recent: Vec<ActivityEntry> = decode_all(
        store
            .list_range(&keys::collection_feed(slug), 0, RECENT_LIMIT)
            .await?,
    );
    let funnel = funnel_stages(&store.hash_get_all(&keys::collection_funnel(slug)).await?);

    Ok(CollectionSummary {
        slug: slug.to_string(),
        stats,
        unique_minters,
        top_minters,
        recent,
        funnel,
    })
}

pub async fn cohort<S: Store>(store: &S, date: &str) -> Result<Cohort> {
    let mut wallets = store.set_members(&keys::cohort(date)).await?;
    wallets.sort();
    Ok(Cohort {
        date: date.to_string(),
        size: wallets.len(),
        wallets,
    })
}

/// Split a daily hash into plain totals and the prefixed dimension counters.
pub fn daily_breakdown(date: &str, fields: &HashMap<String, String>) -> DailySummary {
    let mut summary = DailySummary {
        date: date.to_string(),
        ..DailySummary::default()
    };
    for (field, value) in fields {
        let bucket = if let Some(t) = field.strip_prefix("type:") {
            Some((&mut summary.by_type, t))
        } else if let Some(r) = field.strip_prefix("ref:") {
            Some((&mut summary.by_referrer, r))
        } else if let Some(d) = field.strip_prefix("device:") {
            Some((&mut summary.by_device, d))
        } else if let Some(c) = field.strip_prefix("campaign:") {
            Some((&mut summary.by_campaign, c))
        } else {
            None
        };
        match bucket {
            Some((map, name)) => {
                map.insert(name.to_string(), count(value));
            }
            None => {
                summary
                    .totals
                    .insert(field.clone(), value.parse::<f64>().unwrap_or(0.0));
            }
        }
    }
    summary
}

pub async fn daily<S: Store>(store: &S, date: &str) -> Result<DailySummary> {
    let fields = store.hash_get_all(&keys::daily_stats(date)).await?;
    let mut summary = daily_breakdown(date, &fields);

    let hourly = store.hash_get_all(&keys::hourly_stats(date)).await?;
    summary.hourly = (0..24)
        .map(|hour| HourCount {
            hour,
            events: hourly
                .get(&format!("{hour:02}"))
                .map(String::as_str)
                .map_or(0, count),
        })
        .collect();
    summary.funnel = funnel_stages(&store.hash_get_all(&keys::daily_funnel(date)).await?);
    Ok(summary)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FunnelScope {
    Global,
    Collection(String),
    Daily(String),
}

pub async fn funnel<S: Store>(store: &S, scope: FunnelScope) -> Result<FunnelView> {
    let (key, label) = match scope {
        FunnelScope::Global => (keys::GLOBAL_FUNNEL.to_string(), "global".to_string()),
        FunnelScope::Collection(slug) => (
            keys::collection_funnel(&slug),
            format!("collection:{slug}"),
        ),
        FunnelScope::Daily(date) => (keys::daily_funnel(&date), format!("daily:{date}")),
    };
    let stages = funnel_stages(&store.hash_get_all(&key).await?);
    Ok(FunnelView {
        scope: label,
        stages,
    })
}

pub async fn activity<S: Store>(
    store: &S,
    collection: Option<&str>,
    limit: usize,
) -> Result<Vec<ActivityEntry>> {
    let key = collection.map_or_else(|| keys::GLOBAL_FEED.to_string(), keys::collection_feed);
    Ok(decode_all(store.list_range(&key, 0, limit).await?))
}

pub async fn global_stats<S: Store>(store: &S) -> Result<StatsSummary> {
    let global = GlobalStats::from_fields(&store.hash_get_all(keys::GLOBAL_STATS).await?);
    let connected_wallets = store.set_card(keys::CONNECTED_WALLETS).await?;
    Ok(StatsSummary {
        global,
        connected_wallets,
    })
}
