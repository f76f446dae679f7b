//! Response bodies for the read API. No store access here.

use common::funnel::FunnelStage;
use common::types::{
    ActivityEntry, CollectionStats, GlobalStats, JourneyEntry, LedgerEntry, WalletProfile,
};
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Period {
    All,
    Week,
}

impl Period {
    pub fn parse(s: Option<&str>) -> Option<Self> {
        match s.unwrap_or("all") {
            "all" => Some(Self::All),
            "week" => Some(Self::Week),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LeaderboardEntry {
    /// 1-based.
    pub rank: u64,
    pub wallet: String,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Leaderboard {
    pub kind: &'static str,
    pub period: Period,
    /// ISO week for weekly boards.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub week: Option<String>,
    pub entries: Vec<LeaderboardEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WalletSummary {
    pub address: String,
    pub profile: WalletProfile,
    /// 1-based rank per all-time board; absent when unranked.
    pub ranks: BTreeMap<&'static str, Option<u64>>,
    pub weekly_ranks: BTreeMap<&'static str, Option<u64>>,
    pub journey: Vec<JourneyEntry>,
    pub points_ledger: Vec<LedgerEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectionSummary {
    pub slug: String,
    pub stats: CollectionStats,
    pub unique_minters: i64,
    pub top_minters: Vec<LeaderboardEntry>,
    pub recent: Vec<ActivityEntry>,
    pub funnel: Vec<FunnelStage>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Cohort {
    pub date: String,
    pub size: usize,
    pub wallets: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HourCount {
    pub hour: u32,
    pub events: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DailySummary {
    pub date: String,
    /// Plain counters (`events`, `views`, `mints`, ...).
    pub totals: BTreeMap<String, f64>,
    pub by_type: BTreeMap<String, i64>,
    pub by_referrer: BTreeMap<String, i64>,
    pub by_device: BTreeMap<String, i64>,
    pub by_campaign: BTreeMap<String, i64>,
    pub hourly: Vec<HourCount>,
    pub funnel: Vec<FunnelStage>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunnelView {
    pub scope: String,
    pub stages: Vec<FunnelStage>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsSummary {
    #[serde(flatten)]
    pub global: GlobalStats,
    pub connected_wallets: i64,
}
