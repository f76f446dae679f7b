use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;

/// Wallet value recorded when a client does not send one.
pub const ANONYMOUS_WALLET: &str = "anonymous";

/// Every event type the ingestion endpoint accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    PageView,
    WalletConnect,
    CollectionView,
    MintClick,
    MintAttempt,
    TxSent,
    MintSuccess,
    MintFailure,
    GalleryView,
    Click,
}

impl EventType {
    pub const ALL: [EventType; 10] = [
        Self::PageView,
        Self::WalletConnect,
        Self::CollectionView,
        Self::MintClick,
        Self::MintAttempt,
        Self::TxSent,
        Self::MintSuccess,
        Self::MintFailure,
        Self::GalleryView,
        Self::Click,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PageView => "page_view",
            Self::WalletConnect => "wallet_connect",
            Self::CollectionView => "collection_view",
            Self::MintClick => "mint_click",
            Self::MintAttempt => "mint_attempt",
            Self::TxSent => "tx_sent",
            Self::MintSuccess => "mint_success",
            Self::MintFailure => "mint_failure",
            Self::GalleryView => "gallery_view",
            Self::Click => "click",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown event type: {s}"))
    }
}

/// A validated event. Lives for exactly one request.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub event_type: EventType,
    /// Lowercased address, or [`ANONYMOUS_WALLET`].
    pub wallet: String,
    pub collection: Option<String>,
    pub tx_hash: Option<String>,
    pub price: f64,
    pub gas: f64,
    pub referrer: String,
    pub campaign: Option<String>,
    pub device: String,
    pub page: Option<String>,
    pub metadata: Option<serde_json::Value>,
    /// Unix milliseconds.
    pub timestamp: i64,
}

impl Event {
    pub fn is_anonymous(&self) -> bool {
        self.wallet == ANONYMOUS_WALLET
    }
}

fn field_i64(fields: &HashMap<String, String>, name: &str) -> i64 {
    fields
        .get(name)
        .and_then(|v| v.parse::<f64>().ok())
        .map_or(0, |v| v as i64)
}

fn field_f64(fields: &HashMap<String, String>, name: &str) -> f64 {
    fields
        .get(name)
        .and_then(|v| v.parse::<f64>().ok())
        .unwrap_or(0.0)
}

fn field_str(fields: &HashMap<String, String>, name: &str) -> Option<String> {
    fields.get(name).filter(|v| !v.is_empty()).cloned()
}

/// Per-wallet aggregate stored as the `wallet:{address}` hash.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WalletProfile {
    pub total_mints: i64,
    pub total_attempts: i64,
    pub total_failures: i64,
    pub total_points: i64,
    pub total_volume: f64,
    pub total_gas: f64,
    pub streak: i64,
    pub longest_streak: i64,
    pub last_active_date: Option<String>,
    pub last_active: Option<i64>,
    pub first_seen: Option<i64>,
    pub reputation_score: f64,
}

impl WalletProfile {
    pub fn from_fields(fields: &HashMap<String, String>) -> Self {
        Self {
            total_mints: field_i64(fields, "total_mints"),
            total_attempts: field_i64(fields, "total_attempts"),
            total_failures: field_i64(fields, "total_failures"),
            total_points: field_i64(fields, "total_points"),
            total_volume: field_f64(fields, "total_volume"),
            total_gas: field_f64(fields, "total_gas"),
            streak: field_i64(fields, "streak"),
            longest_streak: field_i64(fields, "longest_streak"),
            last_active_date: field_str(fields, "last_active_date"),
            last_active: field_str(fields, "last_active").and_then(|v| v.parse().ok()),
            first_seen: field_str(fields, "first_seen").and_then(|v| v.parse().ok()),
            reputation_score: field_f64(fields, "reputation_score"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CollectionStats {
    pub views: i64,
    pub mints: i64,
    pub attempts: i64,
    pub failures: i64,
    pub volume: f64,
    pub gas: f64,
}

impl CollectionStats {
    pub fn from_fields(fields: &HashMap<String, String>) -> Self {
        Self {
            views: field_i64(fields, "views"),
            mints: field_i64(fields, "mints"),
            attempts: field_i64(fields, "attempts"),
            failures: field_i64(fields, "failures"),
            volume: field_f64(fields, "volume"),
            gas: field_f64(fields, "gas"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GlobalStats {
    pub total_views: i64,
    pub total_mints: i64,
    pub total_attempts: i64,
    pub total_failures: i64,
    pub total_events: i64,
    pub total_connects: i64,
    pub total_volume: f64,
    pub total_gas: f64,
}

impl GlobalStats {
    pub fn from_fields(fields: &HashMap<String, String>) -> Self {
        Self {
            total_views: field_i64(fields, "total_views"),
            total_mints: field_i64(fields, "total_mints"),
            total_attempts: field_i64(fields, "total_attempts"),
            total_failures: field_i64(fields, "total_failures"),
            total_events: field_i64(fields, "total_events"),
            total_connects: field_i64(fields, "total_connects"),
            total_volume: field_f64(fields, "total_volume"),
            total_gas: field_f64(fields, "total_gas"),
        }
    }
}

/// Ranked boards. Weekly variants exist for mints and points only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaderboardKind {
    Mints,
    Volume,
    Gas,
    Points,
    Reputation,
}

impl LeaderboardKind {
    pub const ALL: [LeaderboardKind; 5] = [
        Self::Mints,
        Self::Volume,
        Self::Gas,
        Self::Points,
        Self::Reputation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mints => "mints",
            Self::Volume => "volume",
            Self::Gas => "gas",
            Self::Points => "points",
            Self::Reputation => "reputation",
        }
    }

    pub fn has_weekly(&self) -> bool {
        matches!(self, Self::Mints | Self::Points)
    }
}

impl FromStr for LeaderboardKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| format!("unknown leaderboard: {s}"))
    }
}

/// Entry in the global and per-collection recent-activity feeds and the export log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub wallet: String,
    pub collection: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
    pub price: f64,
    pub gas: f64,
    pub timestamp: i64,
}

/// One line of a wallet's journey log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JourneyEntry {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<String>,
    pub timestamp: i64,
}

/// Audit record of a points decision and the inputs it used.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub points: i64,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub streak: Option<i64>,
    pub timestamp: i64,
}
