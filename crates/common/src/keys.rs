//! Store key schema. Every aggregate lives under one of these names; nothing
//! outside this module should format a key by hand.

use crate::types::{EventType, LeaderboardKind};

pub const GLOBAL_STATS: &str = "stats:global";
pub const CONNECTED_WALLETS: &str = "wallets:connected";
pub const GLOBAL_FUNNEL: &str = "funnel:global";
pub const GLOBAL_FEED: &str = "feed:global";
pub const EXPORT_LOG: &str = "export:mints";

pub const DAILY_PREFIX: &str = "stats:daily:";
pub const HOURLY_PREFIX: &str = "stats:hourly:";
pub const DAILY_FUNNEL_PREFIX: &str = "funnel:daily:";
pub const WEEKLY_PREFIX: &str = "lb:weekly:";

/// Bounded list lengths.
pub const GLOBAL_FEED_CAP: usize = 100;
pub const COLLECTION_FEED_CAP: usize = 50;
pub const EXPORT_LOG_CAP: usize = 10_000;
pub const JOURNEY_CAP: usize = 200;
pub const LEDGER_CAP: usize = 500;

/// Page bucket used for every `gallery_view`.
pub const GALLERY_PAGE: &str = "gallery";

pub fn daily_stats(date: &str) -> String {
    format!("{DAILY_PREFIX}{date}")
}

pub fn hourly_stats(date: &str) -> String {
    format!("{HOURLY_PREFIX}{date}")
}

pub fn daily_funnel(date: &str) -> String {
    format!("{DAILY_FUNNEL_PREFIX}{date}")
}

pub fn page_stats(page: &str) -> String {
    format!("stats:page:{page}")
}

pub fn collection_stats(slug: &str) -> String {
    format!("stats:collection:{slug}")
}

pub fn collection_minters(slug: &str) -> String {
    format!("collection:{slug}:minters")
}

pub fn collection_funnel(slug: &str) -> String {
    format!("funnel:collection:{slug}")
}

pub fn collection_feed(slug: &str) -> String {
    format!("feed:collection:{slug}")
}

pub fn wallet_profile(wallet: &str) -> String {
    format!("wallet:{wallet}")
}

pub fn journey(wallet: &str) -> String {
    format!("journey:{wallet}")
}

pub fn points_ledger(wallet: &str) -> String {
    format!("points:ledger:{wallet}")
}

pub fn cohort(date: &str) -> String {
    format!("cohort:{date}")
}

pub fn leaderboard(kind: LeaderboardKind) -> String {
    format!("lb:{}", kind.as_str())
}

pub fn collection_leaderboard(slug: &str) -> String {
    format!("lb:collection:{slug}:mints")
}

pub fn weekly_leaderboard(week: &str, kind: LeaderboardKind) -> String {
    format!("{WEEKLY_PREFIX}{week}:{}", kind.as_str())
}

pub fn processed_tx(tx_hash: &str) -> String {
    format!("marker:tx:{tx_hash}")
}

pub fn view_points_marker(wallet: &str, date: &str) -> String {
    format!("marker:view_points:{wallet}:{date}")
}

pub fn connect_bonus_marker(wallet: &str) -> String {
    format!("marker:connect_bonus:{wallet}")
}

pub fn rate_limit(identity: &str, action: &str) -> String {
    format!("ratelimit:{identity}:{action}")
}

/// Daily stats field holding the count for one event type.
pub fn type_field(event_type: EventType) -> String {
    format!("type:{}", event_type.as_str())
}

/// Extracts the trailing date of a daily-bucketed key, e.g. `stats:daily:2025-01-01`.
pub fn date_suffix<'a>(key: &'a str, prefix: &str) -> Option<&'a str> {
    key.strip_prefix(prefix).filter(|rest| rest.len() == 10)
}

/// Extracts the ISO week from `lb:weekly:{week}:{kind}`.
pub fn week_of(key: &str) -> Option<&str> {
    key.strip_prefix(WEEKLY_PREFIX)?.split(':').next()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_daily_key_round_trip() {
        let key = daily_stats("2025-01-02");
        assert_eq!(key, "stats:daily:2025-01-02");
        assert_eq!(date_suffix(&key, DAILY_PREFIX), Some("2025-01-02"));
        assert_eq!(date_suffix("stats:daily:bogus", DAILY_PREFIX), None);
    }

    #[test]
    fn test_weekly_key_parts() {
        let key = weekly_leaderboard("2025-W03", LeaderboardKind::Points);
        assert_eq!(key, "lb:weekly:2025-W03:points");
        assert_eq!(week_of(&key), Some("2025-W03"));
    }
}
