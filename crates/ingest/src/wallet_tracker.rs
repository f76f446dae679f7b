use anyhow::Result;
use common::keys;
use common::store::Batch;
use common::time::previous_day;
use common::types::{JourneyEntry, WalletProfile};

use crate::dispatch::DispatchContext;

/// Streak state after a wallet is seen on `today`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreakUpdate {
    pub streak: i64,
    pub longest: i64,
    /// False when the wallet was already active today.
    pub changed: bool,
}

/// Consecutive-day streak: same day keeps it, the next day extends it, any
/// gap (or no history) restarts at 1.
pub fn next_streak(profile: &WalletProfile, today: &str) -> StreakUpdate {
    let last = profile.last_active_date.as_deref();
    if last == Some(today) {
        return StreakUpdate {
            streak: profile.streak,
            longest: profile.longest_streak,
            changed: false,
        };
    }

    let yesterday = previous_day(today);
    let streak = match last {
        Some(day) if yesterday.as_deref() == Some(day) => profile.streak + 1,
        _ => 1,
    };
    StreakUpdate {
        streak,
        longest: profile.longest_streak.max(streak),
        changed: true,
    }
}

/// Stage the per-wallet bookkeeping every identified event gets: first-seen
/// and cohort, streak, last activity, and the journey log.
pub fn track_wallet(ctx: &DispatchContext<'_>, batch: &mut Batch) -> Result<()> {
    let event = ctx.event;
    if event.is_anonymous() {
        return Ok(());
    }
    let wallet = event.wallet.as_str();
    let profile_key = keys::wallet_profile(wallet);

    if ctx.profile.first_seen.is_none() {
        batch
            .hset_if_absent(&profile_key, "first_seen", event.timestamp.to_string())
            .sadd(keys::cohort(&ctx.today), wallet);
    }

    if ctx.streak.changed {
        batch
            .hset(&profile_key, "streak", ctx.streak.streak.to_string())
            .hset(&profile_key, "longest_streak", ctx.streak.longest.to_string())
            .hset(&profile_key, "last_active_date", ctx.today.as_str());
    }

    let entry = JourneyEntry {
        event_type: event.event_type.as_str().to_string(),
        collection: event.collection.clone(),
        page: event.page.clone(),
        timestamp: event.timestamp,
    };
    batch
        .hset(&profile_key, "last_active", event.timestamp.to_string())
        .lpush_capped(
            keys::journey(wallet),
            serde_json::to_string(&entry)?,
            keys::JOURNEY_CAP,
        );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::tests::{event, noon};
    use crate::dispatch::Gates;
    use crate::test_support::store_at;
    use common::config::Retention;
    use common::store::Store;
    use common::types::EventType;

    fn active_on(date: &str, streak: i64, longest: i64) -> WalletProfile {
        WalletProfile {
            last_active_date: Some(date.to_string()),
            streak,
            longest_streak: longest,
            ..WalletProfile::default()
        }
    }

    #[test]
    fn test_consecutive_day_extends_streak() {
        let update = next_streak(&active_on("2025-01-01", 1, 1), "2025-01-02");
        assert_eq!(update.streak, 2);
        assert_eq!(update.longest, 2);
        assert!(update.changed);
    }

    #[test]
    fn test_gap_resets_streak() {
        let update = next_streak(&active_on("2025-01-01", 4, 4), "2025-01-05");
        assert_eq!(update.streak, 1);
        assert_eq!(update.longest, 4);
    }

    #[test]
    fn test_same_day_is_unchanged() {
        let update = next_streak(&active_on("2025-01-02", 2, 3), "2025-01-02");
        assert_eq!(
            update,
            StreakUpdate {
                streak: 2,
                longest: 3,
                changed: false
            }
        );
    }

    #[test]
    fn test_first_activity_starts_at_one() {
        let update = next_streak(&WalletProfile::default(), "2025-03-01");
        assert_eq!(update.streak, 1);
        assert_eq!(update.longest, 1);
    }

    #[test]
    fn test_streak_crosses_month_boundary() {
        let update = next_streak(&active_on("2025-02-28", 6, 6), "2025-03-01");
        assert_eq!(update.streak, 7);
    }

    #[tokio::test]
    async fn test_racing_first_events_keep_one_first_seen() {
        let (store, _clock) = store_at("2025-01-01").await;
        let retention = Retention::default();
        // Both requests read the profile before either commits.
        let unseen = WalletProfile::default();

        for offset in [0, 5_000] {
            let mut e = event(EventType::PageView, "0xabc");
            e.timestamp += offset;
            let ctx = DispatchContext::new(&e, &unseen, Gates::default(), noon(), &retention);
            let mut batch = Batch::new();
            track_wallet(&ctx, &mut batch).unwrap();
            store.commit(batch).await.unwrap();
        }

        let profile = WalletProfile::from_fields(
            &store.hash_get_all(&keys::wallet_profile("0xabc")).await.unwrap(),
        );
        assert_eq!(profile.first_seen, Some(1_735_732_800_000));
        assert_eq!(store.set_card(&keys::cohort("2025-01-01")).await.unwrap(), 1);
    }
}
