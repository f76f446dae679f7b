use anyhow::Result;
use common::keys;
use common::store::{Batch, Store};
use common::types::{LeaderboardKind, LedgerEntry, WalletProfile};

use crate::dispatch::DispatchContext;

pub const BASE_MINT_POINTS: f64 = 10.0;
/// Bonus per thousandth of a price unit, so a 0.01 mint already earns the cap.
pub const PRICE_BONUS_PER_MILLI: f64 = 50.0;
pub const MAX_PRICE_BONUS: f64 = 500.0;
pub const STREAK_BONUS_MIN_DAYS: i64 = 3;
pub const STREAK_BONUS_PER_DAY: i64 = 3;

pub const CONNECT_POINTS: i64 = 2;
pub const COLLECTION_VIEW_POINTS: i64 = 1;

/// Points for one credited mint.
pub fn mint_points(price: f64, streak: i64) -> i64 {
    let price_bonus = (price * 1000.0 * PRICE_BONUS_PER_MILLI).min(MAX_PRICE_BONUS);
    let streak_bonus = if streak >= STREAK_BONUS_MIN_DAYS {
        streak * STREAK_BONUS_PER_DAY
    } else {
        0
    };
    (BASE_MINT_POINTS + price_bonus + streak_bonus as f64).round() as i64
}

/// Stage a points award: profile total, all-time and weekly boards, and a
/// ledger entry recording why. Returns the points staged.
pub fn award_points(
    ctx: &DispatchContext<'_>,
    batch: &mut Batch,
    entry: &LedgerEntry,
) -> Result<i64> {
    let wallet = ctx.event.wallet.as_str();
    let weekly = keys::weekly_leaderboard(&ctx.week, LeaderboardKind::Points);
    let points = entry.points as f64;

    batch
        .hincr(keys::wallet_profile(wallet), "total_points", entry.points)
        .zincr(keys::leaderboard(LeaderboardKind::Points), wallet, points)
        .zincr(weekly.as_str(), wallet, points)
        .expire(weekly, ctx.retention.weekly_ttl())
        .lpush_capped(
            keys::points_ledger(wallet),
            serde_json::to_string(entry)?,
            keys::LEDGER_CAP,
        );
    Ok(entry.points)
}

/// Composite 0+ score from mint history, volume, streak and success rate.
pub fn reputation_score(profile: &WalletProfile) -> f64 {
    let attempts = profile.total_attempts.max(1) as f64;
    let success_rate = profile.total_mints as f64 / attempts;
    let failure_rate = profile.total_failures as f64 / attempts;
    let volume_term = if profile.total_volume > 0.0 {
        (profile.total_volume + 1.0).ln() * 10.0
    } else {
        0.0
    };

    let score = profile.total_mints as f64 * 2.0
        + volume_term
        + profile.streak as f64 * 5.0
        + success_rate * 20.0
        - failure_rate * 10.0;
    (score.max(0.0) * 100.0).round() / 100.0
}

/// Re-read the wallet profile and overwrite its reputation on the profile and
/// the reputation board.
pub async fn recompute_reputation<S: Store>(store: &S, wallet: &str) -> Result<f64> {
    let fields = store.hash_get_all(&keys::wallet_profile(wallet)).await?;
    let score = reputation_score(&WalletProfile::from_fields(&fields));

    let mut batch = Batch::new();
    batch
        .hset(keys::wallet_profile(wallet), "reputation_score", score.to_string())
        .zset(keys::leaderboard(LeaderboardKind::Reputation), wallet, score);
    store.commit(batch).await?;

    tracing::debug!(wallet, score, "reputation recomputed");
    Ok(score)
}
