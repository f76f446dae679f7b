use anyhow::Result;
use common::keys;
use common::store::Batch;
use common::types::{ActivityEntry, LeaderboardKind, LedgerEntry};

use super::{DispatchContext, DispatchSummary, EventHandler, PointsAward};
use crate::scoring::{award_points, mint_points};

/// A confirmed mint: counters, volume and gas, boards, feeds, export log and
/// points. Only staged when the request holds the mint credit.
pub(super) struct MintSuccess;

impl EventHandler for MintSuccess {
    fn stage(&self, ctx: &DispatchContext<'_>, batch: &mut Batch) -> Result<DispatchSummary> {
        let event = ctx.event;
        let Some(collection) = event.collection.as_deref() else {
            return Ok(DispatchSummary::default());
        };
        if !ctx.gates.credit_mint || event.is_anonymous() {
            return Ok(DispatchSummary::default());
        }
        let wallet = event.wallet.as_str();
        let profile_key = keys::wallet_profile(wallet);
        let collection_key = keys::collection_stats(collection);
        let daily = ctx.daily_key();

        ctx.count(batch, "total_mints", "mints");
        batch
            .hincr(&collection_key, "mints", 1)
            .hincr(&profile_key, "total_mints", 1)
            .hincr_float(keys::GLOBAL_STATS, "total_volume", event.price)
            .hincr_float(&daily, "volume", event.price)
            .hincr_float(&collection_key, "volume", event.price)
            .hincr_float(&profile_key, "total_volume", event.price)
            .hincr_float(keys::GLOBAL_STATS, "total_gas", event.gas)
            .hincr_float(&daily, "gas", event.gas)
            .hincr_float(&collection_key, "gas", event.gas)
            .hincr_float(&profile_key, "total_gas", event.gas)
            .sadd(keys::collection_minters(collection), wallet);

        let weekly_mints = keys::weekly_leaderboard(&ctx.week, LeaderboardKind::Mints);
        batch
            .zincr(keys::leaderboard(LeaderboardKind::Mints), wallet, 1.0)
            .zincr(keys::collection_leaderboard(collection), wallet, 1.0)
            .zincr(keys::leaderboard(LeaderboardKind::Volume), wallet, event.price)
            .zincr(keys::leaderboard(LeaderboardKind::Gas), wallet, event.gas)
            .zincr(weekly_mints.as_str(), wallet, 1.0)
            .expire(weekly_mints, ctx.retention.weekly_ttl());

        let activity = serde_json::to_string(&ActivityEntry {
            wallet: wallet.to_string(),
            collection: collection.to_string(),
            tx_hash: event.tx_hash.clone(),
            price: event.price,
            gas: event.gas,
            timestamp: event.timestamp,
        })?;
        batch
            .lpush_capped(keys::GLOBAL_FEED, activity.as_str(), keys::GLOBAL_FEED_CAP)
            .lpush_capped(
                keys::collection_feed(collection),
                activity.as_str(),
                keys::COLLECTION_FEED_CAP,
            )
            .lpush_capped(keys::EXPORT_LOG, activity, keys::EXPORT_LOG_CAP);

        // Streak as stored before this event's own wallet update.
        let streak = ctx.profile.streak;
        let entry = LedgerEntry {
            points: mint_points(event.price, streak),
            reason: "mint".to_string(),
            collection: Some(collection.to_string()),
            tx_hash: event.tx_hash.clone(),
            price: Some(event.price),
            streak: Some(streak),
            timestamp: event.timestamp,
        };
        let points = award_points(ctx, batch, &entry)?;

        Ok(DispatchSummary {
            awards: vec![PointsAward {
                reason: "mint",
                points,
            }],
            credited_mint: true,
        })
    }
}
