//! Event type -> staged mutations.
//!
//! Nothing here touches the store. Handlers only append to the request's
//! [`Batch`]; conditional decisions that need an atomic check (first
//! connect, daily view points, mint credit) arrive pre-resolved in [`Gates`].

mod mint;

use anyhow::Result;
use chrono::{DateTime, Utc};
use common::config::Retention;
use common::funnel::is_funnel_step;
use common::keys;
use common::store::Batch;
use common::time::{day_key, hour_of_day, week_key};
use common::types::{Event, EventType, LedgerEntry, WalletProfile};

use crate::scoring::{self, award_points};
use crate::wallet_tracker::{next_streak, StreakUpdate};

/// Outcomes of the atomic guards run before staging.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Gates {
    /// The wallet was not yet in the connected set.
    pub newly_connected: bool,
    /// The one-time connect bonus has not been paid before.
    pub connect_bonus: bool,
    /// First `collection_view` by this wallet today.
    pub daily_view_points: bool,
    /// This request owns the mint credit for its transaction.
    pub credit_mint: bool,
}

/// Everything a handler may read while staging one event.
pub struct DispatchContext<'a> {
    pub event: &'a Event,
    /// Profile as read before staging; default for anonymous events.
    pub profile: &'a WalletProfile,
    pub gates: Gates,
    pub now: DateTime<Utc>,
    pub today: String,
    pub week: String,
    /// Streak once this event is counted.
    pub streak: StreakUpdate,
    pub retention: &'a Retention,
}

impl<'a> DispatchContext<'a> {
    pub fn new(
        event: &'a Event,
        profile: &'a WalletProfile,
        gates: Gates,
        now: DateTime<Utc>,
        retention: &'a Retention,
    ) -> Self {
        let today = day_key(now);
        let streak = next_streak(profile, &today);
        Self {
            event,
            profile,
            gates,
            now,
            today,
            week: week_key(now),
            streak,
            retention,
        }
    }

    fn daily_key(&self) -> String {
        keys::daily_stats(&self.today)
    }

    /// Bump a global counter and its daily twin.
    fn count(&self, batch: &mut Batch, global_field: &str, daily_field: &str) {
        batch
            .hincr(keys::GLOBAL_STATS, global_field, 1)
            .hincr(self.daily_key(), daily_field, 1);
    }

    fn ledger_entry(&self, points: i64, reason: &str) -> LedgerEntry {
        LedgerEntry {
            points,
            reason: reason.to_string(),
            collection: self.event.collection.clone(),
            tx_hash: None,
            price: None,
            streak: None,
            timestamp: self.event.timestamp,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PointsAward {
    pub reason: &'static str,
    pub points: i64,
}

/// What a handler staged beyond plain counters, for post-commit work.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DispatchSummary {
    pub awards: Vec<PointsAward>,
    pub credited_mint: bool,
}

impl DispatchSummary {
    fn award(reason: &'static str, points: i64) -> Self {
        Self {
            awards: vec![PointsAward { reason, points }],
            credited_mint: false,
        }
    }
}

/// Per-type staging strategy.
pub trait EventHandler: Sync {
    fn stage(&self, ctx: &DispatchContext<'_>, batch: &mut Batch) -> Result<DispatchSummary>;
}

struct PageView;
struct CollectionView;
struct GalleryView;
struct WalletConnect;
struct MintAttempt;
struct MintFailure;
/// Types that only feed the always-on counters and the funnel.
struct CountOnly;

pub fn handler_for(event_type: EventType) -> &'static dyn EventHandler {
    match event_type {
        EventType::PageView => &PageView,
        EventType::CollectionView => &CollectionView,
        EventType::GalleryView => &GalleryView,
        EventType::WalletConnect => &WalletConnect,
        EventType::MintAttempt => &MintAttempt,
        EventType::MintFailure => &MintFailure,
        EventType::MintSuccess => &mint::MintSuccess,
        EventType::MintClick | EventType::TxSent | EventType::Click => &CountOnly,
    }
}

/// Stage every mutation for `ctx.event`: the counters all events share, then
/// the type-specific handler, then bucket expiries.
pub fn dispatch(ctx: &DispatchContext<'_>, batch: &mut Batch) -> Result<DispatchSummary> {
    stage_common(ctx, batch);
    let summary = handler_for(ctx.event.event_type).stage(ctx, batch)?;
    stage_expiries(ctx, batch);
    Ok(summary)
}

fn stage_common(ctx: &DispatchContext<'_>, batch: &mut Batch) {
    let event = ctx.event;
    let daily = ctx.daily_key();

    ctx.count(batch, "total_events", "events");
    batch
        .hincr(&daily, keys::type_field(event.event_type), 1)
        .hincr(&daily, format!("ref:{}", event.referrer), 1)
        .hincr(&daily, format!("device:{}", event.device), 1)
        .hincr(
            keys::hourly_stats(&ctx.today),
            format!("{:02}", hour_of_day(ctx.now)),
            1,
        );
    if let Some(campaign) = &event.campaign {
        batch.hincr(&daily, format!("campaign:{campaign}"), 1);
    }

    if is_funnel_step(event.event_type) {
        let step = event.event_type.as_str();
        batch
            .hincr(keys::GLOBAL_FUNNEL, step, 1)
            .hincr(keys::daily_funnel(&ctx.today), step, 1);
        if let Some(collection) = &event.collection {
            batch.hincr(keys::collection_funnel(collection), step, 1);
        }
    }
}

fn stage_expiries(ctx: &DispatchContext<'_>, batch: &mut Batch) {
    let ttl = ctx.retention.daily_ttl();
    batch
        .expire(ctx.daily_key(), ttl)
        .expire(keys::hourly_stats(&ctx.today), ttl);
    if is_funnel_step(ctx.event.event_type) {
        batch.expire(keys::daily_funnel(&ctx.today), ttl);
    }
}

impl EventHandler for PageView {
    fn stage(&self, ctx: &DispatchContext<'_>, batch: &mut Batch) -> Result<DispatchSummary> {
        ctx.count(batch, "total_views", "views");
        if let Some(page) = &ctx.event.page {
            batch.hincr(keys::page_stats(page), "views", 1);
        }
        Ok(DispatchSummary::default())
    }
}

impl EventHandler for GalleryView {
    fn stage(&self, ctx: &DispatchContext<'_>, batch: &mut Batch) -> Result<DispatchSummary> {
        ctx.count(batch, "total_views", "views");
        batch.hincr(keys::page_stats(keys::GALLERY_PAGE), "views", 1);
        Ok(DispatchSummary::default())
    }
}

impl EventHandler for CollectionView {
    fn stage(&self, ctx: &DispatchContext<'_>, batch: &mut Batch) -> Result<DispatchSummary> {
        ctx.count(batch, "total_views", "views");
        if let Some(collection) = &ctx.event.collection {
            batch.hincr(keys::collection_stats(collection), "views", 1);
        }
        if !ctx.gates.daily_view_points {
            return Ok(DispatchSummary::default());
        }
        let entry = ctx.ledger_entry(scoring::COLLECTION_VIEW_POINTS, "collection_view");
        let points = award_points(ctx, batch, &entry)?;
        Ok(DispatchSummary::award("collection_view", points))
    }
}

impl EventHandler for WalletConnect {
    fn stage(&self, ctx: &DispatchContext<'_>, batch: &mut Batch) -> Result<DispatchSummary> {
        if !ctx.gates.newly_connected {
            return Ok(DispatchSummary::default());
        }
        ctx.count(batch, "total_connects", "connects");
        if !ctx.gates.connect_bonus {
            return Ok(DispatchSummary::default());
        }
        let entry = ctx.ledger_entry(scoring::CONNECT_POINTS, "wallet_connect");
        let points = award_points(ctx, batch, &entry)?;
        Ok(DispatchSummary::award("wallet_connect", points))
    }
}

/// Shared by attempt and failure: global, daily, collection and wallet counters.
fn stage_mint_outcome(ctx: &DispatchContext<'_>, batch: &mut Batch, field: &str) {
    let event = ctx.event;
    ctx.count(batch, &format!("total_{field}"), field);
    if let Some(collection) = &event.collection {
        batch.hincr(keys::collection_stats(collection), field, 1);
    }
    if !event.is_anonymous() {
        batch.hincr(
            keys::wallet_profile(&event.wallet),
            format!("total_{field}"),
            1,
        );
    }
}

impl EventHandler for MintAttempt {
    fn stage(&self, ctx: &DispatchContext<'_>, batch: &mut Batch) -> Result<DispatchSummary> {
        stage_mint_outcome(ctx, batch, "attempts");
        Ok(DispatchSummary::default())
    }
}

impl EventHandler for MintFailure {
    fn stage(&self, ctx: &DispatchContext<'_>, batch: &mut Batch) -> Result<DispatchSummary> {
        stage_mint_outcome(ctx, batch, "failures");
        Ok(DispatchSummary::default())
    }
}

impl EventHandler for CountOnly {
    fn stage(&self, _ctx: &DispatchContext<'_>, _batch: &mut Batch) -> Result<DispatchSummary> {
        Ok(DispatchSummary::default())
    }
}
