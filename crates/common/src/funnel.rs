use serde::Serialize;
use std::collections::HashMap;

use crate::types::EventType;

/// Fixed step order. Conversion is only ever computed between neighbours here.
pub const FUNNEL_STEPS: [EventType; 6] = [
    EventType::PageView,
    EventType::WalletConnect,
    EventType::CollectionView,
    EventType::MintClick,
    EventType::TxSent,
    EventType::MintSuccess,
];

pub fn is_funnel_step(event_type: EventType) -> bool {
    FUNNEL_STEPS.contains(&event_type)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunnelStage {
    pub step: &'static str,
    pub count: i64,
    /// Percent of the previous step's count; `None` for the first step.
    pub conversion_pct: Option<f64>,
}

/// Percentage `to / from * 100`, rounded to one decimal. Zero when `from` is zero.
pub fn conversion_pct(from: i64, to: i64) -> f64 {
    if from <= 0 {
        return 0.0;
    }
    let pct = to as f64 / from as f64 * 100.0;
    (pct * 10.0).round() / 10.0
}

/// Build the ordered stages from a funnel hash (`step -> count`).
pub fn funnel_stages(counts: &HashMap<String, String>) -> Vec<FunnelStage> {
    let mut stages = Vec::with_capacity(FUNNEL_STEPS.len());
    let mut prev: Option<i64> = None;
    for step in FUNNEL_STEPS {
        let count = counts
            .get(step.as_str())
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(0);
        stages.push(FunnelStage {
            step: step.as_str(),
            count,
            conversion_pct: prev.map(|p| conversion_pct(p, count)),
        });
        prev = Some(count);
    }
    stages
}

/// Human-readable percentage, e.g. `40.0%`.
pub fn format_pct(pct: f64) -> String {
    format!("{pct:.1}%")
}
