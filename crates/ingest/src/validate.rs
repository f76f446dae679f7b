use common::types::{Event, EventType, ANONYMOUS_WALLET};
use serde::Deserialize;
use serde_json::Value;

use crate::error::TrackError;

pub const DEFAULT_REFERRER: &str = "direct";
pub const DEFAULT_DEVICE: &str = "unknown";

/// Raw `/track` body as sent by the browser snippet. Everything is optional
/// here; [`TrackRequest::validate`] decides what is required.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackRequest {
    #[serde(rename = "type")]
    pub event_type: Option<String>,
    pub wallet: Option<String>,
    pub collection: Option<String>,
    pub tx_hash: Option<String>,
    /// Number or numeric string.
    pub price: Option<Value>,
    pub gas: Option<Value>,
    pub referrer: Option<String>,
    pub campaign: Option<String>,
    pub device: Option<String>,
    pub page: Option<String>,
    pub metadata: Option<Value>,
    /// Client clock. Only logged; bucketing uses the server clock.
    pub timestamp: Option<i64>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Lenient amount parsing: numbers and numeric strings are accepted,
/// anything negative, non-finite or unparseable counts as zero.
pub fn parse_amount(value: Option<&Value>) -> f64 {
    let amount = match value {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => s.trim().parse::<f64>().unwrap_or(0.0),
        _ => 0.0,
    };
    if amount.is_finite() && amount > 0.0 {
        amount
    } else {
        0.0
    }
}

impl TrackRequest {
    /// Normalise the request into an [`Event`] stamped with `now_ms`.
    pub fn validate(self, now_ms: i64) -> Result<Event, TrackError> {
        let raw_type = self.event_type.unwrap_or_default();
        let event_type = raw_type
            .trim()
            .parse::<EventType>()
            .map_err(|_unknown| TrackError::InvalidEventType(raw_type.clone()))?;

        if let Some(client_ms) = self.timestamp {
            tracing::trace!(client_ms, skew_ms = now_ms - client_ms, "client timestamp");
        }

        let wallet = non_empty(self.wallet)
            .map(|w| w.to_lowercase())
            .unwrap_or_else(|| ANONYMOUS_WALLET.to_string());

        Ok(Event {
            event_type,
            wallet,
            collection: non_empty(self.collection),
            tx_hash: non_empty(self.tx_hash).map(|h| h.to_lowercase()),
            price: parse_amount(self.price.as_ref()),
            gas: parse_amount(self.gas.as_ref()),
            referrer: non_empty(self.referrer).unwrap_or_else(|| DEFAULT_REFERRER.to_string()),
            campaign: non_empty(self.campaign),
            device: non_empty(self.device).unwrap_or_else(|| DEFAULT_DEVICE.to_string()),
            page: non_empty(self.page),
            metadata: self.metadata,
            timestamp: now_ms,
        })
    }
}
