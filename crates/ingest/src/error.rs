use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

/// Why a `/track` request was rejected.
///
/// A duplicate mint transaction is not an error; see
/// [`crate::service::TrackOutcome::AlreadyProcessed`].
#[derive(Debug, thiserror::Error)]
pub enum TrackError {
    #[error("invalid event type: {0:?}")]
    InvalidEventType(String),

    #[error("rate limit exceeded for {identity} on {action} (limit {limit} per window)")]
    RateLimitExceeded {
        identity: String,
        action: String,
        limit: u32,
    },

    #[error("invalid transaction {tx_hash}: {reason}")]
    InvalidTransaction { tx_hash: String, reason: String },

    #[error("store unavailable: {0:#}")]
    Store(#[from] anyhow::Error),
}

impl TrackError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidEventType(_) | Self::InvalidTransaction { .. } => StatusCode::BAD_REQUEST,
            Self::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Label for `mintpulse_events_total{outcome}`.
    pub fn outcome(&self) -> &'static str {
        match self {
            Self::InvalidEventType(_) => "rejected_type",
            Self::RateLimitExceeded { .. } => "rate_limited",
            Self::InvalidTransaction { .. } => "invalid_tx",
            Self::Store(_) => "store_error",
        }
    }

    /// Message safe to hand back to the client. Store failures stay opaque.
    fn public_message(&self) -> String {
        match self {
            Self::Store(_) => "internal error".to_string(),
            other => other.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    success: bool,
    error: String,
}

impl IntoResponse for TrackError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            success: false,
            error: self.public_message(),
        };
        (self.status(), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            TrackError::InvalidEventType("nope".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            TrackError::RateLimitExceeded {
                identity: "0xabc".into(),
                action: "mint_click".into(),
                limit: 20,
            }
            .status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            TrackError::Store(anyhow::anyhow!("disk full")).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_store_error_message_is_opaque() {
        let err = TrackError::Store(anyhow::anyhow!("database is locked"));
        assert_eq!(err.public_message(), "internal error");
        assert!(err.to_string().contains("database is locked"));
    }
}
