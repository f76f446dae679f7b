use std::sync::Arc;

use common::config::RateLimits;
use common::keys;
use common::store::Store;

use crate::error::TrackError;

/// Fixed-window counter per (identity, action).
pub struct RateLimiter<S> {
    store: Arc<S>,
    limits: RateLimits,
}

impl<S: Store> RateLimiter<S> {
    pub fn new(store: Arc<S>, limits: RateLimits) -> Self {
        Self { store, limits }
    }

    /// Count this request against the window and reject it once the count
    /// passes the action's threshold. The window starts at the first request.
    pub async fn check(&self, identity: &str, action: &str) -> Result<(), TrackError> {
        let key = keys::rate_limit(identity, action);
        let count = self.store.incr(&key, Some(self.limits.window())).await?;

        let limit = self.limits.limit_for(action);
        if count > i64::from(limit) {
            tracing::debug!(identity, action, count, limit, "rate limit exceeded");
            return Err(TrackError::RateLimitExceeded {
                identity: identity.to_string(),
                action: action.to_string(),
                limit,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::store_at;

    #[tokio::test]
    async fn test_twenty_first_mint_click_is_rejected() {
        let (store, _clock) = store_at("2025-01-01").await;
        let limiter = RateLimiter::new(store, RateLimits::default());

        for _ in 0..20 {
            limiter.check("0xabc", "mint_click").await.unwrap();
        }
        let err = limiter.check("0xabc", "mint_click").await.unwrap_err();
        assert!(matches!(
            err,
            TrackError::RateLimitExceeded { limit: 20, .. }
        ));
    }

    #[tokio::test]
    async fn test_window_resets_after_sixty_seconds() {
        let (store, clock) = store_at("2025-01-01").await;
        let limiter = RateLimiter::new(store, RateLimits::default());

        for _ in 0..20 {
            limiter.check("0xabc", "mint_click").await.unwrap();
        }
        assert!(limiter.check("0xabc", "mint_click").await.is_err());

        clock.advance(chrono::Duration::seconds(61));
        limiter.check("0xabc", "mint_click").await.unwrap();
    }

    #[tokio::test]
    async fn test_first_hit_carries_the_window_expiry() {
        let (store, clock) = store_at("2025-01-01").await;
        let limiter = RateLimiter::new(Arc::clone(&store), RateLimits::default());
        let key = keys::rate_limit("0xabc", "page_view");

        limiter.check("0xabc", "page_view").await.unwrap();
        clock.advance(chrono::Duration::seconds(61));
        assert_eq!(store.get(&key).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_counters_are_per_identity_and_action() {
        let (store, _clock) = store_at("2025-01-01").await;
        let limiter = RateLimiter::new(store, RateLimits::default());

        for _ in 0..10 {
            limiter.check("0xabc", "wallet_connect").await.unwrap();
        }
        assert!(limiter.check("0xabc", "wallet_connect").await.is_err());
        limiter.check("0xdef", "wallet_connect").await.unwrap();
        limiter.check("0xabc", "page_view").await.unwrap();
    }
}
