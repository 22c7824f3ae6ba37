use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use scansync_core::util::user_fingerprint;
use tokio::sync::Mutex;

use crate::config::AppConfig;
use crate::error::AppError;

/// Fixed-window limiter keyed by endpoint and user.
#[derive(Clone)]
pub struct EndpointRateLimiter {
    state: Arc<Mutex<HashMap<String, RateWindow>>>,
    window: Duration,
    token_limit: u32,
    push_limit: u32,
    metrics: Arc<RateLimitMetrics>,
}

#[derive(Clone, Copy)]
pub enum ProtectedEndpoint {
    SyncToken,
    SyncPush,
}

#[derive(Default)]
struct RateLimitMetrics {
    token_allowed: AtomicU64,
    token_limited: AtomicU64,
    push_allowed: AtomicU64,
    push_limited: AtomicU64,
}

#[derive(Debug, Clone, Copy, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitMetricsSnapshot {
    pub token_allowed: u64,
    pub token_limited: u64,
    pub push_allowed: u64,
    pub push_limited: u64,
}

#[derive(Debug, Clone, Copy)]
struct RateWindow {
    started_at: Instant,
    count: u32,
}

impl EndpointRateLimiter {
    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            config.rate_limit_window,
            config.sync_token_rate_limit_per_window,
            config.sync_push_rate_limit_per_window,
        )
    }

    fn new(window: Duration, token_limit: u32, push_limit: u32) -> Self {
        Self {
            state: Arc::new(Mutex::new(HashMap::new())),
            window,
            token_limit,
            push_limit,
            metrics: Arc::new(RateLimitMetrics::default()),
        }
    }

    pub async fn check(&self, endpoint: ProtectedEndpoint, user_id: &str) -> Result<(), AppError> {
        let limit = match endpoint {
            ProtectedEndpoint::SyncToken => self.token_limit,
            ProtectedEndpoint::SyncPush => self.push_limit,
        };

        let key = format!("{}:{user_id}", endpoint.label());
        let now = Instant::now();
        let mut guard = self.state.lock().await;
        let entry = guard.entry(key).or_insert(RateWindow {
            started_at: now,
            count: 0,
        });

        if now.duration_since(entry.started_at) >= self.window {
            entry.started_at = now;
            entry.count = 0;
        }

        if entry.count >= limit {
            // Never advertise a zero-second retry
            let retry_after_secs = self
                .window
                .saturating_sub(now.duration_since(entry.started_at))
                .as_secs()
                .max(1);
            self.counter(endpoint, false).fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                endpoint = endpoint.label(),
                user = user_fingerprint(user_id),
                retry_after_secs,
                "Rate limit exceeded"
            );
            return Err(AppError::too_many_requests(
                format!("Rate limit exceeded for {}", endpoint.label()),
                retry_after_secs,
            ));
        }

        entry.count += 1;
        self.counter(endpoint, true).fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    pub fn metrics_snapshot(&self) -> RateLimitMetricsSnapshot {
        RateLimitMetricsSnapshot {
            token_allowed: self.metrics.token_allowed.load(Ordering::Relaxed),
            token_limited: self.metrics.token_limited.load(Ordering::Relaxed),
            push_allowed: self.metrics.push_allowed.load(Ordering::Relaxed),
            push_limited: self.metrics.push_limited.load(Ordering::Relaxed),
        }
    }

    fn counter(&self, endpoint: ProtectedEndpoint, allowed: bool) -> &AtomicU64 {
        match (endpoint, allowed) {
            (ProtectedEndpoint::SyncToken, true) => &self.metrics.token_allowed,
            (ProtectedEndpoint::SyncToken, false) => &self.metrics.token_limited,
            (ProtectedEndpoint::SyncPush, true) => &self.metrics.push_allowed,
            (ProtectedEndpoint::SyncPush, false) => &self.metrics.push_limited,
        }
    }
}

impl ProtectedEndpoint {
    pub const fn label(self) -> &'static str {
        match self {
            Self::SyncToken => "sync_token",
            Self::SyncPush => "sync_push",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rate_limiter_blocks_after_limit() {
        let limiter = EndpointRateLimiter::new(Duration::from_secs(60), 2, 2);

        limiter
            .check(ProtectedEndpoint::SyncToken, "user-a")
            .await
            .unwrap();
        limiter
            .check(ProtectedEndpoint::SyncToken, "user-a")
            .await
            .unwrap();

        let err = limiter
            .check(ProtectedEndpoint::SyncToken, "user-a")
            .await
            .unwrap_err();
        let AppError::TooManyRequests(_, retry_after) = err else {
            panic!("expected rate limit error");
        };
        assert!((1..=60).contains(&retry_after));

        let metrics = limiter.metrics_snapshot();
        assert_eq!(metrics.token_allowed, 2);
        assert_eq!(metrics.token_limited, 1);
    }

    #[tokio::test]
    async fn rate_limiter_keys_by_user_and_endpoint() {
        let limiter = EndpointRateLimiter::new(Duration::from_secs(60), 1, 1);

        limiter
            .check(ProtectedEndpoint::SyncToken, "user-a")
            .await
            .unwrap();
        limiter
            .check(ProtectedEndpoint::SyncToken, "user-b")
            .await
            .unwrap();
        limiter
            .check(ProtectedEndpoint::SyncPush, "user-a")
            .await
            .unwrap();
        assert!(limiter
            .check(ProtectedEndpoint::SyncPush, "user-a")
            .await
            .is_err());

        let metrics = limiter.metrics_snapshot();
        assert_eq!(metrics.token_allowed, 2);
        assert_eq!(metrics.push_allowed, 1);
        assert_eq!(metrics.push_limited, 1);
    }
}
