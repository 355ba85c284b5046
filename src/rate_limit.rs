//! Fixed-window request counters per (tenant, api).
//!
//! A counter lives for one window. The first hit creates it with an expiry, later hits in the
//! same window increment it, and the first hit after expiry starts a fresh window. Increment and
//! expiry happen in one atomic statement so concurrent requests never lose counts.

use crate::db::{DbError, DbPool, PgPool};
use crate::schema::rate_limit_counters;
use chrono::{DateTime, Duration, Utc};
use diesel::prelude::*;
use diesel::sql_types::{BigInt, Text, Timestamptz};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

pub const WINDOW_SECS: i64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiKind {
    GoogleAds,
    Slack,
    GeminiFlash,
    GeminiPro,
    Default,
}

impl ApiKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApiKind::GoogleAds => "google_ads",
            ApiKind::Slack => "slack",
            ApiKind::GeminiFlash => "gemini_flash",
            ApiKind::GeminiPro => "gemini_pro",
            ApiKind::Default => "default",
        }
    }

    /// Requests allowed per window.
    pub fn limit(&self) -> i64 {
        match self {
            ApiKind::GoogleAds => 100,
            ApiKind::Slack => 50,
            ApiKind::GeminiFlash => 60,
            ApiKind::GeminiPro => 10,
            ApiKind::Default => 100,
        }
    }

    pub fn from_path(path: &str) -> ApiKind {
        if path.contains("/google-ads") || path.contains("/ads") {
            ApiKind::GoogleAds
        } else if path.contains("/slack") {
            ApiKind::Slack
        } else if path.contains("/gemini") || path.contains("/ai") {
            ApiKind::GeminiFlash
        } else {
            ApiKind::Default
        }
    }
}

pub fn counter_key(tenant_id: &str, api: ApiKind) -> String {
    format!("ratelimit:{}:{}", tenant_id, api.as_str())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Counter {
    pub count: i64,
    pub expires_at: DateTime<Utc>,
}

/// Storage for window counters. `increment` must be atomic with respect to concurrent callers.
pub trait CounterStore: Send + Sync {
    fn increment(&self, key: &str, window: Duration, now: DateTime<Utc>)
        -> Result<Counter, DbError>;
}

#[derive(QueryableByName)]
struct CounterRow {
    #[diesel(sql_type = BigInt)]
    count: i64,
    #[diesel(sql_type = Timestamptz)]
    expires_at: DateTime<Utc>,
}

const INCREMENT_SQL: &str = "\
INSERT INTO rate_limit_counters (key, count, expires_at)
VALUES ($1, 1, $3)
ON CONFLICT (key) DO UPDATE SET
    count = CASE WHEN rate_limit_counters.expires_at <= $2
        THEN 1 ELSE rate_limit_counters.count + 1 END,
    expires_at = CASE WHEN rate_limit_counters.expires_at <= $2
        THEN EXCLUDED.expires_at ELSE rate_limit_counters.expires_at END
RETURNING count, expires_at";

pub struct PgCounterStore {
    pool: DbPool,
}

impl PgCounterStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

impl CounterStore for PgCounterStore {
    fn increment(
        &self,
        key: &str,
        window: Duration,
        now: DateTime<Utc>,
    ) -> Result<Counter, DbError> {
        let conn = &mut self.pool.get()?;

        let row: CounterRow = diesel::sql_query(INCREMENT_SQL)
            .bind::<Text, _>(key)
            .bind::<Timestamptz, _>(now)
            .bind::<Timestamptz, _>(now + window)
            .get_result(conn)?;

        Ok(Counter {
            count: row.count,
            expires_at: row.expires_at,
        })
    }
}

pub fn purge_expired_counters(pool: &PgPool, now: DateTime<Utc>) -> Result<usize, DbError> {
    let conn = &mut pool.get()?;
    Ok(diesel::delete(
        rate_limit_counters::table.filter(rate_limit_counters::expires_at.le(now)),
    )
    .execute(conn)?)
}

/// Process-local store with the same window semantics as the Postgres one.
#[derive(Default)]
pub struct MemoryCounterStore {
    counters: Mutex<HashMap<String, Counter>>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CounterStore for MemoryCounterStore {
    fn increment(
        &self,
        key: &str,
        window: Duration,
        now: DateTime<Utc>,
    ) -> Result<Counter, DbError> {
        let mut counters = match self.counters.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::warn!("Rate limit counter mutex poisoned, recovering");
                poisoned.into_inner()
            }
        };

        let counter = counters
            .entry(key.to_string())
            .and_modify(|c| {
                if c.expires_at <= now {
                    *c = Counter {
                        count: 1,
                        expires_at: now + window,
                    };
                } else {
                    c.count += 1;
                }
            })
            .or_insert(Counter {
                count: 1,
                expires_at: now + window,
            });

        Ok(*counter)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub allowed: bool,
    pub count: i64,
    pub limit: i64,
    /// Seconds until the window resets; only meaningful when not allowed.
    pub retry_after: u64,
}

impl Decision {
    fn allow(limit: i64) -> Self {
        Decision {
            allowed: true,
            count: 0,
            limit,
            retry_after: 0,
        }
    }

    pub fn evaluate(counter: Counter, limit: i64, window_secs: i64, now: DateTime<Utc>) -> Self {
        if counter.count <= limit {
            return Decision {
                allowed: true,
                count: counter.count,
                limit,
                retry_after: 0,
            };
        }

        let ttl = (counter.expires_at - now).num_seconds();
        let retry_after = if ttl > 0 { ttl } else { window_secs };

        Decision {
            allowed: false,
            count: counter.count,
            limit,
            retry_after: retry_after as u64,
        }
    }
}

#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    window_secs: i64,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn CounterStore>) -> Self {
        Self {
            store,
            window_secs: WINDOW_SECS,
        }
    }

    pub fn postgres(pool: DbPool) -> Self {
        Self::new(Arc::new(PgCounterStore::new(pool)))
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryCounterStore::new()))
    }

    /// Counts one request. Store failures allow the request.
    pub async fn check(&self, tenant_id: &str, api: ApiKind) -> Decision {
        let store = self.store.clone();
        let key = counter_key(tenant_id, api);
        let window = Duration::seconds(self.window_secs);
        let now = Utc::now();

        let result = tokio::task::spawn_blocking(move || store.increment(&key, window, now))
            .await
            .map_err(DbError::from)
            .and_then(|r| r);

        match result {
            Ok(counter) => Decision::evaluate(counter, api.limit(), self.window_secs, now),
            Err(e) => {
                tracing::warn!(
                    tenant_id = %tenant_id,
                    api = api.as_str(),
                    "Rate limit store unavailable, allowing request: {}",
                    e
                );
                Decision::allow(api.limit())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingStore;

    impl CounterStore for FailingStore {
        fn increment(&self, _: &str, _: Duration, _: DateTime<Utc>) -> Result<Counter, DbError> {
            Err(DbError::TaskJoinError("connection refused".into()))
        }
    }

    #[test]
    fn test_api_from_path() {
        assert_eq!(ApiKind::from_path("/api/v1/google-ads/campaigns"), ApiKind::GoogleAds);
        assert_eq!(ApiKind::from_path("/ads/report"), ApiKind::GoogleAds);
        assert_eq!(ApiKind::from_path("/slack/commands"), ApiKind::Slack);
        assert_eq!(ApiKind::from_path("/api/gemini/insight"), ApiKind::GeminiFlash);
        assert_eq!(ApiKind::from_path("/ai/chat"), ApiKind::GeminiFlash);
        assert_eq!(ApiKind::from_path("/api/v1/reports"), ApiKind::Default);
    }

    #[test]
    fn test_limits() {
        assert_eq!(ApiKind::GoogleAds.limit(), 100);
        assert_eq!(ApiKind::Slack.limit(), 50);
        assert_eq!(ApiKind::GeminiFlash.limit(), 60);
        assert_eq!(ApiKind::GeminiPro.limit(), 10);
        assert_eq!(ApiKind::Default.limit(), 100);
    }

    #[test]
    fn test_counter_key() {
        assert_eq!(counter_key("T123", ApiKind::Slack), "ratelimit:T123:slack");
    }

    #[test]
    fn test_memory_store_window_resets() {
        let store = MemoryCounterStore::new();
        let window = Duration::seconds(60);
        let start = Utc::now();

        assert_eq!(store.increment("k", window, start).unwrap().count, 1);
        assert_eq!(store.increment("k", window, start + Duration::seconds(5)).unwrap().count, 2);

        let first = store.increment("k", window, start).unwrap();
        assert_eq!(first.expires_at, start + window);

        let reset = store
            .increment("k", window, start + Duration::seconds(61))
            .unwrap();
        assert_eq!(reset.count, 1);
        assert_eq!(reset.expires_at, start + Duration::seconds(121));
    }

    #[test]
    fn test_decision_retry_after_uses_ttl() {
        let now = Utc::now();
        let counter = Counter {
            count: 11,
            expires_at: now + Duration::seconds(42),
        };

        let decision = Decision::evaluate(counter, 10, 60, now);
        assert!(!decision.allowed);
        assert_eq!(decision.retry_after, 42);
    }

    #[test]
    fn test_decision_retry_after_falls_back_to_window() {
        let now = Utc::now();
        let counter = Counter {
            count: 11,
            expires_at: now,
        };

        assert_eq!(Decision::evaluate(counter, 10, 60, now).retry_after, 60);
    }

    #[test]
    fn test_decision_at_limit_is_allowed() {
        let now = Utc::now();
        let counter = Counter {
            count: 10,
            expires_at: now + Duration::seconds(30),
        };
        assert!(Decision::evaluate(counter, 10, 60, now).allowed);
    }

    #[tokio::test]
    async fn test_limiter_blocks_after_limit() {
        let limiter = RateLimiter::in_memory();

        for _ in 0..ApiKind::GeminiPro.limit() {
            assert!(limiter.check("T1", ApiKind::GeminiPro).await.allowed);
        }

        let blocked = limiter.check("T1", ApiKind::GeminiPro).await;
        assert!(!blocked.allowed);
        assert!(blocked.retry_after >= 1 && blocked.retry_after <= 60);

        // Other tenants and apis have their own counters
        assert!(limiter.check("T2", ApiKind::GeminiPro).await.allowed);
        assert!(limiter.check("T1", ApiKind::Slack).await.allowed);
    }

    #[tokio::test]
    async fn test_store_failure_fails_open() {
        let limiter = RateLimiter::new(Arc::new(FailingStore));
        let decision = limiter.check("T1", ApiKind::Slack).await;
        assert!(decision.allowed);
    }
}
