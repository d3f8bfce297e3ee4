use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;
use tokio::sync::Mutex;

/// Atomic increment-with-expiry primitive shared by the rate limiter and the
/// abuse tracker.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Increment `key` and return the new value. The first increment of a
    /// window arms `ttl`; later increments in the same window keep it.
    async fn incr(&self, key: &str, ttl: Duration) -> Result<i64, sqlx::Error>;
}

/// Counters in a `rag_counters` table. The upsert makes increment-and-fetch
/// a single statement, so concurrent requests never lose an increment.
pub struct PgCounterStore {
    pool: PgPool,
    increments: AtomicU64,
}

impl PgCounterStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            increments: AtomicU64::new(0),
        }
    }

    async fn purge_expired(&self) {
        match sqlx::query("DELETE FROM rag_counters WHERE expires_at < NOW()")
            .execute(&self.pool)
            .await
        {
            Ok(done) => tracing::debug!(rows = done.rows_affected(), "purged expired counters"),
            Err(err) => tracing::warn!(error = %err, "failed to purge expired counters"),
        }
    }
}

/// Expired rows are deleted once every this many increments.
const PURGE_EVERY: u64 = 500;

fn purge_due(increment: u64) -> bool {
    increment % PURGE_EVERY == PURGE_EVERY - 1
}

const INCR_SQL: &str = "INSERT INTO rag_counters (key, count, expires_at) \
     VALUES ($1, 1, NOW() + make_interval(secs => $2)) \
     ON CONFLICT (key) DO UPDATE SET \
       count = CASE WHEN rag_counters.expires_at <= NOW() THEN 1 \
                    ELSE rag_counters.count + 1 END, \
       expires_at = CASE WHEN rag_counters.expires_at <= NOW() THEN EXCLUDED.expires_at \
                         ELSE rag_counters.expires_at END \
     RETURNING count";

#[async_trait]
impl CounterStore for PgCounterStore {
    async fn incr(&self, key: &str, ttl: Duration) -> Result<i64, sqlx::Error> {
        let count = sqlx::query_scalar::<_, i64>(INCR_SQL)
            .bind(key)
            .bind(ttl.num_milliseconds() as f64 / 1000.0)
            .fetch_one(&self.pool)
            .await?;
        if purge_due(self.increments.fetch_add(1, Ordering::Relaxed)) {
            self.purge_expired().await;
        }
        Ok(count)
    }
}

#[derive(Debug, Clone, Copy)]
struct Counter {
    count: i64,
    expires_at: DateTime<Utc>,
}

struct MemoryState {
    counters: HashMap<String, Counter>,
    skew: Duration,
}

/// Process-local counters. Used for single-instance deployments and tests.
pub struct MemoryCounterStore {
    state: Mutex<MemoryState>,
}

impl Default for MemoryCounterStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState {
                counters: HashMap::new(),
                skew: Duration::zero(),
            }),
        }
    }

    /// Move this store's clock forward; lets tests cross window boundaries.
    pub async fn advance(&self, by: Duration) {
        let mut state = self.state.lock().await;
        state.skew += by;
    }

    async fn incr_at(&self, key: &str, ttl: Duration, now: DateTime<Utc>) -> i64 {
        let mut state = self.state.lock().await;
        let now = now + state.skew;
        state.counters.retain(|_, counter| counter.expires_at > now);
        let counter = state.counters.entry(key.to_string()).or_insert(Counter {
            count: 0,
            expires_at: now + ttl,
        });
        counter.count += 1;
        counter.count
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn incr(&self, key: &str, ttl: Duration) -> Result<i64, sqlx::Error> {
        Ok(self.incr_at(key, ttl, Utc::now()).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn purge_runs_once_per_cycle() {
        let due: Vec<u64> = (0..PURGE_EVERY * 3).filter(|n| purge_due(*n)).collect();
        assert_eq!(due, vec![PURGE_EVERY - 1, 2 * PURGE_EVERY - 1, 3 * PURGE_EVERY - 1]);
        assert!(!purge_due(0));
    }

    #[tokio::test]
    async fn memory_counter_increments_within_window() {
        let store = MemoryCounterStore::new();
        let ttl = Duration::seconds(60);
        assert_eq!(store.incr("a", ttl).await.unwrap(), 1);
        assert_eq!(store.incr("a", ttl).await.unwrap(), 2);
        assert_eq!(store.incr("b", ttl).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn memory_counter_resets_after_expiry() {
        let store = MemoryCounterStore::new();
        let ttl = Duration::seconds(60);
        store.incr("a", ttl).await.unwrap();
        store.incr("a", ttl).await.unwrap();
        store.advance(Duration::seconds(61)).await;
        assert_eq!(store.incr("a", ttl).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn later_increments_do_not_extend_the_window() {
        let store = MemoryCounterStore::new();
        let ttl = Duration::seconds(60);
        store.incr("a", ttl).await.unwrap();
        store.advance(Duration::seconds(40)).await;
        assert_eq!(store.incr("a", ttl).await.unwrap(), 2);
        store.advance(Duration::seconds(25)).await;
        assert_eq!(store.incr("a", ttl).await.unwrap(), 1);
    }
}
