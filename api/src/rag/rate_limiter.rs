use std::sync::Arc;

use chrono::Duration;
use uuid::Uuid;

use super::cache::CounterStore;

const WINDOW_SECONDS: i64 = 60;
const DEFAULT_LIMIT: i64 = 30;

/// Requests per 60-second window for an agent key.
pub fn limit_for(role: &str) -> i64 {
    match role {
        "student" => 60,
        "parent" => 50,
        "teacher" => 40,
        "admin" | "accountant" => 30,
        _ => DEFAULT_LIMIT,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    pub limit: i64,
    pub count: i64,
}

pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn CounterStore>) -> Self {
        Self { store }
    }

    /// Count one request for `(role, user_id)`. A cache outage fails open.
    pub async fn check(&self, role: &str, user_id: Uuid) -> RateDecision {
        let limit = limit_for(role);
        let key = format!("rag:rate:{role}:{user_id}");
        match self
            .store
            .incr(&key, Duration::seconds(WINDOW_SECONDS))
            .await
        {
            Ok(count) => RateDecision {
                allowed: count <= limit,
                limit,
                count,
            },
            Err(err) => {
                tracing::warn!(
                    error = %err,
                    user_id = %user_id,
                    role = role,
                    "rate limit counter unavailable; allowing request"
                );
                RateDecision {
                    allowed: true,
                    limit,
                    count: 0,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rag::cache::MemoryCounterStore;
    use crate::rag::testing::FailingCounterStore;

    #[test]
    fn limits_by_role() {
        assert_eq!(limit_for("student"), 60);
        assert_eq!(limit_for("teacher"), 40);
        assert_eq!(limit_for("admin"), 30);
        assert_eq!(limit_for("accountant"), 30);
        assert_eq!(limit_for("parent"), 50);
        assert_eq!(limit_for("visitor"), 30);
    }

    #[tokio::test]
    async fn request_after_limit_is_denied_until_window_expires() {
        let store = Arc::new(MemoryCounterStore::new());
        let limiter = RateLimiter::new(store.clone());
        let user = Uuid::now_v7();

        for n in 1..=40 {
            let decision = limiter.check("teacher", user).await;
            assert!(decision.allowed, "request {n}");
            assert_eq!(decision.count, n);
        }
        let over = limiter.check("teacher", user).await;
        assert!(!over.allowed);
        assert_eq!(over.count, 41);
        assert!(!limiter.check("teacher", user).await.allowed);

        store.advance(Duration::seconds(61)).await;
        let fresh = limiter.check("teacher", user).await;
        assert!(fresh.allowed);
        assert_eq!(fresh.count, 1);
    }

    #[tokio::test]
    async fn counters_are_scoped_per_role_and_user() {
        let limiter = RateLimiter::new(Arc::new(MemoryCounterStore::new()));
        let user = Uuid::now_v7();
        limiter.check("admin", user).await;
        assert_eq!(limiter.check("parent", user).await.count, 1);
        assert_eq!(limiter.check("admin", Uuid::now_v7()).await.count, 1);
    }

    #[tokio::test]
    async fn cache_outage_fails_open() {
        let limiter = RateLimiter::new(Arc::new(FailingCounterStore));
        let decision = limiter.check("student", Uuid::now_v7()).await;
        assert!(decision.allowed);
        assert_eq!(decision.limit, 60);
    }
}
