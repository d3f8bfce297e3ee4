use std::sync::Arc;

use chrono::Duration;
use uuid::Uuid;

use super::cache::CounterStore;

const WINDOW_MINUTES: i64 = 10;
const FLAG_THRESHOLD: i64 = 5;
pub const REPEATED_DENIED_ACCESS: &str = "repeated_denied_access";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DenialOutcome {
    pub flagged: bool,
    pub reason: Option<&'static str>,
    pub count: i64,
}

/// Rolling denial streak per user.
pub struct AbuseTracker {
    store: Arc<dyn CounterStore>,
}

impl AbuseTracker {
    pub fn new(store: Arc<dyn CounterStore>) -> Self {
        Self { store }
    }

    pub async fn record_denied(&self, user_id: Uuid) -> DenialOutcome {
        let key = format!("rag:denied:{user_id}");
        match self
            .store
            .incr(&key, Duration::minutes(WINDOW_MINUTES))
            .await
        {
            Ok(count) => {
                let flagged = count >= FLAG_THRESHOLD;
                DenialOutcome {
                    flagged,
                    reason: flagged.then_some(REPEATED_DENIED_ACCESS),
                    count,
                }
            }
            Err(err) => {
                tracing::warn!(
                    error = %err,
                    user_id = %user_id,
                    "denial counter unavailable; not flagging"
                );
                DenialOutcome {
                    flagged: false,
                    reason: None,
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

    #[tokio::test]
    async fn fifth_denial_flags_and_stays_flagged() {
        let tracker = AbuseTracker::new(Arc::new(MemoryCounterStore::new()));
        let user = Uuid::now_v7();
        for _ in 0..4 {
            let outcome = tracker.record_denied(user).await;
            assert!(!outcome.flagged);
            assert_eq!(outcome.reason, None);
        }
        let fifth = tracker.record_denied(user).await;
        assert!(fifth.flagged);
        assert_eq!(fifth.reason, Some(REPEATED_DENIED_ACCESS));
        assert!(tracker.record_denied(user).await.flagged);
    }

    #[tokio::test]
    async fn expired_window_starts_a_fresh_streak() {
        let store = Arc::new(MemoryCounterStore::new());
        let tracker = AbuseTracker::new(store.clone());
        let user = Uuid::now_v7();
        for _ in 0..5 {
            tracker.record_denied(user).await;
        }
        store.advance(Duration::minutes(11)).await;
        let outcome = tracker.record_denied(user).await;
        assert_eq!(outcome.count, 1);
        assert!(!outcome.flagged);
    }

    #[tokio::test]
    async fn cache_outage_is_not_a_flag() {
        let tracker = AbuseTracker::new(Arc::new(FailingCounterStore));
        let outcome = tracker.record_denied(Uuid::now_v7()).await;
        assert!(!outcome.flagged);
        assert_eq!(outcome.reason, None);
    }
}
