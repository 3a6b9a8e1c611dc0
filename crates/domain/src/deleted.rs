use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::clock::Clock;
use crate::gateway::PlatformGateway;
use crate::ports::platform::PlatformError;

/// Short negative cache over `account_exists`, consulted before any write so
/// effectively-deleted accounts are skipped without a platform round trip.
pub struct DeletedAccountCache {
    gateway: Arc<PlatformGateway>,
    clock: Arc<dyn Clock>,
    ttl_ms: i64,
    prune_interval_ms: i64,
    inner: Mutex<CacheState>,
}

#[derive(Default)]
struct CacheState {
    deleted_until: HashMap<String, i64>,
    last_prune_ms: i64,
}

impl DeletedAccountCache {
    pub fn new(
        gateway: Arc<PlatformGateway>,
        clock: Arc<dyn Clock>,
        ttl: Duration,
        prune_interval: Duration,
    ) -> Self {
        Self {
            gateway,
            clock,
            ttl_ms: ttl.as_millis() as i64,
            prune_interval_ms: prune_interval.as_millis() as i64,
            inner: Mutex::new(CacheState::default()),
        }
    }

    pub async fn is_deleted(&self, handle: &str) -> Result<bool, PlatformError> {
        let key = handle.trim().to_lowercase();
        let now = self.clock.now_ms();
        {
            let mut state = self.inner.lock().expect("deleted-account cache lock");
            if now - state.last_prune_ms >= self.prune_interval_ms {
                state.deleted_until.retain(|_, deadline| *deadline > now);
                state.last_prune_ms = now;
            }
            if let Some(&deadline) = state.deleted_until.get(&key) {
                if deadline > now {
                    return Ok(true);
                }
                state.deleted_until.remove(&key);
            }
        }

        let exists = self.gateway.account_exists(&key).await?;
        if !exists {
            let mut state = self.inner.lock().expect("deleted-account cache lock");
            state.deleted_until.insert(key, now + self.ttl_ms);
        }
        Ok(!exists)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::clock::{ManualClock, NoopPacer};
    use crate::memory::FakePlatform;
    use crate::retry::RetryPolicy;

    fn cache(
        platform: Arc<FakePlatform>,
        clock: Arc<ManualClock>,
        ttl: Duration,
    ) -> DeletedAccountCache {
        let gateway = Arc::new(PlatformGateway::new(
            platform,
            RetryPolicy::default(),
            Arc::new(NoopPacer::default()),
            Duration::from_millis(1_100),
        ));
        DeletedAccountCache::new(gateway, clock, ttl, Duration::from_secs(3_600))
    }

    #[tokio::test]
    async fn negative_verdict_is_cached_within_ttl() {
        let platform = Arc::new(FakePlatform::default());
        platform.mark_missing("ghost").await;
        let clock = Arc::new(ManualClock::at(0));
        let cache = cache(platform.clone(), clock.clone(), Duration::from_secs(1_800));

        assert!(cache.is_deleted("ghost").await.unwrap());
        assert!(cache.is_deleted("Ghost").await.unwrap());
        assert_eq!(platform.exists_queries().await, 1);

        // past the ttl the platform is consulted again
        clock.advance_ms(1_800_001);
        assert!(cache.is_deleted("ghost").await.unwrap());
        assert_eq!(platform.exists_queries().await, 2);
    }

    #[tokio::test]
    async fn live_accounts_are_not_cached() {
        let platform = Arc::new(FakePlatform::default());
        let clock = Arc::new(ManualClock::at(0));
        let cache = cache(platform.clone(), clock, Duration::from_secs(1_800));

        assert!(!cache.is_deleted("alive").await.unwrap());
        assert!(!cache.is_deleted("alive").await.unwrap());
        assert_eq!(platform.exists_queries().await, 2);
    }

    #[tokio::test]
    async fn prune_drops_expired_entries() {
        let platform = Arc::new(FakePlatform::default());
        platform.mark_missing("ghost").await;
        let clock = Arc::new(ManualClock::at(0));
        let gateway = Arc::new(PlatformGateway::new(
            platform.clone(),
            RetryPolicy::default(),
            Arc::new(NoopPacer::default()),
            Duration::from_millis(1_100),
        ));
        let cache = DeletedAccountCache::new(
            gateway,
            clock.clone(),
            Duration::from_secs(60),
            Duration::from_secs(120),
        );

        assert!(cache.is_deleted("ghost").await.unwrap());
        clock.advance_ms(120_000);
        // prune runs here; the expired entry is gone and re-queried
        assert!(cache.is_deleted("ghost").await.unwrap());
        assert_eq!(platform.exists_queries().await, 2);
    }
}
