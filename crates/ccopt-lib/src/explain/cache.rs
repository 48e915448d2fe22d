//! Explanation cache with TTL expiry and per-key in-flight de-duplication
//!
//! The check, generate and store sequence is serialized per key only, so
//! unrelated keys proceed concurrently while at most one generation per key
//! is outstanding. Failures are never cached.

use super::generator::GenerateError;
use super::store::{CacheEntry, ExpiringStore};
use crate::error::{OptimizerError, Result};
use crate::observability::{OptimizerMetrics, StructuredLogger};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::future::Future;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Default time-to-live of a cached explanation
pub const DEFAULT_TTL_DAYS: i64 = 7;

/// Default bound on one generation call
pub const DEFAULT_GENERATION_TIMEOUT: Duration = Duration::from_secs(20);

/// Source of the current time
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    now: StdMutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: StdMutex::new(start),
        }
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Cache settings
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub ttl: chrono::Duration,
    pub generation_timeout: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: chrono::Duration::days(DEFAULT_TTL_DAYS),
            generation_timeout: DEFAULT_GENERATION_TIMEOUT,
        }
    }
}

/// Drops a key's in-flight slot once no caller holds or awaits it
struct InFlightRelease<'a> {
    in_flight: &'a DashMap<String, Arc<Mutex<()>>>,
    key: &'a str,
}

impl Drop for InFlightRelease<'_> {
    fn drop(&mut self) {
        self.in_flight
            .remove_if(self.key, |_, slot| Arc::strong_count(slot) == 1);
    }
}

/// Caches generated explanations keyed by instance reference
pub struct ExplanationCache {
    store: Arc<dyn ExpiringStore>,
    clock: Arc<dyn Clock>,
    config: CacheConfig,
    in_flight: DashMap<String, Arc<Mutex<()>>>,
    metrics: OptimizerMetrics,
    logger: StructuredLogger,
}

impl ExplanationCache {
    pub fn new(store: Arc<dyn ExpiringStore>, clock: Arc<dyn Clock>, config: CacheConfig) -> Self {
        Self {
            store,
            clock,
            config,
            in_flight: DashMap::new(),
            metrics: OptimizerMetrics::new(),
            logger: StructuredLogger::default(),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Cached text for `key`, or the result of `generate` which is then cached.
    ///
    /// `generate` runs at most once per key at a time and is bounded by the
    /// configured timeout; an elapsed timeout is `Unavailable`.
    pub async fn get_or_generate<F, Fut>(&self, key: &str, generate: F) -> Result<String>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<String, GenerateError>>,
    {
        if let Some(text) = self.lookup(key).await {
            self.record_hit(key);
            return Ok(text);
        }

        // Declared before the slot so it runs after the slot is released,
        // including when this future is dropped mid-wait
        let _release = InFlightRelease {
            in_flight: &self.in_flight,
            key,
        };
        let slot = Arc::clone(
            self.in_flight
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        );
        let _guard = slot.lock().await;

        // A concurrent caller may have filled the entry while we waited
        if let Some(text) = self.lookup(key).await {
            self.record_hit(key);
            return Ok(text);
        }
        self.metrics.inc_cache_misses();
        self.logger.log_cache_miss(key);
        self.generate_and_store(key, generate).await
    }

    /// Remove every expired entry from the backing store
    pub async fn purge_expired(&self) -> Result<usize> {
        let removed = self
            .store
            .purge_expired(self.clock.now(), self.config.ttl)
            .await?;
        if removed > 0 {
            debug!(removed, "Purged expired explanations");
        }
        Ok(removed)
    }

    pub async fn invalidate(&self, key: &str) -> Result<()> {
        self.store.remove(key).await
    }

    /// Keys with a generation currently outstanding or awaited
    pub fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }

    async fn generate_and_store<F, Fut>(&self, key: &str, generate: F) -> Result<String>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<String, GenerateError>>,
    {
        let outcome = match tokio::time::timeout(self.config.generation_timeout, generate()).await {
            Ok(outcome) => outcome,
            Err(_) => Err(GenerateError::Unavailable(format!(
                "generation timed out after {}s",
                self.config.generation_timeout.as_secs_f64()
            ))),
        };

        match outcome {
            Ok(text) => {
                let entry = CacheEntry::new(key, text.clone(), self.clock.now());
                if let Err(e) = self.store.put(entry).await {
                    warn!(key = %key, error = %e, "Failed to cache explanation");
                }
                Ok(text)
            }
            Err(e) => {
                self.metrics.inc_generation_failures();
                self.logger.log_generation_failed(key, &e.to_string());
                Err(OptimizerError::from(e))
            }
        }
    }

    /// Fresh cached text; expired entries and store failures read as a miss
    async fn lookup(&self, key: &str) -> Option<String> {
        match self.store.get(key).await {
            Ok(Some(entry)) if !entry.is_expired(self.clock.now(), self.config.ttl) => Some(entry.text),
            Ok(Some(_)) => {
                debug!(key = %key, "Cached explanation expired");
                if let Err(e) = self.store.remove(key).await {
                    warn!(key = %key, error = %e, "Failed to drop expired explanation");
                }
                None
            }
            Ok(None) => None,
            Err(e) => {
                warn!(key = %key, error = %e, "Explanation cache read failed, treating as miss");
                None
            }
        }
    }

    fn record_hit(&self, key: &str) {
        self.metrics.inc_cache_hits();
        self.logger.log_cache_hit(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::explain::store::MemoryExpiringStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn create_test_cache(clock: Arc<ManualClock>) -> (ExplanationCache, Arc<MemoryExpiringStore>) {
        let store = Arc::new(MemoryExpiringStore::new());
        let cache = ExplanationCache::new(store.clone(), clock, CacheConfig::default());
        (cache, store)
    }

    #[tokio::test]
    async fn test_hit_within_ttl_and_regenerate_after() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let (cache, _) = create_test_cache(clock.clone());
        let calls = AtomicUsize::new(0);
        let counter = &calls;
        let generate = move || async move {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            Ok::<_, GenerateError>(format!("explanation {}", n))
        };

        assert_eq!(cache.get_or_generate("inst-1", generate).await.unwrap(), "explanation 1");
        clock.advance(chrono::Duration::days(6));
        assert_eq!(cache.get_or_generate("inst-1", generate).await.unwrap(), "explanation 1");
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        clock.advance(chrono::Duration::days(1));
        assert_eq!(cache.get_or_generate("inst-1", generate).await.unwrap(), "explanation 2");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failures_are_not_cached() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let (cache, store) = create_test_cache(clock);

        let err = cache
            .get_or_generate("inst-1", || async { Err(GenerateError::Failed("503".into())) })
            .await
            .unwrap_err();
        assert!(matches!(err, OptimizerError::Generation(_)));
        assert!(store.is_empty().await);

        let err = cache
            .get_or_generate("inst-1", || async { Err(GenerateError::Unavailable("no key".into())) })
            .await
            .unwrap_err();
        assert!(matches!(err, OptimizerError::Unavailable(_)));

        let text = cache
            .get_or_generate("inst-1", || async { Ok("recovered".to_string()) })
            .await
            .unwrap();
        assert_eq!(text, "recovered");
        assert_eq!(cache.in_flight_len(), 0);
    }

    #[tokio::test]
    async fn test_timeout_is_unavailable() {
        let store = Arc::new(MemoryExpiringStore::new());
        let cache = ExplanationCache::new(
            store.clone(),
            Arc::new(SystemClock),
            CacheConfig {
                generation_timeout: Duration::from_millis(20),
                ..Default::default()
            },
        );
        let err = cache
            .get_or_generate("slow", || async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok("late".to_string())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, OptimizerError::Unavailable(_)));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_generation() {
        let cache = Arc::new(ExplanationCache::new(
            Arc::new(MemoryExpiringStore::new()),
            Arc::new(SystemClock),
            CacheConfig::default(),
        ));
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = Arc::clone(&cache);
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_generate("shared", || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok("once".to_string())
                    })
                    .await
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), "once");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.in_flight_len(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_callers_release_their_slots() {
        let cache = Arc::new(ExplanationCache::new(
            Arc::new(MemoryExpiringStore::new()),
            Arc::new(SystemClock),
            CacheConfig::default(),
        ));

        for i in 0..50 {
            let key = format!("inst-{}", i);
            let outcome = tokio::time::timeout(
                Duration::from_millis(5),
                cache.get_or_generate(&key, || async {
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    Ok("late".to_string())
                }),
            )
            .await;
            assert!(outcome.is_err());
        }
        assert_eq!(cache.in_flight_len(), 0);

        // Waiters give up while another caller is still generating
        let holder = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move {
                cache
                    .get_or_generate("shared", || async {
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        Ok("done".to_string())
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        for _ in 0..10 {
            let waiter = tokio::time::timeout(
                Duration::from_millis(5),
                cache.get_or_generate("shared", || async { Ok("unused".to_string()) }),
            )
            .await;
            assert!(waiter.is_err());
        }
        assert_eq!(cache.in_flight_len(), 1);
        assert_eq!(holder.await.unwrap().unwrap(), "done");
        assert_eq!(cache.in_flight_len(), 0);
    }

    struct FailingStore;

    #[async_trait]
    impl ExpiringStore for FailingStore {
        async fn get(&self, _key: &str) -> Result<Option<CacheEntry>> {
            Err(OptimizerError::Store("down".into()))
        }
        async fn put(&self, _entry: CacheEntry) -> Result<()> {
            Err(OptimizerError::Store("down".into()))
        }
        async fn remove(&self, _key: &str) -> Result<()> {
            Err(OptimizerError::Store("down".into()))
        }
        async fn purge_expired(&self, _now: DateTime<Utc>, _ttl: chrono::Duration) -> Result<usize> {
            Err(OptimizerError::Store("down".into()))
        }
    }

    #[tokio::test]
    async fn test_store_failures_degrade_to_miss() {
        let cache = ExplanationCache::new(Arc::new(FailingStore), Arc::new(SystemClock), CacheConfig::default());
        let text = cache
            .get_or_generate("inst-1", || async { Ok("still works".to_string()) })
            .await
            .unwrap();
        assert_eq!(text, "still works");
    }

    #[tokio::test]
    async fn test_purge_uses_clock() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let (cache, store) = create_test_cache(clock.clone());
        cache
            .get_or_generate("inst-1", || async { Ok("a".to_string()) })
            .await
            .unwrap();
        assert_eq!(cache.purge_expired().await.unwrap(), 0);
        clock.advance(chrono::Duration::days(8));
        assert_eq!(cache.purge_expired().await.unwrap(), 1);
        assert!(store.is_empty().await);
    }
}
