//! Cache/freshness manager - decides whether a previously fetched fact is
//! still usable, and guarantees one in-flight fetch per (subject, source)
//! key. Facts are never deleted, only superseded; older facts stay in the
//! per-key history for audit.

use crate::valuation::config::TtlConfig;
use crate::valuation::error::{SourceError, ValuationError};
use crate::valuation::normalize;
use crate::valuation::types::{PropertyFact, SourceId, SubjectKey};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tracing::{debug, warn};

/// Injected clock so tests can simulate expiry deterministically
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time for production use
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually advanced clock for tests
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> ManualClock {
        ManualClock {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, delta: chrono::Duration) {
        let mut now = self.now.lock().unwrap();
        *now += delta;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

type FetchResult = Result<Arc<PropertyFact>, SourceError>;
type CacheKey = (String, SourceId);

enum Entry {
    Ready(Arc<PropertyFact>),
    /// A fetch is in flight; waiters subscribe to its result
    Pending(watch::Receiver<Option<FetchResult>>),
}

/// In-memory fact cache with per-key single-flight.
/// Both maps are guarded by sync mutexes that are never held across an
/// await; every async path decides under the lock and acts after release.
pub struct FactCache {
    clock: Arc<dyn Clock>,
    ttl: TtlConfig,
    entries: Mutex<HashMap<CacheKey, Entry>>,
    history: Mutex<HashMap<CacheKey, Vec<Arc<PropertyFact>>>>,
}

/// Removes the leader's pending entry if the leader future is dropped
/// before it publishes a result. Fetches run under caller timeouts, and a
/// cancelled leader must not wedge its key: the next call for the same
/// (subject, source) has to become a fresh leader.
struct PendingGuard<'a> {
    cache: &'a FactCache,
    key: Option<CacheKey>,
}

impl PendingGuard<'_> {
    fn disarm(mut self) {
        self.key = None;
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            if let Ok(mut entries) = self.cache.entries.lock() {
                if matches!(entries.get(&key), Some(Entry::Pending(_))) {
                    entries.remove(&key);
                }
            }
        }
    }
}

impl FactCache {
    pub fn new(clock: Arc<dyn Clock>, ttl: TtlConfig) -> FactCache {
        FactCache {
            clock,
            ttl,
            entries: Mutex::new(HashMap::new()),
            history: Mutex::new(HashMap::new()),
        }
    }

    /// Return the freshest usable fact for (subject, source), fetching and
    /// normalizing via fetch_fn only on a miss. Concurrent misses for the
    /// same key trigger exactly one underlying fetch; waiters receive the
    /// leader's result, including its failure.
    pub async fn get_or_fetch<F, Fut>(
        &self,
        key: &SubjectKey,
        source: SourceId,
        fetch_fn: F,
    ) -> Result<Arc<PropertyFact>, ValuationError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<serde_json::Value, SourceError>>,
    {
        let cache_key = (key.canonical(), source);

        enum Plan {
            Hit(Arc<PropertyFact>),
            Wait(watch::Receiver<Option<FetchResult>>),
            Lead(watch::Sender<Option<FetchResult>>),
        }

        // Decide under the lock, act after releasing it - the leader's
        // publish step needs the same lock
        let plan = {
            let mut entries = self.entries.lock().unwrap();
            match entries.get(&cache_key) {
                Some(Entry::Ready(fact)) => {
                    let now = self.clock.now();
                    if fact.observed_at > now {
                        return Err(ValuationError::StaleCacheInconsistency {
                            key: key.canonical(),
                            source_id: source,
                        });
                    }
                    let fresh = match self.ttl.for_source(source) {
                        Some(ttl) => now - fact.observed_at < ttl,
                        // No TTL: the fact never expires
                        None => true,
                    };
                    if fresh {
                        Plan::Hit(fact.clone())
                    } else {
                        // Expired: become the fetch leader
                        let (tx, rx) = watch::channel(None);
                        entries.insert(cache_key.clone(), Entry::Pending(rx));
                        Plan::Lead(tx)
                    }
                }
                Some(Entry::Pending(rx)) => Plan::Wait(rx.clone()),
                None => {
                    let (tx, rx) = watch::channel(None);
                    entries.insert(cache_key.clone(), Entry::Pending(rx));
                    Plan::Lead(tx)
                }
            }
        };

        let tx = match plan {
            Plan::Hit(fact) => {
                debug!(source = %source, subject = %key, "cache hit");
                return Ok(fact);
            }
            Plan::Wait(mut rx) => {
                let current = rx.borrow().clone();
                return self.await_leader(current, &mut rx).await;
            }
            Plan::Lead(tx) => tx,
        };

        // This caller is the fetch leader. The guard evicts the pending
        // entry if the caller's timeout cancels us mid-fetch.
        let guard = PendingGuard {
            cache: self,
            key: Some(cache_key.clone()),
        };

        debug!(source = %source, subject = %key, "cache miss, fetching");
        let observed_at = self.clock.now();
        let result: FetchResult = match fetch_fn().await {
            Ok(raw) => match normalize::normalize(&raw, source, key, observed_at) {
                Ok(fact) => Ok(Arc::new(fact)),
                Err(e) => Err(e),
            },
            Err(e) => Err(e),
        };

        {
            let mut entries = self.entries.lock().unwrap();
            match &result {
                Ok(fact) => {
                    entries.insert(cache_key.clone(), Entry::Ready(fact.clone()));
                    let mut history = self.history.lock().unwrap();
                    history.entry(cache_key).or_default().push(fact.clone());
                }
                Err(e) => {
                    warn!(source = %source, subject = %key, error = %e, "fetch failed");
                    // Drop the pending entry so a later call can retry
                    entries.remove(&cache_key);
                }
            }
        }
        guard.disarm();

        // Waiters observe the result; send failure is fine if none remain
        let _ = tx.send(Some(result.clone()));

        result.map_err(ValuationError::from)
    }

    async fn await_leader(
        &self,
        current: Option<FetchResult>,
        rx: &mut watch::Receiver<Option<FetchResult>>,
    ) -> Result<Arc<PropertyFact>, ValuationError> {
        if let Some(result) = current {
            return result.map_err(ValuationError::from);
        }
        loop {
            if rx.changed().await.is_err() {
                // Leader was cancelled without sending; its drop guard
                // evicted the pending entry, so the next call refetches
                return Err(SourceError::Unavailable(
                    "in-flight fetch was abandoned".to_string(),
                )
                .into());
            }
            let value = rx.borrow().clone();
            if let Some(result) = value {
                return result.map_err(ValuationError::from);
            }
        }
    }

    /// Full append-only history for a key, oldest first
    pub fn history(&self, key: &SubjectKey, source: SourceId) -> Vec<Arc<PropertyFact>> {
        let history = self.history.lock().unwrap();
        history
            .get(&(key.canonical(), source))
            .cloned()
            .unwrap_or_default()
    }

    /// Seed a fact directly, bypassing fetch (used for producer-pushed
    /// facts such as AI measurements)
    pub fn insert(&self, fact: PropertyFact) {
        let cache_key = (fact.subject_key.canonical(), fact.source);
        let fact = Arc::new(fact);
        let mut entries = self.entries.lock().unwrap();
        entries.insert(cache_key.clone(), Entry::Ready(fact.clone()));
        let mut history = self.history.lock().unwrap();
        history.entry(cache_key).or_default().push(fact);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn key() -> SubjectKey {
        SubjectKey::new("123 Main St", "Denver", "CO", "80211")
    }

    fn listing_payload() -> serde_json::Value {
        json!({"price": "$450,000", "beds": "3", "baths": "2", "sqft": "1500"})
    }

    fn start_time() -> DateTime<Utc> {
        "2025-06-01T12:00:00Z".parse().unwrap()
    }

    fn cache_with_clock() -> (Arc<FactCache>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(start_time()));
        let cache = Arc::new(FactCache::new(clock.clone(), TtlConfig::default()));
        (cache, clock)
    }

    #[tokio::test]
    async fn test_hit_within_ttl_skips_fetch() {
        let (cache, _clock) = cache_with_clock();
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let fact = cache
                .get_or_fetch(&key(), SourceId::ScrapeListingA, || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Ok(listing_payload()) }
                })
                .await
                .unwrap();
            assert_eq!(fact.source, SourceId::ScrapeListingA);
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_expired_fact_is_refetched_and_superseded() {
        let (cache, clock) = cache_with_clock();
        let calls = AtomicUsize::new(0);

        let fetch = |calls: &AtomicUsize| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(listing_payload()) }
        };

        cache
            .get_or_fetch(&key(), SourceId::ScrapeListingA, || fetch(&calls))
            .await
            .unwrap();

        // Scraped TTL is 6 hours; jump past it
        clock.advance(chrono::Duration::hours(7));

        cache
            .get_or_fetch(&key(), SourceId::ScrapeListingA, || fetch(&calls))
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        // Both facts retained for audit
        let history = cache.history(&key(), SourceId::ScrapeListingA);
        assert_eq!(history.len(), 2);
        assert!(history[0].observed_at < history[1].observed_at);
    }

    #[tokio::test]
    async fn test_ai_measurement_never_expires() {
        let (cache, clock) = cache_with_clock();
        let calls = AtomicUsize::new(0);

        let payload = json!({"total_square_feet": 1480, "confidence": 0.8});
        for _ in 0..2 {
            cache
                .get_or_fetch(&key(), SourceId::AiMeasurement, || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    let p = payload.clone();
                    async move { Ok(p) }
                })
                .await
                .unwrap();
            clock.advance(chrono::Duration::days(365));
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_concurrent_misses_fetch_once() {
        // Two simultaneous requests for the same (address, source) during
        // a miss must trigger exactly one underlying fetch
        let (cache, _clock) = cache_with_clock();
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let cache = cache.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_fetch(&key(), SourceId::ScrapeListingA, move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                        Ok(listing_payload())
                    })
                    .await
            }));
        }

        for handle in handles {
            let fact = handle.await.unwrap().unwrap();
            assert_eq!(fact.number(crate::valuation::types::FieldName::Bedrooms), Some(3.0));
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_waiters_receive_leader_failure() {
        let (cache, _clock) = cache_with_clock();

        let cache2 = cache.clone();
        let leader = tokio::spawn(async move {
            cache2
                .get_or_fetch(&key(), SourceId::ScrapeListingB, || async {
                    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                    Err(SourceError::Unavailable("blocked".to_string()))
                })
                .await
        });

        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        let waiter_fetches = AtomicUsize::new(0);
        let waiter = cache
            .get_or_fetch(&key(), SourceId::ScrapeListingB, || {
                waiter_fetches.fetch_add(1, Ordering::SeqCst);
                async { Ok(listing_payload()) }
            })
            .await;

        assert_eq!(waiter_fetches.load(Ordering::SeqCst), 0);
        assert!(leader.await.unwrap().is_err());
        match waiter {
            Err(ValuationError::Source(SourceError::Unavailable(msg))) => {
                assert_eq!(msg, "blocked")
            }
            other => panic!("expected leader's failure, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_cancelled_leader_does_not_wedge_key() {
        // A caller-side timeout cancels the leader mid-fetch; the key must
        // accept a fresh leader afterwards instead of reporting the
        // abandoned fetch forever
        let (cache, _clock) = cache_with_clock();

        let cancelled = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            cache.get_or_fetch(&key(), SourceId::ScrapeListingA, || async {
                tokio::time::sleep(std::time::Duration::from_secs(30)).await;
                Ok(listing_payload())
            }),
        )
        .await;
        assert!(cancelled.is_err());

        let retry_fetches = AtomicUsize::new(0);
        let fact = cache
            .get_or_fetch(&key(), SourceId::ScrapeListingA, || {
                retry_fetches.fetch_add(1, Ordering::SeqCst);
                async { Ok(listing_payload()) }
            })
            .await
            .unwrap();

        assert_eq!(retry_fetches.load(Ordering::SeqCst), 1);
        assert_eq!(fact.number(crate::valuation::types::FieldName::Bedrooms), Some(3.0));
        assert_eq!(cache.history(&key(), SourceId::ScrapeListingA).len(), 1);
    }

    #[tokio::test]
    async fn test_inserted_fact_served_without_fetch() {
        // Producer-pushed facts (AI measurements) enter via insert and are
        // served like any fetched fact
        let (cache, _clock) = cache_with_clock();

        let fact = normalize::normalize(
            &json!({"total_square_feet": 1480, "confidence": 0.8}),
            SourceId::AiMeasurement,
            &key(),
            start_time(),
        )
        .unwrap();
        cache.insert(fact);

        let calls = AtomicUsize::new(0);
        let served = cache
            .get_or_fetch(&key(), SourceId::AiMeasurement, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(json!({})) }
            })
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(
            served.number(crate::valuation::types::FieldName::SquareFeet),
            Some(1480.0)
        );
    }

    #[tokio::test]
    async fn test_future_observed_at_is_inconsistency() {
        let (cache, clock) = cache_with_clock();

        cache
            .get_or_fetch(&key(), SourceId::ScrapeListingA, || async {
                Ok(listing_payload())
            })
            .await
            .unwrap();

        // Move the clock backwards so the cached fact sits in the future
        clock.advance(chrono::Duration::hours(-1));

        let err = cache
            .get_or_fetch(&key(), SourceId::ScrapeListingA, || async {
                Ok(listing_payload())
            })
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ValuationError::StaleCacheInconsistency { .. }
        ));
    }
}
