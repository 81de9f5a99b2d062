//! Read-through cache with stale-while-revalidate semantics.
//!
//! - A hit younger than `stale_time` is returned as is.
//! - A hit older than `stale_time` but within its max age is returned
//!   immediately and refreshed in the background.
//! - A miss or an expired entry is fetched; the caller waits.
//!
//! `None` results are cached as negative entries with their own max age.
//! Concurrent callers for the same key share one in-flight fetch. Fetches run
//! on spawned tasks, so a refresh outlives the request that triggered it.

use futures::future::{BoxFuture, FutureExt, Shared};
use gateway_core::{GatewayError, GatewayResult};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use dashmap::DashMap;

type SharedFetch<T> = Shared<BoxFuture<'static, GatewayResult<Option<T>>>>;

/// Freshness windows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwrOptions {
    /// Age after which a hit triggers a background refresh
    pub stale_time: Duration,
    /// Age after which a value is refetched synchronously
    pub max_age: Duration,
    /// Max age of a negative entry
    pub negative_max_age: Duration,
}

impl Default for SwrOptions {
    fn default() -> Self {
        Self {
            stale_time: Duration::from_secs(10),
            max_age: Duration::from_secs(60),
            negative_max_age: Duration::from_secs(5),
        }
    }
}

/// A cached fetch result
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    /// Fetched value, `None` for a negative entry
    pub value: Option<T>,
    /// When the value was stored
    pub cached_at: Instant,
}

impl<T> CacheEntry<T> {
    /// Whether the fetch found nothing
    #[must_use]
    pub fn is_negative(&self) -> bool {
        self.value.is_none()
    }
}

/// Cache statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SwrCacheStats {
    /// Fresh hits
    pub hits: u64,
    /// Stale hits served while refreshing
    pub stale_hits: u64,
    /// Misses and expired entries
    pub misses: u64,
    /// Callers that joined an in-flight fetch
    pub coalesced: u64,
    /// Background refreshes started
    pub revalidations: u64,
    /// Fetches that returned an error
    pub fetch_errors: u64,
}

impl SwrCacheStats {
    /// Share of lookups served from the cache, in percent
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        let served = self.hits + self.stale_hits;
        let total = served + self.misses;
        if total == 0 {
            0.0
        } else {
            (served as f64 / total as f64) * 100.0
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    stale_hits: AtomicU64,
    misses: AtomicU64,
    coalesced: AtomicU64,
    revalidations: AtomicU64,
    fetch_errors: AtomicU64,
}

struct Inner<T> {
    key_prefix: String,
    options: SwrOptions,
    entries: DashMap<String, CacheEntry<T>>,
    in_flight: Mutex<HashMap<String, (u64, SharedFetch<T>)>>,
    generation: AtomicU64,
    counters: Counters,
}

impl<T> Inner<T> {
    fn prefixed(&self, key: &str) -> String {
        format!("{}:{key}", self.key_prefix)
    }

    fn finish_fetch(&self, key: &str, generation: u64) {
        let mut in_flight = self.in_flight.lock();
        if in_flight.get(key).is_some_and(|(g, _)| *g == generation) {
            in_flight.remove(key);
        }
    }
}

/// Stale-while-revalidate cache for values of type `T`
pub struct SwrCache<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for SwrCache<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> std::fmt::Debug for SwrCache<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SwrCache")
            .field("key_prefix", &self.inner.key_prefix)
            .field("options", &self.inner.options)
            .field("entries", &self.inner.entries.len())
            .finish()
    }
}

impl<T> SwrCache<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a cache whose keys are stored under `key_prefix`
    #[must_use]
    pub fn new(key_prefix: impl Into<String>, options: SwrOptions) -> Self {
        Self {
            inner: Arc::new(Inner {
                key_prefix: key_prefix.into(),
                options,
                entries: DashMap::new(),
                in_flight: Mutex::new(HashMap::new()),
                generation: AtomicU64::new(0),
                counters: Counters::default(),
            }),
        }
    }

    /// Default freshness windows
    #[must_use]
    pub fn options(&self) -> SwrOptions {
        self.inner.options
    }

    /// Look up `key` with the default windows, fetching through `fetcher`
    pub async fn get<F, Fut>(&self, key: &str, fetcher: F) -> GatewayResult<Option<T>>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = GatewayResult<Option<T>>> + Send + 'static,
    {
        self.get_with(key, self.inner.options, fetcher).await
    }

    /// Look up `key` with explicit windows
    pub async fn get_with<F, Fut>(
        &self,
        key: &str,
        options: SwrOptions,
        fetcher: F,
    ) -> GatewayResult<Option<T>>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = GatewayResult<Option<T>>> + Send + 'static,
    {
        let counters = &self.inner.counters;

        if let Some(entry) = self.inner.entries.get(&self.inner.prefixed(key)) {
            let age = entry.cached_at.elapsed();
            let max_age = if entry.is_negative() {
                options.negative_max_age
            } else {
                options.max_age
            };

            if age <= max_age {
                let value = entry.value.clone();
                drop(entry);

                if age > options.stale_time {
                    counters.stale_hits.fetch_add(1, Ordering::Relaxed);
                    debug!(key = %key, age_ms = age.as_millis() as u64, "Serving stale entry");
                    // Not awaited: the spawned fetch finishes on its own.
                    drop(self.fetch_shared(key, fetcher, true));
                } else {
                    counters.hits.fetch_add(1, Ordering::Relaxed);
                }
                return Ok(value);
            }
        }

        counters.misses.fetch_add(1, Ordering::Relaxed);
        self.fetch_shared(key, fetcher, false).await
    }

    /// Join the in-flight fetch for `key` or start one
    fn fetch_shared<F, Fut>(&self, key: &str, fetcher: F, revalidate: bool) -> SharedFetch<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = GatewayResult<Option<T>>> + Send + 'static,
    {
        let mut in_flight = self.inner.in_flight.lock();
        if let Some((_, fetch)) = in_flight.get(key) {
            self.inner.counters.coalesced.fetch_add(1, Ordering::Relaxed);
            return fetch.clone();
        }

        if revalidate {
            self.inner
                .counters
                .revalidations
                .fetch_add(1, Ordering::Relaxed);
        }

        let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed);
        let inner = Arc::clone(&self.inner);
        let owned_key = key.to_string();
        let pending = fetcher();

        // The slot is inserted before this lock is released, so the task's
        // cleanup always finds it.
        let task = tokio::spawn(async move {
            let result = pending.await;
            match &result {
                Ok(value) => {
                    inner.entries.insert(
                        inner.prefixed(&owned_key),
                        CacheEntry {
                            value: value.clone(),
                            cached_at: Instant::now(),
                        },
                    );
                }
                Err(err) => {
                    inner.counters.fetch_errors.fetch_add(1, Ordering::Relaxed);
                    warn!(key = %owned_key, error = %err, "Cache fetch failed");
                }
            }
            inner.finish_fetch(&owned_key, generation);
            result
        });

        let shared = async move {
            task.await.unwrap_or_else(|e| {
                Err(GatewayError::internal(format!("cache fetch task failed: {e}")))
            })
        }
        .boxed()
        .shared();

        in_flight.insert(key.to_string(), (generation, shared.clone()));
        shared
    }

    /// Drop a cached entry
    pub fn invalidate(&self, key: &str) {
        self.inner.entries.remove(&self.inner.prefixed(key));
    }

    /// Drop every cached entry
    pub fn clear(&self) {
        self.inner.entries.clear();
    }

    /// Number of cached entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    /// Whether nothing is cached
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    /// Current statistics
    #[must_use]
    pub fn stats(&self) -> SwrCacheStats {
        let c = &self.inner.counters;
        SwrCacheStats {
            hits: c.hits.load(Ordering::Relaxed),
            stale_hits: c.stale_hits.load(Ordering::Relaxed),
            misses: c.misses.load(Ordering::Relaxed),
            coalesced: c.coalesced.load(Ordering::Relaxed),
            revalidations: c.revalidations.load(Ordering::Relaxed),
            fetch_errors: c.fetch_errors.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn options() -> SwrOptions {
        SwrOptions {
            stale_time: Duration::from_secs(10),
            max_age: Duration::from_secs(60),
            negative_max_age: Duration::from_secs(5),
        }
    }

    fn counting_fetch(
        calls: &Arc<AtomicUsize>,
        value: &'static str,
    ) -> impl FnOnce() -> BoxFuture<'static, GatewayResult<Option<String>>> {
        let calls = Arc::clone(calls);
        move || {
            calls.fetch_add(1, Ordering::SeqCst);
            async move { Ok(Some(value.to_string())) }.boxed()
        }
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fresh_hit_uses_cache() {
        let cache = SwrCache::new("test", options());
        let calls = Arc::new(AtomicUsize::new(0));

        let first = cache.get("k", counting_fetch(&calls, "v1")).await.expect("get");
        let second = cache.get("k", counting_fetch(&calls, "v2")).await.expect("get");

        assert_eq!(first.as_deref(), Some("v1"));
        assert_eq!(second.as_deref(), Some("v1"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.stats().hits, 1);
        assert_eq!(cache.stats().misses, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_hit_refreshes_in_background() {
        let cache = SwrCache::new("test", options());
        let calls = Arc::new(AtomicUsize::new(0));

        cache.get("k", counting_fetch(&calls, "v1")).await.expect("get");
        tokio::time::advance(Duration::from_secs(15)).await;

        let stale = cache.get("k", counting_fetch(&calls, "v2")).await.expect("get");
        assert_eq!(stale.as_deref(), Some("v1"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.stats().revalidations, 1);

        settle().await;
        let fresh = cache.get("k", counting_fetch(&calls, "v3")).await.expect("get");
        assert_eq!(fresh.as_deref(), Some("v2"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entry_is_refetched() {
        let cache = SwrCache::new("test", options());
        let calls = Arc::new(AtomicUsize::new(0));

        cache.get("k", counting_fetch(&calls, "v1")).await.expect("get");
        tokio::time::advance(Duration::from_secs(61)).await;

        let value = cache.get("k", counting_fetch(&calls, "v2")).await.expect("get");
        assert_eq!(value.as_deref(), Some("v2"));
        assert_eq!(cache.stats().misses, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_negative_entries_use_own_max_age() {
        let cache: SwrCache<String> = SwrCache::new("test", options());
        let calls = Arc::new(AtomicUsize::new(0));

        let fetch_none = |calls: &Arc<AtomicUsize>| {
            let calls = Arc::clone(calls);
            move || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, GatewayError>(None) }
            }
        };

        assert!(cache.get("missing", fetch_none(&calls)).await.expect("get").is_none());
        assert!(cache.get("missing", fetch_none(&calls)).await.expect("get").is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(cache.get("missing", fetch_none(&calls)).await.expect("get").is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_misses_coalesce() {
        let cache = SwrCache::new("test", options());
        let calls = Arc::new(AtomicUsize::new(0));

        let slow = |calls: &Arc<AtomicUsize>| {
            let calls = Arc::clone(calls);
            move || {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    Ok::<_, GatewayError>(Some(42_u32))
                }
            }
        };

        let (a, b, c) = tokio::join!(
            cache.get("answer", slow(&calls)),
            cache.get("answer", slow(&calls)),
            cache.get("answer", slow(&calls)),
        );
        assert_eq!(a.expect("get"), Some(42));
        assert_eq!(b.expect("get"), Some(42));
        assert_eq!(c.expect("get"), Some(42));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.stats().coalesced, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_errors_are_not_cached() {
        let cache: SwrCache<String> = SwrCache::new("test", options());
        let result = cache
            .get("k", || async { Err(GatewayError::internal("db down")) })
            .await;
        assert!(result.is_err());
        assert!(cache.is_empty());
        assert_eq!(cache.stats().fetch_errors, 1);

        let value = cache
            .get("k", || async { Ok::<_, GatewayError>(Some("ok".to_string())) })
            .await
            .expect("get");
        assert_eq!(value.as_deref(), Some("ok"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_survives_dropped_caller() {
        let cache = SwrCache::new("test", options());
        let calls = Arc::new(AtomicUsize::new(0));

        let pending = cache.get("k", counting_fetch(&calls, "v1"));
        // Poll once so the fetch is spawned, then drop the caller.
        let _ = futures::poll!(Box::pin(pending));
        settle().await;

        let value = cache.get("k", counting_fetch(&calls, "v2")).await.expect("get");
        assert_eq!(value.as_deref(), Some("v1"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
