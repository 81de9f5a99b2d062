//! Stale-while-revalidate cache behavior under paused time

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use gateway_core::{GatewayError, GatewayResult};
use gateway_resilience::{SwrCache, SwrOptions};
use pretty_assertions::assert_eq;
use tokio::time::{self, Instant};

const OPTIONS: SwrOptions = SwrOptions {
    stale_time: Duration::from_secs(10),
    max_age: Duration::from_secs(60),
    negative_max_age: Duration::from_secs(5),
};

/// Fetcher returning `value-N` for the N-th call, after `delay`
fn counting_fetcher(
    calls: &Arc<AtomicUsize>,
    delay: Duration,
) -> impl FnOnce() -> BoxFuture<'static, GatewayResult<Option<String>>> + Send {
    let calls = Arc::clone(calls);
    move || {
        let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
        async move {
            time::sleep(delay).await;
            Ok::<_, GatewayError>(Some(format!("value-{n}")))
        }
        .boxed()
    }
}

#[tokio::test(start_paused = true)]
async fn test_fresh_hits_fetch_once() {
    let cache: SwrCache<String> = SwrCache::new("scenario", OPTIONS);
    let calls = Arc::new(AtomicUsize::new(0));

    let first = cache
        .get("k", counting_fetcher(&calls, Duration::ZERO))
        .await
        .expect("first get");
    time::advance(Duration::from_secs(5)).await;
    let second = cache
        .get("k", counting_fetcher(&calls, Duration::ZERO))
        .await
        .expect("second get");

    assert_eq!(first.as_deref(), Some("value-1"));
    assert_eq!(second, first);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let stats = cache.stats();
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.hits, 1);
}

#[tokio::test(start_paused = true)]
async fn test_stale_hit_returns_immediately_and_revalidates() {
    let cache: SwrCache<String> = SwrCache::new("scenario", OPTIONS);
    let calls = Arc::new(AtomicUsize::new(0));

    cache
        .get("k", counting_fetcher(&calls, Duration::ZERO))
        .await
        .expect("prime");
    time::advance(Duration::from_secs(15)).await;

    // The refresh takes a full second; the caller must not wait for it
    let started = Instant::now();
    let stale = cache
        .get("k", counting_fetcher(&calls, Duration::from_secs(1)))
        .await
        .expect("stale get");
    assert_eq!(started.elapsed(), Duration::ZERO);
    assert_eq!(stale.as_deref(), Some("value-1"));
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    time::sleep(Duration::from_secs(2)).await;
    let refreshed = cache
        .get("k", counting_fetcher(&calls, Duration::ZERO))
        .await
        .expect("refreshed get");
    assert_eq!(refreshed.as_deref(), Some("value-2"));
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    let stats = cache.stats();
    assert_eq!(stats.stale_hits, 1);
    assert_eq!(stats.revalidations, 1);
}

#[tokio::test(start_paused = true)]
async fn test_expired_entry_is_refetched_synchronously() {
    let cache: SwrCache<String> = SwrCache::new("scenario", OPTIONS);
    let calls = Arc::new(AtomicUsize::new(0));

    cache
        .get("k", counting_fetcher(&calls, Duration::ZERO))
        .await
        .expect("prime");
    time::advance(Duration::from_secs(61)).await;

    let value = cache
        .get("k", counting_fetcher(&calls, Duration::from_secs(1)))
        .await
        .expect("refetch");
    assert_eq!(value.as_deref(), Some("value-2"));
    assert_eq!(cache.stats().misses, 2);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_misses_share_one_fetch() {
    let cache: SwrCache<String> = SwrCache::new("scenario", OPTIONS);
    let calls = Arc::new(AtomicUsize::new(0));

    let (a, b) = tokio::join!(
        cache.get("k", counting_fetcher(&calls, Duration::from_secs(1))),
        cache.get("k", counting_fetcher(&calls, Duration::from_secs(1))),
    );

    assert_eq!(a.expect("a").as_deref(), Some("value-1"));
    assert_eq!(b.expect("b").as_deref(), Some("value-1"));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(cache.stats().coalesced, 1);
}

#[tokio::test(start_paused = true)]
async fn test_negative_results_are_cached_briefly() {
    let cache: SwrCache<String> = SwrCache::new("scenario", OPTIONS);
    let calls = Arc::new(AtomicUsize::new(0));
    let missing = |calls: &Arc<AtomicUsize>| {
        let calls = Arc::clone(calls);
        move || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok::<Option<String>, GatewayError>(None) }
        }
    };

    assert_eq!(cache.get("gone", missing(&calls)).await.expect("miss"), None);
    assert_eq!(cache.get("gone", missing(&calls)).await.expect("hit"), None);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    time::advance(Duration::from_secs(6)).await;
    assert_eq!(cache.get("gone", missing(&calls)).await.expect("refetch"), None);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}
