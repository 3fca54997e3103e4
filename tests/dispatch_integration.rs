//! Integration tests for the search dispatch pipeline.
//!
//! These tests exercise the full resolve → cache probe → fan-out →
//! aggregate → dedup → cache pipeline using synthetic sources (no
//! network calls), with the clock paused so timing assertions are
//! deterministic.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Once};
use std::time::Duration;

use async_trait::async_trait;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;

use yomu_core::cache::registry::CacheRegistry;
use yomu_core::source::SourceResult;
use yomu_core::types::ContentDetail;
use yomu_core::{
    Capability, ContentSource, ContentType, DispatchConfig, Error, RateLimiter, SearchDispatcher,
    SearchQuery, SearchResult, SourceDescriptor, SourceError, SourceRegistry,
};

/// Routes engine logs through the test harness when `RUST_LOG` is set.
fn init_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Tracks how many calls are in flight at once.
#[derive(Default)]
struct Gauge {
    current: AtomicUsize,
    max: AtomicUsize,
}

impl Gauge {
    fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.max.fetch_max(now, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Scripted source: returns fixed results, a fixed error, or hangs for
/// `delay` first. Call counters are shared so tests can assert on them
/// after the dispatcher consumed the source.
#[derive(Default)]
struct MockSource {
    results: Vec<SearchResult>,
    error: Option<SourceError>,
    delay: Duration,
    search_calls: Arc<AtomicUsize>,
    detail_calls: Arc<AtomicUsize>,
    gauge: Option<Arc<Gauge>>,
}

#[async_trait]
impl ContentSource for MockSource {
    async fn search(&self, _query: &SearchQuery) -> SourceResult<Vec<SearchResult>> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gauge) = &self.gauge {
            gauge.enter();
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if let Some(gauge) = &self.gauge {
            gauge.exit();
        }
        match &self.error {
            Some(err) => Err(err.clone()),
            None => Ok(self.results.clone()),
        }
    }

    async fn detail(&self, external_id: &str) -> SourceResult<ContentDetail> {
        self.detail_calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(ContentDetail {
            external_id: external_id.to_string(),
            title: format!("Detail for {external_id}"),
            content_type: ContentType::Manga,
            description: None,
            genres: vec![],
            cover_url: None,
            rating: None,
            status: None,
            extra: Default::default(),
        })
    }
}

fn make_result(external_id: &str, title: &str) -> SearchResult {
    SearchResult::new(external_id, title, ContentType::Manga)
}

fn dispatcher(registry: Arc<SourceRegistry>, config: DispatchConfig) -> SearchDispatcher {
    init_logging();
    SearchDispatcher::new(
        registry,
        Arc::new(RateLimiter::new()),
        Arc::new(CacheRegistry::new()),
        config,
    )
    .expect("dispatcher config should be valid")
}

fn register(registry: &SourceRegistry, descriptor: SourceDescriptor, source: MockSource) {
    registry
        .register(descriptor, Arc::new(source))
        .expect("registration should succeed");
}

#[tokio::test(start_paused = true)]
async fn partial_failure_is_isolated() {
    let registry = Arc::new(SourceRegistry::new());
    register(
        &registry,
        SourceDescriptor::new("good", "Good").with_priority(1),
        MockSource {
            results: vec![make_result("1", "Berserk")],
            ..Default::default()
        },
    );
    register(
        &registry,
        SourceDescriptor::new("bad", "Bad").with_priority(2),
        MockSource {
            error: Some(SourceError::Network("connection refused".into())),
            ..Default::default()
        },
    );

    let dispatcher = dispatcher(registry, DispatchConfig::default());
    let aggregated = dispatcher
        .dispatch(&SearchQuery::new("berserk"), None)
        .await
        .expect("dispatch should succeed");

    assert_eq!(aggregated.total_count, 1);
    assert_eq!(aggregated.results_by_source.len(), 1);
    assert_eq!(aggregated.results_by_source[0].source_id, "good");
    assert_eq!(aggregated.per_source_errors.len(), 1);
    assert!(matches!(
        aggregated.per_source_errors.get("bad"),
        Some(SourceError::Network(_))
    ));
    assert!(!aggregated.is_complete());
}

#[tokio::test(start_paused = true)]
async fn all_sources_failing_still_returns_ok() {
    let registry = Arc::new(SourceRegistry::new());
    for id in ["a", "b"] {
        register(
            &registry,
            SourceDescriptor::new(id, id.to_uppercase()),
            MockSource {
                error: Some(SourceError::Malformed("bad payload".into())),
                ..Default::default()
            },
        );
    }

    let dispatcher = dispatcher(registry, DispatchConfig::default());
    let aggregated = dispatcher
        .dispatch(&SearchQuery::new("anything"), None)
        .await
        .expect("dispatch should succeed despite source failures");

    assert_eq!(aggregated.total_count, 0);
    assert_eq!(aggregated.per_source_errors.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn duplicates_attributed_to_higher_priority_source() {
    let registry = Arc::new(SourceRegistry::new());
    register(
        &registry,
        SourceDescriptor::new("a", "A").with_priority(1),
        MockSource {
            results: vec![make_result("a-1", "Dragon Quest")],
            ..Default::default()
        },
    );
    register(
        &registry,
        SourceDescriptor::new("b", "B").with_priority(2),
        MockSource {
            results: vec![
                make_result("b-1", "dragon quest!"),
                make_result("b-2", "Slime Diaries"),
            ],
            ..Default::default()
        },
    );

    let dispatcher = dispatcher(registry, DispatchConfig::default());
    let aggregated = dispatcher
        .dispatch(&SearchQuery::new("dragon"), None)
        .await
        .expect("dispatch should succeed");

    assert_eq!(aggregated.total_count, 2);
    let dragon: Vec<_> = aggregated
        .results()
        .filter(|r| r.title.to_lowercase().contains("dragon"))
        .collect();
    assert_eq!(dragon.len(), 1);
    assert_eq!(dragon[0].source_id, "a");
    assert_eq!(dragon[0].external_id, "a-1");
}

#[tokio::test(start_paused = true)]
async fn results_grouped_in_priority_order() {
    let registry = Arc::new(SourceRegistry::new());
    for (id, priority) in [("late", 30u8), ("early", 5), ("mid", 10)] {
        register(
            &registry,
            SourceDescriptor::new(id, id).with_priority(priority),
            MockSource {
                results: vec![make_result(id, &format!("Title from {id}"))],
                ..Default::default()
            },
        );
    }

    let dispatcher = dispatcher(registry, DispatchConfig::default());
    let aggregated = dispatcher
        .dispatch(&SearchQuery::new("title"), None)
        .await
        .expect("dispatch should succeed");

    let order: Vec<_> = aggregated
        .results_by_source
        .iter()
        .map(|g| g.source_id.as_str())
        .collect();
    assert_eq!(order, vec!["early", "mid", "late"]);
}

#[tokio::test(start_paused = true)]
async fn empty_registry_is_no_sources_available() {
    let registry = Arc::new(SourceRegistry::new());
    let dispatcher = dispatcher(registry, DispatchConfig::default());
    let result = dispatcher.dispatch(&SearchQuery::new("anything"), None).await;
    assert!(matches!(result, Err(Error::NoSourcesAvailable(_))));
}

#[tokio::test(start_paused = true)]
async fn disabled_sources_are_skipped() {
    let registry = Arc::new(SourceRegistry::new());
    register(
        &registry,
        SourceDescriptor::new("off", "Off"),
        MockSource {
            results: vec![make_result("1", "Hidden")],
            ..Default::default()
        },
    );
    registry
        .set_enabled("off", false)
        .expect("source should exist");

    let dispatcher = dispatcher(registry, DispatchConfig::default());
    let result = dispatcher.dispatch(&SearchQuery::new("hidden"), None).await;
    assert!(matches!(result, Err(Error::NoSourcesAvailable(_))));
}

#[tokio::test(start_paused = true)]
async fn explicit_unknown_source_is_an_error() {
    let registry = Arc::new(SourceRegistry::new());
    register(
        &registry,
        SourceDescriptor::new("real", "Real"),
        MockSource::default(),
    );

    let dispatcher = dispatcher(registry, DispatchConfig::default());
    let ids = vec!["ghost".to_string()];
    let result = dispatcher
        .dispatch(&SearchQuery::new("anything"), Some(&ids))
        .await;
    assert!(matches!(result, Err(Error::UnknownSource(id)) if id == "ghost"));
}

#[tokio::test(start_paused = true)]
async fn explicit_subset_only_queries_those_sources() {
    let registry = Arc::new(SourceRegistry::new());
    let a_calls = Arc::new(AtomicUsize::new(0));
    let b_calls = Arc::new(AtomicUsize::new(0));
    register(
        &registry,
        SourceDescriptor::new("a", "A"),
        MockSource {
            search_calls: a_calls.clone(),
            ..Default::default()
        },
    );
    register(
        &registry,
        SourceDescriptor::new("b", "B"),
        MockSource {
            search_calls: b_calls.clone(),
            ..Default::default()
        },
    );

    let dispatcher = dispatcher(registry, DispatchConfig::default());
    let ids = vec!["b".to_string()];
    dispatcher
        .dispatch(&SearchQuery::new("anything"), Some(&ids))
        .await
        .expect("dispatch should succeed");

    assert_eq!(a_calls.load(Ordering::SeqCst), 0);
    assert_eq!(b_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn repeated_query_is_served_from_cache() {
    let registry = Arc::new(SourceRegistry::new());
    let calls = Arc::new(AtomicUsize::new(0));
    register(
        &registry,
        SourceDescriptor::new("a", "A"),
        MockSource {
            results: vec![make_result("1", "Cached Title")],
            search_calls: calls.clone(),
            ..Default::default()
        },
    );

    let dispatcher = dispatcher(registry, DispatchConfig::default());
    let query = SearchQuery::new("cached title");
    let first = dispatcher
        .dispatch(&query, None)
        .await
        .expect("first dispatch should succeed");
    let second = dispatcher
        .dispatch(&query, None)
        .await
        .expect("second dispatch should succeed");

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(first.total_count, second.total_count);

    // Equivalent spellings of the query share the cache entry.
    let variant = SearchQuery::new("  Cached TITLE ");
    dispatcher
        .dispatch(&variant, None)
        .await
        .expect("variant dispatch should succeed");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn zero_ttl_disables_result_caching() {
    let registry = Arc::new(SourceRegistry::new());
    let calls = Arc::new(AtomicUsize::new(0));
    register(
        &registry,
        SourceDescriptor::new("a", "A"),
        MockSource {
            results: vec![make_result("1", "Fresh")],
            search_calls: calls.clone(),
            ..Default::default()
        },
    );

    let config = DispatchConfig {
        result_ttl: Duration::ZERO,
        ..DispatchConfig::default()
    };
    let dispatcher = dispatcher(registry, config);
    let query = SearchQuery::new("fresh");
    dispatcher
        .dispatch(&query, None)
        .await
        .expect("first dispatch should succeed");
    dispatcher
        .dispatch(&query, None)
        .await
        .expect("second dispatch should succeed");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn all_error_aggregates_are_not_cached() {
    let registry = Arc::new(SourceRegistry::new());
    let calls = Arc::new(AtomicUsize::new(0));
    register(
        &registry,
        SourceDescriptor::new("flaky", "Flaky"),
        MockSource {
            error: Some(SourceError::Network("down".into())),
            search_calls: calls.clone(),
            ..Default::default()
        },
    );

    let dispatcher = dispatcher(registry, DispatchConfig::default());
    let query = SearchQuery::new("anything");
    dispatcher
        .dispatch(&query, None)
        .await
        .expect("dispatch should succeed despite failure");
    dispatcher
        .dispatch(&query, None)
        .await
        .expect("retry should succeed despite failure");

    // The failure was never pinned into the cache, so the source is
    // retried on the second call.
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn slow_source_is_recorded_as_timeout() {
    let registry = Arc::new(SourceRegistry::new());
    register(
        &registry,
        SourceDescriptor::new("fast", "Fast").with_priority(1),
        MockSource {
            results: vec![make_result("1", "Quick")],
            ..Default::default()
        },
    );
    register(
        &registry,
        SourceDescriptor::new("slow", "Slow").with_priority(2),
        MockSource {
            results: vec![make_result("2", "Never Arrives")],
            delay: Duration::from_secs(60),
            ..Default::default()
        },
    );

    let config = DispatchConfig {
        overall_timeout: Duration::from_secs(5),
        ..DispatchConfig::default()
    };
    let dispatcher = dispatcher(registry, config);
    let aggregated = dispatcher
        .dispatch(&SearchQuery::new("quick"), None)
        .await
        .expect("dispatch should succeed");

    assert_eq!(aggregated.total_count, 1);
    assert_eq!(
        aggregated.per_source_errors.get("slow"),
        Some(&SourceError::Timeout)
    );
}

#[tokio::test(start_paused = true)]
async fn oversized_result_lists_are_truncated() {
    let registry = Arc::new(SourceRegistry::new());
    let results: Vec<_> = (0..20)
        .map(|i| make_result(&format!("id-{i}"), &format!("Unique Title {i}")))
        .collect();
    register(
        &registry,
        SourceDescriptor::new("big", "Big"),
        MockSource {
            results,
            ..Default::default()
        },
    );

    let config = DispatchConfig {
        max_results_per_source: 5,
        ..DispatchConfig::default()
    };
    let dispatcher = dispatcher(registry, config);
    let aggregated = dispatcher
        .dispatch(&SearchQuery::new("unique"), None)
        .await
        .expect("dispatch should succeed");
    assert_eq!(aggregated.total_count, 5);
}

#[tokio::test(start_paused = true)]
async fn source_ids_are_stamped_by_the_dispatcher() {
    let registry = Arc::new(SourceRegistry::new());
    let mut lying = make_result("1", "Honest Title");
    lying.source_id = "somebody-else".to_string();
    register(
        &registry,
        SourceDescriptor::new("truthful", "Truthful"),
        MockSource {
            results: vec![lying],
            ..Default::default()
        },
    );

    let dispatcher = dispatcher(registry, DispatchConfig::default());
    let aggregated = dispatcher
        .dispatch(&SearchQuery::new("honest"), None)
        .await
        .expect("dispatch should succeed");
    let first = aggregated
        .results()
        .next()
        .expect("one result should survive");
    assert_eq!(first.source_id, "truthful");
}

#[tokio::test(start_paused = true)]
async fn concurrency_stays_within_the_bound() {
    let registry = Arc::new(SourceRegistry::new());
    let gauge = Arc::new(Gauge::default());
    for i in 0..10 {
        register(
            &registry,
            SourceDescriptor::new(format!("s{i}"), format!("S{i}")),
            MockSource {
                delay: Duration::from_millis(50),
                gauge: Some(gauge.clone()),
                ..Default::default()
            },
        );
    }

    let config = DispatchConfig {
        max_concurrency: 2,
        ..DispatchConfig::default()
    };
    let dispatcher = dispatcher(registry, config);
    dispatcher
        .dispatch(&SearchQuery::new("anything"), None)
        .await
        .expect("dispatch should succeed");

    assert!(gauge.max.load(Ordering::SeqCst) <= 2);
}

#[tokio::test(start_paused = true)]
async fn cancellation_aborts_the_dispatch() {
    let registry = Arc::new(SourceRegistry::new());
    register(
        &registry,
        SourceDescriptor::new("slow", "Slow"),
        MockSource {
            delay: Duration::from_secs(5),
            ..Default::default()
        },
    );

    let dispatcher = dispatcher(registry, DispatchConfig::default());
    let cancel = CancellationToken::new();
    cancel.cancel();
    let result = dispatcher
        .dispatch_cancellable(&SearchQuery::new("anything"), None, cancel.clone())
        .await;
    assert!(matches!(result, Err(Error::Cancelled)));

    // Cancelling again after completion is a harmless no-op.
    cancel.cancel();
}

#[tokio::test(start_paused = true)]
async fn shutdown_cancels_subsequent_dispatches() {
    let registry = Arc::new(SourceRegistry::new());
    register(
        &registry,
        SourceDescriptor::new("slow", "Slow"),
        MockSource {
            delay: Duration::from_secs(5),
            ..Default::default()
        },
    );

    let dispatcher = dispatcher(registry, DispatchConfig::default());
    dispatcher.shutdown();
    let result = dispatcher.dispatch(&SearchQuery::new("anything"), None).await;
    assert!(matches!(result, Err(Error::Cancelled)));
}

#[tokio::test(start_paused = true)]
async fn shutdown_wins_over_a_cached_result() {
    let registry = Arc::new(SourceRegistry::new());
    register(
        &registry,
        SourceDescriptor::new("a", "A"),
        MockSource {
            results: vec![make_result("1", "Resident")],
            ..Default::default()
        },
    );

    let dispatcher = dispatcher(registry, DispatchConfig::default());
    let query = SearchQuery::new("resident");
    dispatcher
        .dispatch(&query, None)
        .await
        .expect("dispatch should succeed and populate the cache");

    // The aggregate is now resident in the result cache, but a
    // shut-down engine must refuse the call before probing it.
    dispatcher.shutdown();
    let result = dispatcher.dispatch(&query, None).await;
    assert!(matches!(result, Err(Error::Cancelled)));
}

#[tokio::test(start_paused = true)]
async fn stream_emits_one_outcome_per_source() {
    let registry = Arc::new(SourceRegistry::new());
    register(
        &registry,
        SourceDescriptor::new("ok", "Ok").with_priority(1),
        MockSource {
            results: vec![make_result("1", "Streamed")],
            ..Default::default()
        },
    );
    register(
        &registry,
        SourceDescriptor::new("broken", "Broken").with_priority(2),
        MockSource {
            error: Some(SourceError::Network("down".into())),
            ..Default::default()
        },
    );

    let dispatcher = dispatcher(registry, DispatchConfig::default());
    let stream = dispatcher
        .dispatch_stream(&SearchQuery::new("streamed"), None, CancellationToken::new())
        .expect("stream should start");
    let mut outcomes: Vec<_> = stream.collect().await;
    outcomes.sort_by(|a, b| a.source_id.cmp(&b.source_id));

    assert_eq!(outcomes.len(), 2);
    assert!(outcomes[0].outcome.is_err());
    assert_eq!(outcomes[0].source_id, "broken");
    let results = outcomes[1]
        .outcome
        .as_ref()
        .expect("ok source should return results");
    assert_eq!(results[0].source_id, "ok");
}

#[tokio::test(start_paused = true)]
async fn detail_is_cached_per_item() {
    let registry = Arc::new(SourceRegistry::new());
    let calls = Arc::new(AtomicUsize::new(0));
    register(
        &registry,
        SourceDescriptor::new("a", "A")
            .with_capabilities([Capability::Search, Capability::Detail]),
        MockSource {
            detail_calls: calls.clone(),
            ..Default::default()
        },
    );

    let dispatcher = dispatcher(registry, DispatchConfig::default());
    let first = dispatcher
        .detail("a", "item-1")
        .await
        .expect("detail should succeed");
    let second = dispatcher
        .detail("a", "item-1")
        .await
        .expect("cached detail should succeed");
    assert_eq!(first.title, second.title);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    dispatcher
        .detail("a", "item-2")
        .await
        .expect("detail for a second item should succeed");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn detail_requires_the_detail_capability() {
    let registry = Arc::new(SourceRegistry::new());
    register(
        &registry,
        SourceDescriptor::new("search-only", "Search Only"),
        MockSource::default(),
    );

    let dispatcher = dispatcher(registry, DispatchConfig::default());
    let result = dispatcher.detail("search-only", "item-1").await;
    assert!(matches!(result, Err(Error::NoSourcesAvailable(_))));
}

#[tokio::test(start_paused = true)]
async fn rate_limited_source_spreads_calls_over_the_window() {
    let registry = Arc::new(SourceRegistry::new());
    register(
        &registry,
        SourceDescriptor::new("limited", "Limited").with_rate_limit(2),
        MockSource {
            results: vec![make_result("1", "Metered")],
            ..Default::default()
        },
    );

    let config = DispatchConfig {
        result_ttl: Duration::ZERO,
        overall_timeout: Duration::from_secs(300),
        ..DispatchConfig::default()
    };
    let dispatcher = dispatcher(registry, config);
    let query = SearchQuery::new("metered");

    let started = tokio::time::Instant::now();
    for _ in 0..3 {
        dispatcher
            .dispatch(&query, None)
            .await
            .expect("dispatch should succeed");
    }
    // Two calls fit in the first minute; the third waits for the window.
    assert!(started.elapsed() >= Duration::from_secs(60));
}
