//! The search dispatcher: bounded concurrent fan-out with aggregation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Semaphore};
use tokio::time::Instant;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use crate::cache::registry::CacheRegistry;
use crate::cache::{CacheConfig, CachePriority, CacheStore, CacheTtl};
use crate::error::{Error, Result, SourceError};
use crate::rate_limit::RateLimiter;
use crate::registry::SourceRegistry;
use crate::source::{Capability, ContentSource, SourceDescriptor};
use crate::types::{
    AggregatedSearchResult, ContentDetail, SearchQuery, SearchResult, SourceResults,
};

use super::{dedup, key};

/// Cache namespace for aggregated search results.
const SEARCH_CACHE: &str = "search_results";
/// Cache namespace for per-item metadata, shared with non-search callers.
const METADATA_CACHE: &str = "content_metadata";

/// Tuning for the dispatcher.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Global ceiling on simultaneously running source calls.
    pub max_concurrency: usize,
    /// Single deadline covering the whole fan-out; sources still
    /// running when it elapses are recorded as timed out.
    pub overall_timeout: Duration,
    /// TTL for cached aggregates. Search results go stale quickly, so
    /// this should be minutes, not hours. Zero disables result caching.
    pub result_ttl: Duration,
    /// Per-source result list cap, applied before grouping.
    pub max_results_per_source: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 8,
            overall_timeout: Duration::from_secs(10),
            result_ttl: Duration::from_secs(120),
            max_results_per_source: 50,
        }
    }
}

impl DispatchConfig {
    /// Validates this configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `max_concurrency`,
    /// `overall_timeout`, or `max_results_per_source` is zero.
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrency == 0 {
            return Err(Error::Config("max_concurrency must be greater than 0".into()));
        }
        if self.overall_timeout.is_zero() {
            return Err(Error::Config(
                "overall_timeout must be greater than zero".into(),
            ));
        }
        if self.max_results_per_source == 0 {
            return Err(Error::Config(
                "max_results_per_source must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

/// One source's completion, emitted by [`SearchDispatcher::dispatch_stream`].
#[derive(Debug)]
pub struct SourceOutcome {
    pub source_id: String,
    pub outcome: std::result::Result<Vec<SearchResult>, SourceError>,
}

/// Fans queries out to registered sources and aggregates the results.
///
/// Constructed with its collaborators injected; there is no process
/// global. `shutdown` cancels in-flight dispatches and flushes cache
/// tiers, giving the engine an explicit end of life.
pub struct SearchDispatcher {
    sources: Arc<SourceRegistry>,
    limiter: Arc<RateLimiter>,
    caches: Arc<CacheRegistry>,
    config: DispatchConfig,
    results_cache: Arc<CacheStore<AggregatedSearchResult>>,
    metadata_cache: Arc<CacheStore<ContentDetail>>,
    // Shared worker pool: one permit per simultaneously running
    // source call, across dispatch and dispatch_stream alike.
    semaphore: Arc<Semaphore>,
    root: CancellationToken,
}

impl SearchDispatcher {
    /// Builds a dispatcher over the given registry, limiter, and caches.
    ///
    /// Creates (or reuses) the `"search_results"` and
    /// `"content_metadata"` cache namespaces in `caches`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `config` is invalid or either cache
    /// namespace exists with a conflicting value type.
    pub fn new(
        sources: Arc<SourceRegistry>,
        limiter: Arc<RateLimiter>,
        caches: Arc<CacheRegistry>,
        config: DispatchConfig,
    ) -> Result<Self> {
        config.validate()?;

        let result_ttl = if config.result_ttl.is_zero() {
            Duration::from_secs(120)
        } else {
            config.result_ttl
        };
        let results_cache = caches.get_or_create(
            SEARCH_CACHE,
            CacheConfig {
                max_entries: Some(256),
                default_ttl: CacheTtl::After(result_ttl),
                ..CacheConfig::default()
            },
        )?;
        let metadata_cache = caches.get_or_create(
            METADATA_CACHE,
            CacheConfig {
                max_entries: Some(2048),
                default_ttl: CacheTtl::After(Duration::from_secs(3600)),
                ..CacheConfig::default()
            },
        )?;

        let semaphore = Arc::new(Semaphore::new(config.max_concurrency));
        Ok(Self {
            sources,
            limiter,
            caches,
            config,
            results_cache,
            metadata_cache,
            semaphore,
            root: CancellationToken::new(),
        })
    }

    /// Searches all enabled, search-capable sources (or the explicit
    /// `source_ids` subset) and aggregates the outcome.
    ///
    /// A single source failing, timing out, or returning garbage never
    /// fails the call; it is recorded in the aggregate's error map and
    /// contributes zero results.
    ///
    /// # Errors
    ///
    /// - [`Error::UnknownSource`] if an explicit id is not registered.
    /// - [`Error::NoSourcesAvailable`] if the resolved target set is
    ///   empty.
    /// - [`Error::Cancelled`] if the engine was shut down mid-call.
    pub async fn dispatch(
        &self,
        query: &SearchQuery,
        source_ids: Option<&[String]>,
    ) -> Result<AggregatedSearchResult> {
        self.dispatch_cancellable(query, source_ids, CancellationToken::new())
            .await
    }

    /// [`dispatch`](Self::dispatch) with caller-controlled cancellation.
    ///
    /// Cancelling `cancel` (e.g. because a newer query superseded this
    /// one) aborts the fan-out: in-flight per-source futures are
    /// dropped, pending rate-limiter waits release without recording a
    /// grant, and the call returns [`Error::Cancelled`]. Cancelling is
    /// idempotent and a no-op after completion.
    pub async fn dispatch_cancellable(
        &self,
        query: &SearchQuery,
        source_ids: Option<&[String]>,
        cancel: CancellationToken,
    ) -> Result<AggregatedSearchResult> {
        // Checked up front so a cached result can never mask a shutdown
        // (the cache probe happens before the select below).
        if self.root.is_cancelled() || cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let started = Instant::now();

        // 1. Resolve the target set.
        let targets = self.sources.resolve(source_ids, Capability::Search)?;
        if targets.is_empty() {
            return Err(Error::NoSourcesAvailable(
                "no enabled source supports search for this request".into(),
            ));
        }
        let target_ids: Vec<String> = targets.iter().map(|(d, _)| d.id.clone()).collect();

        // 2. Cache probe.
        let caching = !self.config.result_ttl.is_zero();
        let cache_key = key::search_cache_key(query, &target_ids);
        if caching {
            if let Some(hit) = self.results_cache.get(&cache_key) {
                tracing::debug!(key = %cache_key, "search cache hit");
                return Ok(hit);
            }
        }

        // 3. Fan out, bounded by the worker-pool semaphore, each task
        //    gated by the source's rate limit, all under one deadline.
        let outcomes = {
            let fan_out = futures::future::join_all(
                targets
                    .into_iter()
                    .map(|(descriptor, source)| self.query_source(descriptor, source, query)),
            );
            tokio::select! {
                outcomes = fan_out => outcomes,
                () = cancel.cancelled() => {
                    tracing::debug!("dispatch cancelled by caller");
                    return Err(Error::Cancelled);
                }
                () = self.root.cancelled() => {
                    tracing::debug!("dispatch cancelled by shutdown");
                    return Err(Error::Cancelled);
                }
            }
        };

        // 4. Group completions by source, in priority order.
        let mut groups: Vec<SourceResults> = Vec::new();
        let mut errors: HashMap<String, SourceError> = HashMap::new();
        for (descriptor, outcome) in outcomes {
            match outcome {
                Ok(mut results) => {
                    results.truncate(self.config.max_results_per_source);
                    for result in &mut results {
                        result.source_id = descriptor.id.clone();
                    }
                    tracing::debug!(source = %descriptor.id, count = results.len(), "source returned results");
                    groups.push(SourceResults {
                        source_id: descriptor.id,
                        results,
                    });
                }
                Err(err) => {
                    tracing::warn!(source = %descriptor.id, error = %err, "source query failed");
                    errors.insert(descriptor.id, err);
                }
            }
        }

        // 5. Deduplicate across sources; first (highest-priority) wins.
        let dropped = dedup::deduplicate_grouped(&mut groups);
        if dropped > 0 {
            tracing::debug!(dropped, "cross-source duplicates removed");
        }

        // 6. Assemble, cache, return.
        let aggregated = AggregatedSearchResult {
            total_count: groups.iter().map(|g| g.results.len()).sum(),
            results_by_source: groups,
            per_source_errors: errors,
            elapsed: started.elapsed(),
        };

        let all_failed =
            aggregated.results_by_source.is_empty() && !aggregated.per_source_errors.is_empty();
        if caching && !all_failed {
            self.results_cache.put_with(
                cache_key,
                aggregated.clone(),
                Some(CacheTtl::After(self.config.result_ttl)),
                CachePriority::Low,
            );
        }
        Ok(aggregated)
    }

    /// Runs one source's search under the shared semaphore, its rate
    /// limit, and the overall deadline.
    async fn query_source(
        &self,
        descriptor: SourceDescriptor,
        source: Arc<dyn ContentSource>,
        query: &SearchQuery,
    ) -> (
        SourceDescriptor,
        std::result::Result<Vec<SearchResult>, SourceError>,
    ) {
        let outcome = tokio::time::timeout(self.config.overall_timeout, async {
            let _permit = match self.semaphore.acquire().await {
                Ok(permit) => permit,
                Err(_) => return Err(SourceError::Network("worker pool closed".into())),
            };
            self.limiter
                .acquire(&descriptor.id, descriptor.rate_limit_per_minute)
                .await;
            source.search(query).await
        })
        .await
        .unwrap_or(Err(SourceError::Timeout));
        (descriptor, outcome)
    }

    /// Streams per-source completions as they happen instead of waiting
    /// for the full aggregate. No deduplication or caching is applied;
    /// each source's results arrive exactly as that source returned
    /// them (source ids stamped). Cancelling `cancel` stops the stream.
    ///
    /// # Errors
    ///
    /// Same resolution errors as [`dispatch`](Self::dispatch).
    pub fn dispatch_stream(
        &self,
        query: &SearchQuery,
        source_ids: Option<&[String]>,
        cancel: CancellationToken,
    ) -> Result<ReceiverStream<SourceOutcome>> {
        let targets = self.sources.resolve(source_ids, Capability::Search)?;
        if targets.is_empty() {
            return Err(Error::NoSourcesAvailable(
                "no enabled source supports search for this request".into(),
            ));
        }

        let (tx, rx) = mpsc::channel(targets.len());
        for (descriptor, source) in targets {
            let tx = tx.clone();
            let semaphore = self.semaphore.clone();
            let limiter = self.limiter.clone();
            let query = query.clone();
            let cancel = cancel.clone();
            let shutdown = self.root.clone();
            let deadline = self.config.overall_timeout;
            let cap = self.config.max_results_per_source;

            tokio::spawn(async move {
                let work = tokio::time::timeout(deadline, async {
                    let _permit = match semaphore.acquire().await {
                        Ok(permit) => permit,
                        Err(_) => return Err(SourceError::Network("worker pool closed".into())),
                    };
                    limiter
                        .acquire(&descriptor.id, descriptor.rate_limit_per_minute)
                        .await;
                    source.search(&query).await
                });
                let outcome = tokio::select! {
                    outcome = work => outcome.unwrap_or(Err(SourceError::Timeout)),
                    () = cancel.cancelled() => return,
                    () = shutdown.cancelled() => return,
                };
                let outcome = outcome.map(|mut results| {
                    results.truncate(cap);
                    for result in &mut results {
                        result.source_id = descriptor.id.clone();
                    }
                    results
                });
                let _ = tx
                    .send(SourceOutcome {
                        source_id: descriptor.id,
                        outcome,
                    })
                    .await;
            });
        }
        Ok(ReceiverStream::new(rx))
    }

    /// Fetches one item's metadata through the shared
    /// `"content_metadata"` cache namespace.
    ///
    /// # Errors
    ///
    /// - [`Error::UnknownSource`] if `source_id` is not registered.
    /// - [`Error::NoSourcesAvailable`] if the source is disabled or
    ///   lacks the detail capability.
    /// - [`Error::Source`] if the source call fails or times out.
    pub async fn detail(&self, source_id: &str, external_id: &str) -> Result<ContentDetail> {
        let ids = [source_id.to_string()];
        let mut targets = self.sources.resolve(Some(&ids), Capability::Detail)?;
        let Some((descriptor, source)) = targets.pop() else {
            return Err(Error::NoSourcesAvailable(format!(
                "source '{source_id}' is disabled or does not provide detail"
            )));
        };

        let cache_key = format!("{source_id}:{external_id}");
        if let Some(hit) = self.metadata_cache.get(&cache_key) {
            tracing::debug!(key = %cache_key, "metadata cache hit");
            return Ok(hit);
        }

        self.limiter
            .acquire(&descriptor.id, descriptor.rate_limit_per_minute)
            .await;
        let detail = tokio::time::timeout(self.config.overall_timeout, source.detail(external_id))
            .await
            .unwrap_or(Err(SourceError::Timeout))
            .map_err(Error::Source)?;

        self.metadata_cache.put(cache_key, detail.clone());
        Ok(detail)
    }

    /// Cache registry shared with other engine consumers.
    pub fn caches(&self) -> &Arc<CacheRegistry> {
        &self.caches
    }

    /// Cancels all in-flight dispatches and flushes cache tiers.
    ///
    /// Idempotent; subsequent dispatch calls fail with
    /// [`Error::Cancelled`].
    pub fn shutdown(&self) {
        self.root.cancel();
        let flushed = self.caches.flush_all();
        tracing::debug!(flushed, "dispatcher shut down");
    }
}
