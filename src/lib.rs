//! # yomu-core
//!
//! Content-source aggregation and caching engine for Yomu, a media
//! library client for manga, anime, and novels.
//!
//! This crate is the client's backbone: it keeps a registry of pluggable
//! content sources, fans search queries out to them concurrently, and
//! shields flaky providers behind per-source rate limits, a shared
//! deadline, and a TTL cache. It compiles into the client as a library
//! dependency; there is no server and no process global.
//!
//! ## Design
//!
//! - Sources implement [`ContentSource`] and register through
//!   [`SourceRegistry`] with a descriptor carrying capabilities,
//!   priority, and rate limit
//! - [`SearchDispatcher`] queries all eligible sources concurrently,
//!   bounded by a semaphore and a single overall deadline
//! - Graceful degradation: if some sources fail, others still return
//!   results; failures land in the aggregate's per-source error map
//! - Cross-source duplicates are collapsed, attributed to the
//!   highest-priority source
//! - Named, independently configured TTL caches with priority-aware
//!   eviction and optional persistent tiers, managed by
//!   [`CacheRegistry`](cache::registry::CacheRegistry)
//!
//! ## Security
//!
//! - Source credentials are held as [`AuthCredential`](source::AuthCredential)
//!   and never appear in `Debug` output or logs
//! - Search queries are logged only at debug level

pub mod cache;
pub mod dispatch;
pub mod error;
pub mod rate_limit;
pub mod registry;
pub mod source;
pub mod types;

pub use dispatch::{DispatchConfig, SearchDispatcher};
pub use error::{Error, Result, SourceError};
pub use rate_limit::RateLimiter;
pub use registry::SourceRegistry;
pub use source::{Capability, ContentSource, SourceDescriptor};
pub use types::{AggregatedSearchResult, ContentType, SearchQuery, SearchResult};

/// Search all enabled sources with a default dispatcher.
///
/// Convenience wrapper for callers that do not need custom tuning,
/// caching reuse, or cancellation: builds a [`SearchDispatcher`] with
/// [`DispatchConfig::default()`] over fresh collaborators and runs one
/// query against every enabled, search-capable source in `sources`.
/// Long-lived callers should construct a [`SearchDispatcher`] once and
/// keep it.
///
/// # Errors
///
/// Returns [`Error::NoSourcesAvailable`] if no enabled source supports
/// search.
///
/// # Examples
///
/// ```no_run
/// # use std::sync::Arc;
/// # async fn example() -> yomu_core::Result<()> {
/// let sources = Arc::new(yomu_core::SourceRegistry::new());
/// // ... register sources ...
/// let query = yomu_core::SearchQuery::new("one piece");
/// let aggregated = yomu_core::search(sources, &query).await?;
/// for result in aggregated.results() {
///     println!("{} [{}]", result.title, result.source_id);
/// }
/// # Ok(())
/// # }
/// ```
pub async fn search(
    sources: std::sync::Arc<SourceRegistry>,
    query: &SearchQuery,
) -> Result<AggregatedSearchResult> {
    let dispatcher = SearchDispatcher::new(
        sources,
        std::sync::Arc::new(RateLimiter::new()),
        std::sync::Arc::new(cache::registry::CacheRegistry::new()),
        DispatchConfig::default(),
    )?;
    dispatcher.dispatch(query, None).await
}
