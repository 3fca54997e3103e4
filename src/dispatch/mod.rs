//! Concurrent search dispatch: fan-out, aggregation, caching.
//!
//! The dispatcher resolves the target source set from the registry,
//! checks the result cache, fans the query out under a bounded worker
//! pool with per-source rate limiting, isolates per-source failures,
//! deduplicates across sources, and caches the aggregate.

pub mod dedup;
pub mod key;
mod search;

pub use search::{DispatchConfig, SearchDispatcher, SourceOutcome};
