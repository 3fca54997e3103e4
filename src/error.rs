//! Error types for the yomu-core aggregation engine.
//!
//! Two layers, mirroring how failures travel through the engine:
//!
//! - [`Error`] — caller-facing failures: registry misuse, invalid
//!   configuration, an empty resolved source set, or a cancelled dispatch.
//! - [`SourceError`] — per-source failures (network, malformed response,
//!   timeout). During a dispatch these are always recovered locally and
//!   recorded in the aggregate's error map; they never abort the other
//!   sources. Single-source operations (e.g. a detail lookup) surface them
//!   through [`Error::Source`].

use serde::{Deserialize, Serialize};

/// Errors surfaced to callers of the aggregation engine.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No enabled source with the required capability matched the request.
    #[error("no sources available: {0}")]
    NoSourcesAvailable(String),

    /// A source with this id is already registered.
    #[error("duplicate source id: {0}")]
    DuplicateSource(String),

    /// A source descriptor failed validation at registration time.
    #[error("invalid source: {0}")]
    InvalidSource(String),

    /// The caller referenced a source id that is not registered.
    #[error("unknown source id: {0}")]
    UnknownSource(String),

    /// Invalid cache or dispatch configuration, rejected before use.
    #[error("config error: {0}")]
    Config(String),

    /// The dispatch was cancelled by the caller or by engine shutdown.
    #[error("dispatch cancelled")]
    Cancelled,

    /// A single-source operation failed at the source.
    #[error("source error: {0}")]
    Source(#[from] SourceError),
}

/// Convenience type alias for yomu-core results.
pub type Result<T> = std::result::Result<T, Error>;

/// A failure local to one content source.
///
/// Serializable so it can travel inside a cached
/// [`AggregatedSearchResult`](crate::types::AggregatedSearchResult).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum SourceError {
    /// The network call to the source failed.
    #[error("network error: {0}")]
    Network(String),

    /// The source responded with data the plugin could not interpret.
    #[error("malformed response: {0}")]
    Malformed(String),

    /// The source did not complete within the dispatch deadline.
    #[error("source timed out")]
    Timeout,

    /// The source does not implement the requested capability.
    #[error("operation not supported by this source")]
    Unsupported,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_no_sources_available() {
        let err = Error::NoSourcesAvailable("no enabled search sources".into());
        assert_eq!(
            err.to_string(),
            "no sources available: no enabled search sources"
        );
    }

    #[test]
    fn display_duplicate_source() {
        let err = Error::DuplicateSource("mangadex".into());
        assert_eq!(err.to_string(), "duplicate source id: mangadex");
    }

    #[test]
    fn display_config() {
        let err = Error::Config("max_entries must be greater than 0".into());
        assert_eq!(
            err.to_string(),
            "config error: max_entries must be greater than 0"
        );
    }

    #[test]
    fn display_cancelled() {
        assert_eq!(Error::Cancelled.to_string(), "dispatch cancelled");
    }

    #[test]
    fn display_source_error_variants() {
        assert_eq!(
            SourceError::Network("connection refused".into()).to_string(),
            "network error: connection refused"
        );
        assert_eq!(SourceError::Timeout.to_string(), "source timed out");
        assert_eq!(
            SourceError::Unsupported.to_string(),
            "operation not supported by this source"
        );
    }

    #[test]
    fn source_error_converts_into_error() {
        let err: Error = SourceError::Timeout.into();
        assert!(matches!(err, Error::Source(SourceError::Timeout)));
        assert_eq!(err.to_string(), "source error: source timed out");
    }

    #[test]
    fn source_error_serde_round_trip() {
        let err = SourceError::Malformed("missing title field".into());
        let json = serde_json::to_string(&err).expect("serialize");
        let decoded: SourceError = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(decoded, err);
    }

    #[test]
    fn errors_are_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Error>();
        assert_send_sync::<SourceError>();
    }
}
