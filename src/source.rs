//! Source descriptors and the pluggable content-source contract.
//!
//! The engine never implements a provider's wire protocol. The host
//! application supplies each provider as an [`Arc<dyn ContentSource>`]
//! together with a [`SourceDescriptor`] describing its id, capabilities,
//! rate limit, and presentation priority. The registry owns the
//! descriptor state; plugins are only ever *called*.

use std::collections::HashSet;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result, SourceError};
use crate::types::{ChapterInfo, ContentDetail, SearchQuery, SearchResult};

/// Outcome of a single source operation.
pub type SourceResult<T> = std::result::Result<T, SourceError>;

/// Operations a content source can perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Capability {
    /// Free-text search.
    Search,
    /// Paginated catalogue browsing.
    Browse,
    /// Full metadata for one item.
    Detail,
    /// Chapter/episode listing for one item.
    Chapters,
}

/// An opaque credential blob passed through to a source plugin.
///
/// The engine never inspects or refreshes it; `Debug` output is redacted
/// so tokens cannot leak into logs.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthCredential(String);

impl AuthCredential {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Returns the raw credential for handing to the source plugin.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AuthCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AuthCredential(<redacted>)")
    }
}

/// Registration-time description of a content source.
///
/// Owned by the [`SourceRegistry`](crate::registry::SourceRegistry) once
/// registered; the dispatcher only ever reads cloned snapshots.
#[derive(Debug, Clone)]
pub struct SourceDescriptor {
    /// Unique source id, e.g. `"mangadex"`.
    pub id: String,
    /// Human-readable name for display.
    pub name: String,
    /// Which operations this source supports.
    pub capabilities: HashSet<Capability>,
    /// Maximum calls per rolling 60-second window. `0` means unlimited.
    pub rate_limit_per_minute: u32,
    /// Presentation priority; lower is preferred in result ordering and
    /// wins ties during deduplication.
    pub priority: u8,
    /// Disabled sources are skipped by the dispatcher.
    pub enabled: bool,
    /// Opaque credentials, if the source needs them.
    pub auth: Option<AuthCredential>,
}

impl SourceDescriptor {
    /// Builds a descriptor with search capability, a 60/min rate limit,
    /// priority 100, and enabled state.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            capabilities: HashSet::from([Capability::Search]),
            rate_limit_per_minute: 60,
            priority: 100,
            enabled: true,
            auth: None,
        }
    }

    /// Replaces the capability set.
    pub fn with_capabilities(mut self, capabilities: impl IntoIterator<Item = Capability>) -> Self {
        self.capabilities = capabilities.into_iter().collect();
        self
    }

    /// Sets the presentation priority (lower = preferred).
    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the per-minute rate limit (`0` = unlimited).
    pub fn with_rate_limit(mut self, per_minute: u32) -> Self {
        self.rate_limit_per_minute = per_minute;
        self
    }

    /// Checks required fields. Called by the registry at registration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSource`] if the id or name is empty, or the
    /// capability set is empty.
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(Error::InvalidSource("source id must not be empty".into()));
        }
        if self.name.trim().is_empty() {
            return Err(Error::InvalidSource("source name must not be empty".into()));
        }
        if self.capabilities.is_empty() {
            return Err(Error::InvalidSource(format!(
                "source '{}' declares no capabilities",
                self.id
            )));
        }
        Ok(())
    }

    /// True when the source declares `capability`.
    pub fn has_capability(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }
}

/// A pluggable content-source backend, supplied by the host application.
///
/// Only [`search`](Self::search) is mandatory; the remaining operations
/// default to [`SourceError::Unsupported`] and are gated by the
/// descriptor's capability set before being called. Implementations must
/// be `Send + Sync` so the dispatcher can query them concurrently.
#[async_trait]
pub trait ContentSource: Send + Sync {
    /// Searches this source.
    ///
    /// # Errors
    ///
    /// Returns a [`SourceError`] on network failure or a response the
    /// plugin cannot interpret. During a dispatch the error is recorded
    /// per-source and never aborts the other sources.
    async fn search(&self, query: &SearchQuery) -> SourceResult<Vec<SearchResult>>;

    /// Browses the source's catalogue, one page at a time.
    async fn browse(&self, _page: u32) -> SourceResult<Vec<SearchResult>> {
        Err(SourceError::Unsupported)
    }

    /// Fetches full metadata for one item.
    async fn detail(&self, _external_id: &str) -> SourceResult<ContentDetail> {
        Err(SourceError::Unsupported)
    }

    /// Lists chapters/episodes for one item.
    async fn chapters(&self, _external_id: &str) -> SourceResult<Vec<ChapterInfo>> {
        Err(SourceError::Unsupported)
    }
}

impl fmt::Debug for dyn ContentSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ContentSource")
    }
}
