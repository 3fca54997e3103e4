//! Core value types for queries, per-source results, and aggregates.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::SourceError;

/// Kind of content a source item represents.
///
/// Part of the deduplication identity: two results merge only when both
/// the normalised title *and* the content type match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContentType {
    Manga,
    Anime,
    Novel,
}

impl ContentType {
    /// Returns the lowercase name used in cache keys and logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Manga => "manga",
            Self::Anime => "anime",
            Self::Novel => "novel",
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Requested ordering of results within each source's list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SortOrder {
    /// Source-native relevance ordering.
    #[default]
    Relevance,
    /// Alphabetical by title.
    Title,
    /// Most recently updated first.
    UpdatedAt,
    /// Highest rated first.
    Rating,
}

impl SortOrder {
    /// Returns the lowercase name used in cache keys.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Relevance => "relevance",
            Self::Title => "title",
            Self::UpdatedAt => "updated_at",
            Self::Rating => "rating",
        }
    }
}

/// An immutable search request, passed by value into a dispatch call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchQuery {
    /// Free-text query.
    pub text: String,
    /// Restrict results to one content type.
    pub content_type: Option<ContentType>,
    /// Genre filters; matching semantics are source-defined.
    pub genres: Vec<String>,
    /// Requested per-source ordering.
    pub sort: SortOrder,
    /// 1-based result page.
    pub page: u32,
}

impl SearchQuery {
    /// Builds a query for `text` with no filters, relevance order, page 1.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            content_type: None,
            genres: Vec::new(),
            sort: SortOrder::default(),
            page: 1,
        }
    }
}

/// A single item returned by one content source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    /// Id of the source that produced this result. Stamped by the
    /// dispatcher, so plugins cannot mislabel their output.
    pub source_id: String,
    /// The item's id within its source's namespace.
    pub external_id: String,
    /// Display title.
    pub title: String,
    /// Content kind; part of the deduplication identity.
    pub content_type: ContentType,
    /// Cover image URL, if the source provides one.
    pub cover_url: Option<String>,
    /// Source-reported rating, if any.
    pub rating: Option<f32>,
    /// Publication status as reported by the source (e.g. "ongoing").
    pub status: Option<String>,
    /// Source-specific passthrough fields, preserved verbatim.
    #[serde(default)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl SearchResult {
    /// Builds a minimal result; optional fields start empty.
    pub fn new(
        external_id: impl Into<String>,
        title: impl Into<String>,
        content_type: ContentType,
    ) -> Self {
        Self {
            source_id: String::new(),
            external_id: external_id.into(),
            title: title.into(),
            content_type,
            cover_url: None,
            rating: None,
            status: None,
            extra: HashMap::new(),
        }
    }
}

/// Full metadata for one item, fetched through a source's detail capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentDetail {
    pub external_id: String,
    pub title: String,
    pub content_type: ContentType,
    pub description: Option<String>,
    pub genres: Vec<String>,
    pub cover_url: Option<String>,
    pub rating: Option<f32>,
    pub status: Option<String>,
    /// Source-specific passthrough fields, preserved verbatim.
    #[serde(default)]
    pub extra: HashMap<String, serde_json::Value>,
}

/// One chapter or episode entry from a source's chapter listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChapterInfo {
    /// The chapter's id within its source's namespace.
    pub external_id: String,
    /// Chapter/episode number; fractional numbers (e.g. 10.5) are common.
    pub number: Option<f64>,
    pub title: Option<String>,
}

/// Results from one source, in the order that source returned them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceResults {
    pub source_id: String,
    pub results: Vec<SearchResult>,
}

/// The outcome of one dispatch call.
///
/// Immutable after construction and safe to cache. Sources that failed
/// contribute nothing to [`results_by_source`](Self::results_by_source)
/// and appear in [`per_source_errors`](Self::per_source_errors) instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedSearchResult {
    /// Per-source result groups. Insertion order is ascending source
    /// priority, so iterating yields the preferred source first.
    pub results_by_source: Vec<SourceResults>,
    /// Total results across all groups, after deduplication.
    pub total_count: usize,
    /// Sources that errored or timed out, keyed by source id.
    pub per_source_errors: HashMap<String, SourceError>,
    /// Wall-clock time the dispatch took.
    pub elapsed: Duration,
}

impl AggregatedSearchResult {
    /// Iterates all results in presentation order (source priority, then
    /// each source's own ordering).
    pub fn results(&self) -> impl Iterator<Item = &SearchResult> {
        self.results_by_source.iter().flat_map(|g| g.results.iter())
    }

    /// True when every queried source answered without error.
    pub fn is_complete(&self) -> bool {
        self.per_source_errors.is_empty()
    }
}
