//! Cache-key derivation for dispatch results.
//!
//! Two dispatches hit the same cache entry exactly when their normalised
//! query and resolved target set match: the query text is trimmed and
//! lowercased, genres are lowercased and sorted, and source ids are
//! sorted, so `["a", "b"]` and `["b", "a"]` produce the same key.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use crate::types::SearchQuery;

/// Builds a deterministic cache key for `query` against `source_ids`.
pub fn search_cache_key(query: &SearchQuery, source_ids: &[String]) -> String {
    let text = query.text.trim().to_lowercase();

    let mut genres: Vec<String> = query.genres.iter().map(|g| g.trim().to_lowercase()).collect();
    genres.sort();

    let mut ids: Vec<&str> = source_ids.iter().map(String::as_str).collect();
    ids.sort_unstable();

    let mut hasher = DefaultHasher::new();
    query.content_type.map(|t| t.name()).hash(&mut hasher);
    genres.hash(&mut hasher);
    query.sort.name().hash(&mut hasher);
    query.page.hash(&mut hasher);
    ids.hash(&mut hasher);

    format!("{text}:{:016x}", hasher.finish())
}
