//! Cross-source result deduplication by normalised title.
//!
//! Two results are the same work when their normalised titles and
//! content types match. When duplicates appear across sources, the
//! entry from the higher-priority source (the one whose group comes
//! first) is kept and the rest are dropped. This is a heuristic:
//! legitimately distinct works sharing a title will merge; the title
//! rule is preserved as-is because no cross-source identity scheme
//! exists.

use std::collections::HashSet;

use crate::types::{ContentType, SourceResults};

/// Normalises a title for identity comparison.
///
/// Lowercases, maps punctuation to spaces, and collapses whitespace, so
/// `"Dragon-Quest!"` and `"dragon quest"` compare equal.
pub fn normalize_title(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut last_was_space = true;
    for ch in raw.chars() {
        let ch = if ch.is_alphanumeric() {
            ch.to_lowercase().next().unwrap_or(ch)
        } else {
            ' '
        };
        if ch == ' ' {
            if !last_was_space {
                out.push(' ');
            }
            last_was_space = true;
        } else {
            out.push(ch);
            last_was_space = false;
        }
    }
    while out.ends_with(' ') {
        out.pop();
    }
    out
}

/// Removes duplicate works across (and within) source groups.
///
/// `groups` must already be ordered by ascending source priority; the
/// first occurrence of each `(normalised title, content type)` identity
/// survives, which attributes every duplicated work to its
/// highest-priority source. Returns how many results were dropped.
pub fn deduplicate_grouped(groups: &mut [SourceResults]) -> usize {
    let mut seen: HashSet<(String, ContentType)> = HashSet::new();
    let mut dropped = 0;

    for group in groups.iter_mut() {
        group.results.retain(|result| {
            let identity = (normalize_title(&result.title), result.content_type);
            if seen.contains(&identity) {
                dropped += 1;
                false
            } else {
                seen.insert(identity);
                true
            }
        });
    }
    dropped
}
