//! Concurrent multi-source retrieval with memoization and deduplication.
//!
//! [`ConcurrentFetcher`] fans a query out across [`RetrievalSource`] backends
//! under a bounded concurrency limit, tolerates per-source failures, folds
//! duplicates with [`dedupe`], and memoizes whole result sets in a
//! [`QueryCache`] keyed by the normalized query text.

pub mod cache;
pub mod dedup;
pub mod fetcher;
pub mod source;

pub use cache::{CacheEntry, QueryCache};
pub use dedup::dedupe;
pub use fetcher::{ConcurrentFetcher, FetchReport};
pub use source::{RetrievalResult, RetrievalSource, SourceError, SourceKind};

use std::hash::Hasher;

use rustc_hash::FxHasher;

/// Canonical form used for cache keys and content keys: lowercased, with
/// whitespace runs collapsed to single spaces.
pub(crate) fn normalize(text: &str) -> String {
    text.split_whitespace()
        .map(|word| word.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Stable non-cryptographic hash of already-normalized text. Used for
/// identity only, never for integrity.
pub(crate) fn content_hash(normalized: &str) -> u64 {
    let mut hasher = FxHasher::default();
    hasher.write(normalized.as_bytes());
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_collapses_case_and_whitespace() {
        assert_eq!(
            normalize("  Solid-State   BATTERIES \t today "),
            "solid-state batteries today"
        );
    }

    #[test]
    fn normalized_variants_hash_identically() {
        let a = content_hash(&normalize("Grid Storage"));
        let b = content_hash(&normalize("  grid    STORAGE "));
        assert_eq!(a, b);
    }
}
