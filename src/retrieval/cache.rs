//! In-memory memoization of whole fetch result sets.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::sync::Arc;

use super::source::RetrievalResult;
use super::{content_hash, normalize};

/// One memoized result set.
#[derive(Clone, Debug)]
pub struct CacheEntry {
    /// Normalized form of the query that produced the entry.
    pub query: String,
    pub fetched_at: DateTime<Utc>,
    pub results: Vec<RetrievalResult>,
}

/// Concurrency-safe query cache keyed by normalized query text.
///
/// Two textually different queries that normalize identically share an
/// entry; distinct normalized queries never interfere. The cache is
/// unbounded for the lifetime of the process; eviction is left to callers
/// that need it.
#[derive(Clone, Debug, Default)]
pub struct QueryCache {
    inner: Arc<Mutex<FxHashMap<u64, CacheEntry>>>,
}

impl QueryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cache key for a raw query string.
    pub fn key(query: &str) -> u64 {
        content_hash(&normalize(query))
    }

    /// Look up the memoized results for a query, if any.
    pub fn get(&self, query: &str) -> Option<Vec<RetrievalResult>> {
        self.inner
            .lock()
            .get(&Self::key(query))
            .map(|entry| entry.results.clone())
    }

    /// Memoize a finished result set for a query.
    pub fn put(&self, query: &str, results: Vec<RetrievalResult>) {
        let entry = CacheEntry {
            query: normalize(query),
            fetched_at: Utc::now(),
            results,
        };
        self.inner.lock().insert(Self::key(query), entry);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}
