//! Bounded fan-out across retrieval sources.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, instrument, warn};

use super::cache::QueryCache;
use super::dedup::dedupe;
use super::source::{RetrievalResult, RetrievalSource};

const DEFAULT_MAX_CONCURRENCY: usize = 3;
const DEFAULT_SOURCE_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_MAX_RESULTS: usize = 10;

/// Outcome of one aggregate fetch.
#[derive(Clone, Debug)]
pub struct FetchReport {
    /// Deduplicated results, truncated to the configured maximum. Source
    /// order is preserved: results from earlier-registered sources come
    /// first.
    pub results: Vec<RetrievalResult>,
    /// Number of sources that failed or timed out. Failures are tolerated;
    /// the report still carries whatever the surviving sources returned.
    pub sources_failed: usize,
    /// Whether the results came from the cache without touching any source.
    pub from_cache: bool,
}

/// Fans a query out across its sources under a concurrency bound.
///
/// A failing or slow source costs its own results and nothing else. An
/// all-sources-failed fetch yields an empty report rather than an error;
/// whether that is acceptable is a pipeline-level decision.
///
/// Dropping the future returned by [`ConcurrentFetcher::fetch`] aborts any
/// in-flight source tasks, so an engine-level deadline cancels retrieval
/// work instead of leaking it.
pub struct ConcurrentFetcher {
    sources: Vec<Arc<dyn RetrievalSource>>,
    cache: Option<QueryCache>,
    max_concurrency: usize,
    source_timeout: Duration,
    max_results: usize,
}

impl ConcurrentFetcher {
    pub fn new(sources: Vec<Arc<dyn RetrievalSource>>) -> Self {
        Self {
            sources,
            cache: None,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            source_timeout: DEFAULT_SOURCE_TIMEOUT,
            max_results: DEFAULT_MAX_RESULTS,
        }
    }

    /// Memoize finished result sets in `cache`. Without a cache every fetch
    /// goes to the sources.
    #[must_use]
    pub fn with_cache(mut self, cache: QueryCache) -> Self {
        self.cache = Some(cache);
        self
    }

    #[must_use]
    pub fn with_max_concurrency(mut self, limit: usize) -> Self {
        self.max_concurrency = limit.max(1);
        self
    }

    #[must_use]
    pub fn with_source_timeout(mut self, timeout: Duration) -> Self {
        self.source_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = max_results.max(1);
        self
    }

    /// Run `query` against all sources and aggregate the results.
    ///
    /// The cache is consulted first; a hit bypasses all source work. On a
    /// miss, every source runs under the concurrency bound with a per-source
    /// timeout, survivors are aggregated in registration order, duplicates
    /// are folded first-seen-wins, and the truncated set is memoized.
    #[instrument(skip(self), fields(query = %query, sources = self.sources.len()))]
    pub async fn fetch(&self, query: &str) -> FetchReport {
        if let Some(cache) = &self.cache
            && let Some(results) = cache.get(query)
        {
            debug!(count = results.len(), "query cache hit");
            return FetchReport {
                results,
                sources_failed: 0,
                from_cache: true,
            };
        }

        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let mut tasks: JoinSet<(usize, &'static str, Result<Vec<RetrievalResult>, String>)> =
            JoinSet::new();

        for (index, source) in self.sources.iter().enumerate() {
            let source = Arc::clone(source);
            let semaphore = Arc::clone(&semaphore);
            let query = query.to_string();
            let timeout = self.source_timeout;
            let max_results = self.max_results;
            let label = source.kind().label();

            tasks.spawn(async move {
                let permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return (index, label, Err("semaphore closed".to_string())),
                };
                let outcome =
                    match tokio::time::timeout(timeout, source.query(&query, max_results)).await {
                        Ok(Ok(results)) => Ok(results),
                        Ok(Err(err)) => Err(err.to_string()),
                        Err(_) => Err(format!("timed out after {timeout:?}")),
                    };
                drop(permit);
                (index, label, outcome)
            });
        }

        // Slots keep aggregation deterministic regardless of completion order.
        let mut slots: Vec<Option<Vec<RetrievalResult>>> = vec![None; self.sources.len()];
        let mut sources_failed = 0usize;

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, _, Ok(results))) => slots[index] = Some(results),
                Ok((_, label, Err(message))) => {
                    warn!(source = label, error = %message, "source fetch failed");
                    sources_failed += 1;
                }
                Err(join_error) => {
                    warn!(error = %join_error, "source task aborted");
                    sources_failed += 1;
                }
            }
        }

        let aggregated: Vec<RetrievalResult> =
            slots.into_iter().flatten().flatten().collect();
        let mut results = dedupe(aggregated);
        results.truncate(self.max_results);

        if let Some(cache) = &self.cache {
            cache.put(query, results.clone());
        }

        debug!(
            count = results.len(),
            failed = sources_failed,
            "aggregate fetch complete"
        );
        FetchReport {
            results,
            sources_failed,
            from_cache: false,
        }
    }
}
