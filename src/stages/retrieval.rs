//! Retrieval: run the planned queries through the concurrent fetcher.

use std::sync::Arc;

use async_trait::async_trait;
use rustc_hash::FxHashSet;
use serde_json::json;

use super::planning::META_QUERIES;
use crate::message::Message;
use crate::retrieval::{ConcurrentFetcher, dedupe};
use crate::stage::{Stage, StageContext, StageError};
use crate::state::{Citation, StageUpdate, StateView, phases};

/// Metadata keys written by this stage.
pub const META_SOURCES_FAILED: &str = "sources_failed";
pub const META_CACHE_HITS: &str = "cache_hits";

pub struct RetrievalStage {
    fetcher: Arc<ConcurrentFetcher>,
}

impl RetrievalStage {
    pub fn new(fetcher: Arc<ConcurrentFetcher>) -> Self {
        Self { fetcher }
    }
}

#[async_trait]
impl Stage for RetrievalStage {
    async fn execute(&self, view: StateView, ctx: StageContext) -> Result<StageUpdate, StageError> {
        // Planned queries when planning ran; bare topic title otherwise.
        let queries: Vec<String> = view
            .metadata
            .get(META_QUERIES)
            .and_then(|value| value.as_array())
            .map(|values| {
                values
                    .iter()
                    .filter_map(|value| value.as_str())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_else(|| vec![view.topic.title().to_string()]);

        let mut aggregated = Vec::new();
        let mut sources_failed = 0usize;
        let mut cache_hits = 0usize;
        for query in &queries {
            let report = self.fetcher.fetch(query).await;
            sources_failed += report.sources_failed;
            if report.from_cache {
                cache_hits += 1;
            }
            aggregated.extend(report.results);
        }
        // Per-query results are already deduplicated; fold across queries too.
        let results = dedupe(aggregated);

        // Citations append across steps, so a redo pass must only cite
        // results that are not already in the bibliography.
        let cited: FxHashSet<(&str, &str)> = view
            .citations
            .iter()
            .map(|citation| (citation.title.as_str(), citation.url.as_str()))
            .collect();
        let citations: Vec<Citation> = results
            .iter()
            .filter(|result| !cited.contains(&(result.title.as_str(), result.url.as_str())))
            .filter_map(Citation::from_result)
            .collect();
        ctx.emit(format!(
            "retrieved {} results over {} queries ({} source failures)",
            results.len(),
            queries.len(),
            sources_failed
        ))?;

        // Zero results is not an error; analysis confidence will reflect it
        // and the quality route will react.
        Ok(StageUpdate::new()
            .with_phase(phases::ANALYZING)
            .with_messages(vec![Message::assistant(format!(
                "Retrieved {} unique results for '{}'.",
                results.len(),
                view.topic.title()
            ))])
            .with_sources(results)
            .with_citations(citations)
            .with_metadata_entry(META_SOURCES_FAILED, json!(sources_failed))
            .with_metadata_entry(META_CACHE_HITS, json!(cache_hits)))
    }
}
