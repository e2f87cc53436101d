//! First-seen-wins deduplication over content keys.

use rustc_hash::FxHashSet;

use super::source::RetrievalResult;

/// Drop results whose [`RetrievalResult::content_key`] was already seen,
/// keeping the earliest occurrence and the overall order.
pub fn dedupe(results: Vec<RetrievalResult>) -> Vec<RetrievalResult> {
    let mut seen = FxHashSet::default();
    results
        .into_iter()
        .filter(|result| seen.insert(result.content_key()))
        .collect()
}
