use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use delver::retrieval::{RetrievalResult, RetrievalSource, SourceError, SourceKind};

/// Deterministic source returning scripted results, with an invocation
/// counter and optional failure or delay behavior.
#[derive(Clone)]
pub struct ScriptedSource {
    pub kind: SourceKind,
    pub results: Vec<RetrievalResult>,
    pub calls: Arc<AtomicUsize>,
    pub fail: bool,
    pub delay: Option<Duration>,
}

impl ScriptedSource {
    pub fn new(kind: SourceKind, results: Vec<RetrievalResult>) -> Self {
        Self {
            kind,
            results,
            calls: Arc::new(AtomicUsize::new(0)),
            fail: false,
            delay: None,
        }
    }

    pub fn failing(kind: SourceKind) -> Self {
        Self {
            fail: true,
            ..Self::new(kind, vec![])
        }
    }

    pub fn delayed(kind: SourceKind, results: Vec<RetrievalResult>, delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::new(kind, results)
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RetrievalSource for ScriptedSource {
    fn kind(&self) -> SourceKind {
        self.kind
    }

    async fn query(
        &self,
        _text: &str,
        max_results: usize,
    ) -> Result<Vec<RetrievalResult>, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail {
            return Err(SourceError::Backend {
                backend: self.kind.label(),
                message: "scripted failure".into(),
            });
        }
        Ok(self.results.iter().take(max_results).cloned().collect())
    }
}

pub fn result(kind: SourceKind, title: &str, snippet: &str, relevance: f64) -> RetrievalResult {
    RetrievalResult {
        origin: kind,
        title: title.to_string(),
        snippet: snippet.to_string(),
        url: format!("https://example.test/{}", title.replace(' ', "-").to_lowercase()),
        authors: vec!["A. Researcher".to_string()],
        published: Some("2024".to_string()),
        relevance,
    }
}

/// A snippet long enough that a handful of results clears the analysis
/// word-count check.
pub fn long_snippet(index: usize) -> String {
    format!(
        "Part {index}: the survey shows that grid scale storage deployments doubled over \
         the last reporting period, with lithium iron phosphate packs dominating new \
         installations while flow batteries and compressed air systems held a steady \
         niche in long duration applications across utility portfolios, and interconnect \
         queues remained the main bottleneck for commissioning timelines."
    )
}

/// Two distinct rich results for a source kind.
pub fn rich_results(kind: SourceKind, relevance: f64) -> Vec<RetrievalResult> {
    (0..2)
        .map(|index| {
            result(
                kind,
                &format!("{} Report {index}", kind.label()),
                &long_snippet(index),
                relevance,
            )
        })
        .collect()
}
