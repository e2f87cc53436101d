//! Retrieval source contract and result records.

use async_trait::async_trait;
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{content_hash, normalize};

/// Kind of backend a result came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Web,
    Arxiv,
    Scholar,
}

impl SourceKind {
    /// Confidence bonus added to a result's relevance during analysis.
    /// Academic origins earn more than the open web.
    pub fn confidence_bonus(self) -> f64 {
        match self {
            SourceKind::Web => 0.1,
            SourceKind::Arxiv | SourceKind::Scholar => 0.3,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            SourceKind::Web => "web",
            SourceKind::Arxiv => "arxiv",
            SourceKind::Scholar => "scholar",
        }
    }
}

/// One retrieved document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub origin: SourceKind,
    pub title: String,
    pub snippet: String,
    pub url: String,
    pub authors: Vec<String>,
    /// Publication date as reported by the backend, when it reports one.
    pub published: Option<String>,
    /// Backend-reported relevance in `[0.0, 1.0]`.
    pub relevance: f64,
}

impl RetrievalResult {
    /// Identity key for deduplication: hash of the normalized title and
    /// snippet. Origin and relevance deliberately do not participate, so the
    /// same document surfaced by two backends collapses to one entry.
    pub fn content_key(&self) -> u64 {
        let normalized = format!("{}\n{}", normalize(&self.title), normalize(&self.snippet));
        content_hash(&normalized)
    }
}

/// A queryable search backend. Implementations must be safe to call from
/// concurrent tasks.
#[async_trait]
pub trait RetrievalSource: Send + Sync {
    fn kind(&self) -> SourceKind;

    /// Run a query, returning at most `max_results` results.
    async fn query(
        &self,
        text: &str,
        max_results: usize,
    ) -> Result<Vec<RetrievalResult>, SourceError>;
}

/// Errors surfaced by a retrieval backend. The fetcher treats all of these
/// as non-fatal for the aggregate fetch.
#[derive(Debug, Error, Diagnostic)]
pub enum SourceError {
    #[error("backend error ({backend}): {message}")]
    #[diagnostic(code(delver::retrieval::backend))]
    Backend {
        backend: &'static str,
        message: String,
    },

    #[error("malformed response from {backend}: {message}")]
    #[diagnostic(code(delver::retrieval::malformed))]
    Malformed {
        backend: &'static str,
        message: String,
    },
}
