//! Text completion seam used by the drafting stages.

use async_trait::async_trait;
use miette::Diagnostic;
use thiserror::Error;

/// Produces finished prose from a system instruction and a drafted prompt.
///
/// The built-in stages compose complete deterministic drafts and hand them
/// to the provider, so a provider only ever needs to rewrite or polish text,
/// never invent structure. [`TemplateProvider`] is the zero-dependency
/// default; a model-backed implementation slots in behind the same trait.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(&self, system: &str, draft: &str) -> Result<String, ProviderError>;
}

#[derive(Debug, Error, Diagnostic)]
pub enum ProviderError {
    #[error("provider unavailable: {message}")]
    #[diagnostic(code(delver::provider::unavailable))]
    Unavailable { message: String },

    #[error("provider rejected the request: {message}")]
    #[diagnostic(code(delver::provider::rejected))]
    Rejected { message: String },
}

/// Deterministic provider that returns the stage's draft unchanged.
#[derive(Clone, Copy, Debug, Default)]
pub struct TemplateProvider;

impl TemplateProvider {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CompletionProvider for TemplateProvider {
    async fn complete(&self, _system: &str, draft: &str) -> Result<String, ProviderError> {
        Ok(draft.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn template_provider_echoes_draft() {
        let provider = TemplateProvider::new();
        let out = provider.complete("system", "draft text").await.unwrap();
        assert_eq!(out, "draft text");
    }
}
