use async_trait::async_trait;
use delver::stages::{CompletionProvider, ProviderError};

/// Provider that always errors, for exercising fatal stage failures.
#[derive(Clone, Copy, Debug, Default)]
pub struct FailingProvider;

#[async_trait]
impl CompletionProvider for FailingProvider {
    async fn complete(&self, _system: &str, _draft: &str) -> Result<String, ProviderError> {
        Err(ProviderError::Unavailable {
            message: "scripted outage".into(),
        })
    }
}
