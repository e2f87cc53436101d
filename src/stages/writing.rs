//! Writing: compile the synthesized sections into the final report.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;

use super::provider::CompletionProvider;
use super::provider_error;
use super::synthesis::META_SYNTHESIS;
use crate::message::Message;
use crate::stage::{Stage, StageContext, StageError};
use crate::state::{StageUpdate, StateView, phases};

const SYSTEM: &str = "You are a technical writer. Produce the final polished report.";

/// Metadata keys written by this stage.
pub const META_FINAL_REPORT: &str = "final_report";
pub const META_REPORT_WORD_COUNT: &str = "report_word_count";
pub const META_CITATION_COUNT: &str = "citation_count";

pub struct WritingStage {
    provider: Arc<dyn CompletionProvider>,
}

impl WritingStage {
    pub fn new(provider: Arc<dyn CompletionProvider>) -> Self {
        Self { provider }
    }
}

fn references(view: &StateView) -> String {
    if view.citations.is_empty() {
        return "No citations recorded.".to_string();
    }
    view.citations
        .iter()
        .enumerate()
        .map(|(index, citation)| {
            let authors = if citation.authors.is_empty() {
                "Unknown authors".to_string()
            } else {
                citation.authors.join(", ")
            };
            format!(
                "{}. {} ({}). {}",
                index + 1,
                citation.title,
                authors,
                citation.url
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[async_trait]
impl Stage for WritingStage {
    async fn execute(&self, view: StateView, ctx: StageContext) -> Result<StageUpdate, StageError> {
        let Some(synthesis) = view.metadata_str(META_SYNTHESIS) else {
            return Err(StageError::MissingInput {
                what: "synthesized sections",
            });
        };

        let draft = format!(
            "# {title}\n\nDate: {date}\nDomain: {domain}\n\n{synthesis}\n\n## References\n{references}",
            title = view.topic.title(),
            date = Utc::now().format("%Y-%m-%d"),
            domain = view.topic.domain(),
            references = references(&view),
        );
        let report = self
            .provider
            .complete(SYSTEM, &draft)
            .await
            .map_err(provider_error)?;

        let word_count = report.split_whitespace().count();
        ctx.emit(format!(
            "compiled final report: {word_count} words, {} citations",
            view.citations.len()
        ))?;

        Ok(StageUpdate::new()
            .with_phase(phases::COMPLETED)
            .with_messages(vec![Message::assistant(format!(
                "Final report compiled ({word_count} words, {} citations).",
                view.citations.len()
            ))])
            .with_metadata_entry(META_FINAL_REPORT, json!(report))
            .with_metadata_entry(META_REPORT_WORD_COUNT, json!(word_count))
            .with_metadata_entry(META_CITATION_COUNT, json!(view.citations.len())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::TemplateProvider;
    use crate::state::{Complexity, ResearchState, Topic};

    #[tokio::test]
    async fn requires_synthesis() {
        let topic =
            Topic::new("Grid Scale Storage", "energy", Complexity::Intermediate).unwrap();
        let state = ResearchState::new(topic);
        let stage = WritingStage::new(Arc::new(TemplateProvider::new()));
        let (tx, _rx) = flume::unbounded();
        let ctx = StageContext {
            stage_id: "writing".into(),
            step: 6,
            events: tx,
        };
        let err = stage.execute(state.snapshot(), ctx).await.unwrap_err();
        assert!(matches!(err, StageError::MissingInput { .. }));
    }

    #[tokio::test]
    async fn compiles_report_and_counts() {
        let topic =
            Topic::new("Grid Scale Storage", "energy", Complexity::Intermediate).unwrap();
        let mut state = ResearchState::new(topic);
        state
            .metadata
            .insert(META_SYNTHESIS.into(), json!("## Executive Summary\nBody."));
        let stage = WritingStage::new(Arc::new(TemplateProvider::new()));
        let (tx, _rx) = flume::unbounded();
        let ctx = StageContext {
            stage_id: "writing".into(),
            step: 6,
            events: tx,
        };
        let update = stage.execute(state.snapshot(), ctx).await.unwrap();
        assert_eq!(update.phase.as_deref(), Some(phases::COMPLETED));
        let metadata = update.metadata.unwrap();
        let report = metadata[META_FINAL_REPORT].as_str().unwrap();
        assert!(report.starts_with("# Grid Scale Storage"));
        assert!(report.contains("No citations recorded."));
        assert!(metadata[META_REPORT_WORD_COUNT].as_u64().unwrap() > 0);
        assert_eq!(metadata[META_CITATION_COUNT], json!(0));
    }
}
