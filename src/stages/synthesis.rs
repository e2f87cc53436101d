//! Synthesis: fold validated material into report sections.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use super::provider::CompletionProvider;
use super::provider_error;
use crate::message::Message;
use crate::stage::{Stage, StageContext, StageError};
use crate::state::{FindingCategory, StageUpdate, StateView, phases};

const SYSTEM: &str =
    "You are a research synthesizer. Combine the analysis into coherent report sections.";

/// Metadata key holding the synthesized sections.
pub const META_SYNTHESIS: &str = "synthesis";

pub struct SynthesisStage {
    provider: Arc<dyn CompletionProvider>,
}

impl SynthesisStage {
    pub fn new(provider: Arc<dyn CompletionProvider>) -> Self {
        Self { provider }
    }
}

/// Numbered per-source digest, capped at ten entries with snippets trimmed
/// to 200 characters.
fn literature_review(view: &StateView) -> String {
    if view.sources.is_empty() {
        return "No sources were retrieved for review.".to_string();
    }
    let mut lines = vec![format!(
        "Based on {} sources, the literature shows:",
        view.sources.len()
    )];
    for (index, source) in view.sources.iter().take(10).enumerate() {
        let digest: String = source.snippet.chars().take(200).collect();
        lines.push(format!(
            "{}. {} ({}): {}",
            index + 1,
            source.title,
            source.origin.label(),
            digest
        ));
    }
    lines.join("\n")
}

fn section(view: &StateView, category: FindingCategory, fallback: &str) -> String {
    let lines: Vec<String> = view
        .findings
        .iter()
        .filter(|finding| finding.category == category)
        .map(|finding| format!("- {}", finding.content))
        .collect();
    if lines.is_empty() {
        fallback.to_string()
    } else {
        lines.join("\n")
    }
}

#[async_trait]
impl Stage for SynthesisStage {
    async fn execute(&self, view: StateView, ctx: StageContext) -> Result<StageUpdate, StageError> {
        let Some(analysis) = &view.analysis else {
            return Err(StageError::MissingInput {
                what: "analysis record",
            });
        };

        let draft = format!(
            "## Executive Summary\n\
             Research into '{title}' across {considered} sources reached a confidence of {confidence:.2}.\n\n\
             ## Literature Review\n{review}\n\n\
             ## Key Findings\n{findings}\n\n\
             ## Methodology\n{methodology}\n\n\
             ## Limitations\n{limitations}\n\n\
             ## Recommendations\n{recommendations}",
            title = view.topic.title(),
            considered = analysis.sources_considered,
            confidence = analysis.confidence,
            review = literature_review(&view),
            findings = section(&view, FindingCategory::Result, "No discrete findings extracted."),
            methodology = section(
                &view,
                FindingCategory::Methodology,
                "Automated multi-source retrieval and comparative analysis."
            ),
            limitations = section(
                &view,
                FindingCategory::Limitation,
                "None recorded beyond the automated scope."
            ),
            recommendations = section(
                &view,
                FindingCategory::Recommendation,
                "No further action recommended."
            ),
        );
        let synthesis = self
            .provider
            .complete(SYSTEM, &draft)
            .await
            .map_err(provider_error)?;

        ctx.emit("synthesized report sections")?;

        Ok(StageUpdate::new()
            .with_phase(phases::WRITING)
            .with_messages(vec![Message::assistant(
                "Synthesis complete; sections drafted.",
            )])
            .with_metadata_entry(META_SYNTHESIS, json!(synthesis)))
    }
}
