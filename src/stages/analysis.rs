//! Analysis: score source quality and distill findings from a summary.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use super::provider::CompletionProvider;
use super::provider_error;
use crate::message::Message;
use crate::retrieval::RetrievalResult;
use crate::stage::{Stage, StageContext, StageError};
use crate::state::{AnalysisRecord, Finding, FindingCategory, StageUpdate, StateView, phases};

const SYSTEM: &str =
    "You are a research analyst. Summarize the retrieved material and state findings plainly.";

pub struct AnalysisStage {
    provider: Arc<dyn CompletionProvider>,
}

impl AnalysisStage {
    pub fn new(provider: Arc<dyn CompletionProvider>) -> Self {
        Self { provider }
    }
}

/// Mean over sources of `min(1.0, relevance + origin bonus)`. No sources
/// means zero confidence, which the quality route turns into a redo.
pub fn score_confidence(sources: &[RetrievalResult]) -> f64 {
    if sources.is_empty() {
        return 0.0;
    }
    let total: f64 = sources
        .iter()
        .map(|source| (source.relevance + source.origin.confidence_bonus()).min(1.0))
        .sum();
    total / sources.len() as f64
}

/// Classify one summary line. Keyword checks run in priority order so a line
/// mentioning both a method and a result lands on the more specific label.
fn categorize(line: &str) -> Option<FindingCategory> {
    let lower = line.to_lowercase();
    if lower.contains("method") {
        Some(FindingCategory::Methodology)
    } else if lower.contains("limitation") || lower.contains("constraint") {
        Some(FindingCategory::Limitation)
    } else if lower.contains("recommend") || lower.contains("should") {
        Some(FindingCategory::Recommendation)
    } else if lower.contains("found") || lower.contains("result") || lower.contains("shows") {
        Some(FindingCategory::Result)
    } else if lower.starts_with("- ") {
        Some(FindingCategory::Observation)
    } else {
        None
    }
}

/// Turn categorizable summary lines into findings carrying the analysis
/// confidence.
pub fn extract_findings(summary: &str, confidence: f64) -> Vec<Finding> {
    summary
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|line| {
            categorize(line).map(|category| Finding {
                id: Uuid::new_v4(),
                content: line.trim_start_matches("- ").to_string(),
                category,
                confidence,
            })
        })
        .collect()
}

fn build_draft(view: &StateView, confidence: f64) -> String {
    let mut lines = vec![format!(
        "Analysis of '{}' across {} retrieved sources (confidence {confidence:.2}).",
        view.topic.title(),
        view.sources.len(),
    )];
    lines.push(format!(
        "Method: comparative reading of {} documents retrieved from web and academic indexes.",
        view.sources.len()
    ));
    for source in &view.sources {
        lines.push(format!(
            "Found in '{}' ({}): {}",
            source.title,
            source.origin.label(),
            source.snippet
        ));
    }
    if view.sources.is_empty() {
        lines.push("Limitation: no sources were retrieved; nothing to analyze.".to_string());
    } else {
        lines.push(format!(
            "Limitation: coverage is restricted to the {} sources retrieved automatically.",
            view.sources.len()
        ));
    }
    lines.push(
        "Recommendation: corroborate high-impact claims against primary literature.".to_string(),
    );
    lines.join("\n")
}

#[async_trait]
impl Stage for AnalysisStage {
    async fn execute(&self, view: StateView, ctx: StageContext) -> Result<StageUpdate, StageError> {
        let confidence = score_confidence(&view.sources);
        let draft = build_draft(&view, confidence);
        let summary = self
            .provider
            .complete(SYSTEM, &draft)
            .await
            .map_err(provider_error)?;

        let findings = extract_findings(&summary, confidence);
        ctx.emit(format!(
            "analyzed {} sources, confidence {confidence:.2}, {} findings",
            view.sources.len(),
            findings.len()
        ))?;

        let analysis = AnalysisRecord {
            summary: summary.clone(),
            confidence,
            sources_considered: view.sources.len(),
            analyzed_at: Utc::now(),
        };

        Ok(StageUpdate::new()
            .with_phase(phases::VALIDATING)
            .with_messages(vec![Message::assistant(format!(
                "Analysis complete: confidence {confidence:.2}, {} findings.",
                findings.len()
            ))])
            .with_analysis(analysis)
            .with_findings(findings))
    }
}
