//! Validation: fixed battery of coverage and depth checks.

use async_trait::async_trait;

use crate::message::Message;
use crate::stage::{Stage, StageContext, StageError};
use crate::state::{StageUpdate, StateView, ValidationIssue, phases};

/// Issue tags written by this stage.
pub const ISSUE_INSUFFICIENT_SOURCES: &str = "insufficient_sources";
pub const ISSUE_SHALLOW_ANALYSIS: &str = "shallow_analysis";
pub const ISSUE_INSUFFICIENT_FINDINGS: &str = "insufficient_findings";

/// Minimums the research must meet before synthesis.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ValidationThresholds {
    pub min_sources: usize,
    pub min_analysis_words: usize,
    pub min_findings: usize,
}

impl Default for ValidationThresholds {
    fn default() -> Self {
        Self {
            min_sources: 3,
            min_analysis_words: 200,
            min_findings: 2,
        }
    }
}

/// Runs the check battery and sets the phase the validation route reads.
#[derive(Clone, Copy, Debug, Default)]
pub struct ValidationStage {
    thresholds: ValidationThresholds,
}

impl ValidationStage {
    pub fn new(thresholds: ValidationThresholds) -> Self {
        Self { thresholds }
    }
}

fn run_checks(view: &StateView, thresholds: ValidationThresholds) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();

    if view.sources.len() < thresholds.min_sources {
        issues.push(ValidationIssue::new(
            ISSUE_INSUFFICIENT_SOURCES,
            format!(
                "{} sources retrieved, {} required",
                view.sources.len(),
                thresholds.min_sources
            ),
        ));
    }

    let words = view
        .analysis
        .as_ref()
        .map(|analysis| analysis.summary.split_whitespace().count())
        .unwrap_or(0);
    if words < thresholds.min_analysis_words {
        issues.push(ValidationIssue::new(
            ISSUE_SHALLOW_ANALYSIS,
            format!(
                "analysis summary has {words} words, {} required",
                thresholds.min_analysis_words
            ),
        ));
    }

    if view.findings.len() < thresholds.min_findings {
        issues.push(ValidationIssue::new(
            ISSUE_INSUFFICIENT_FINDINGS,
            format!(
                "{} findings extracted, {} required",
                view.findings.len(),
                thresholds.min_findings
            ),
        ));
    }

    issues
}

#[async_trait]
impl Stage for ValidationStage {
    async fn execute(&self, view: StateView, ctx: StageContext) -> Result<StageUpdate, StageError> {
        let issues = run_checks(&view, self.thresholds);
        let phase = if issues.is_empty() {
            phases::SYNTHESIZING
        } else {
            phases::NEEDS_REVISION
        };
        ctx.emit(format!("validation found {} issues", issues.len()))?;

        let verdict = if issues.is_empty() {
            "Validation passed; proceeding to synthesis.".to_string()
        } else {
            let tags: Vec<&str> = issues.iter().map(|issue| issue.tag.as_str()).collect();
            format!("Validation flagged: {}.", tags.join(", "))
        };

        // Issues replace wholesale so a clean pass clears earlier defects.
        Ok(StageUpdate::new()
            .with_phase(phase)
            .with_messages(vec![Message::assistant(verdict)])
            .with_issues(issues))
    }
}
