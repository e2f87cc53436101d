//! Shared run state, snapshots, and partial-update merging.
//!
//! A run owns a single [`ResearchState`]. Stages never touch it directly:
//! they receive a cloned [`StateView`] and return a sparse [`StageUpdate`],
//! which the engine merges under the per-field policies declared in
//! [`StateField::policy`]. Keeping the policy table explicit (rather than
//! inferring "append" from a field being a `Vec`) is what makes merge
//! behavior reviewable in one place.
//!
//! # Merge policies
//!
//! | Field     | Policy   |
//! |-----------|----------|
//! | phase     | Replace  |
//! | messages  | Append   |
//! | sources   | Replace  |
//! | analysis  | Replace  |
//! | findings  | Replace  |
//! | citations | Append   |
//! | issues    | Replace  |
//! | metadata  | MergeMap |
//!
//! Replace merges are idempotent; append merges deliberately are not, so a
//! stage must never be re-run against state it already updated. The
//! checkpointing scheme in [`crate::runtime`] upholds that.

use chrono::{DateTime, Utc};
use miette::Diagnostic;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::message::Message;
use crate::retrieval::{RetrievalResult, SourceKind};

/// Phase labels written into [`ResearchState::phase`] by the built-in stages.
///
/// The phase is an ordinary string so custom pipelines can introduce their
/// own labels; these constants just keep the built-in ones in one place.
pub mod phases {
    pub const PLANNING: &str = "planning";
    pub const SEARCHING: &str = "searching";
    pub const ANALYZING: &str = "analyzing";
    pub const VALIDATING: &str = "validating";
    pub const NEEDS_REVISION: &str = "needs-revision";
    pub const SYNTHESIZING: &str = "synthesizing";
    pub const WRITING: &str = "writing";
    pub const COMPLETED: &str = "completed";
}

/// How involved the research on a topic is expected to be.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Introductory,
    Intermediate,
    Advanced,
}

/// Errors constructing a [`Topic`].
#[derive(Debug, Error, Diagnostic)]
pub enum TopicError {
    /// Titles need at least two words to anchor a meaningful query.
    #[error("topic title too short: {0:?}")]
    #[diagnostic(
        code(delver::state::topic_title),
        help("Provide a title of at least two words, e.g. \"Renewable Energy Storage\".")
    )]
    TitleTooShort(String),
}

/// The immutable subject of a run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Topic {
    title: String,
    domain: String,
    complexity: Complexity,
}

impl Topic {
    /// Build a topic; the title must contain at least two words.
    pub fn new(
        title: impl Into<String>,
        domain: impl Into<String>,
        complexity: Complexity,
    ) -> Result<Self, TopicError> {
        let title = title.into();
        if title.split_whitespace().count() < 2 {
            return Err(TopicError::TitleTooShort(title));
        }
        Ok(Self {
            title,
            domain: domain.into(),
            complexity,
        })
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn complexity(&self) -> Complexity {
        self.complexity
    }
}

/// Outcome of the analysis stage.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRecord {
    pub summary: String,
    /// Mean per-source relevance with origin bonus, clamped to `[0.0, 1.0]`.
    pub confidence: f64,
    pub sources_considered: usize,
    pub analyzed_at: DateTime<Utc>,
}

/// Category assigned to an extracted finding.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingCategory {
    Methodology,
    Result,
    Limitation,
    Recommendation,
    Observation,
}

/// A single statement extracted from the analysis summary.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub id: Uuid,
    pub content: String,
    pub category: FindingCategory,
    pub confidence: f64,
}

/// Bibliographic record derived from a retrieval result.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    pub id: Uuid,
    pub title: String,
    pub authors: Vec<String>,
    pub origin: SourceKind,
    pub url: String,
    pub retrieved_at: DateTime<Utc>,
}

impl Citation {
    /// Derive a citation from a result. Returns `None` when the result has no
    /// usable title or snippet, so empty placeholders never enter the
    /// bibliography.
    pub fn from_result(result: &RetrievalResult) -> Option<Self> {
        if result.title.trim().is_empty() || result.snippet.trim().is_empty() {
            return None;
        }
        Some(Self {
            id: Uuid::new_v4(),
            title: result.title.clone(),
            authors: result.authors.clone(),
            origin: result.origin,
            url: result.url.clone(),
            retrieved_at: Utc::now(),
        })
    }
}

/// A defect recorded by the validation stage.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ValidationIssue {
    /// Stable machine-readable tag, e.g. `insufficient_sources`.
    pub tag: String,
    /// Human-readable detail.
    pub detail: String,
}

impl ValidationIssue {
    pub fn new(tag: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            detail: detail.into(),
        }
    }
}

/// Complete run state. Owned by the engine; stages see [`StateView`] clones.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResearchState {
    pub topic: Topic,
    pub phase: String,
    pub messages: Vec<Message>,
    pub sources: Vec<RetrievalResult>,
    pub analysis: Option<AnalysisRecord>,
    pub findings: Vec<Finding>,
    pub citations: Vec<Citation>,
    pub issues: Vec<ValidationIssue>,
    pub metadata: FxHashMap<String, Value>,
}

impl ResearchState {
    /// Fresh state for a new run, in the planning phase.
    pub fn new(topic: Topic) -> Self {
        Self {
            topic,
            phase: phases::PLANNING.to_string(),
            messages: Vec::new(),
            sources: Vec::new(),
            analysis: None,
            findings: Vec::new(),
            citations: Vec::new(),
            issues: Vec::new(),
            metadata: FxHashMap::default(),
        }
    }

    /// Cheap read-only clone handed to stages and routing predicates.
    pub fn snapshot(&self) -> StateView {
        StateView {
            topic: self.topic.clone(),
            phase: self.phase.clone(),
            messages: self.messages.clone(),
            sources: self.sources.clone(),
            analysis: self.analysis.clone(),
            findings: self.findings.clone(),
            citations: self.citations.clone(),
            issues: self.issues.clone(),
            metadata: self.metadata.clone(),
        }
    }

    /// Merge a sparse update under the declared per-field policies.
    ///
    /// Returns the fields the update touched, in declaration order, for
    /// logging and event reporting. Absent (`None`) fields are left alone.
    pub fn apply(&mut self, update: StageUpdate) -> Vec<StateField> {
        let mut touched = Vec::new();

        if let Some(phase) = update.phase {
            merge_scalar(&mut self.phase, phase, StateField::Phase.policy());
            touched.push(StateField::Phase);
        }
        if let Some(messages) = update.messages {
            merge_vec(&mut self.messages, messages, StateField::Messages.policy());
            touched.push(StateField::Messages);
        }
        if let Some(sources) = update.sources {
            merge_vec(&mut self.sources, sources, StateField::Sources.policy());
            touched.push(StateField::Sources);
        }
        if let Some(analysis) = update.analysis {
            merge_scalar(
                &mut self.analysis,
                Some(analysis),
                StateField::Analysis.policy(),
            );
            touched.push(StateField::Analysis);
        }
        if let Some(findings) = update.findings {
            merge_vec(&mut self.findings, findings, StateField::Findings.policy());
            touched.push(StateField::Findings);
        }
        if let Some(citations) = update.citations {
            merge_vec(
                &mut self.citations,
                citations,
                StateField::Citations.policy(),
            );
            touched.push(StateField::Citations);
        }
        if let Some(issues) = update.issues {
            merge_vec(&mut self.issues, issues, StateField::Issues.policy());
            touched.push(StateField::Issues);
        }
        if let Some(metadata) = update.metadata {
            debug_assert_eq!(StateField::Metadata.policy(), MergePolicy::MergeMap);
            for (key, value) in metadata {
                self.metadata.insert(key, value);
            }
            touched.push(StateField::Metadata);
        }

        touched
    }
}

/// Read-only snapshot of the state at the moment a stage is scheduled.
#[derive(Clone, Debug)]
pub struct StateView {
    pub topic: Topic,
    pub phase: String,
    pub messages: Vec<Message>,
    pub sources: Vec<RetrievalResult>,
    pub analysis: Option<AnalysisRecord>,
    pub findings: Vec<Finding>,
    pub citations: Vec<Citation>,
    pub issues: Vec<ValidationIssue>,
    pub metadata: FxHashMap<String, Value>,
}

impl StateView {
    /// Metadata value decoded as a string, if present and a string.
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }
}

/// Sparse update returned by a stage. `None` fields are untouched.
#[derive(Clone, Debug, Default)]
pub struct StageUpdate {
    pub phase: Option<String>,
    pub messages: Option<Vec<Message>>,
    pub sources: Option<Vec<RetrievalResult>>,
    pub analysis: Option<AnalysisRecord>,
    pub findings: Option<Vec<Finding>>,
    pub citations: Option<Vec<Citation>>,
    pub issues: Option<Vec<ValidationIssue>>,
    pub metadata: Option<FxHashMap<String, Value>>,
}

impl StageUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_phase(mut self, phase: impl Into<String>) -> Self {
        self.phase = Some(phase.into());
        self
    }

    #[must_use]
    pub fn with_messages(mut self, messages: Vec<Message>) -> Self {
        self.messages = Some(messages);
        self
    }

    #[must_use]
    pub fn with_sources(mut self, sources: Vec<RetrievalResult>) -> Self {
        self.sources = Some(sources);
        self
    }

    #[must_use]
    pub fn with_analysis(mut self, analysis: AnalysisRecord) -> Self {
        self.analysis = Some(analysis);
        self
    }

    #[must_use]
    pub fn with_findings(mut self, findings: Vec<Finding>) -> Self {
        self.findings = Some(findings);
        self
    }

    #[must_use]
    pub fn with_citations(mut self, citations: Vec<Citation>) -> Self {
        self.citations = Some(citations);
        self
    }

    #[must_use]
    pub fn with_issues(mut self, issues: Vec<ValidationIssue>) -> Self {
        self.issues = Some(issues);
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: FxHashMap<String, Value>) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Convenience for single metadata entries.
    #[must_use]
    pub fn with_metadata_entry(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata
            .get_or_insert_with(FxHashMap::default)
            .insert(key.into(), value);
        self
    }
}

/// How incoming update data combines with existing state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MergePolicy {
    /// Incoming value overwrites the field.
    Replace,
    /// Incoming items extend the field; existing items are never dropped.
    Append,
    /// Incoming keys overwrite per key; absent keys survive.
    MergeMap,
}

/// The mergeable fields of [`ResearchState`], with their declared policies.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StateField {
    Phase,
    Messages,
    Sources,
    Analysis,
    Findings,
    Citations,
    Issues,
    Metadata,
}

impl StateField {
    /// The single source of truth for merge behavior.
    pub fn policy(self) -> MergePolicy {
        match self {
            StateField::Phase => MergePolicy::Replace,
            StateField::Messages => MergePolicy::Append,
            StateField::Sources => MergePolicy::Replace,
            StateField::Analysis => MergePolicy::Replace,
            StateField::Findings => MergePolicy::Replace,
            StateField::Citations => MergePolicy::Append,
            StateField::Issues => MergePolicy::Replace,
            StateField::Metadata => MergePolicy::MergeMap,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            StateField::Phase => "phase",
            StateField::Messages => "messages",
            StateField::Sources => "sources",
            StateField::Analysis => "analysis",
            StateField::Findings => "findings",
            StateField::Citations => "citations",
            StateField::Issues => "issues",
            StateField::Metadata => "metadata",
        }
    }
}

fn merge_scalar<T>(target: &mut T, incoming: T, policy: MergePolicy) {
    // Scalar fields only ever declare Replace.
    debug_assert_eq!(policy, MergePolicy::Replace);
    *target = incoming;
}

fn merge_vec<T>(target: &mut Vec<T>, incoming: Vec<T>, policy: MergePolicy) {
    match policy {
        MergePolicy::Replace => *target = incoming,
        MergePolicy::Append => target.extend(incoming),
        // No vec field declares MergeMap; treat as replace if one ever does.
        MergePolicy::MergeMap => *target = incoming,
    }
}
