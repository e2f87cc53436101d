//! Built-in research stages and the default pipeline wiring.
//!
//! The stock pipeline mirrors a revision-capable research loop:
//!
//! ```text
//! Start -> planning -> retrieval -> analysis --(quality)--> validation
//!             ^            ^                                  |
//!             | escalate   | redo                   (validation)
//!             +------------+---- analysis <-- revise ---------+
//!                                                   proceed -> synthesis -> writing -> End
//! ```
//!
//! The quality route re-runs retrieval when confidence is poor, escalates
//! back to planning for a middling result, and continues to validation
//! otherwise. Validation sends defective work back to analysis and clean
//! work on to synthesis.

pub mod analysis;
pub mod planning;
pub mod provider;
pub mod retrieval;
pub mod synthesis;
pub mod validation;
pub mod writing;

pub use analysis::AnalysisStage;
pub use planning::PlanningStage;
pub use provider::{CompletionProvider, ProviderError, TemplateProvider};
pub use retrieval::RetrievalStage;
pub use synthesis::SynthesisStage;
pub use validation::{ValidationStage, ValidationThresholds};
pub use writing::WritingStage;

use std::sync::Arc;

use crate::retrieval::{ConcurrentFetcher, QueryCache, RetrievalSource};
use crate::routing::{
    QualityThresholds, ROUTE_CONTINUE, ROUTE_ESCALATE, ROUTE_PROCEED, ROUTE_REDO, ROUTE_REVISE,
    quality_router, validation_router,
};
use crate::runtime::{PipelineBuilder, RunOptions};
use crate::stage::StageError;
use crate::types::StageId;

pub(crate) fn provider_error(error: ProviderError) -> StageError {
    StageError::Provider {
        provider: "completion",
        message: error.to_string(),
    }
}

/// Wire the stock research pipeline over the given provider and sources.
///
/// The fetcher is configured from `options`: per-source timeout, result cap,
/// and whether a query cache is attached. The returned builder can still be
/// customized (checkpointer, extra stages) before [`PipelineBuilder::build`].
pub fn research_pipeline(
    provider: Arc<dyn CompletionProvider>,
    sources: Vec<Arc<dyn RetrievalSource>>,
    options: RunOptions,
) -> PipelineBuilder {
    let mut fetcher = ConcurrentFetcher::new(sources)
        .with_source_timeout(options.source_timeout)
        .with_max_results(options.max_results);
    if options.cache_enabled {
        fetcher = fetcher.with_cache(QueryCache::new());
    }
    let fetcher = Arc::new(fetcher);

    PipelineBuilder::new()
        .add_stage("planning", PlanningStage::new(provider.clone()))
        .add_stage("retrieval", RetrievalStage::new(fetcher))
        .add_stage("analysis", AnalysisStage::new(provider.clone()))
        .add_stage("validation", ValidationStage::default())
        .add_stage("synthesis", SynthesisStage::new(provider.clone()))
        .add_stage("writing", WritingStage::new(provider))
        .with_options(options)
        .add_edge(StageId::Start, "planning")
        .add_edge("planning", "retrieval")
        .add_edge("retrieval", "analysis")
        .add_conditional_edge(
            "analysis",
            quality_router(QualityThresholds::default()),
            [
                (ROUTE_CONTINUE, StageId::from("validation")),
                (ROUTE_REDO, StageId::from("retrieval")),
                (ROUTE_ESCALATE, StageId::from("planning")),
            ],
        )
        .add_conditional_edge(
            "validation",
            validation_router(),
            [
                (ROUTE_REVISE, StageId::from("analysis")),
                (ROUTE_PROCEED, StageId::from("synthesis")),
            ],
        )
        .add_edge("synthesis", "writing")
        .add_edge("writing", StageId::End)
}
