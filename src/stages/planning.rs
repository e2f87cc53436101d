//! Planning: frame the topic and expand it into search queries.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use super::provider::CompletionProvider;
use super::provider_error;
use crate::message::Message;
use crate::stage::{Stage, StageContext, StageError};
use crate::state::{Complexity, StageUpdate, StateView, Topic, phases};

const SYSTEM: &str = "You are a research coordinator. Produce a concise, actionable research plan.";

/// Metadata keys written by this stage.
pub const META_PLAN: &str = "research_plan";
pub const META_QUERIES: &str = "queries";

pub struct PlanningStage {
    provider: Arc<dyn CompletionProvider>,
}

impl PlanningStage {
    pub fn new(provider: Arc<dyn CompletionProvider>) -> Self {
        Self { provider }
    }
}

/// Three query shapes per topic: the bare title, the title scoped to its
/// domain, and a recency-biased variant.
pub fn expand_queries(topic: &Topic) -> Vec<String> {
    vec![
        topic.title().to_string(),
        format!("{} {}", topic.title(), topic.domain()),
        format!("{} recent developments", topic.title()),
    ]
}

fn depth_for(complexity: Complexity) -> &'static str {
    match complexity {
        Complexity::Introductory => "survey-level",
        Complexity::Intermediate => "comparative",
        Complexity::Advanced => "exhaustive",
    }
}

#[async_trait]
impl Stage for PlanningStage {
    async fn execute(&self, view: StateView, ctx: StageContext) -> Result<StageUpdate, StageError> {
        let topic = &view.topic;
        let queries = expand_queries(topic);

        let draft = format!(
            "Research plan for '{title}' (domain: {domain}).\n\
             Depth: {depth} review.\n\
             Steps: retrieve literature across web and academic indexes, \
             analyze retrieved material for recurring claims, validate coverage, \
             then synthesize and write up the findings.\n\
             Queries: {queries}.",
            title = topic.title(),
            domain = topic.domain(),
            depth = depth_for(topic.complexity()),
            queries = queries.join("; "),
        );
        let plan = self
            .provider
            .complete(SYSTEM, &draft)
            .await
            .map_err(provider_error)?;

        ctx.emit(format!("planned {} queries", queries.len()))?;

        Ok(StageUpdate::new()
            .with_phase(phases::SEARCHING)
            .with_messages(vec![Message::assistant(plan.clone())])
            .with_metadata_entry(META_PLAN, json!(plan))
            .with_metadata_entry(META_QUERIES, json!(queries)))
    }
}
