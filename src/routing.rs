//! Label-producing routing predicates for conditional edges.
//!
//! A predicate inspects the post-merge [`StateView`] and returns a label;
//! the engine maps labels to target stages. Predicates are pure functions
//! of the view and must not mutate anything.

use std::sync::Arc;

use crate::state::{StateView, phases};

/// Predicate evaluated after a stage's update has been merged.
pub type RoutePredicate = Arc<dyn Fn(&StateView) -> String + Send + Sync>;

/// Labels produced by [`quality_router`].
pub const ROUTE_REDO: &str = "redo";
pub const ROUTE_ESCALATE: &str = "escalate";
pub const ROUTE_CONTINUE: &str = "continue";

/// Labels produced by [`validation_router`].
pub const ROUTE_REVISE: &str = "revise";
pub const ROUTE_PROCEED: &str = "proceed";

/// Confidence cut points for [`quality_router`].
///
/// A confidence on a boundary takes the branch of the band above it: exactly
/// `redo_below` escalates, exactly `escalate_below` continues.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct QualityThresholds {
    pub redo_below: f64,
    pub escalate_below: f64,
}

impl Default for QualityThresholds {
    fn default() -> Self {
        Self {
            redo_below: 0.4,
            escalate_below: 0.7,
        }
    }
}

/// Route on analysis confidence. A missing analysis record counts as zero
/// confidence and routes to `redo`.
pub fn quality_route(view: &StateView, thresholds: QualityThresholds) -> &'static str {
    let confidence = view
        .analysis
        .as_ref()
        .map(|analysis| analysis.confidence)
        .unwrap_or(0.0);
    if confidence < thresholds.redo_below {
        ROUTE_REDO
    } else if confidence < thresholds.escalate_below {
        ROUTE_ESCALATE
    } else {
        ROUTE_CONTINUE
    }
}

/// [`quality_route`] boxed up as an edge predicate.
pub fn quality_router(thresholds: QualityThresholds) -> RoutePredicate {
    Arc::new(move |view| quality_route(view, thresholds).to_string())
}

/// Route on the validation verdict carried in the phase label.
pub fn validation_router() -> RoutePredicate {
    Arc::new(|view| {
        if view.phase == phases::NEEDS_REVISION {
            ROUTE_REVISE.to_string()
        } else {
            ROUTE_PROCEED.to_string()
        }
    })
}
