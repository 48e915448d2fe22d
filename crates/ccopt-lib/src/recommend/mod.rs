//! Keep/downsize recommendations from the trained classifier

mod engine;
mod reasons;

pub use engine::{
    decide, projected_savings, sort_recommendations, EngineConfig, RecommendationEngine,
    DEFAULT_DECISION_THRESHOLD, DEFAULT_REDUCTION_FRACTION,
};
pub use reasons::{build_reasons, ReasonConfig};
