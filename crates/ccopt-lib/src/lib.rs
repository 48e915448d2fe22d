//! Cloud cost optimizer library
//!
//! This crate provides the utilization-to-recommendation pipeline:
//! - Feature engineering over a bounded metrics window
//! - Training and versioned persistence of a downsize classifier
//! - Keep/downsize recommendations with savings and reasons
//! - Cached natural-language explanations
//! - Portfolio cost analytics

pub mod analytics;
pub mod error;
pub mod explain;
pub mod features;
pub mod model;
pub mod models;
pub mod observability;
pub mod recommend;
pub mod service;
pub mod store;

pub use analytics::{AnalyticsSummary, CostTrend, EnvironmentCost, ModelSummary, TrendConfig};
pub use error::{OptimizerError, Result};
pub use models::*;
pub use observability::{OptimizerMetrics, StructuredLogger};
pub use service::{CostOptimizer, OptimizerConfig};
