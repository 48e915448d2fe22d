//! Feature engineering shared by training and inference

mod builder;
mod schema;

pub use builder::{
    instance_family, is_production, percentile, FeatureBuilder, FeatureConfig,
    UtilizationSummary, DEFAULT_LOOKBACK_DAYS, PEAK_PERCENTILE, UNKNOWN_FAMILY,
};
pub use schema::{FeatureSchema, FeatureVector, BASE_FIELDS, FAMILY_PREFIX};
