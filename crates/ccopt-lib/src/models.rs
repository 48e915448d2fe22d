//! Core data models for the optimizer

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One utilization observation for an instance.
///
/// Absent readings are kept as `None` and treated as zero during
/// aggregation so they still count towards percentile sample sizes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub instance_ref: String,
    pub timestamp: DateTime<Utc>,
    pub cpu_pct: Option<f64>,
    pub mem_pct: Option<f64>,
    pub net_in_bytes: Option<u64>,
    pub net_out_bytes: Option<u64>,
}

/// Inventory record for a compute instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceInfo {
    pub instance_ref: String,
    pub cloud_instance_id: String,
    pub hourly_cost: Option<f64>,
    pub environment: Option<String>,
    pub region: Option<String>,
    pub instance_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl InstanceInfo {
    /// Hourly cost with absent or negative values treated as zero
    pub fn effective_hourly_cost(&self) -> f64 {
        self.hourly_cost.filter(|c| *c > 0.0).unwrap_or(0.0)
    }

    /// Baseline monthly cost (hourly cost over a 30-day month)
    pub fn monthly_cost(&self) -> f64 {
        self.effective_hourly_cost() * HOURS_PER_MONTH
    }
}

/// Hours in the 30-day billing month used for every cost projection
pub const HOURS_PER_MONTH: f64 = 24.0 * 30.0;

/// Exact-match inventory filter pushed down to the metrics source
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstanceFilter {
    pub environment: Option<String>,
    pub region: Option<String>,
    pub instance_type: Option<String>,
}

impl InstanceFilter {
    pub fn matches(&self, instance: &InstanceInfo) -> bool {
        fn field_matches(want: &Option<String>, have: &Option<String>) -> bool {
            match want {
                Some(w) => have.as_deref() == Some(w.as_str()),
                None => true,
            }
        }
        field_matches(&self.environment, &instance.environment)
            && field_matches(&self.region, &instance.region)
            && field_matches(&self.instance_type, &instance.instance_type)
    }
}

/// Filters accepted by the recommendation API
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecommendationFilter {
    #[serde(flatten)]
    pub instances: InstanceFilter,
    /// Minimum projected monthly savings; ignored unless positive
    #[serde(default)]
    pub min_savings: f64,
}

/// Recommended action for an instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Keep,
    Downsize,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Keep => write!(f, "keep"),
            Action::Downsize => write!(f, "downsize"),
        }
    }
}

/// Rightsizing recommendation for one instance.
///
/// Computed on demand; the model artifact and raw metrics are the durable
/// source of truth.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub instance_ref: String,
    pub cloud_instance_id: String,
    pub environment: Option<String>,
    pub region: Option<String>,
    pub instance_type: Option<String>,
    pub hourly_cost: Option<f64>,
    pub action: Action,
    pub confidence_downsize: f64,
    pub projected_monthly_savings: f64,
    pub reasons: Vec<String>,
    pub model_version: u64,
}
