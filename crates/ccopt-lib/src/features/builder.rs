//! Feature extraction from raw utilization samples
//!
//! Aggregates a lookback window of samples into a utilization summary and
//! encodes it against a feature schema. The same code path runs at training
//! and at inference time.

use super::schema::{FeatureSchema, FeatureVector};
use crate::error::{OptimizerError, Result};
use crate::models::{InstanceInfo, MetricSample};
use crate::store::MetricsSource;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Default lookback window in days
pub const DEFAULT_LOOKBACK_DAYS: i64 = 7;

/// Percentile used for peak utilization features
pub const PEAK_PERCENTILE: f64 = 95.0;

const BYTES_PER_MB: f64 = 1_000_000.0;

/// Family assigned to instances without a usable type string
pub const UNKNOWN_FAMILY: &str = "unknown";

/// Feature extraction settings
#[derive(Debug, Clone)]
pub struct FeatureConfig {
    pub lookback_days: i64,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            lookback_days: DEFAULT_LOOKBACK_DAYS,
        }
    }
}

/// Raw per-instance aggregates over the lookback window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UtilizationSummary {
    pub sample_count: usize,
    pub avg_cpu: f64,
    pub p95_cpu: f64,
    pub avg_mem: f64,
    pub p95_mem: f64,
    pub avg_net_in_mb: f64,
    pub avg_net_out_mb: f64,
    pub is_prod: bool,
    pub family: String,
}

/// Builds feature vectors for instances
#[derive(Debug, Clone, Default)]
pub struct FeatureBuilder {
    config: FeatureConfig,
}

impl FeatureBuilder {
    pub fn new(config: FeatureConfig) -> Self {
        Self { config }
    }

    pub fn lookback_days(&self) -> i64 {
        self.config.lookback_days
    }

    /// Start of the lookback window ending at `now`
    pub fn window_start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - Duration::days(self.config.lookback_days)
    }

    /// Aggregate samples into a summary.
    ///
    /// An empty window is `InsufficientData`, never a zero-filled summary.
    pub fn summarize(
        &self,
        instance: &InstanceInfo,
        samples: &[MetricSample],
    ) -> Result<UtilizationSummary> {
        if samples.is_empty() {
            return Err(OptimizerError::InsufficientData(format!(
                "no metric samples for {} in the last {} days",
                instance.instance_ref, self.config.lookback_days
            )));
        }

        let cpu: Vec<f64> = samples.iter().map(|s| s.cpu_pct.unwrap_or(0.0)).collect();
        let mem: Vec<f64> = samples.iter().map(|s| s.mem_pct.unwrap_or(0.0)).collect();
        let net_in: Vec<f64> = samples
            .iter()
            .map(|s| s.net_in_bytes.unwrap_or(0) as f64)
            .collect();
        let net_out: Vec<f64> = samples
            .iter()
            .map(|s| s.net_out_bytes.unwrap_or(0) as f64)
            .collect();

        Ok(UtilizationSummary {
            sample_count: samples.len(),
            avg_cpu: mean(&cpu),
            p95_cpu: percentile(&cpu, PEAK_PERCENTILE),
            avg_mem: mean(&mem),
            p95_mem: percentile(&mem, PEAK_PERCENTILE),
            avg_net_in_mb: mean(&net_in) / BYTES_PER_MB,
            avg_net_out_mb: mean(&net_out) / BYTES_PER_MB,
            is_prod: is_production(instance.environment.as_deref()),
            family: instance_family(instance.instance_type.as_deref()),
        })
    }

    /// Encode a summary against a schema's family vocabulary.
    ///
    /// Field names follow the builder's own layout, so a persisted schema
    /// with a different order fails validation instead of being trusted.
    /// Families missing from the vocabulary encode as all zeros.
    pub fn encode(&self, summary: &UtilizationSummary, schema: &FeatureSchema) -> FeatureVector {
        let mut values = vec![
            summary.avg_cpu,
            summary.p95_cpu,
            summary.avg_mem,
            summary.p95_mem,
            summary.avg_net_in_mb,
            summary.avg_net_out_mb,
            if summary.is_prod { 1.0 } else { 0.0 },
        ];
        let mut one_hot = vec![0.0; schema.family_vocabulary.len()];
        if let Some(idx) = schema.family_index(&summary.family) {
            one_hot[idx] = 1.0;
        }
        values.extend(one_hot);

        FeatureVector {
            fields: FeatureSchema::new(schema.family_vocabulary.iter().cloned()).fields,
            values,
        }
    }

    /// Read the window for an instance and summarize it
    pub async fn summarize_instance(
        &self,
        source: &dyn MetricsSource,
        instance: &InstanceInfo,
        now: DateTime<Utc>,
    ) -> Result<UtilizationSummary> {
        let samples = source
            .get_metrics(&instance.instance_ref, self.window_start(now))
            .await?;
        self.summarize(instance, &samples)
    }

    /// Read, summarize and encode in one step
    pub async fn build(
        &self,
        source: &dyn MetricsSource,
        instance: &InstanceInfo,
        schema: &FeatureSchema,
        now: DateTime<Utc>,
    ) -> Result<(UtilizationSummary, FeatureVector)> {
        let summary = self.summarize_instance(source, instance, now).await?;
        let vector = self.encode(&summary, schema);
        Ok((summary, vector))
    }
}

/// Whether an environment tag denotes production
pub fn is_production(environment: Option<&str>) -> bool {
    environment
        .map(|e| e.eq_ignore_ascii_case("prod") || e.eq_ignore_ascii_case("production"))
        .unwrap_or(false)
}

/// Instance family: the type prefix before the first `.` (`m5.large` -> `m5`)
pub fn instance_family(instance_type: Option<&str>) -> String {
    instance_type
        .and_then(|t| t.split('.').next())
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .unwrap_or(UNKNOWN_FAMILY)
        .to_string()
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Percentile with linear interpolation between closest ranks.
///
/// `rank = p / 100 * (n - 1)`; the result interpolates between the order
/// statistics at `floor(rank)` and `ceil(rank)`.
pub fn percentile(values: &[f64], p: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let rank = (p.clamp(0.0, 100.0) / 100.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (rank - lo as f64)
}
