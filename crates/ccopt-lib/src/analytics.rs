//! Portfolio cost analytics derived from recommendations
//!
//! Everything here is a pure function of the inventory, the current
//! recommendations and model metadata. Nothing is persisted.

use crate::model::ModelMetadata;
use crate::models::{Action, InstanceInfo, Recommendation};
use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc, Weekday};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Environment label used when an instance has none
pub const UNKNOWN_ENVIRONMENT: &str = "unknown";

/// Longest supported cost-trend window
pub const MAX_TREND_DAYS: u32 = 90;

/// Baseline and optimized monthly cost for one environment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentCost {
    pub environment: String,
    pub instance_count: usize,
    pub downsize_count: usize,
    pub baseline_monthly_cost: f64,
    pub optimized_monthly_cost: f64,
}

/// Model details shown alongside the totals
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSummary {
    pub version: u64,
    pub trained_at: DateTime<Utc>,
    pub validation_accuracy: f64,
    pub training_runtime_seconds: f64,
}

impl From<&ModelMetadata> for ModelSummary {
    fn from(meta: &ModelMetadata) -> Self {
        Self {
            version: meta.version,
            trained_at: meta.trained_at,
            validation_accuracy: meta.validation_accuracy,
            training_runtime_seconds: meta.training_runtime_seconds,
        }
    }
}

/// Portfolio totals
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsSummary {
    pub instance_count: usize,
    pub downsize_count: usize,
    pub total_baseline_monthly_cost: f64,
    pub total_optimized_monthly_cost: f64,
    pub total_monthly_savings: f64,
    /// Sorted by environment name
    pub env_breakdown: Vec<EnvironmentCost>,
    pub model: Option<ModelSummary>,
    pub recommendation_requests: u64,
}

#[derive(Default)]
struct Totals {
    instances: usize,
    downsize: usize,
    baseline: f64,
    savings: f64,
}

/// Aggregate costs over every instance.
///
/// Instances without a recommendation (excluded for insufficient data)
/// count towards the baseline with no savings.
pub fn summarize(
    instances: &[InstanceInfo],
    recommendations: &[Recommendation],
    model: Option<&ModelMetadata>,
    recommendation_requests: u64,
) -> AnalyticsSummary {
    let by_ref: HashMap<&str, &Recommendation> = recommendations
        .iter()
        .map(|r| (r.instance_ref.as_str(), r))
        .collect();

    let mut total = Totals::default();
    let mut per_env: BTreeMap<String, Totals> = BTreeMap::new();

    for instance in instances {
        let rec = by_ref.get(instance.instance_ref.as_str());
        let downsize = rec.is_some_and(|r| r.action == Action::Downsize);
        let savings = rec.map_or(0.0, |r| r.projected_monthly_savings);
        let baseline = instance.monthly_cost();

        let env = per_env
            .entry(
                instance
                    .environment
                    .clone()
                    .unwrap_or_else(|| UNKNOWN_ENVIRONMENT.to_string()),
            )
            .or_default();
        for t in [&mut total, env] {
            t.instances += 1;
            t.downsize += usize::from(downsize);
            t.baseline += baseline;
            t.savings += savings;
        }
    }

    AnalyticsSummary {
        instance_count: total.instances,
        downsize_count: total.downsize,
        total_baseline_monthly_cost: total.baseline,
        total_optimized_monthly_cost: total.baseline - total.savings,
        total_monthly_savings: total.savings,
        env_breakdown: per_env
            .into_iter()
            .map(|(environment, t)| EnvironmentCost {
                environment,
                instance_count: t.instances,
                downsize_count: t.downsize,
                baseline_monthly_cost: t.baseline,
                optimized_monthly_cost: t.baseline - t.savings,
            })
            .collect(),
        model: model.map(ModelSummary::from),
        recommendation_requests,
    }
}

/// Shape of the simulated daily cost series
#[derive(Debug, Clone)]
pub struct TrendConfig {
    pub lookback_days: u32,
    /// Amplitude of the weekly oscillation (0.03 = +/-3%)
    pub daily_variation: f64,
    /// Extra reduction applied on Saturdays and Sundays
    pub weekend_discount: f64,
    /// Growth factor on the first day of the window
    pub growth_start: f64,
    /// Growth added across the whole window
    pub growth_span: f64,
}

impl Default for TrendConfig {
    fn default() -> Self {
        Self {
            lookback_days: 30,
            daily_variation: 0.03,
            weekend_discount: 0.02,
            growth_start: 0.975,
            growth_span: 0.05,
        }
    }
}

/// Daily baseline and optimized cost, oldest day first
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostTrend {
    pub days: Vec<NaiveDate>,
    pub baseline_daily_cost: Vec<f64>,
    pub optimized_daily_cost: Vec<f64>,
}

impl CostTrend {
    /// Mean of baseline minus optimized over the window; `None` when empty
    pub fn average_daily_savings(&self) -> Option<f64> {
        if self.days.is_empty() {
            return None;
        }
        let saved: f64 = self
            .baseline_daily_cost
            .iter()
            .zip(&self.optimized_daily_cost)
            .map(|(baseline, optimized)| baseline - optimized)
            .sum();
        Some(saved / self.days.len() as f64)
    }
}

/// Deterministic cost series ending at `end`.
///
/// Instances count from the day they were created (always, when the
/// creation date is unknown). The window is clamped to 1..=90 days.
pub fn cost_trend(
    instances: &[InstanceInfo],
    recommendations: &[Recommendation],
    end: NaiveDate,
    config: &TrendConfig,
) -> CostTrend {
    let lookback = config.lookback_days.clamp(1, MAX_TREND_DAYS);
    let savings: HashMap<&str, f64> = recommendations
        .iter()
        .map(|r| (r.instance_ref.as_str(), r.projected_monthly_savings))
        .collect();

    let mut trend = CostTrend {
        days: Vec::with_capacity(lookback as usize),
        baseline_daily_cost: Vec::with_capacity(lookback as usize),
        optimized_daily_cost: Vec::with_capacity(lookback as usize),
    };

    for index in 0..lookback {
        let day = end - Duration::days(i64::from(lookback - 1 - index));

        let (mut baseline, mut saved) = (0.0, 0.0);
        for instance in instances {
            if instance.created_at.is_some_and(|c| c.date_naive() > day) {
                continue;
            }
            baseline += instance.monthly_cost() / 30.0;
            saved += savings
                .get(instance.instance_ref.as_str())
                .copied()
                .unwrap_or(0.0)
                / 30.0;
        }

        let factor = day_factor(index, lookback, day, config);
        trend.days.push(day);
        trend.baseline_daily_cost.push(baseline * factor);
        trend.optimized_daily_cost.push((baseline - saved) * factor);
    }
    trend
}

/// Growth times weekly variation for the `index`-th day of the window
fn day_factor(index: u32, lookback: u32, day: NaiveDate, config: &TrendConfig) -> f64 {
    let growth = config.growth_start + f64::from(index) / f64::from(lookback) * config.growth_span;
    let phase = f64::from(day.weekday().num_days_from_monday()) / 7.0;
    let mut variation = 1.0 + config.daily_variation * (std::f64::consts::TAU * phase).sin();
    if matches!(day.weekday(), Weekday::Sat | Weekday::Sun) {
        variation *= 1.0 - config.weekend_discount;
    }
    growth * variation
}
