//! Human-readable reasons restating the utilization inputs
//!
//! Reasons describe the summary the classifier saw. They never feed back
//! into the action.

use crate::features::{is_production, UtilizationSummary};
use crate::model::LabelingRule;

/// Utilization bands used when phrasing reasons
#[derive(Debug, Clone)]
pub struct ReasonConfig {
    /// Average CPU percent below which CPU is called low, otherwise high
    pub cpu_low_pct: f64,
    /// p95 CPU percent at or above which peak usage is called out
    pub cpu_peak_pct: f64,
    /// Average memory percent below which memory is called low, otherwise high
    pub mem_low_pct: f64,
    /// Distance from the decision threshold considered marginal
    pub marginal_band: f64,
}

impl Default for ReasonConfig {
    fn default() -> Self {
        let rule = LabelingRule::default();
        Self {
            cpu_low_pct: rule.cpu_threshold,
            cpu_peak_pct: 80.0,
            mem_low_pct: rule.mem_threshold,
            marginal_band: 0.1,
        }
    }
}

impl ReasonConfig {
    /// Low bands set to the thresholds a model was labeled with
    pub fn with_labeling(&self, rule: &LabelingRule) -> Self {
        Self {
            cpu_low_pct: rule.cpu_threshold,
            mem_low_pct: rule.mem_threshold,
            ..self.clone()
        }
    }
}

/// Ordered reasons for one recommendation
pub fn build_reasons(
    summary: &UtilizationSummary,
    environment: Option<&str>,
    confidence: f64,
    threshold: f64,
    config: &ReasonConfig,
) -> Vec<String> {
    let mut reasons = Vec::with_capacity(5);

    if summary.avg_cpu < config.cpu_low_pct {
        reasons.push(format!("Average CPU utilization is low ({:.1}%)", summary.avg_cpu));
    } else {
        reasons.push(format!("Average CPU utilization is high ({:.1}%)", summary.avg_cpu));
    }

    if summary.p95_cpu >= config.cpu_peak_pct {
        reasons.push(format!("Peak CPU utilization (p95) is high ({:.1}%)", summary.p95_cpu));
    }

    if summary.avg_mem < config.mem_low_pct {
        reasons.push(format!("Average memory utilization is low ({:.1}%)", summary.avg_mem));
    } else {
        reasons.push(format!("Average memory utilization is high ({:.1}%)", summary.avg_mem));
    }

    if !is_production(environment) {
        reasons.push(format!(
            "Instance is in a non-production environment ({})",
            environment.unwrap_or("unknown")
        ));
    }

    if (confidence - threshold).abs() < config.marginal_band {
        reasons.push(format!(
            "Model confidence is marginal ({:.0}% downsize probability)",
            confidence * 100.0
        ));
    }

    reasons
}
