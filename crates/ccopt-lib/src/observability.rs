//! Observability infrastructure for the optimizer
//!
//! Provides:
//! - Prometheus metrics (batch latency, recommendation counts, cache hit rate, model version)
//! - Structured logging of pipeline lifecycle events with tracing

use prometheus::{
    register_gauge_vec, register_histogram, register_int_counter, Encoder, GaugeVec, Histogram,
    IntCounter, TextEncoder,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for batch latency (in seconds)
const LATENCY_BUCKETS: &[f64] = &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];

static GLOBAL_METRICS: OnceLock<OptimizerMetricsInner> = OnceLock::new();

struct OptimizerMetricsInner {
    batch_latency_seconds: Histogram,
    recommendations_generated: IntCounter,
    instances_excluded: IntCounter,
    recommendation_requests: IntCounter,
    explanation_cache_hits: IntCounter,
    explanation_cache_misses: IntCounter,
    generation_failures: IntCounter,
    training_runs: IntCounter,
    training_failures: IntCounter,
    model_version_info: GaugeVec,
}

impl OptimizerMetricsInner {
    fn new() -> Self {
        Self {
            batch_latency_seconds: register_histogram!(
                "ccopt_recommendation_batch_latency_seconds",
                "Time spent producing a batch of recommendations",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register batch_latency_seconds"),

            recommendations_generated: register_int_counter!(
                "ccopt_recommendations_generated_total",
                "Total number of recommendations produced"
            )
            .expect("Failed to register recommendations_generated"),

            instances_excluded: register_int_counter!(
                "ccopt_instances_excluded_total",
                "Instances left out of a batch for insufficient data or store errors"
            )
            .expect("Failed to register instances_excluded"),

            recommendation_requests: register_int_counter!(
                "ccopt_recommendation_requests_total",
                "Number of bulk recommendation requests served"
            )
            .expect("Failed to register recommendation_requests"),

            explanation_cache_hits: register_int_counter!(
                "ccopt_explanation_cache_hits_total",
                "Explanations served from cache"
            )
            .expect("Failed to register explanation_cache_hits"),

            explanation_cache_misses: register_int_counter!(
                "ccopt_explanation_cache_misses_total",
                "Explanations that required generation"
            )
            .expect("Failed to register explanation_cache_misses"),

            generation_failures: register_int_counter!(
                "ccopt_explanation_generation_failures_total",
                "Failed or unavailable text generation calls"
            )
            .expect("Failed to register generation_failures"),

            training_runs: register_int_counter!(
                "ccopt_training_runs_total",
                "Committed training runs"
            )
            .expect("Failed to register training_runs"),

            training_failures: register_int_counter!(
                "ccopt_training_failures_total",
                "Rejected or failed training runs"
            )
            .expect("Failed to register training_failures"),

            model_version_info: register_gauge_vec!(
                "ccopt_model_version_info",
                "Version of the currently loaded classifier",
                &["version"]
            )
            .expect("Failed to register model_version_info"),
        }
    }
}

/// Optimizer metrics for Prometheus exposition
///
/// Lightweight handle to the global metrics instance; clones share the
/// same underlying metrics.
#[derive(Clone)]
pub struct OptimizerMetrics {
    _private: (),
}

impl Default for OptimizerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for OptimizerMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OptimizerMetrics").finish_non_exhaustive()
    }
}

impl OptimizerMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(OptimizerMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &OptimizerMetricsInner {
        GLOBAL_METRICS.get_or_init(OptimizerMetricsInner::new)
    }

    pub fn observe_batch_latency(&self, duration_secs: f64) {
        self.inner().batch_latency_seconds.observe(duration_secs);
    }

    pub fn add_recommendations_generated(&self, count: usize) {
        self.inner().recommendations_generated.inc_by(count as u64);
    }

    pub fn add_instances_excluded(&self, count: usize) {
        self.inner().instances_excluded.inc_by(count as u64);
    }

    pub fn inc_recommendation_requests(&self) {
        self.inner().recommendation_requests.inc();
    }

    pub fn inc_cache_hits(&self) {
        self.inner().explanation_cache_hits.inc();
    }

    pub fn inc_cache_misses(&self) {
        self.inner().explanation_cache_misses.inc();
    }

    pub fn inc_generation_failures(&self) {
        self.inner().generation_failures.inc();
    }

    pub fn inc_training_runs(&self) {
        self.inner().training_runs.inc();
    }

    pub fn inc_training_failures(&self) {
        self.inner().training_failures.inc();
    }

    /// Replace the model version label
    pub fn set_model_version(&self, version: u64) {
        self.inner().model_version_info.reset();
        self.inner()
            .model_version_info
            .with_label_values(&[&version.to_string()])
            .set(1.0);
    }

    /// Text exposition of every registered metric
    pub fn render(&self) -> String {
        let families = prometheus::gather();
        let mut buffer = Vec::new();
        if let Err(e) = TextEncoder::new().encode(&families, &mut buffer) {
            warn!(error = %e, "Failed to encode metrics");
            return String::new();
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }
}

/// Structured logger for pipeline events
///
/// Every record carries a stable `event` field so log pipelines can
/// filter on it.
#[derive(Debug, Clone)]
pub struct StructuredLogger {
    service: String,
}

impl Default for StructuredLogger {
    fn default() -> Self {
        Self::new("ccopt")
    }
}

impl StructuredLogger {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    pub fn log_training_completed(
        &self,
        version: u64,
        train_size: usize,
        val_size: usize,
        validation_accuracy: f64,
        runtime_secs: f64,
    ) {
        info!(
            event = "training_completed",
            service = %self.service,
            model_version = version,
            train_size = train_size,
            val_size = val_size,
            validation_accuracy = validation_accuracy,
            runtime_secs = runtime_secs,
            "Model trained and committed"
        );
    }

    pub fn log_training_rejected(&self, reason: &str) {
        warn!(
            event = "training_rejected",
            service = %self.service,
            reason = %reason,
            "Training run rejected, previous model unchanged"
        );
    }

    pub fn log_model_loaded(&self, version: u64, checksum: &str, width: usize) {
        info!(
            event = "model_loaded",
            service = %self.service,
            model_version = version,
            checksum = %checksum,
            feature_count = width,
            "Classifier loaded"
        );
    }

    pub fn log_instance_excluded(&self, instance_ref: &str, reason: &str) {
        warn!(
            event = "instance_excluded",
            service = %self.service,
            instance_ref = %instance_ref,
            reason = %reason,
            "Instance excluded from recommendations"
        );
    }

    pub fn log_batch_completed(
        &self,
        candidates: usize,
        produced: usize,
        excluded: usize,
        downsize: usize,
        model_version: u64,
        elapsed_ms: u128,
    ) {
        info!(
            event = "recommendation_batch_completed",
            service = %self.service,
            candidates = candidates,
            produced = produced,
            excluded = excluded,
            downsize = downsize,
            model_version = model_version,
            elapsed_ms = elapsed_ms as u64,
            "Recommendation batch completed"
        );
    }

    pub fn log_cache_hit(&self, key: &str) {
        info!(
            event = "explanation_cache_hit",
            service = %self.service,
            key = %key,
            "Explanation served from cache"
        );
    }

    pub fn log_cache_miss(&self, key: &str) {
        info!(
            event = "explanation_cache_miss",
            service = %self.service,
            key = %key,
            "Explanation not cached, generating"
        );
    }

    pub fn log_generation_failed(&self, key: &str, error: &str) {
        warn!(
            event = "explanation_generation_failed",
            service = %self.service,
            key = %key,
            error = %error,
            "Explanation generation failed, nothing cached"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_handle_records_and_renders() {
        let metrics = OptimizerMetrics::new();
        metrics.observe_batch_latency(0.02);
        metrics.add_recommendations_generated(3);
        metrics.inc_recommendation_requests();
        metrics.set_model_version(7);

        let text = metrics.render();
        assert!(text.contains("ccopt_recommendations_generated_total"));
        assert!(text.contains("ccopt_model_version_info"));
    }

    #[test]
    fn test_handles_share_registry() {
        let a = OptimizerMetrics::new();
        let b = a.clone();
        a.inc_cache_hits();
        b.inc_cache_hits();
        assert!(OptimizerMetrics::default().render().contains("ccopt_explanation_cache_hits_total"));
    }

    #[test]
    fn test_structured_logger_creation() {
        let logger = StructuredLogger::new("test");
        assert_eq!(logger.service, "test");
        assert_eq!(StructuredLogger::default().service, "ccopt");
    }
}
