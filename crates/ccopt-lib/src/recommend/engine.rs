//! Recommendation engine
//!
//! Turns classifier probabilities into keep/downsize recommendations.
//! Bulk requests fan out over a bounded pool of tasks that share one
//! loaded model for the whole batch.

use super::reasons::{build_reasons, ReasonConfig};
use crate::error::{OptimizerError, Result};
use crate::features::{FeatureBuilder, UtilizationSummary};
use crate::model::{CurrentModel, LoadedModel};
use crate::models::{Action, InstanceInfo, Recommendation, RecommendationFilter};
use crate::observability::{OptimizerMetrics, StructuredLogger};
use crate::store::MetricsSource;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error};

/// Default probability above which an instance is downsized
pub const DEFAULT_DECISION_THRESHOLD: f64 = 0.5;

/// Assumed cost reduction from moving one size down
pub const DEFAULT_REDUCTION_FRACTION: f64 = 0.4;

/// Engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub decision_threshold: f64,
    pub reduction_fraction: f64,
    /// Maximum instances evaluated concurrently in a batch
    pub max_concurrency: usize,
    pub reasons: ReasonConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            decision_threshold: DEFAULT_DECISION_THRESHOLD,
            reduction_fraction: DEFAULT_REDUCTION_FRACTION,
            max_concurrency: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            reasons: ReasonConfig::default(),
        }
    }
}

impl EngineConfig {
    /// This configuration with reasons phrased against `model`'s labeling rule
    pub fn for_model(&self, model: &LoadedModel) -> Self {
        Self {
            reasons: self.reasons.with_labeling(&model.metadata.labeling_rule),
            ..self.clone()
        }
    }
}

/// Projected monthly savings for an action; zero unless downsizing
pub fn projected_savings(instance: &InstanceInfo, action: Action, reduction_fraction: f64) -> f64 {
    match action {
        Action::Downsize => instance.monthly_cost() * reduction_fraction,
        Action::Keep => 0.0,
    }
}

/// Build the recommendation for one classified instance
pub fn decide(
    instance: &InstanceInfo,
    summary: &UtilizationSummary,
    confidence: f64,
    model_version: u64,
    config: &EngineConfig,
) -> Recommendation {
    let action = if confidence > config.decision_threshold {
        Action::Downsize
    } else {
        Action::Keep
    };

    Recommendation {
        instance_ref: instance.instance_ref.clone(),
        cloud_instance_id: instance.cloud_instance_id.clone(),
        environment: instance.environment.clone(),
        region: instance.region.clone(),
        instance_type: instance.instance_type.clone(),
        hourly_cost: instance.hourly_cost,
        action,
        confidence_downsize: confidence,
        projected_monthly_savings: projected_savings(instance, action, config.reduction_fraction),
        reasons: build_reasons(
            summary,
            instance.environment.as_deref(),
            confidence,
            config.decision_threshold,
            &config.reasons,
        ),
        model_version,
    }
}

/// Savings descending, ties broken by instance reference
pub fn sort_recommendations(recommendations: &mut [Recommendation]) {
    recommendations.sort_by(|a, b| {
        b.projected_monthly_savings
            .total_cmp(&a.projected_monthly_savings)
            .then_with(|| a.instance_ref.cmp(&b.instance_ref))
    });
}

async fn evaluate_instance(
    source: &dyn MetricsSource,
    builder: &FeatureBuilder,
    model: &LoadedModel,
    config: &EngineConfig,
    instance_ref: &str,
    now: DateTime<Utc>,
) -> Result<Recommendation> {
    let instance = source.get_instance(instance_ref).await?;
    let (summary, vector) = builder.build(source, &instance, model.schema(), now).await?;
    let confidence = model.predict_proba(&vector)?;
    debug!(
        instance_ref = %instance_ref,
        confidence = confidence,
        samples = summary.sample_count,
        "Classified instance"
    );
    Ok(decide(&instance, &summary, confidence, model.version(), config))
}

/// Produces recommendations from the current model
pub struct RecommendationEngine {
    source: Arc<dyn MetricsSource>,
    builder: FeatureBuilder,
    model: Arc<CurrentModel>,
    config: Arc<EngineConfig>,
    requests: AtomicU64,
    metrics: OptimizerMetrics,
    logger: StructuredLogger,
}

impl RecommendationEngine {
    pub fn new(
        source: Arc<dyn MetricsSource>,
        builder: FeatureBuilder,
        model: Arc<CurrentModel>,
        config: EngineConfig,
    ) -> Self {
        Self {
            source,
            builder,
            model,
            config: Arc::new(config),
            requests: AtomicU64::new(0),
            metrics: OptimizerMetrics::new(),
            logger: StructuredLogger::default(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Number of bulk recommendation requests served
    pub fn request_count(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    /// Bulk recommendations for every instance matching `filter`.
    ///
    /// Counted as a recommendation request.
    pub async fn get_recommendations(
        &self,
        filter: &RecommendationFilter,
        now: DateTime<Utc>,
    ) -> Result<Vec<Recommendation>> {
        self.requests.fetch_add(1, Ordering::Relaxed);
        self.metrics.inc_recommendation_requests();
        self.recommend_batch(filter, now).await
    }

    /// Bulk recommendations without touching the request counter.
    ///
    /// Instances with insufficient data or per-instance store failures are
    /// left out. A schema mismatch or model failure fails the batch.
    pub async fn recommend_batch(
        &self,
        filter: &RecommendationFilter,
        now: DateTime<Utc>,
    ) -> Result<Vec<Recommendation>> {
        let started = Instant::now();
        let model = self.model.get().await?;
        let refs = self.source.list_instances(&filter.instances).await?;
        let candidates = refs.len();

        let batch_config = Arc::new(self.config.for_model(&model));
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency.max(1)));
        let mut tasks = JoinSet::new();
        for instance_ref in refs {
            let semaphore = Arc::clone(&semaphore);
            let source = Arc::clone(&self.source);
            let builder = self.builder.clone();
            let model = Arc::clone(&model);
            let config = Arc::clone(&batch_config);

            tasks.spawn(async move {
                let _permit = semaphore.acquire().await;
                let result = evaluate_instance(
                    source.as_ref(),
                    &builder,
                    &model,
                    &config,
                    &instance_ref,
                    now,
                )
                .await;
                (instance_ref, result)
            });
        }

        let mut recommendations = Vec::with_capacity(candidates);
        let mut excluded = 0;
        while let Some(joined) = tasks.join_next().await {
            let (instance_ref, result) =
                joined.map_err(|e| OptimizerError::Io(std::io::Error::other(e)))?;
            match result {
                Ok(rec) => {
                    if filter.min_savings <= 0.0
                        || rec.projected_monthly_savings >= filter.min_savings
                    {
                        recommendations.push(rec);
                    }
                }
                Err(e) if e.is_per_instance() => {
                    excluded += 1;
                    self.logger.log_instance_excluded(&instance_ref, &e.to_string());
                }
                Err(e) => {
                    error!(instance_ref = %instance_ref, error = %e, "Recommendation batch failed");
                    return Err(e);
                }
            }
        }

        sort_recommendations(&mut recommendations);

        let downsize = recommendations
            .iter()
            .filter(|r| r.action == Action::Downsize)
            .count();
        self.metrics.observe_batch_latency(started.elapsed().as_secs_f64());
        self.metrics.add_recommendations_generated(recommendations.len());
        self.metrics.add_instances_excluded(excluded);
        self.logger.log_batch_completed(
            candidates,
            recommendations.len(),
            excluded,
            downsize,
            model.version(),
            started.elapsed().as_millis(),
        );
        Ok(recommendations)
    }

    /// Recommendation for a single instance; every failure propagates
    pub async fn get_recommendation(
        &self,
        instance_ref: &str,
        now: DateTime<Utc>,
    ) -> Result<Recommendation> {
        let model = self.model.get().await?;
        evaluate_instance(
            self.source.as_ref(),
            &self.builder,
            &model,
            &self.config.for_model(&model),
            instance_ref,
            now,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        collect_training_set, LabelingRule, ModelLoader, ModelStore, ModelTrainer, TrainerConfig,
    };
    use crate::models::{InstanceFilter, MetricSample};
    use crate::store::InMemoryMetricsStore;
    use chrono::Duration;
    use tempfile::TempDir;

    fn instance(id: &str, env: &str, cost: f64) -> InstanceInfo {
        InstanceInfo {
            instance_ref: id.to_string(),
            cloud_instance_id: format!("i-{}", id),
            hourly_cost: Some(cost),
            environment: Some(env.to_string()),
            region: Some("us-west-2".to_string()),
            instance_type: Some("m5.large".to_string()),
            created_at: None,
        }
    }

    async fn seed(store: &InMemoryMetricsStore, inst: InstanceInfo, cpu: f64, mem: f64, now: DateTime<Utc>) {
        let samples: Vec<MetricSample> = (0..24)
            .map(|h| MetricSample {
                instance_ref: inst.instance_ref.clone(),
                timestamp: now - Duration::hours(h),
                cpu_pct: Some(cpu + (h % 3) as f64),
                mem_pct: Some(mem + (h % 2) as f64),
                net_in_bytes: Some(1_000_000),
                net_out_bytes: Some(1_000_000),
            })
            .collect();
        store.upsert_instance(inst).await;
        store.add_metrics(samples).await;
    }

    /// Idle and busy instances, one instance without data, and a trained model
    async fn create_test_engine(dir: &TempDir) -> RecommendationEngine {
        let now = Utc::now();
        let store = Arc::new(InMemoryMetricsStore::new());
        for i in 0..24 {
            let id = format!("inst-{:02}", i);
            if i % 2 == 0 {
                seed(&store, instance(&id, "dev", 0.05 + i as f64 * 0.01), 8.0, 15.0, now).await;
            } else {
                seed(&store, instance(&id, "prod", 0.2), 60.0, 70.0, now).await;
            }
        }
        store.upsert_instance(instance("inst-empty", "dev", 1.0)).await;

        let builder = FeatureBuilder::default();
        let set = collect_training_set(store.as_ref(), &builder, &LabelingRule::default(), now)
            .await
            .unwrap();
        let model_store = ModelStore::new(dir.path()).unwrap();
        ModelTrainer::new(model_store.clone(), TrainerConfig::default())
            .train(set)
            .await
            .unwrap();

        let current = Arc::new(CurrentModel::new(ModelLoader::new(model_store)));
        RecommendationEngine::new(store, builder, current, EngineConfig::default())
    }

    #[test]
    fn test_decision_threshold_is_strict() {
        let config = EngineConfig::default();
        let inst = instance("a", "dev", 0.1);
        let summary = UtilizationSummary {
            sample_count: 1,
            avg_cpu: 10.0,
            p95_cpu: 10.0,
            avg_mem: 10.0,
            p95_mem: 10.0,
            avg_net_in_mb: 0.0,
            avg_net_out_mb: 0.0,
            is_prod: false,
            family: "m5".to_string(),
        };

        let at = decide(&inst, &summary, 0.5, 1, &config);
        assert_eq!(at.action, Action::Keep);
        assert_eq!(at.projected_monthly_savings, 0.0);

        let above = decide(&inst, &summary, 0.5001, 1, &config);
        assert_eq!(above.action, Action::Downsize);
        assert!((above.projected_monthly_savings - 28.8).abs() < 1e-9);
    }

    #[test]
    fn test_no_savings_without_cost() {
        let mut inst = instance("a", "dev", 0.0);
        inst.hourly_cost = None;
        assert_eq!(projected_savings(&inst, Action::Downsize, 0.4), 0.0);
    }

    #[test]
    fn test_sort_by_savings_then_ref() {
        let mut recs: Vec<Recommendation> = [("b", 10.0), ("a", 10.0), ("c", 30.0), ("d", 0.0)]
            .iter()
            .map(|(id, savings)| Recommendation {
                instance_ref: id.to_string(),
                cloud_instance_id: String::new(),
                environment: None,
                region: None,
                instance_type: None,
                hourly_cost: None,
                action: Action::Keep,
                confidence_downsize: 0.0,
                projected_monthly_savings: *savings,
                reasons: Vec::new(),
                model_version: 1,
            })
            .collect();
        sort_recommendations(&mut recs);
        let order: Vec<&str> = recs.iter().map(|r| r.instance_ref.as_str()).collect();
        assert_eq!(order, vec!["c", "a", "b", "d"]);
    }

    #[tokio::test]
    async fn test_batch_excludes_instances_without_data() {
        let dir = TempDir::new().unwrap();
        let engine = create_test_engine(&dir).await;

        let recs = engine
            .get_recommendations(&RecommendationFilter::default(), Utc::now())
            .await
            .unwrap();
        assert_eq!(recs.len(), 24);
        assert!(recs.iter().all(|r| r.instance_ref != "inst-empty"));
        for rec in &recs {
            assert_eq!(rec.action == Action::Downsize, rec.confidence_downsize > 0.5);
            if rec.action == Action::Keep {
                assert_eq!(rec.projected_monthly_savings, 0.0);
            }
        }
        assert!(recs.windows(2).all(|w| w[0].projected_monthly_savings >= w[1].projected_monthly_savings));
        assert_eq!(engine.request_count(), 1);
    }

    #[tokio::test]
    async fn test_filters_apply() {
        let dir = TempDir::new().unwrap();
        let engine = create_test_engine(&dir).await;

        let prod = RecommendationFilter {
            instances: InstanceFilter {
                environment: Some("prod".to_string()),
                ..Default::default()
            },
            min_savings: 0.0,
        };
        let recs = engine.get_recommendations(&prod, Utc::now()).await.unwrap();
        assert_eq!(recs.len(), 12);
        assert!(recs.iter().all(|r| r.environment.as_deref() == Some("prod")));

        let min = RecommendationFilter {
            min_savings: 100.0,
            ..Default::default()
        };
        let recs = engine.get_recommendations(&min, Utc::now()).await.unwrap();
        assert!(recs.iter().all(|r| r.projected_monthly_savings >= 100.0));
        assert_eq!(engine.request_count(), 2);
    }

    #[tokio::test]
    async fn test_single_instance_errors_propagate() {
        let dir = TempDir::new().unwrap();
        let engine = create_test_engine(&dir).await;

        assert!(matches!(
            engine.get_recommendation("inst-empty", Utc::now()).await,
            Err(OptimizerError::InsufficientData(_))
        ));
        assert!(matches!(
            engine.get_recommendation("missing", Utc::now()).await,
            Err(OptimizerError::InstanceNotFound(_))
        ));
        let rec = engine.get_recommendation("inst-00", Utc::now()).await.unwrap();
        assert_eq!(rec.action, Action::Downsize);
        assert_eq!(rec.model_version, 1);
    }

    #[tokio::test]
    async fn test_missing_model_fails_batch() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(InMemoryMetricsStore::new());
        let current = Arc::new(CurrentModel::new(ModelLoader::new(
            ModelStore::new(dir.path()).unwrap(),
        )));
        let engine =
            RecommendationEngine::new(store, FeatureBuilder::default(), current, EngineConfig::default());
        assert!(matches!(
            engine
                .get_recommendations(&RecommendationFilter::default(), Utc::now())
                .await,
            Err(OptimizerError::ModelNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_reasons_follow_trained_labeling_rule() {
        let dir = TempDir::new().unwrap();
        let now = Utc::now();
        let store = Arc::new(InMemoryMetricsStore::new());
        for i in 0..12 {
            seed(&store, instance(&format!("idle-{:02}", i), "dev", 0.1), 4.0, 10.0, now).await;
            seed(&store, instance(&format!("busy-{:02}", i), "prod", 0.2), 60.0, 70.0, now).await;
        }
        seed(&store, instance("mid", "dev", 0.1), 15.0, 22.0, now).await;

        let rule = LabelingRule {
            cpu_threshold: 10.0,
            mem_threshold: 20.0,
        };
        let builder = FeatureBuilder::default();
        let set = collect_training_set(store.as_ref(), &builder, &rule, now)
            .await
            .unwrap();
        let model_store = ModelStore::new(dir.path()).unwrap();
        let config = TrainerConfig {
            labeling: rule,
            ..Default::default()
        };
        ModelTrainer::new(model_store.clone(), config)
            .train(set)
            .await
            .unwrap();

        let current = Arc::new(CurrentModel::new(ModelLoader::new(model_store)));
        let engine = RecommendationEngine::new(store, builder, current, EngineConfig::default());

        // 16% CPU and 22.5% memory sit above the trained thresholds
        let rec = engine.get_recommendation("mid", now).await.unwrap();
        assert!(rec.reasons[0].starts_with("Average CPU utilization is high"));
        assert!(rec.reasons[1].starts_with("Average memory utilization is high"));

        let batch = engine
            .recommend_batch(&RecommendationFilter::default(), now)
            .await
            .unwrap();
        let mid = batch.iter().find(|r| r.instance_ref == "mid").unwrap();
        assert_eq!(mid.reasons, rec.reasons);
    }
}
