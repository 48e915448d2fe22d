//! Service facade composing the pipeline components

use crate::analytics::{self, AnalyticsSummary, CostTrend, TrendConfig};
use crate::error::{OptimizerError, Result};
use crate::explain::{
    build_portfolio_prompt, build_prompt, CacheConfig, Clock, ExpiringStore, ExplanationCache,
    SystemClock, TextGenerator,
};
use crate::features::{FeatureBuilder, FeatureConfig};
use crate::model::{
    collect_training_set, CurrentModel, ModelLoader, ModelMetadata, ModelStore, ModelTrainer,
    TrainerConfig,
};
use crate::models::{InstanceFilter, InstanceInfo, Recommendation, RecommendationFilter};
use crate::recommend::{EngineConfig, RecommendationEngine};
use crate::store::MetricsSource;
use chrono::NaiveDate;
use std::sync::Arc;
use tracing::{info, warn};

/// Cache key prefix of the portfolio summary; the model version is appended
pub const PORTFOLIO_SUMMARY_KEY: &str = "__portfolio__";

/// Settings for every component
#[derive(Debug, Clone, Default)]
pub struct OptimizerConfig {
    pub features: FeatureConfig,
    pub trainer: TrainerConfig,
    pub engine: EngineConfig,
    pub cache: CacheConfig,
    pub trend: TrendConfig,
}

/// Entry point used by the presentation layer
pub struct CostOptimizer {
    source: Arc<dyn MetricsSource>,
    builder: FeatureBuilder,
    trainer: ModelTrainer,
    model: Arc<CurrentModel>,
    engine: RecommendationEngine,
    cache: ExplanationCache,
    generator: Arc<dyn TextGenerator>,
    clock: Arc<dyn Clock>,
    trend: TrendConfig,
}

impl CostOptimizer {
    pub fn new(
        source: Arc<dyn MetricsSource>,
        model_store: ModelStore,
        cache_store: Arc<dyn ExpiringStore>,
        generator: Arc<dyn TextGenerator>,
        config: OptimizerConfig,
    ) -> Self {
        Self::with_clock(
            source,
            model_store,
            cache_store,
            generator,
            config,
            Arc::new(SystemClock),
        )
    }

    /// Like [`CostOptimizer::new`] with an explicit time source
    pub fn with_clock(
        source: Arc<dyn MetricsSource>,
        model_store: ModelStore,
        cache_store: Arc<dyn ExpiringStore>,
        generator: Arc<dyn TextGenerator>,
        config: OptimizerConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let builder = FeatureBuilder::new(config.features);
        let model = Arc::new(CurrentModel::new(ModelLoader::new(model_store.clone())));
        let engine = RecommendationEngine::new(
            Arc::clone(&source),
            builder.clone(),
            Arc::clone(&model),
            config.engine,
        );

        Self {
            trainer: ModelTrainer::new(model_store, config.trainer),
            cache: ExplanationCache::new(cache_store, Arc::clone(&clock), config.cache),
            source,
            builder,
            model,
            engine,
            generator,
            clock,
            trend: config.trend,
        }
    }

    /// Recommendations for every instance matching `filter`, best savings first
    pub async fn get_recommendations(
        &self,
        filter: &RecommendationFilter,
    ) -> Result<Vec<Recommendation>> {
        self.engine
            .get_recommendations(filter, self.clock.now())
            .await
    }

    pub async fn get_recommendation(&self, instance_ref: &str) -> Result<Recommendation> {
        self.engine
            .get_recommendation(instance_ref, self.clock.now())
            .await
    }

    /// Natural-language explanation of an instance's recommendation, cached per instance
    pub async fn get_recommendation_explanation(&self, instance_ref: &str) -> Result<String> {
        let rec = self.get_recommendation(instance_ref).await?;
        let prompt = build_prompt(&rec);
        let timeout = self.cache.config().generation_timeout;
        self.cache
            .get_or_generate(instance_ref, || self.generator.generate(&prompt, timeout))
            .await
    }

    /// Generated overview of portfolio savings.
    ///
    /// Built from the analytics totals and the average daily savings of the
    /// configured trend window. Cached like explanations, once per model
    /// version.
    pub async fn get_portfolio_summary(&self) -> Result<String> {
        let (instances, recommendations) = self.portfolio().await?;
        let metadata = self.latest_metadata()?;
        let summary = analytics::summarize(
            &instances,
            &recommendations,
            metadata.as_ref(),
            self.engine.request_count(),
        );
        let trend = analytics::cost_trend(
            &instances,
            &recommendations,
            self.clock.now().date_naive(),
            &self.trend,
        );

        let prompt = build_portfolio_prompt(&summary, trend.average_daily_savings());
        let key = format!(
            "{}v{}",
            PORTFOLIO_SUMMARY_KEY,
            metadata.map_or(0, |m| m.version)
        );
        let timeout = self.cache.config().generation_timeout;
        self.cache
            .get_or_generate(&key, || self.generator.generate(&prompt, timeout))
            .await
    }

    /// Portfolio totals.
    ///
    /// Without a trained model every instance is costed as kept and
    /// `model` is empty.
    pub async fn get_analytics_summary(&self) -> Result<AnalyticsSummary> {
        let (instances, recommendations) = self.portfolio().await?;
        let metadata = self.latest_metadata()?;
        Ok(analytics::summarize(
            &instances,
            &recommendations,
            metadata.as_ref(),
            self.engine.request_count(),
        ))
    }

    /// Simulated daily cost series for the last `lookback_days` ending at `end`
    pub async fn get_cost_trends(&self, lookback_days: u32, end: NaiveDate) -> Result<CostTrend> {
        let (instances, recommendations) = self.portfolio().await?;
        let config = TrendConfig {
            lookback_days,
            ..self.trend.clone()
        };
        Ok(analytics::cost_trend(
            &instances,
            &recommendations,
            end,
            &config,
        ))
    }

    /// Train on all current data, commit a new version and start serving it
    pub async fn train(&self) -> Result<ModelMetadata> {
        let set = collect_training_set(
            self.source.as_ref(),
            &self.builder,
            &self.trainer.config().labeling,
            self.clock.now(),
        )
        .await?;
        let metadata = self.trainer.train(set).await?;

        if let Err(e) = self.model.refresh().await {
            warn!(version = metadata.version, error = %e, "Trained model committed but not loaded");
        }
        info!(
            version = metadata.version,
            validation_accuracy = metadata.validation_accuracy,
            "Serving new model"
        );
        Ok(metadata)
    }

    /// Metadata of the latest committed model
    pub fn get_model_metadata(&self) -> Result<ModelMetadata> {
        self.model.loader().latest_metadata()
    }

    /// Drop expired explanations from the cache store
    pub async fn purge_expired_explanations(&self) -> Result<usize> {
        self.cache.purge_expired().await
    }

    fn latest_metadata(&self) -> Result<Option<ModelMetadata>> {
        match self.get_model_metadata() {
            Ok(meta) => Ok(Some(meta)),
            Err(OptimizerError::ModelNotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Every instance plus recommendations for those with data
    async fn portfolio(&self) -> Result<(Vec<InstanceInfo>, Vec<Recommendation>)> {
        let refs = self.source.list_instances(&InstanceFilter::default()).await?;
        let mut instances = Vec::with_capacity(refs.len());
        for instance_ref in &refs {
            match self.source.get_instance(instance_ref).await {
                Ok(instance) => instances.push(instance),
                Err(e) if e.is_per_instance() => {
                    warn!(instance_ref = %instance_ref, error = %e, "Skipping instance in analytics");
                }
                Err(e) => return Err(e),
            }
        }

        let recommendations = match self
            .engine
            .recommend_batch(&RecommendationFilter::default(), self.clock.now())
            .await
        {
            Ok(recs) => recs,
            Err(OptimizerError::ModelNotFound(_)) => Vec::new(),
            Err(e) => return Err(e),
        };
        Ok((instances, recommendations))
    }
}
