//! Loading committed models for inference

use super::classifier::GradientBoostedClassifier;
use super::metadata::ModelMetadata;
use super::store::{compute_checksum, ModelStore};
use crate::error::{OptimizerError, Result};
use crate::features::{FeatureSchema, FeatureVector};
use crate::observability::{OptimizerMetrics, StructuredLogger};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// A verified classifier together with its metadata
#[derive(Debug, Clone)]
pub struct LoadedModel {
    pub classifier: GradientBoostedClassifier,
    pub metadata: ModelMetadata,
}

impl LoadedModel {
    pub fn version(&self) -> u64 {
        self.metadata.version
    }

    pub fn schema(&self) -> &FeatureSchema {
        &self.metadata.feature_schema
    }

    /// Probability that the instance should be downsized.
    ///
    /// Vectors whose field list differs from the persisted schema are rejected.
    pub fn predict_proba(&self, vector: &FeatureVector) -> Result<f64> {
        self.schema().validate(vector)?;
        Ok(self.classifier.predict_proba(&vector.values))
    }
}

/// Resolves and verifies the latest committed model
#[derive(Debug, Clone)]
pub struct ModelLoader {
    store: ModelStore,
}

impl ModelLoader {
    pub fn new(store: ModelStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &ModelStore {
        &self.store
    }

    pub fn latest_version(&self) -> Result<Option<u64>> {
        self.store.latest_version()
    }

    /// Metadata of the latest version without loading the artifact
    pub fn latest_metadata(&self) -> Result<ModelMetadata> {
        let version = self.require_latest()?;
        self.store.read_metadata(version)
    }

    pub fn load_latest(&self) -> Result<LoadedModel> {
        let version = self.require_latest()?;
        self.load(version)
    }

    pub fn load(&self, version: u64) -> Result<LoadedModel> {
        let metadata = self.store.read_metadata(version)?;
        let bytes = self.store.read_artifact(version)?;

        let checksum = compute_checksum(&bytes);
        if checksum != metadata.artifact_checksum {
            return Err(OptimizerError::Artifact(format!(
                "checksum mismatch for version {}: expected {}, got {}",
                version, metadata.artifact_checksum, checksum
            )));
        }

        let classifier: GradientBoostedClassifier = serde_json::from_slice(&bytes)
            .map_err(|e| OptimizerError::Artifact(format!("corrupt artifact v{}: {}", version, e)))?;
        classifier.validate()?;

        let width = metadata.feature_schema.width();
        if classifier.n_features != width {
            return Err(OptimizerError::Artifact(format!(
                "classifier expects {} features but schema has {}",
                classifier.n_features, width
            )));
        }

        debug!(version, checksum = %checksum, "Verified model artifact");
        Ok(LoadedModel {
            classifier,
            metadata,
        })
    }

    fn require_latest(&self) -> Result<u64> {
        self.store
            .latest_version()?
            .ok_or_else(|| OptimizerError::ModelNotFound(self.store.dir().display().to_string()))
    }
}

/// Shared handle to the model used for serving.
///
/// Populated on first use and swapped wholesale when a newer version is
/// committed. Callers hold the returned `Arc` for a whole batch, so every
/// instance in a batch sees the same version.
#[derive(Debug)]
pub struct CurrentModel {
    loader: ModelLoader,
    slot: RwLock<Option<Arc<LoadedModel>>>,
    metrics: OptimizerMetrics,
    logger: StructuredLogger,
}

impl CurrentModel {
    pub fn new(loader: ModelLoader) -> Self {
        Self {
            loader,
            slot: RwLock::new(None),
            metrics: OptimizerMetrics::new(),
            logger: StructuredLogger::default(),
        }
    }

    pub fn loader(&self) -> &ModelLoader {
        &self.loader
    }

    /// Cached model, reloaded if the store holds a newer committed version
    pub async fn get(&self) -> Result<Arc<LoadedModel>> {
        let latest = self.loader.latest_version()?;
        {
            let slot = self.slot.read().await;
            if let Some(model) = slot.as_ref() {
                if Some(model.version()) >= latest {
                    return Ok(Arc::clone(model));
                }
            }
        }

        let mut slot = self.slot.write().await;
        // Another task may have loaded while we waited for the write lock
        if let Some(model) = slot.as_ref() {
            if Some(model.version()) >= latest {
                return Ok(Arc::clone(model));
            }
        }
        let model = self.install(&mut slot)?;
        Ok(model)
    }

    /// Load the latest version unconditionally and swap it in
    pub async fn refresh(&self) -> Result<Arc<LoadedModel>> {
        let mut slot = self.slot.write().await;
        self.install(&mut slot)
    }

    fn install(&self, slot: &mut Option<Arc<LoadedModel>>) -> Result<Arc<LoadedModel>> {
        let model = Arc::new(self.loader.load_latest()?);
        self.metrics.set_model_version(model.version());
        self.logger.log_model_loaded(
            model.version(),
            &model.metadata.artifact_checksum,
            model.schema().width(),
        );
        *slot = Some(Arc::clone(&model));
        Ok(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::FeatureBuilder;
    use crate::model::{LabeledExample, LabelingRule, ModelTrainer, TrainerConfig, TrainingSet};
    use crate::features::UtilizationSummary;
    use std::fs;
    use tempfile::TempDir;

    fn create_training_set() -> TrainingSet {
        let builder = FeatureBuilder::default();
        let rule = LabelingRule::default();
        let schema = FeatureSchema::new(["m5", "t3"]);
        let examples = (0..30)
            .map(|i| {
                let idle = i % 3 == 0;
                let summary = UtilizationSummary {
                    sample_count: 10,
                    avg_cpu: if idle { 8.0 } else { 55.0 } + (i % 4) as f64,
                    p95_cpu: if idle { 15.0 } else { 85.0 },
                    avg_mem: if idle { 12.0 } else { 60.0 },
                    p95_mem: if idle { 20.0 } else { 80.0 },
                    avg_net_in_mb: 1.0,
                    avg_net_out_mb: 1.0,
                    is_prod: !idle,
                    family: if i % 2 == 0 { "m5" } else { "t3" }.to_string(),
                };
                LabeledExample {
                    instance_ref: format!("inst-{}", i),
                    features: builder.encode(&summary, &schema),
                    downsize: rule.is_downsize(&summary),
                    summary,
                }
            })
            .collect();
        TrainingSet { schema, examples }
    }

    async fn trained_store(dir: &TempDir) -> ModelStore {
        let store = ModelStore::new(dir.path()).unwrap();
        let trainer = ModelTrainer::new(store.clone(), TrainerConfig::default());
        trainer.train(create_training_set()).await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_empty_store_is_model_not_found() {
        let dir = TempDir::new().unwrap();
        let loader = ModelLoader::new(ModelStore::new(dir.path()).unwrap());
        assert!(matches!(loader.load_latest(), Err(OptimizerError::ModelNotFound(_))));
        assert!(matches!(loader.latest_metadata(), Err(OptimizerError::ModelNotFound(_))));
    }

    #[tokio::test]
    async fn test_load_verifies_checksum() {
        let dir = TempDir::new().unwrap();
        let store = trained_store(&dir).await;
        let loader = ModelLoader::new(store.clone());
        assert!(loader.load_latest().is_ok());

        let mut bytes = fs::read(store.artifact_path(1)).unwrap();
        bytes.push(b' ');
        fs::write(store.artifact_path(1), bytes).unwrap();
        assert!(matches!(loader.load_latest(), Err(OptimizerError::Artifact(_))));
    }

    #[tokio::test]
    async fn test_predict_rejects_reordered_schema() {
        let dir = TempDir::new().unwrap();
        let model = ModelLoader::new(trained_store(&dir).await).load_latest().unwrap();

        let builder = FeatureBuilder::default();
        let set = create_training_set();
        let good = builder.encode(&set.examples[0].summary, model.schema());
        assert!(model.predict_proba(&good).is_ok());

        let mut reordered = good.clone();
        reordered.fields.swap(0, 2);
        reordered.values.swap(0, 2);
        assert!(matches!(
            model.predict_proba(&reordered),
            Err(OptimizerError::SchemaMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_current_model_picks_up_new_versions() {
        let dir = TempDir::new().unwrap();
        let store = trained_store(&dir).await;
        let current = CurrentModel::new(ModelLoader::new(store.clone()));

        let first = current.get().await.unwrap();
        assert_eq!(first.version(), 1);
        let again = current.get().await.unwrap();
        assert!(Arc::ptr_eq(&first, &again));

        let trainer = ModelTrainer::new(store, TrainerConfig::default());
        trainer.train(create_training_set()).await.unwrap();

        let second = current.get().await.unwrap();
        assert_eq!(second.version(), 2);
        // Earlier holders keep the version they started with
        assert_eq!(first.version(), 1);
        assert_eq!(current.refresh().await.unwrap().version(), 2);
    }
}
