//! Offline training: dataset assembly, labeling, split, fit, evaluate, commit

use super::classifier::{BoostingParams, GradientBoostedClassifier};
use super::metadata::{ConfusionMatrix, ModelMetadata};
use super::store::ModelStore;
use crate::error::{OptimizerError, Result};
use crate::features::{FeatureBuilder, FeatureSchema, FeatureVector, UtilizationSummary};
use crate::models::InstanceFilter;
use crate::observability::{OptimizerMetrics, StructuredLogger};
use crate::store::MetricsSource;
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Fewest labeled examples a training run accepts
pub const MIN_TRAINING_EXAMPLES: usize = 10;

/// Seed for the deterministic train/validation shuffle
pub const DEFAULT_SPLIT_SEED: u64 = 42;

/// Heuristic that produces training labels.
///
/// Only used to label historical data; serving decisions come from the
/// classifier alone.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LabelingRule {
    /// Average CPU percent below which an instance may be downsized
    pub cpu_threshold: f64,
    /// Average memory percent below which an instance may be downsized
    pub mem_threshold: f64,
}

impl Default for LabelingRule {
    fn default() -> Self {
        Self {
            cpu_threshold: 20.0,
            mem_threshold: 25.0,
        }
    }
}

impl LabelingRule {
    pub fn is_downsize(&self, summary: &UtilizationSummary) -> bool {
        summary.avg_cpu < self.cpu_threshold && summary.avg_mem < self.mem_threshold
    }
}

/// Trainer configuration
#[derive(Debug, Clone)]
pub struct TrainerConfig {
    pub labeling: LabelingRule,
    pub boosting: BoostingParams,
    pub min_examples: usize,
    /// Fraction of each class held out for validation
    pub validation_fraction: f64,
    pub seed: u64,
    /// Probability above which a validation example counts as downsize
    pub decision_threshold: f64,
    /// Committed versions retained after a run; the new version always survives
    pub versions_to_keep: usize,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            labeling: LabelingRule::default(),
            boosting: BoostingParams::default(),
            min_examples: MIN_TRAINING_EXAMPLES,
            validation_fraction: 0.2,
            seed: DEFAULT_SPLIT_SEED,
            decision_threshold: 0.5,
            versions_to_keep: 5,
        }
    }
}

/// One encoded, labeled instance
#[derive(Debug, Clone)]
pub struct LabeledExample {
    pub instance_ref: String,
    pub summary: UtilizationSummary,
    pub features: FeatureVector,
    pub downsize: bool,
}

/// Labeled examples encoded against one schema
#[derive(Debug, Clone)]
pub struct TrainingSet {
    pub schema: FeatureSchema,
    pub examples: Vec<LabeledExample>,
}

impl TrainingSet {
    pub fn len(&self) -> usize {
        self.examples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.examples.is_empty()
    }

    pub fn downsize_count(&self) -> usize {
        self.examples.iter().filter(|e| e.downsize).count()
    }
}

/// Build a labeled dataset from every instance with data in the lookback window.
///
/// The family vocabulary is discovered from the instances that have data.
/// Instances without samples are skipped.
pub async fn collect_training_set(
    source: &dyn MetricsSource,
    builder: &FeatureBuilder,
    rule: &LabelingRule,
    now: DateTime<Utc>,
) -> Result<TrainingSet> {
    let refs = source.list_instances(&InstanceFilter::default()).await?;

    let mut summaries = Vec::with_capacity(refs.len());
    for instance_ref in &refs {
        let summary = match source.get_instance(instance_ref).await {
            Ok(instance) => builder.summarize_instance(source, &instance, now).await,
            Err(e) => Err(e),
        };
        match summary {
            Ok(summary) => summaries.push((instance_ref.clone(), summary)),
            Err(e) if e.is_per_instance() => {
                debug!(instance_ref = %instance_ref, error = %e, "Skipping instance for training");
            }
            Err(e) => return Err(e),
        }
    }

    let schema = FeatureSchema::new(summaries.iter().map(|(_, s)| s.family.clone()));
    let examples = summaries
        .into_iter()
        .map(|(instance_ref, summary)| LabeledExample {
            features: builder.encode(&summary, &schema),
            downsize: rule.is_downsize(&summary),
            instance_ref,
            summary,
        })
        .collect::<Vec<_>>();

    info!(
        instances = refs.len(),
        examples = examples.len(),
        families = schema.family_vocabulary.len(),
        "Collected training set"
    );
    Ok(TrainingSet { schema, examples })
}

/// Stratified train/validation split.
///
/// Each class is shuffled with a seeded RNG and `fraction` of it (rounded)
/// is held out, always leaving at least one example of the class in training.
pub fn stratified_split(labels: &[bool], fraction: f64, seed: u64) -> (Vec<usize>, Vec<usize>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut train = Vec::new();
    let mut validation = Vec::new();

    for class in [false, true] {
        let mut idx: Vec<usize> = (0..labels.len()).filter(|&i| labels[i] == class).collect();
        if idx.is_empty() {
            continue;
        }
        idx.shuffle(&mut rng);
        let n_val = ((idx.len() as f64 * fraction).round() as usize).min(idx.len() - 1);
        validation.extend_from_slice(&idx[..n_val]);
        train.extend_from_slice(&idx[n_val..]);
    }

    train.sort_unstable();
    validation.sort_unstable();
    (train, validation)
}

/// Confusion matrix of `classifier` over the given rows
pub fn evaluate(
    classifier: &GradientBoostedClassifier,
    rows: &[&[f64]],
    labels: &[bool],
    threshold: f64,
) -> ConfusionMatrix {
    let mut cm = ConfusionMatrix::default();
    for (row, &label) in rows.iter().zip(labels) {
        cm.record(label, classifier.predict_proba(row) > threshold);
    }
    cm
}

/// Trains classifiers and commits them to the model store.
///
/// At most one run proceeds at a time per process (async mutex) and per
/// model directory (lock file).
pub struct ModelTrainer {
    store: ModelStore,
    config: TrainerConfig,
    guard: Mutex<()>,
    metrics: OptimizerMetrics,
    logger: StructuredLogger,
}

impl ModelTrainer {
    pub fn new(store: ModelStore, config: TrainerConfig) -> Self {
        Self {
            store,
            config,
            guard: Mutex::new(()),
            metrics: OptimizerMetrics::new(),
            logger: StructuredLogger::default(),
        }
    }

    pub fn config(&self) -> &TrainerConfig {
        &self.config
    }

    pub fn store(&self) -> &ModelStore {
        &self.store
    }

    /// Fit, evaluate and commit a new version.
    ///
    /// On any error nothing is committed and the previous latest version
    /// stays latest.
    pub async fn train(&self, set: TrainingSet) -> Result<ModelMetadata> {
        let result = self.run(set).await;
        match &result {
            Ok(meta) => {
                self.metrics.inc_training_runs();
                self.logger.log_training_completed(
                    meta.version,
                    meta.train_size,
                    meta.val_size,
                    meta.validation_accuracy,
                    meta.training_runtime_seconds,
                );
            }
            Err(e) => {
                self.metrics.inc_training_failures();
                self.logger.log_training_rejected(&e.to_string());
            }
        }
        result
    }

    async fn run(&self, set: TrainingSet) -> Result<ModelMetadata> {
        let _guard = self.guard.try_lock().map_err(|_| {
            OptimizerError::TrainingInProgress(self.store.dir().display().to_string())
        })?;

        if set.len() < self.config.min_examples {
            return Err(OptimizerError::InsufficientData(format!(
                "{} labeled examples, at least {} required",
                set.len(),
                self.config.min_examples
            )));
        }
        let positives = set.downsize_count();
        if positives == 0 || positives == set.len() {
            return Err(OptimizerError::InsufficientData(format!(
                "all {} examples share one label",
                set.len()
            )));
        }

        let _lock = self.store.lock()?;
        let started = Instant::now();

        let labels: Vec<bool> = set.examples.iter().map(|e| e.downsize).collect();
        let (train_idx, val_idx) =
            stratified_split(&labels, self.config.validation_fraction, self.config.seed);
        debug!(
            train = train_idx.len(),
            validation = val_idx.len(),
            downsize = positives,
            "Split training set"
        );

        let train_rows: Vec<Vec<f64>> = train_idx
            .iter()
            .map(|&i| set.examples[i].features.values.clone())
            .collect();
        let train_labels: Vec<bool> = train_idx.iter().map(|&i| labels[i]).collect();

        let params = self.config.boosting.clone();
        let (classifier, train_rows, train_labels) = tokio::task::spawn_blocking(move || {
            GradientBoostedClassifier::fit(&train_rows, &train_labels, &params)
                .map(|c| (c, train_rows, train_labels))
        })
        .await
        .map_err(|e| OptimizerError::Io(std::io::Error::other(e)))??;

        let threshold = self.config.decision_threshold;
        let train_refs: Vec<&[f64]> = train_rows.iter().map(Vec::as_slice).collect();
        let train_cm = evaluate(&classifier, &train_refs, &train_labels, threshold);

        let val_refs: Vec<&[f64]> = val_idx
            .iter()
            .map(|&i| set.examples[i].features.values.as_slice())
            .collect();
        let val_labels: Vec<bool> = val_idx.iter().map(|&i| labels[i]).collect();
        let val_cm = evaluate(&classifier, &val_refs, &val_labels, threshold);

        let mut metadata = ModelMetadata {
            version: self.store.next_version()?,
            trained_at: Utc::now(),
            feature_schema: set.schema.clone(),
            labeling_rule: self.config.labeling,
            boosting: self.config.boosting.clone(),
            train_accuracy: train_cm.accuracy(),
            validation_accuracy: val_cm.accuracy(),
            precision_downsize: val_cm.precision(),
            recall_downsize: val_cm.recall(),
            f1_downsize: val_cm.f1(),
            confusion_matrix: val_cm,
            training_runtime_seconds: started.elapsed().as_secs_f64(),
            train_size: train_idx.len(),
            val_size: val_idx.len(),
            artifact_checksum: String::new(),
        };

        let artifact = serde_json::to_vec(&classifier)?;
        self.store.commit(&artifact, &mut metadata)?;

        if let Err(e) = self.store.prune(self.config.versions_to_keep) {
            warn!(error = %e, "Failed to prune old model versions");
        }
        Ok(metadata)
    }
}
