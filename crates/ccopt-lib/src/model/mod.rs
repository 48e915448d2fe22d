//! Downsize classifier: training, versioned persistence and loading

mod classifier;
mod loader;
mod metadata;
mod store;
mod trainer;

pub use classifier::{BoostingParams, GradientBoostedClassifier, RegressionTree, TreeNode};
pub use loader::{CurrentModel, LoadedModel, ModelLoader};
pub use metadata::{ConfusionMatrix, ModelMetadata};
pub use store::{compute_checksum, ModelStore, TrainingLock};
pub(crate) use store::write_atomic;
pub use trainer::{
    collect_training_set, evaluate, stratified_split, LabeledExample, LabelingRule, ModelTrainer,
    TrainerConfig, TrainingSet, DEFAULT_SPLIT_SEED, MIN_TRAINING_EXAMPLES,
};
