//! Error taxonomy for the recommendation pipeline

use thiserror::Error;

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, OptimizerError>;

/// Errors surfaced by the pipeline components
#[derive(Error, Debug)]
pub enum OptimizerError {
    /// Too few metric rows for a feature vector, or too few labeled examples
    /// for a training run. Excludes the affected instance or run.
    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    /// Inference vector does not match the persisted feature schema
    #[error("Feature schema mismatch: model expects {expected:?}, got {found:?}")]
    SchemaMismatch {
        expected: Vec<String>,
        found: Vec<String>,
    },

    /// No model artifact has ever been committed
    #[error("No trained model found in {0}")]
    ModelNotFound(String),

    /// Text generation is not configured or not reachable
    #[error("Explanation generation unavailable: {0}")]
    Unavailable(String),

    /// Text generation failed for any other reason; retryable
    #[error("Explanation generation failed: {0}")]
    Generation(String),

    /// Another training run holds the training lock
    #[error("Training already in progress (lock held at {0})")]
    TrainingInProgress(String),

    /// Instance is unknown to the metrics source
    #[error("Instance not found: {0}")]
    InstanceNotFound(String),

    /// Metrics source failure
    #[error("Metrics store error: {0}")]
    Store(String),

    /// Persisted artifact is unreadable, corrupt, or inconsistent with its metadata
    #[error("Model artifact error: {0}")]
    Artifact(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl OptimizerError {
    /// Whether this error only excludes one instance from a bulk request
    pub fn is_per_instance(&self) -> bool {
        matches!(
            self,
            OptimizerError::InsufficientData(_)
                | OptimizerError::InstanceNotFound(_)
                | OptimizerError::Store(_)
        )
    }
}
