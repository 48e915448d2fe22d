//! Metadata persisted alongside every committed model artifact

use super::classifier::BoostingParams;
use super::trainer::LabelingRule;
use crate::features::FeatureSchema;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 2x2 confusion matrix for the downsize class on the validation split
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    pub true_keep: usize,
    pub false_downsize: usize,
    pub false_keep: usize,
    pub true_downsize: usize,
}

impl ConfusionMatrix {
    pub fn record(&mut self, actual_downsize: bool, predicted_downsize: bool) {
        match (actual_downsize, predicted_downsize) {
            (false, false) => self.true_keep += 1,
            (false, true) => self.false_downsize += 1,
            (true, false) => self.false_keep += 1,
            (true, true) => self.true_downsize += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.true_keep + self.false_downsize + self.false_keep + self.true_downsize
    }

    pub fn accuracy(&self) -> f64 {
        ratio(self.true_keep + self.true_downsize, self.total())
    }

    pub fn precision(&self) -> f64 {
        ratio(self.true_downsize, self.true_downsize + self.false_downsize)
    }

    pub fn recall(&self) -> f64 {
        ratio(self.true_downsize, self.true_downsize + self.false_keep)
    }

    pub fn f1(&self) -> f64 {
        let (p, r) = (self.precision(), self.recall());
        if p + r == 0.0 {
            0.0
        } else {
            2.0 * p * r / (p + r)
        }
    }
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

/// Everything known about a committed model version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetadata {
    /// Monotonically increasing version, starting at 1
    pub version: u64,
    pub trained_at: DateTime<Utc>,
    pub feature_schema: FeatureSchema,
    pub labeling_rule: LabelingRule,
    pub boosting: BoostingParams,
    pub train_accuracy: f64,
    pub validation_accuracy: f64,
    pub precision_downsize: f64,
    pub recall_downsize: f64,
    pub f1_downsize: f64,
    pub confusion_matrix: ConfusionMatrix,
    pub training_runtime_seconds: f64,
    pub train_size: usize,
    pub val_size: usize,
    /// Hex SHA-256 of the artifact bytes
    pub artifact_checksum: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confusion_metrics() {
        let mut cm = ConfusionMatrix::default();
        for _ in 0..3 {
            cm.record(true, true);
        }
        cm.record(true, false);
        cm.record(false, true);
        for _ in 0..5 {
            cm.record(false, false);
        }

        assert_eq!(cm.total(), 10);
        assert!((cm.accuracy() - 0.8).abs() < 1e-12);
        assert!((cm.precision() - 0.75).abs() < 1e-12);
        assert!((cm.recall() - 0.75).abs() < 1e-12);
        assert!((cm.f1() - 0.75).abs() < 1e-12);
    }

    #[test]
    fn test_undefined_metrics_are_zero() {
        let mut cm = ConfusionMatrix::default();
        cm.record(false, false);
        assert_eq!(cm.precision(), 0.0);
        assert_eq!(cm.recall(), 0.0);
        assert_eq!(cm.f1(), 0.0);
        assert_eq!(ConfusionMatrix::default().accuracy(), 0.0);
    }
}
