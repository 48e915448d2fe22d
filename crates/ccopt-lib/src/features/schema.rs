//! Feature schema and feature vectors
//!
//! The schema is the single source of truth for field names, their order,
//! and the instance-family vocabulary used for one-hot encoding. It is
//! persisted with every trained model and checked before inference.

use crate::error::{OptimizerError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Numeric fields that precede the one-hot family block, in order
pub const BASE_FIELDS: &[&str] = &[
    "avg_cpu",
    "p95_cpu",
    "avg_mem",
    "p95_mem",
    "avg_net_in_mb",
    "avg_net_out_mb",
    "is_prod",
];

/// Prefix of one-hot instance-family fields
pub const FAMILY_PREFIX: &str = "family_";

/// Ordered field list plus the family vocabulary it was built from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSchema {
    pub fields: Vec<String>,
    pub family_vocabulary: Vec<String>,
}

impl FeatureSchema {
    /// Build a schema from a family vocabulary (deduplicated and sorted)
    pub fn new<I, S>(families: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let family_vocabulary: Vec<String> = families
            .into_iter()
            .map(Into::into)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let fields = BASE_FIELDS
            .iter()
            .map(|f| f.to_string())
            .chain(
                family_vocabulary
                    .iter()
                    .map(|fam| format!("{}{}", FAMILY_PREFIX, fam)),
            )
            .collect();

        Self {
            fields,
            family_vocabulary,
        }
    }

    pub fn width(&self) -> usize {
        self.fields.len()
    }

    /// Position of a family within the one-hot block, if known
    pub fn family_index(&self, family: &str) -> Option<usize> {
        self.family_vocabulary
            .binary_search_by(|f| f.as_str().cmp(family))
            .ok()
    }

    /// Reject a vector whose field list differs in name or order
    pub fn validate(&self, vector: &FeatureVector) -> Result<()> {
        if vector.fields != self.fields || vector.values.len() != self.fields.len() {
            return Err(OptimizerError::SchemaMismatch {
                expected: self.fields.clone(),
                found: vector.fields.clone(),
            });
        }
        Ok(())
    }
}

/// Named, ordered numeric input for the classifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub fields: Vec<String>,
    pub values: Vec<f64>,
}

impl FeatureVector {
    pub fn get(&self, field: &str) -> Option<f64> {
        self.fields
            .iter()
            .position(|f| f == field)
            .and_then(|i| self.values.get(i).copied())
    }
}
