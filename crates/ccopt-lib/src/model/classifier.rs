//! Gradient-boosted regression trees for binary classification
//!
//! Logistic loss with second-order (gradient and hessian) split gain,
//! L2-regularised leaf weights and learning-rate shrinkage. The fitted model
//! is a plain serde structure persisted as an opaque JSON artifact.

use crate::error::{OptimizerError, Result};
use serde::{Deserialize, Serialize};

/// Hyperparameters for boosting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoostingParams {
    /// Number of boosting rounds
    pub n_estimators: usize,
    /// Shrinkage applied to every tree's output
    pub learning_rate: f64,
    /// Maximum tree depth (root has depth 0)
    pub max_depth: usize,
    /// L2 regularisation on leaf weights
    pub lambda: f64,
    /// Minimum hessian sum required in each child of a split
    pub min_child_weight: f64,
}

impl Default for BoostingParams {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            learning_rate: 0.3,
            max_depth: 4,
            lambda: 1.0,
            min_child_weight: 1.0,
        }
    }
}

/// A node in a regression tree; children are indices into the node list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TreeNode {
    /// Rows with `x[feature] < threshold` go left
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        value: f64,
    },
}

/// Single regression tree; node 0 is the root
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionTree {
    pub nodes: Vec<TreeNode>,
}

impl RegressionTree {
    pub fn predict(&self, row: &[f64]) -> f64 {
        let mut idx = 0;
        loop {
            match self.nodes.get(idx) {
                Some(TreeNode::Leaf { value }) => return *value,
                Some(TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                }) => {
                    let x = row.get(*feature).copied().unwrap_or(0.0);
                    idx = if x < *threshold { *left } else { *right };
                }
                None => return 0.0,
            }
        }
    }

    pub fn depth(&self) -> usize {
        fn walk(nodes: &[TreeNode], idx: usize) -> usize {
            match nodes.get(idx) {
                Some(TreeNode::Split { left, right, .. }) => {
                    1 + walk(nodes, *left).max(walk(nodes, *right))
                }
                _ => 0,
            }
        }
        walk(&self.nodes, 0)
    }
}

/// Fitted boosted-tree binary classifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradientBoostedClassifier {
    pub n_features: usize,
    /// Prior log-odds of the positive class
    pub base_score: f64,
    pub learning_rate: f64,
    pub trees: Vec<RegressionTree>,
}

impl GradientBoostedClassifier {
    /// Fit on a dense row-major matrix with boolean labels (true = positive)
    pub fn fit(rows: &[Vec<f64>], labels: &[bool], params: &BoostingParams) -> Result<Self> {
        if rows.is_empty() || rows.len() != labels.len() {
            return Err(OptimizerError::InsufficientData(format!(
                "cannot fit classifier on {} rows with {} labels",
                rows.len(),
                labels.len()
            )));
        }
        let n_features = rows[0].len();
        if rows.iter().any(|r| r.len() != n_features) {
            return Err(OptimizerError::Artifact(
                "training rows have inconsistent width".to_string(),
            ));
        }

        let targets: Vec<f64> = labels.iter().map(|&l| if l { 1.0 } else { 0.0 }).collect();
        let positive_rate =
            (targets.iter().sum::<f64>() / targets.len() as f64).clamp(1e-6, 1.0 - 1e-6);
        let base_score = (positive_rate / (1.0 - positive_rate)).ln();

        let mut margins = vec![base_score; rows.len()];
        let mut trees = Vec::with_capacity(params.n_estimators);
        let all: Vec<usize> = (0..rows.len()).collect();

        for _ in 0..params.n_estimators {
            let mut grad = Vec::with_capacity(rows.len());
            let mut hess = Vec::with_capacity(rows.len());
            for (m, y) in margins.iter().zip(&targets) {
                let p = sigmoid(*m);
                grad.push(p - y);
                hess.push((p * (1.0 - p)).max(1e-16));
            }

            let mut nodes = Vec::new();
            let ctx = GrowContext {
                rows,
                grad: &grad,
                hess: &hess,
                params,
            };
            ctx.grow(&mut nodes, &all, 0);
            let tree = RegressionTree { nodes };

            for (m, row) in margins.iter_mut().zip(rows) {
                *m += params.learning_rate * tree.predict(row);
            }
            trees.push(tree);
        }

        Ok(Self {
            n_features,
            base_score,
            learning_rate: params.learning_rate,
            trees,
        })
    }

    /// Probability of the positive class
    pub fn predict_proba(&self, row: &[f64]) -> f64 {
        let margin = self.base_score
            + self.learning_rate * self.trees.iter().map(|t| t.predict(row)).sum::<f64>();
        sigmoid(margin)
    }

    /// Structural checks applied when loading a persisted artifact
    pub fn validate(&self) -> Result<()> {
        if !self.base_score.is_finite() || !self.learning_rate.is_finite() {
            return Err(OptimizerError::Artifact(
                "non-finite base score or learning rate".to_string(),
            ));
        }
        for (t, tree) in self.trees.iter().enumerate() {
            if tree.nodes.is_empty() {
                return Err(OptimizerError::Artifact(format!("tree {} has no nodes", t)));
            }
            for node in &tree.nodes {
                if let TreeNode::Split {
                    feature,
                    left,
                    right,
                    ..
                } = node
                {
                    if *feature >= self.n_features
                        || *left >= tree.nodes.len()
                        || *right >= tree.nodes.len()
                    {
                        return Err(OptimizerError::Artifact(format!(
                            "tree {} references feature {} or child outside bounds",
                            t, feature
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

struct GrowContext<'a> {
    rows: &'a [Vec<f64>],
    grad: &'a [f64],
    hess: &'a [f64],
    params: &'a BoostingParams,
}

struct SplitCandidate {
    gain: f64,
    feature: usize,
    threshold: f64,
}

impl GrowContext<'_> {
    /// Grow a subtree over `indices`, returning the index of its root node
    fn grow(&self, nodes: &mut Vec<TreeNode>, indices: &[usize], depth: usize) -> usize {
        let g: f64 = indices.iter().map(|&i| self.grad[i]).sum();
        let h: f64 = indices.iter().map(|&i| self.hess[i]).sum();
        let id = nodes.len();
        nodes.push(TreeNode::Leaf {
            value: -g / (h + self.params.lambda),
        });

        if depth >= self.params.max_depth || indices.len() < 2 {
            return id;
        }
        let Some(split) = self.best_split(indices, g, h) else {
            return id;
        };

        let (left_idx, right_idx): (Vec<usize>, Vec<usize>) = indices
            .iter()
            .partition(|&&i| self.rows[i][split.feature] < split.threshold);
        let left = self.grow(nodes, &left_idx, depth + 1);
        let right = self.grow(nodes, &right_idx, depth + 1);
        nodes[id] = TreeNode::Split {
            feature: split.feature,
            threshold: split.threshold,
            left,
            right,
        };
        id
    }

    fn best_split(&self, indices: &[usize], g: f64, h: f64) -> Option<SplitCandidate> {
        let lambda = self.params.lambda;
        let parent_score = g * g / (h + lambda);
        let mut best: Option<SplitCandidate> = None;
        let n_features = self.rows[indices[0]].len();

        let mut sorted = indices.to_vec();
        for feature in 0..n_features {
            sorted.sort_by(|&a, &b| self.rows[a][feature].total_cmp(&self.rows[b][feature]));

            let (mut gl, mut hl) = (0.0, 0.0);
            for k in 0..sorted.len() - 1 {
                let i = sorted[k];
                gl += self.grad[i];
                hl += self.hess[i];

                let here = self.rows[i][feature];
                let next = self.rows[sorted[k + 1]][feature];
                if here == next {
                    continue;
                }
                let (gr, hr) = (g - gl, h - hl);
                if hl < self.params.min_child_weight || hr < self.params.min_child_weight {
                    continue;
                }

                let gain = gl * gl / (hl + lambda) + gr * gr / (hr + lambda) - parent_score;
                if gain > 1e-12 && best.as_ref().map_or(true, |b| gain > b.gain) {
                    best = Some(SplitCandidate {
                        gain,
                        feature,
                        threshold: here + (next - here) / 2.0,
                    });
                }
            }
        }
        best
    }
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}
