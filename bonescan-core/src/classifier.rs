//! Fusion classifier loading and probability prediction.
//!
//! The trained ensemble ships as a JSON artifact. Historically the
//! classifier object was saved nested inside role-keyed containers
//! (`rf_classifier`, sometimes again under `model` or `classifier`), so
//! loading performs a bounded-depth unwrap with an enumerated failure
//! reason instead of open-ended introspection.

use std::path::Path;

use anyhow::{Context, Result};
use log::{debug, info};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

/// Container keys probed, in order, while unwrapping the artifact.
const ROLE_KEYS: [&str; 3] = ["rf_classifier", "model", "classifier"];
/// Maximum number of nested containers unwrapped before giving up.
const MAX_UNWRAP_DEPTH: usize = 3;

/// Why the classifier capability could not be resolved from the artifact.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("classifier artifact is not a JSON object")]
    NotAnObject,
    #[error(
        "no classifier found under role keys [\"rf_classifier\", \"model\", \"classifier\"]; \
         available keys: {available:?}"
    )]
    NoClassifierKey { available: Vec<String> },
    #[error("unsupported classifier kind '{0}'")]
    UnsupportedKind(String),
    #[error("classifier nested deeper than {limit} containers")]
    NestedTooDeep { limit: usize },
    #[error("malformed classifier payload: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("invalid forest: {0}")]
    InvalidForest(String),
}

/// Why a prediction request was rejected.
#[derive(Debug, Error)]
pub enum PredictError {
    #[error("combined feature vector has length {actual}, classifier expects {expected}")]
    FeatureDimensionMismatch { expected: usize, actual: usize },
}

/// One decision tree in sklearn-style parallel-array form.
///
/// A node `i` is a leaf when `left[i] < 0`; otherwise samples with
/// `features[feature[i]] <= threshold[i]` descend to `left[i]` and the
/// rest to `right[i]`. `value[i]` holds the training class counts.
#[derive(Debug, Clone, Deserialize)]
struct DecisionTree {
    feature: Vec<i64>,
    threshold: Vec<f32>,
    left: Vec<i64>,
    right: Vec<i64>,
    value: Vec<[f64; 2]>,
}

impl DecisionTree {
    fn validate(&self, index: usize, n_features: usize) -> Result<(), ResolveError> {
        let nodes = self.feature.len();
        let consistent = self.threshold.len() == nodes
            && self.left.len() == nodes
            && self.right.len() == nodes
            && self.value.len() == nodes;
        if !consistent {
            return Err(ResolveError::InvalidForest(format!(
                "tree {index} has inconsistent node array lengths"
            )));
        }
        if nodes == 0 {
            return Err(ResolveError::InvalidForest(format!("tree {index} is empty")));
        }
        for node in 0..nodes {
            if self.left[node] < 0 {
                let total: f64 = self.value[node].iter().sum();
                if !(total > 0.0 && total.is_finite()) {
                    return Err(ResolveError::InvalidForest(format!(
                        "tree {index} leaf {node} has no class counts"
                    )));
                }
                continue;
            }
            let feature = self.feature[node];
            if feature < 0 || feature as usize >= n_features {
                return Err(ResolveError::InvalidForest(format!(
                    "tree {index} node {node} splits on out-of-range feature {feature}"
                )));
            }
            // Children must come strictly after their parent (as in the
            // sklearn array form); this also rules out cycles, so every
            // traversal in `leaf_distribution` terminates.
            let (left, right) = (self.left[node], self.right[node]);
            let ordered = left > node as i64 && right > node as i64;
            if right < 0 || !ordered || left as usize >= nodes || right as usize >= nodes {
                return Err(ResolveError::InvalidForest(format!(
                    "tree {index} node {node} has invalid children ({left}, {right})"
                )));
            }
        }
        Ok(())
    }

    /// Walk the tree for one sample and return the leaf class distribution.
    fn leaf_distribution(&self, features: &[f32]) -> [f64; 2] {
        let mut node = 0usize;
        while self.left[node] >= 0 {
            let feature = self.feature[node] as usize;
            node = if features[feature] <= self.threshold[node] {
                self.left[node] as usize
            } else {
                self.right[node] as usize
            };
        }
        let counts = self.value[node];
        let total = counts[0] + counts[1];
        [counts[0] / total, counts[1] / total]
    }
}

#[derive(Debug, Clone, Deserialize)]
struct RandomForest {
    n_features: usize,
    trees: Vec<DecisionTree>,
}

impl RandomForest {
    fn validate(&self) -> Result<(), ResolveError> {
        if self.n_features == 0 {
            return Err(ResolveError::InvalidForest(
                "n_features must be positive".to_string(),
            ));
        }
        if self.trees.is_empty() {
            return Err(ResolveError::InvalidForest(
                "forest contains no trees".to_string(),
            ));
        }
        for (index, tree) in self.trees.iter().enumerate() {
            tree.validate(index, self.n_features)?;
        }
        Ok(())
    }
}

/// The fusion classifier: a validated random forest with a
/// probability-prediction capability over combined region embeddings.
#[derive(Debug, Clone)]
pub struct FusionClassifier {
    forest: RandomForest,
}

impl FusionClassifier {
    /// Load the classifier artifact from a JSON file.
    ///
    /// The artifact may be the classifier object itself or that object
    /// wrapped in up to three role-keyed containers. Any resolution or
    /// validation failure is fatal to startup.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read classifier artifact {}", path.display()))?;
        let value: Value = serde_json::from_str(&contents)
            .with_context(|| format!("classifier artifact {} is not JSON", path.display()))?;
        let classifier = Self::from_artifact(value)
            .with_context(|| format!("failed to resolve classifier from {}", path.display()))?;
        info!(
            "fusion classifier loaded: {} trees over {} features",
            classifier.forest.trees.len(),
            classifier.forest.n_features
        );
        Ok(classifier)
    }

    /// Resolve and validate the classifier from a parsed artifact value.
    pub fn from_artifact(value: Value) -> Result<Self, ResolveError> {
        let mut current = value;
        for depth in 0..=MAX_UNWRAP_DEPTH {
            let object = match current.as_object() {
                Some(object) => object,
                None => return Err(ResolveError::NotAnObject),
            };

            if object.contains_key("kind") {
                return Self::deserialize_payload(current);
            }

            if depth == MAX_UNWRAP_DEPTH {
                break;
            }
            match ROLE_KEYS.iter().find(|key| object.contains_key(**key)) {
                Some(key) => {
                    debug!("unwrapping classifier container key '{key}' at depth {depth}");
                    current = current
                        .as_object_mut()
                        .and_then(|map| map.remove(*key))
                        .unwrap_or(Value::Null);
                }
                None => {
                    let available = object.keys().cloned().collect();
                    return Err(ResolveError::NoClassifierKey { available });
                }
            }
        }
        Err(ResolveError::NestedTooDeep {
            limit: MAX_UNWRAP_DEPTH,
        })
    }

    fn deserialize_payload(value: Value) -> Result<Self, ResolveError> {
        let kind = value
            .get("kind")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        if kind != "random_forest" {
            return Err(ResolveError::UnsupportedKind(kind));
        }
        let forest: RandomForest = serde_json::from_value(value)?;
        forest.validate()?;
        Ok(Self { forest })
    }

    /// Number of features the forest was trained on.
    pub fn n_features(&self) -> usize {
        self.forest.n_features
    }

    /// Predict `[probability_negative, probability_positive]` for one sample.
    ///
    /// The feature length must match `n_features` exactly; a mismatch is a
    /// surfaced error, never silently truncated or padded.
    pub fn predict_proba(&self, features: &[f32]) -> Result<[f64; 2], PredictError> {
        if features.len() != self.forest.n_features {
            return Err(PredictError::FeatureDimensionMismatch {
                expected: self.forest.n_features,
                actual: features.len(),
            });
        }
        let mut sums = [0.0f64; 2];
        for tree in &self.forest.trees {
            let leaf = tree.leaf_distribution(features);
            sums[0] += leaf[0];
            sums[1] += leaf[1];
        }
        let count = self.forest.trees.len() as f64;
        Ok([sums[0] / count, sums[1] / count])
    }
}
