//! Serialized model artifact.
//!
//! The artifact is a JSON document carrying the ordered feature names the
//! model was trained on and the regressor parameters:
//!
//! ```json
//! {
//!   "feature_names": ["danceability", "energy", "genre_clean_pop"],
//!   "regressor": { "type": "linear", "intercept": 12.0, "coefficients": [30.0, 8.5, 6.0] }
//! }
//! ```
//!
//! Tree ensembles use `"type": "tree_ensemble"` with a `base_score` and a list
//! of trees, each a flat node list where node 0 is the root.

use super::regressor::{LinearRegressor, Regressor, TreeEnsembleRegressor, TreeNode};
use super::scorer::PopularityScorer;
use crate::features::{FeatureSchema, SchemaError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Failed to read model artifact {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse model artifact: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid feature names: {0}")]
    Schema(#[from] SchemaError),

    #[error("Linear model has {found} coefficients but {expected} features")]
    CoefficientCount { expected: usize, found: usize },

    #[error("Tree ensemble has no trees")]
    NoTrees,

    #[error("Invalid tree {tree}: {reason}")]
    InvalidTree { tree: usize, reason: String },

    #[error("Non-finite model parameter: {0}")]
    NonFinite(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelArtifact {
    /// Free-form description, e.g. the training run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub feature_names: Vec<String>,
    pub regressor: RegressorSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RegressorSpec {
    Linear {
        intercept: f64,
        coefficients: Vec<f64>,
    },
    TreeEnsemble {
        #[serde(default)]
        base_score: f64,
        trees: Vec<TreeSpec>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeSpec {
    pub nodes: Vec<TreeNodeSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TreeNodeSpec {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
        #[serde(default = "default_missing_left")]
        missing_left: bool,
    },
    Leaf {
        leaf: f64,
    },
}

fn default_missing_left() -> bool {
    true
}

impl ModelArtifact {
    pub fn load(path: &Path) -> Result<Self, ModelError> {
        let content = std::fs::read_to_string(path).map_err(|source| ModelError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&content)
    }

    pub fn from_json_str(content: &str) -> Result<Self, ModelError> {
        Ok(serde_json::from_str(content)?)
    }

    /// Validates the artifact and builds the scorer around it.
    pub fn into_scorer(self) -> Result<PopularityScorer, ModelError> {
        let schema = Arc::new(FeatureSchema::new(self.feature_names)?);
        let regressor: Box<dyn Regressor> = match self.regressor {
            RegressorSpec::Linear {
                intercept,
                coefficients,
            } => Box::new(build_linear(&schema, intercept, coefficients)?),
            RegressorSpec::TreeEnsemble { base_score, trees } => {
                Box::new(build_tree_ensemble(&schema, base_score, trees)?)
            }
        };

        info!(
            name = self.name.as_deref().unwrap_or("unnamed"),
            kind = regressor.kind(),
            features = schema.len(),
            genres = schema.known_genres().len(),
            "Loaded popularity model"
        );

        Ok(PopularityScorer::new(schema, regressor))
    }
}

fn build_linear(
    schema: &FeatureSchema,
    intercept: f64,
    coefficients: Vec<f64>,
) -> Result<LinearRegressor, ModelError> {
    if coefficients.len() != schema.len() {
        return Err(ModelError::CoefficientCount {
            expected: schema.len(),
            found: coefficients.len(),
        });
    }
    if !intercept.is_finite() {
        return Err(ModelError::NonFinite("intercept".to_string()));
    }
    if let Some(i) = coefficients.iter().position(|c| !c.is_finite()) {
        return Err(ModelError::NonFinite(format!(
            "coefficient for {}",
            schema.names()[i]
        )));
    }
    Ok(LinearRegressor {
        intercept,
        coefficients,
    })
}

fn build_tree_ensemble(
    schema: &FeatureSchema,
    base_score: f64,
    trees: Vec<TreeSpec>,
) -> Result<TreeEnsembleRegressor, ModelError> {
    if trees.is_empty() {
        return Err(ModelError::NoTrees);
    }
    if !base_score.is_finite() {
        return Err(ModelError::NonFinite("base_score".to_string()));
    }

    let mut built = Vec::with_capacity(trees.len());
    for (tree_index, tree) in trees.into_iter().enumerate() {
        let invalid = |reason: String| ModelError::InvalidTree {
            tree: tree_index,
            reason,
        };
        if tree.nodes.is_empty() {
            return Err(invalid("no nodes".to_string()));
        }

        let node_count = tree.nodes.len();
        let mut nodes = Vec::with_capacity(node_count);
        for (node_index, node) in tree.nodes.into_iter().enumerate() {
            let node = match node {
                TreeNodeSpec::Leaf { leaf } => {
                    if !leaf.is_finite() {
                        return Err(invalid(format!("node {node_index} has a non-finite leaf")));
                    }
                    TreeNode::Leaf(leaf)
                }
                TreeNodeSpec::Split {
                    feature,
                    threshold,
                    left,
                    right,
                    missing_left,
                } => {
                    if feature >= schema.len() {
                        return Err(invalid(format!(
                            "node {node_index} splits on feature {feature}, schema has {}",
                            schema.len()
                        )));
                    }
                    for child in [left, right] {
                        if child <= node_index || child >= node_count {
                            return Err(invalid(format!(
                                "node {node_index} has invalid child {child}"
                            )));
                        }
                    }
                    if threshold.is_nan() {
                        return Err(invalid(format!("node {node_index} has a NaN threshold")));
                    }
                    TreeNode::Split {
                        feature,
                        threshold,
                        left,
                        right,
                        missing_left,
                    }
                }
            };
            nodes.push(node);
        }
        built.push(nodes);
    }

    Ok(TreeEnsembleRegressor {
        base_score,
        trees: built,
    })
}
