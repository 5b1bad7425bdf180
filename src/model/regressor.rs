/// Opaque trained regression function.
///
/// `values` are in the order of the schema the regressor was trained on.
pub trait Regressor: Send + Sync {
    fn predict(&self, values: &[f64]) -> f64;

    /// Short name for logs and stats.
    fn kind(&self) -> &'static str;
}

#[derive(Debug, Clone, PartialEq)]
pub struct LinearRegressor {
    pub intercept: f64,
    pub coefficients: Vec<f64>,
}

impl Regressor for LinearRegressor {
    fn predict(&self, values: &[f64]) -> f64 {
        self.intercept
            + self
                .coefficients
                .iter()
                .zip(values)
                .map(|(c, v)| c * v)
                .sum::<f64>()
    }

    fn kind(&self) -> &'static str {
        "linear"
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum TreeNode {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
        missing_left: bool,
    },
    Leaf(f64),
}

/// Additive ensemble of binary regression trees (gradient boosting output).
///
/// Node indices are validated at load time: every child index is greater
/// than its parent's, so evaluation always terminates.
#[derive(Debug, Clone, PartialEq)]
pub struct TreeEnsembleRegressor {
    pub(crate) base_score: f64,
    pub(crate) trees: Vec<Vec<TreeNode>>,
}

impl TreeEnsembleRegressor {
    fn eval_tree(nodes: &[TreeNode], values: &[f64]) -> f64 {
        let mut index = 0;
        loop {
            match &nodes[index] {
                TreeNode::Leaf(value) => return *value,
                TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                    missing_left,
                } => {
                    let value = values[*feature];
                    let go_left = if value.is_nan() {
                        *missing_left
                    } else {
                        value < *threshold
                    };
                    index = if go_left { *left } else { *right };
                }
            }
        }
    }

    pub fn tree_count(&self) -> usize {
        self.trees.len()
    }
}

impl Regressor for TreeEnsembleRegressor {
    fn predict(&self, values: &[f64]) -> f64 {
        self.base_score
            + self
                .trees
                .iter()
                .map(|nodes| Self::eval_tree(nodes, values))
                .sum::<f64>()
    }

    fn kind(&self) -> &'static str {
        "tree_ensemble"
    }
}
