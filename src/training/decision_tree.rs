//! Regression tree
//!
//! CART-style variance-reduction tree. Leaves are numbered during fitting so
//! that [`DecisionTree::apply`] can report which leaf a sample lands in; the
//! MAPLE explainer uses those ids to find training points that share a leaf
//! with the query.

use crate::error::{FidelityError, Result};
use ndarray::{Array1, Array2, ArrayView1};
use rand::seq::index::sample;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Decision tree node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TreeNode {
    /// Leaf node with prediction value
    Leaf {
        value: f64,
        n_samples: usize,
        leaf_id: usize,
    },
    /// Internal node with split
    Split {
        feature_idx: usize,
        threshold: f64,
        left: Box<TreeNode>,
        right: Box<TreeNode>,
        n_samples: usize,
        /// Variance of the targets reaching this node
        impurity: f64,
    },
}

/// Regression tree model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionTree {
    /// Tree root
    root: Option<TreeNode>,
    /// Maximum depth
    pub max_depth: Option<usize>,
    /// Minimum samples to split
    pub min_samples_split: usize,
    /// Minimum samples in leaf
    pub min_samples_leaf: usize,
    /// Number of features drawn (without replacement) at each split
    pub max_features: Option<usize>,
    /// Seed for the per-split feature draw
    pub random_state: Option<u64>,
    /// Number of features
    n_features: usize,
    /// Number of leaves
    n_leaves: usize,
}

/// Mutable state threaded through the recursive build
struct BuildContext<'a> {
    x: &'a Array2<f64>,
    y: &'a Array1<f64>,
    rng: ChaCha8Rng,
    next_leaf: usize,
}

impl Default for DecisionTree {
    fn default() -> Self {
        Self::new()
    }
}

impl DecisionTree {
    /// Create a new regressor tree
    pub fn new() -> Self {
        Self {
            root: None,
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: None,
            random_state: None,
            n_features: 0,
            n_leaves: 0,
        }
    }

    /// Set maximum depth
    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = Some(depth);
        self
    }

    /// Set minimum samples to split
    pub fn with_min_samples_split(mut self, min_samples: usize) -> Self {
        self.min_samples_split = min_samples;
        self
    }

    /// Set minimum samples in leaf
    pub fn with_min_samples_leaf(mut self, min_samples: usize) -> Self {
        self.min_samples_leaf = min_samples.max(1);
        self
    }

    /// Set number of features considered per split
    pub fn with_max_features(mut self, max_features: usize) -> Self {
        self.max_features = Some(max_features.max(1));
        self
    }

    /// Set random state
    pub fn with_random_state(mut self, seed: u64) -> Self {
        self.random_state = Some(seed);
        self
    }

    /// Fit the tree to training data
    pub fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<&mut Self> {
        let n_samples = x.nrows();
        let n_features = x.ncols();

        if n_samples != y.len() {
            return Err(FidelityError::ShapeError {
                expected: format!("y length = {}", n_samples),
                actual: format!("y length = {}", y.len()),
            });
        }

        if n_samples == 0 || n_features == 0 {
            return Err(FidelityError::TrainingError(format!(
                "Cannot fit a tree on a {}x{} matrix",
                n_samples, n_features
            )));
        }

        self.n_features = n_features;

        let rng = match self.random_state {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };
        let mut ctx = BuildContext {
            x,
            y,
            rng,
            next_leaf: 0,
        };

        let indices: Vec<usize> = (0..n_samples).collect();
        let root = self.build_tree(&mut ctx, indices, 0);

        self.n_leaves = ctx.next_leaf;
        self.root = Some(root);

        Ok(self)
    }

    fn build_tree(&self, ctx: &mut BuildContext<'_>, indices: Vec<usize>, depth: usize) -> TreeNode {
        let n_samples = indices.len();
        let (sum, sq_sum) = indices.iter().fold((0.0, 0.0), |(s, sq), &i| {
            let v = ctx.y[i];
            (s + v, sq + v * v)
        });
        let mean = sum / n_samples as f64;
        let impurity = (sq_sum / n_samples as f64 - mean * mean).max(0.0);

        let should_stop = n_samples < self.min_samples_split
            || n_samples < 2 * self.min_samples_leaf
            || self.max_depth.map_or(false, |d| depth >= d)
            || impurity < 1e-14;

        if should_stop {
            return Self::make_leaf(ctx, mean, n_samples);
        }

        let candidates = self.draw_features(ctx);
        let best = self.find_best_split(ctx.x, ctx.y, &indices, &candidates, impurity);

        let Some((feature_idx, threshold)) = best else {
            return Self::make_leaf(ctx, mean, n_samples);
        };

        let (left_indices, right_indices): (Vec<usize>, Vec<usize>) = indices
            .into_iter()
            .partition(|&i| ctx.x[[i, feature_idx]] <= threshold);

        if left_indices.len() < self.min_samples_leaf || right_indices.len() < self.min_samples_leaf {
            return Self::make_leaf(ctx, mean, n_samples);
        }

        let left = Box::new(self.build_tree(ctx, left_indices, depth + 1));
        let right = Box::new(self.build_tree(ctx, right_indices, depth + 1));

        TreeNode::Split {
            feature_idx,
            threshold,
            left,
            right,
            n_samples,
            impurity,
        }
    }

    fn make_leaf(ctx: &mut BuildContext<'_>, value: f64, n_samples: usize) -> TreeNode {
        let leaf_id = ctx.next_leaf;
        ctx.next_leaf += 1;
        TreeNode::Leaf {
            value,
            n_samples,
            leaf_id,
        }
    }

    fn draw_features(&self, ctx: &mut BuildContext<'_>) -> Vec<usize> {
        let n_features = self.n_features;
        match self.max_features {
            Some(k) if k < n_features => sample(&mut ctx.rng, n_features, k).into_vec(),
            _ => (0..n_features).collect(),
        }
    }

    /// Best (feature, threshold) over the candidate features.
    ///
    /// Each feature is scanned once in sorted order with running sums, so the
    /// cost per node is O(n log n) per candidate.
    fn find_best_split(
        &self,
        x: &Array2<f64>,
        y: &Array1<f64>,
        indices: &[usize],
        candidates: &[usize],
        parent_impurity: f64,
    ) -> Option<(usize, f64)> {
        let n = indices.len();
        let min_leaf = self.min_samples_leaf;

        candidates
            .par_iter()
            .filter_map(|&feature_idx| {
                let mut order: Vec<(f64, f64)> = indices
                    .iter()
                    .map(|&i| (x[[i, feature_idx]], y[i]))
                    .collect();
                order.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

                let total_sum: f64 = order.iter().map(|p| p.1).sum();
                let total_sq: f64 = order.iter().map(|p| p.1 * p.1).sum();

                let mut left_sum = 0.0;
                let mut left_sq = 0.0;
                let mut best: Option<(f64, f64)> = None;

                for pos in 1..n {
                    let yi = order[pos - 1].1;
                    left_sum += yi;
                    left_sq += yi * yi;

                    if pos < min_leaf || n - pos < min_leaf {
                        continue;
                    }
                    if order[pos - 1].0 >= order[pos].0 {
                        continue;
                    }

                    let left_n = pos as f64;
                    let right_n = (n - pos) as f64;
                    let right_sum = total_sum - left_sum;
                    let right_sq = total_sq - left_sq;

                    let left_sse = left_sq - left_sum * left_sum / left_n;
                    let right_sse = right_sq - right_sum * right_sum / right_n;
                    let weighted = (left_sse + right_sse) / n as f64;
                    let gain = parent_impurity - weighted;

                    if gain > 1e-14 && best.map_or(true, |(g, _)| gain > g) {
                        let threshold = (order[pos - 1].0 + order[pos].0) / 2.0;
                        best = Some((gain, threshold));
                    }
                }

                best.map(|(gain, threshold)| (feature_idx, threshold, gain))
            })
            .collect::<Vec<_>>()
            .into_iter()
            // Ties resolve to the lowest feature index so results do not depend on scheduling
            .max_by(|a, b| {
                a.2.partial_cmp(&b.2)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(b.0.cmp(&a.0))
            })
            .map(|(feature_idx, threshold, _)| (feature_idx, threshold))
    }

    fn root(&self) -> Result<&TreeNode> {
        self.root.as_ref().ok_or(FidelityError::ModelNotFitted)
    }

    fn check_width(&self, x: &Array2<f64>) -> Result<()> {
        if x.ncols() != self.n_features {
            return Err(FidelityError::ShapeError {
                expected: format!("{} features", self.n_features),
                actual: format!("{} features", x.ncols()),
            });
        }
        Ok(())
    }

    /// Make predictions
    pub fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let root = self.root()?;
        self.check_width(x)?;
        Ok(x.rows().into_iter().map(|row| Self::descend(root, row).0).collect())
    }

    /// Leaf id reached by each row of `x`
    pub fn apply(&self, x: &Array2<f64>) -> Result<Vec<usize>> {
        let root = self.root()?;
        self.check_width(x)?;
        Ok(x.rows().into_iter().map(|row| Self::descend(root, row).1).collect())
    }

    /// Leaf id reached by a single sample
    pub fn apply_one(&self, sample: ArrayView1<f64>) -> Result<usize> {
        let root = self.root()?;
        if sample.len() != self.n_features {
            return Err(FidelityError::ShapeError {
                expected: format!("{} features", self.n_features),
                actual: format!("{} features", sample.len()),
            });
        }
        Ok(Self::descend(root, sample).1)
    }

    fn descend(mut node: &TreeNode, sample: ArrayView1<f64>) -> (f64, usize) {
        loop {
            match node {
                TreeNode::Leaf { value, leaf_id, .. } => return (*value, *leaf_id),
                TreeNode::Split { feature_idx, threshold, left, right, .. } => {
                    node = if sample[*feature_idx] <= *threshold { &**left } else { &**right };
                }
            }
        }
    }

    /// Feature used by the root split and the root node's impurity,
    /// or None when the tree is a single leaf
    pub fn root_split(&self) -> Option<(usize, f64)> {
        match self.root.as_ref()? {
            TreeNode::Split { feature_idx, impurity, .. } => Some((*feature_idx, *impurity)),
            TreeNode::Leaf { .. } => None,
        }
    }

    /// Get tree depth
    pub fn get_depth(&self) -> usize {
        match &self.root {
            None => 0,
            Some(node) => Self::node_depth(node),
        }
    }

    fn node_depth(node: &TreeNode) -> usize {
        match node {
            TreeNode::Leaf { .. } => 1,
            TreeNode::Split { left, right, .. } => {
                1 + Self::node_depth(left).max(Self::node_depth(right))
            }
        }
    }

    /// Get number of leaves
    pub fn get_n_leaves(&self) -> usize {
        self.n_leaves
    }
}
