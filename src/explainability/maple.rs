//! Forest-weighted local linear explanations (MAPLE-style)
//!
//! A random forest fit to the black box's outputs defines a similarity
//! between points: two points are close when they share leaves. Each query is
//! explained by a ridge regression on the training set weighted by that
//! similarity, restricted to the features the forest found most useful.

use super::{Explainer, Explanation, SurrogateCoefficients};
use crate::error::{FidelityError, Result};
use crate::training::{fit_weighted_ridge, LinearFit, MaxFeatures, Predictor, RandomForest};
use ndarray::{Array1, Array2, ArrayView1, Axis};
use rand::RngCore;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// MAPLE configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MapleConfig {
    /// Trees in the similarity forest
    pub n_estimators: usize,
    /// Fraction of features tried per split
    pub max_features: f64,
    /// Minimum training samples per leaf
    pub min_samples_leaf: usize,
    /// L2 strength of the local ridge fit
    pub regularization: f64,
    /// Forest seed; `None` draws one from the thread RNG
    pub seed: Option<u64>,
}

impl Default for MapleConfig {
    fn default() -> Self {
        Self {
            n_estimators: 200,
            max_features: 0.5,
            min_samples_leaf: 10,
            regularization: 0.001,
            seed: None,
        }
    }
}

impl MapleConfig {
    pub fn with_n_estimators(mut self, n: usize) -> Self {
        self.n_estimators = n;
        self
    }

    pub fn with_min_samples_leaf(mut self, n: usize) -> Self {
        self.min_samples_leaf = n;
        self
    }

    pub fn with_regularization(mut self, alpha: f64) -> Self {
        self.regularization = alpha;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.n_estimators == 0 {
            return Err(FidelityError::InvalidParameter {
                name: "n_estimators".to_string(),
                value: "0".to_string(),
                reason: "need at least one tree".to_string(),
            });
        }
        if !(self.max_features > 0.0 && self.max_features <= 1.0) {
            return Err(FidelityError::InvalidParameter {
                name: "max_features".to_string(),
                value: self.max_features.to_string(),
                reason: "must be in (0, 1]".to_string(),
            });
        }
        if !(self.regularization >= 0.0 && self.regularization.is_finite()) {
            return Err(FidelityError::InvalidParameter {
                name: "regularization".to_string(),
                value: self.regularization.to_string(),
                reason: "must be non-negative".to_string(),
            });
        }
        Ok(())
    }
}

/// Fidelity-driven local explainer; all fitting happens in [`MapleExplainer::fit`]
#[derive(Debug, Clone)]
pub struct MapleExplainer {
    forest: RandomForest,
    /// Training targets (black-box outputs or labels)
    targets: Array1<f64>,
    /// Training features restricted to `retained`
    x_retained: Array2<f64>,
    /// `leaf_members[t][leaf]` = training rows landing in `leaf` of tree `t`
    leaf_members: Vec<Vec<Vec<usize>>>,
    feature_scores: Array1<f64>,
    /// Retained feature indices in ascending order
    retained: Vec<usize>,
    regularization: f64,
    n_features: usize,
}

impl MapleExplainer {
    /// Fit the similarity forest and choose how many features to keep.
    ///
    /// `mr_train` / `mr_valid` are the values the explainer should reproduce:
    /// the black box's predictions, or the labels when MAPLE is the model.
    pub fn fit(
        x_train: &Array2<f64>,
        mr_train: &Array1<f64>,
        x_valid: &Array2<f64>,
        mr_valid: &Array1<f64>,
        config: &MapleConfig,
    ) -> Result<Self> {
        config.validate()?;

        let n_features = x_train.ncols();
        if x_train.nrows() != mr_train.len() || x_valid.nrows() != mr_valid.len() {
            return Err(FidelityError::ShapeError {
                expected: format!("{} train / {} valid targets", x_train.nrows(), x_valid.nrows()),
                actual: format!("{} train / {} valid targets", mr_train.len(), mr_valid.len()),
            });
        }
        if x_valid.ncols() != n_features {
            return Err(FidelityError::ShapeError {
                expected: format!("{} validation features", n_features),
                actual: format!("{} validation features", x_valid.ncols()),
            });
        }
        if x_train.nrows() == 0 || n_features == 0 {
            return Err(FidelityError::DataError("MAPLE needs a non-empty training set".to_string()));
        }

        let mut forest = RandomForest::new(config.n_estimators)
            .with_max_features(MaxFeatures::Fraction(config.max_features))
            .with_min_samples_leaf(config.min_samples_leaf);
        if let Some(seed) = config.seed {
            forest = forest.with_random_state(seed);
        }
        forest.fit(x_train, mr_train)?;

        let train_leaves = forest.apply(x_train)?;
        let leaf_members: Vec<Vec<Vec<usize>>> = forest
            .leaf_counts()
            .into_iter()
            .enumerate()
            .map(|(t, n_leaves)| {
                let mut members = vec![Vec::new(); n_leaves];
                for (row, &leaf) in train_leaves.column(t).iter().enumerate() {
                    members[leaf].push(row);
                }
                members
            })
            .collect();

        let feature_scores = forest.root_split_scores();
        let ranking = rank_features(&feature_scores);

        let mut explainer = Self {
            forest,
            targets: mr_train.clone(),
            x_retained: x_train.clone(),
            leaf_members,
            feature_scores,
            retained: (0..n_features).collect(),
            regularization: config.regularization,
            n_features,
        };

        if x_valid.nrows() == 0 {
            warn!("empty validation split, MAPLE keeps every feature");
            return Ok(explainer);
        }

        let valid_leaves = explainer.forest.apply(x_valid)?;
        let valid_weights: Vec<Array1<f64>> = valid_leaves
            .rows()
            .into_iter()
            .map(|leaves| explainer.training_point_weights(leaves.iter().copied()))
            .collect();

        let mut best: Option<(usize, f64)> = None;
        for retain in 1..=n_features {
            let features = sorted_prefix(&ranking, retain);
            let x_train_p = x_train.select(Axis(1), &features);
            let x_valid_p = x_valid.select(Axis(1), &features);

            let predictions = valid_weights
                .par_iter()
                .enumerate()
                .map(|(i, weights)| {
                    let fit = local_ridge(&x_train_p, &explainer.targets, weights, explainer.regularization)?;
                    Ok(fit.predict_one(x_valid_p.row(i)))
                })
                .collect::<Result<Vec<f64>>>()?;

            let mse = predictions
                .iter()
                .zip(mr_valid.iter())
                .map(|(p, t)| (p - t).powi(2))
                .sum::<f64>()
                / predictions.len() as f64;
            let rmse = mse.sqrt();
            debug!(retain, rmse, "MAPLE validation sweep");

            if best.map_or(true, |(_, best_rmse)| rmse < best_rmse) {
                best = Some((retain, rmse));
            }
        }

        let (retain, rmse) = best.unwrap_or((n_features, f64::NAN));
        debug!(retain, rmse, "MAPLE feature count selected");
        explainer.retained = sorted_prefix(&ranking, retain);
        explainer.x_retained = x_train.select(Axis(1), &explainer.retained);

        Ok(explainer)
    }

    /// Similarity weight of every training row to a point with the given leaf ids
    fn training_point_weights(&self, leaf_ids: impl Iterator<Item = usize>) -> Array1<f64> {
        let mut weights = Array1::zeros(self.targets.len());
        for (tree, leaf) in leaf_ids.enumerate() {
            if let Some(members) = self.leaf_members[tree].get(leaf) {
                if members.is_empty() {
                    continue;
                }
                let w = 1.0 / members.len() as f64;
                for &row in members {
                    weights[row] += w;
                }
            }
        }
        weights
    }

    /// Local prediction and intercept-first coefficients at `x`
    pub fn explain_point(&self, x: ArrayView1<f64>) -> Result<Explanation> {
        if x.len() != self.n_features {
            return Err(FidelityError::ShapeError {
                expected: format!("{} features", self.n_features),
                actual: format!("{} features", x.len()),
            });
        }

        let leaves = self.forest.apply_one(x)?;
        let weights = self.training_point_weights(leaves.into_iter());
        let fit = local_ridge(&self.x_retained, &self.targets, &weights, self.regularization)?;

        let x_p: Array1<f64> = self.retained.iter().map(|&j| x[j]).collect();
        let prediction = fit.predict_one(x_p.view());

        let mut full_weights = Array1::zeros(self.n_features);
        for (k, &feature) in self.retained.iter().enumerate() {
            full_weights[feature] = fit.coefficients[k];
        }

        Ok(Explanation {
            prediction,
            coefficients: SurrogateCoefficients::from_parts(fit.intercept, full_weights.view()),
        })
    }

    /// Features used by the local models, ascending
    pub fn retained_features(&self) -> &[usize] {
        &self.retained
    }

    /// Root-split impurity scores that ranked the features
    pub fn feature_scores(&self) -> &Array1<f64> {
        &self.feature_scores
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }
}

impl Explainer for MapleExplainer {
    fn name(&self) -> &'static str {
        "maple"
    }

    fn explain(&self, x: ArrayView1<f64>, _rng: &mut dyn RngCore) -> Result<Explanation> {
        self.explain_point(x)
    }
}

impl Predictor for MapleExplainer {
    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let preds = x
            .axis_iter(Axis(0))
            .into_par_iter()
            .map(|row| self.explain_point(row).map(|e| e.prediction))
            .collect::<Result<Vec<f64>>>()?;
        Ok(Array1::from_vec(preds))
    }

    fn predict_one(&self, x: ArrayView1<f64>) -> Result<f64> {
        Ok(self.explain_point(x)?.prediction)
    }
}

/// Weighted ridge over the rows with non-zero weight
fn local_ridge(x: &Array2<f64>, y: &Array1<f64>, weights: &Array1<f64>, alpha: f64) -> Result<LinearFit> {
    let active: Vec<usize> = weights
        .iter()
        .enumerate()
        .filter(|(_, &w)| w > 0.0)
        .map(|(i, _)| i)
        .collect();
    if active.is_empty() {
        return Err(FidelityError::ComputationError(
            "query shares no leaf with any training point".to_string(),
        ));
    }

    let x_a = x.select(Axis(0), &active);
    let y_a = y.select(Axis(0), &active);
    let w_a = weights.select(Axis(0), &active);
    fit_weighted_ridge(x_a.view(), y_a.view(), Some(w_a.view()), alpha, true)
}

/// Feature indices ordered by descending score, ties by index
fn rank_features(scores: &Array1<f64>) -> Vec<usize> {
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| {
        scores[b]
            .partial_cmp(&scores[a])
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.cmp(&b))
    });
    order
}

/// The `k` best-ranked features, ascending so columns keep their original order
fn sorted_prefix(ranking: &[usize], k: usize) -> Vec<usize> {
    let mut features = ranking[..k.min(ranking.len())].to_vec();
    features.sort_unstable();
    features
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use rand::{Rng, SeedableRng};
    use rand_xoshiro::Xoshiro256PlusPlus;

    fn linear_data(n: usize, seed: u64) -> (Array2<f64>, Array1<f64>) {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
        let x = Array2::from_shape_simple_fn((n, 3), || rng.gen_range(-2.0..2.0));
        // Third feature is irrelevant
        let y = x.column(0).mapv(|v| 2.0 * v) - &x.column(1);
        (x, y)
    }

    fn small_config() -> MapleConfig {
        MapleConfig::default().with_n_estimators(20).with_min_samples_leaf(5).with_seed(3)
    }

    #[test]
    fn test_recovers_linear_target() {
        let (x_train, y_train) = linear_data(120, 0);
        let (x_valid, y_valid) = linear_data(40, 1000);
        let maple = MapleExplainer::fit(&x_train, &y_train, &x_valid, &y_valid, &small_config()).unwrap();

        let exp = maple.explain_point(array![0.4, -0.3, 1.0].view()).unwrap();
        let c = exp.coefficients.as_array();
        assert!(c[0].abs() < 0.02, "intercept {}", c[0]);
        assert!((c[1] - 2.0).abs() < 0.02, "w0 {}", c[1]);
        assert!((c[2] + 1.0).abs() < 0.02, "w1 {}", c[2]);
        assert!(c[3].abs() < 0.02, "w2 {}", c[3]);
    }

    #[test]
    fn test_coefficients_match_prediction() {
        let (x_train, _) = linear_data(120, 0);
        let (x_valid, _) = linear_data(40, 500);
        let target = |x: &Array2<f64>| -> Array1<f64> {
            x.rows().into_iter().map(|r| r[0] * r[0] - (r[1] * 2.0).cos() + 0.1 * r[2]).collect()
        };
        let maple = MapleExplainer::fit(&x_train, &target(&x_train), &x_valid, &target(&x_valid), &small_config())
            .unwrap();

        for x in x_valid.rows().into_iter().take(10) {
            let exp = maple.explain_point(x).unwrap();
            let linear = exp.coefficients.predict(x).unwrap();
            assert!((linear - exp.prediction).abs() <= 1e-8 * (1.0 + exp.prediction.abs()));
            assert_eq!(exp.coefficients.n_features(), 3);
        }
    }

    #[test]
    fn test_dropped_features_get_zero_weight() {
        let (x_train, y_train) = linear_data(120, 0);
        let (x_valid, y_valid) = linear_data(40, 77);
        let maple = MapleExplainer::fit(&x_train, &y_train, &x_valid, &y_valid, &small_config()).unwrap();

        let exp = maple.explain_point(x_valid.row(0)).unwrap();
        for j in 0..3 {
            if !maple.retained_features().contains(&j) {
                assert_eq!(exp.coefficients.weights()[j], 0.0);
            }
        }
        assert!(maple.retained_features().windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_predictor_and_explainer_agree() {
        let (x_train, y_train) = linear_data(80, 0);
        let (x_valid, y_valid) = linear_data(20, 9);
        let maple = MapleExplainer::fit(&x_train, &y_train, &x_valid, &y_valid, &small_config()).unwrap();

        let preds = Predictor::predict(&maple, &x_valid).unwrap();
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(0);
        for (i, row) in x_valid.rows().into_iter().enumerate() {
            let exp = maple.explain(row, &mut rng).unwrap();
            assert_eq!(preds[i], exp.prediction);
        }
        assert_eq!(maple.name(), "maple");
    }

    #[test]
    fn test_rank_features_orders_by_score() {
        let scores = array![0.5, 2.0, 0.5, 1.0];
        assert_eq!(rank_features(&scores), vec![1, 3, 0, 2]);
        assert_eq!(sorted_prefix(&[1, 3, 0, 2], 3), vec![0, 1, 3]);
    }

    #[test]
    fn test_shape_checks() {
        let (x_train, y_train) = linear_data(30, 0);
        let short = Array1::zeros(5);
        assert!(MapleExplainer::fit(&x_train, &y_train, &x_train, &short, &small_config()).is_err());
        assert!(MapleConfig::default().with_n_estimators(0).validate().is_err());
    }
}
