//! Black-box regression models
//!
//! The fidelity protocol only ever calls [`Predictor::predict`]; the models in
//! this module exist so a trial can fit something to explain:
//! - Regression trees and Random Forests
//! - Ordinary / ridge linear regression
//! - RBF support vector regression
//! - Multi-layer perceptrons
//! - Arbitrary closures via [`FnPredictor`]

pub mod decision_tree;
pub mod linear_models;
pub mod neural_network;
pub mod random_forest;
pub mod svm;

pub use decision_tree::{DecisionTree, TreeNode};
pub use linear_models::{fit_weighted_ridge, LinearFit, LinearRegression};
pub use neural_network::{Activation, MLPConfig, MLPRegressor};
pub use random_forest::{MaxFeatures, RandomForest};
pub use svm::{Gamma, KernelType, SVMConfig, SVMRegressor};

use crate::error::{FidelityError, Result};
use ndarray::{Array1, Array2, ArrayView1, Axis};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Anything that maps a feature matrix to one prediction per row
pub trait Predictor: Send + Sync {
    /// Predict every row of `x`
    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>>;

    /// Predict a single sample
    fn predict_one(&self, x: ArrayView1<f64>) -> Result<f64> {
        let row = x.to_owned().insert_axis(Axis(0));
        let preds = self.predict(&row)?;
        match preds.len() {
            1 => Ok(preds[0]),
            n => Err(FidelityError::ShapeError {
                expected: "1 prediction".to_string(),
                actual: format!("{} predictions", n),
            }),
        }
    }
}

impl<P: Predictor + ?Sized> Predictor for &P {
    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        (**self).predict(x)
    }

    fn predict_one(&self, x: ArrayView1<f64>) -> Result<f64> {
        (**self).predict_one(x)
    }
}

/// Adapter turning a prediction closure into a [`Predictor`]
pub struct FnPredictor<F>(pub F);

impl<F> Predictor for FnPredictor<F>
where
    F: Fn(&Array2<f64>) -> Result<Array1<f64>> + Send + Sync,
{
    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        (self.0)(x)
    }
}

impl<F> fmt::Debug for FnPredictor<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnPredictor")
    }
}

/// Predicts the same value for every row
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConstantPredictor(pub f64);

impl Predictor for ConstantPredictor {
    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        Ok(Array1::from_elem(x.nrows(), self.0))
    }
}

/// Type of black-box model a trial fits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    /// Random forest regressor (100 trees, half the features per split, 5 samples per leaf)
    RandomForest,
    /// Ridge regression (alpha = 1)
    Ridge,
    /// Ordinary least squares
    Linear,
    /// Epsilon-SVR with an RBF kernel (C = 1, epsilon = 0.1, gamma = scale)
    Svr,
    /// Multi-layer perceptron (one hidden layer of 100 ReLU units, at most 500 epochs)
    Mlp,
}

impl ModelKind {
    /// Fit a fresh model of this kind
    pub fn fit(&self, x: &Array2<f64>, y: &Array1<f64>, seed: u64) -> Result<TrainedModel> {
        match self {
            ModelKind::RandomForest => {
                let mut rf = RandomForest::new(100)
                    .with_max_features(MaxFeatures::Fraction(0.5))
                    .with_min_samples_leaf(5)
                    .with_random_state(seed);
                rf.fit(x, y)?;
                Ok(TrainedModel::RandomForest(rf))
            }
            ModelKind::Ridge => {
                let mut lr = LinearRegression::ridge(1.0);
                lr.fit(x, y)?;
                Ok(TrainedModel::Linear(lr))
            }
            ModelKind::Linear => {
                let mut lr = LinearRegression::new();
                lr.fit(x, y)?;
                Ok(TrainedModel::Linear(lr))
            }
            ModelKind::Svr => {
                let mut svr = SVMRegressor::new(SVMConfig::default());
                svr.fit(x, y)?;
                Ok(TrainedModel::Svr(svr))
            }
            ModelKind::Mlp => {
                let mut mlp = MLPRegressor::new(MLPConfig {
                    random_state: Some(seed),
                    ..Default::default()
                });
                mlp.fit(x, y)?;
                Ok(TrainedModel::Mlp(mlp))
            }
        }
    }

    /// Short lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelKind::RandomForest => "random_forest",
            ModelKind::Ridge => "ridge",
            ModelKind::Linear => "linear",
            ModelKind::Svr => "svr",
            ModelKind::Mlp => "mlp",
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ModelKind {
    type Err = FidelityError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "random_forest" | "rf" => Ok(ModelKind::RandomForest),
            "ridge" => Ok(ModelKind::Ridge),
            "linear" | "ols" => Ok(ModelKind::Linear),
            "svr" | "svm" => Ok(ModelKind::Svr),
            "mlp" | "nn" => Ok(ModelKind::Mlp),
            other => Err(FidelityError::InvalidParameter {
                name: "model".to_string(),
                value: other.to_string(),
                reason: "expected one of random_forest, ridge, linear, svr, mlp".to_string(),
            }),
        }
    }
}

/// Enum to hold trained model variants
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TrainedModel {
    RandomForest(RandomForest),
    Linear(LinearRegression),
    Svr(SVMRegressor),
    Mlp(MLPRegressor),
}

impl Predictor for TrainedModel {
    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        match self {
            TrainedModel::RandomForest(m) => m.predict(x),
            TrainedModel::Linear(m) => m.predict(x),
            TrainedModel::Svr(m) => m.predict(x),
            TrainedModel::Mlp(m) => m.predict(x),
        }
    }
}

/// Root-mean-square error between two equally long vectors, NaN when both are empty
pub fn rmse(y_true: &Array1<f64>, y_pred: &Array1<f64>) -> Result<f64> {
    if y_true.len() != y_pred.len() {
        return Err(FidelityError::ShapeError {
            expected: format!("{} predictions", y_true.len()),
            actual: format!("{} predictions", y_pred.len()),
        });
    }
    if y_true.is_empty() {
        return Ok(f64::NAN);
    }
    let mse = (y_true - y_pred).mapv(|v| v * v).mean().unwrap_or(f64::NAN);
    Ok(mse.sqrt())
}
