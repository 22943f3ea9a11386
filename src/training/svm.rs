//! Epsilon-insensitive support vector regression
//!
//! The dual is solved by coordinate descent over `beta = alpha - alpha*`,
//! with the intercept folded into the kernel as a constant feature.

use crate::error::{FidelityError, Result};
use super::Predictor;
use ndarray::{Array1, Array2, ArrayView1};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Maximum number of samples for the eager kernel matrix
const MAX_KERNEL_MATRIX_SAMPLES: usize = 10_000;

/// RBF bandwidth
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Gamma {
    /// `1 / (n_features * var(X))`, computed at fit time
    Scale,
    /// Fixed value
    Value(f64),
}

/// Kernel function type
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum KernelType {
    /// Linear kernel: K(x, y) = x · y
    Linear,
    /// Radial Basis Function: K(x, y) = exp(-γ * ||x - y||²)
    Rbf { gamma: Gamma },
}

impl Default for KernelType {
    fn default() -> Self {
        KernelType::Rbf { gamma: Gamma::Scale }
    }
}

/// SVR configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SVMConfig {
    /// Regularization parameter (C)
    pub c: f64,
    /// Kernel function
    pub kernel: KernelType,
    /// Half-width of the insensitive tube
    pub epsilon: f64,
    /// Stop when no dual coefficient moves more than this in a sweep
    pub tol: f64,
    /// Maximum number of sweeps over the samples
    pub max_iter: usize,
}

impl Default for SVMConfig {
    fn default() -> Self {
        Self {
            c: 1.0,
            kernel: KernelType::default(),
            epsilon: 0.1,
            tol: 1e-3,
            max_iter: 1000,
        }
    }
}

/// Support Vector Regressor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SVMRegressor {
    config: SVMConfig,
    /// Resolved RBF bandwidth
    gamma: f64,
    support_vectors: Option<Array2<f64>>,
    /// beta = alpha - alpha* for each support vector
    dual_coef: Option<Array1<f64>>,
    bias: f64,
    n_features: usize,
}

impl SVMRegressor {
    /// Create a new SVM regressor
    pub fn new(config: SVMConfig) -> Self {
        Self {
            config,
            gamma: 1.0,
            support_vectors: None,
            dual_coef: None,
            bias: 0.0,
            n_features: 0,
        }
    }

    /// Fit the regressor
    pub fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
        let n = x.nrows();
        if n == 0 {
            return Err(FidelityError::TrainingError("cannot fit SVR on zero samples".to_string()));
        }
        if y.len() != n {
            return Err(FidelityError::ShapeError {
                expected: format!("{} targets", n),
                actual: format!("{} targets", y.len()),
            });
        }
        if n > MAX_KERNEL_MATRIX_SAMPLES {
            return Err(FidelityError::TrainingError(format!(
                "dataset has {} samples, exceeding the maximum {} for the SVR kernel matrix",
                n, MAX_KERNEL_MATRIX_SAMPLES
            )));
        }
        if !(self.config.c > 0.0) {
            return Err(FidelityError::InvalidParameter {
                name: "c".to_string(),
                value: self.config.c.to_string(),
                reason: "must be positive".to_string(),
            });
        }
        if !(self.config.epsilon >= 0.0) {
            return Err(FidelityError::InvalidParameter {
                name: "epsilon".to_string(),
                value: self.config.epsilon.to_string(),
                reason: "must be non-negative".to_string(),
            });
        }

        self.n_features = x.ncols();
        self.gamma = self.resolve_gamma(x);
        let kernel_matrix = self.compute_kernel_matrix(x)?;

        let c = self.config.c;
        let epsilon = self.config.epsilon;
        let mut beta: Array1<f64> = Array1::zeros(n);
        // (K + 1) · beta, kept in sync with every coordinate update
        let mut fitted: Array1<f64> = Array1::zeros(n);

        for _sweep in 0..self.config.max_iter {
            let mut max_change: f64 = 0.0;

            for i in 0..n {
                let q = kernel_matrix[[i, i]] + 1.0;
                let grad = fitted[i] - y[i];
                let z = q * beta[i] - grad;
                let shrunk = z.signum() * (z.abs() - epsilon).max(0.0);
                let updated = (shrunk / q).clamp(-c, c);
                let delta = updated - beta[i];
                if delta == 0.0 {
                    continue;
                }
                fitted.scaled_add(delta, &kernel_matrix.column(i));
                fitted += delta;
                beta[i] = updated;
                max_change = max_change.max(delta.abs());
            }

            if max_change < self.config.tol {
                break;
            }
        }

        let support_indices: Vec<usize> = beta
            .iter()
            .enumerate()
            .filter(|(_, b)| b.abs() > 1e-8)
            .map(|(i, _)| i)
            .collect();

        let mut support_vectors = Array2::zeros((support_indices.len(), self.n_features));
        let mut dual_coef = Array1::zeros(support_indices.len());
        for (k, &idx) in support_indices.iter().enumerate() {
            support_vectors.row_mut(k).assign(&x.row(idx));
            dual_coef[k] = beta[idx];
        }

        self.bias = dual_coef.sum();
        self.support_vectors = Some(support_vectors);
        self.dual_coef = Some(dual_coef);
        Ok(())
    }

    fn resolve_gamma(&self, x: &Array2<f64>) -> f64 {
        match self.config.kernel {
            KernelType::Linear => 0.0,
            KernelType::Rbf { gamma: Gamma::Value(g) } => g,
            KernelType::Rbf { gamma: Gamma::Scale } => {
                let mean = x.mean().unwrap_or(0.0);
                let var = x.mapv(|v| (v - mean) * (v - mean)).mean().unwrap_or(0.0);
                if var > 0.0 {
                    1.0 / (x.ncols() as f64 * var)
                } else {
                    1.0
                }
            }
        }
    }

    fn compute_kernel_matrix(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        let n = x.nrows();
        let rows: Vec<Vec<f64>> = (0..n)
            .into_par_iter()
            .map(|i| (0..n).map(|j| self.kernel(x.row(i), x.row(j))).collect())
            .collect();
        Ok(Array2::from_shape_vec((n, n), rows.into_iter().flatten().collect())?)
    }

    fn kernel(&self, a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
        match self.config.kernel {
            KernelType::Linear => a.dot(&b),
            KernelType::Rbf { .. } => {
                let norm_sq: f64 = a.iter().zip(b.iter()).map(|(u, v)| (u - v) * (u - v)).sum();
                (-self.gamma * norm_sq).exp()
            }
        }
    }

    /// Predict target values
    pub fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let (sv, coef) = match (&self.support_vectors, &self.dual_coef) {
            (Some(sv), Some(coef)) => (sv, coef),
            _ => return Err(FidelityError::ModelNotFitted),
        };
        if x.ncols() != self.n_features {
            return Err(FidelityError::ShapeError {
                expected: format!("{} features", self.n_features),
                actual: format!("{} features", x.ncols()),
            });
        }

        let predictions: Vec<f64> = (0..x.nrows())
            .into_par_iter()
            .map(|i| {
                let sample = x.row(i);
                sv.rows()
                    .into_iter()
                    .zip(coef.iter())
                    .map(|(s, b)| b * self.kernel(sample, s))
                    .sum::<f64>()
                    + self.bias
            })
            .collect();

        Ok(Array1::from(predictions))
    }

    /// Resolved RBF bandwidth (0 for the linear kernel)
    pub fn gamma(&self) -> f64 {
        self.gamma
    }

    /// Get number of support vectors
    pub fn n_support_vectors(&self) -> usize {
        self.support_vectors.as_ref().map(|sv| sv.nrows()).unwrap_or(0)
    }
}

impl Predictor for SVMRegressor {
    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        SVMRegressor::predict(self, x)
    }
}
