//! Linear model implementations
//!
//! Ordinary and ridge regression, both supporting per-sample weights. The
//! weighted solve is shared by the black-box linear model and by the local
//! surrogates in [`crate::explainability`].

use crate::error::{FidelityError, Result};
use super::Predictor;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

/// Solve symmetric positive-definite system Ax = b using Cholesky decomposition.
/// Retries once with a small diagonal ridge if the matrix is not positive definite.
fn cholesky_solve(a: &Array2<f64>, b: &Array1<f64>) -> Option<Array1<f64>> {
    let n = a.nrows();
    if n != a.ncols() || n != b.len() {
        return None;
    }

    match cholesky_factor(a) {
        Some(l) => Some(cholesky_substitute(&l, b)),
        None => {
            let mut a_reg = a.clone();
            let scale = a.diag().iter().map(|v| v.abs()).sum::<f64>() / n.max(1) as f64;
            let ridge = 1e-8 * scale.max(1e-12);
            for k in 0..n {
                a_reg[[k, k]] += ridge;
            }
            cholesky_factor(&a_reg).map(|l| cholesky_substitute(&l, b))
        }
    }
}

/// Lower-triangular factor L with A = L * L^T, or None if A is not positive definite
fn cholesky_factor(a: &Array2<f64>) -> Option<Array2<f64>> {
    let n = a.nrows();
    let mut l = Array2::zeros((n, n));

    for i in 0..n {
        for j in 0..=i {
            let mut sum = 0.0;
            for k in 0..j {
                sum += l[[i, k]] * l[[j, k]];
            }

            if i == j {
                let diag = a[[i, i]] - sum;
                if diag <= 0.0 {
                    return None;
                }
                l[[i, j]] = diag.sqrt();
            } else {
                l[[i, j]] = (a[[i, j]] - sum) / l[[j, j]];
            }
        }
    }

    Some(l)
}

fn cholesky_substitute(l: &Array2<f64>, b: &Array1<f64>) -> Array1<f64> {
    let n = l.nrows();

    // Forward substitution: L * y = b
    let mut y = Array1::zeros(n);
    for i in 0..n {
        let mut sum = 0.0;
        for j in 0..i {
            sum += l[[i, j]] * y[j];
        }
        y[i] = (b[i] - sum) / l[[i, i]];
    }

    // Backward substitution: L^T * x = y
    let mut x = Array1::zeros(n);
    for i in (0..n).rev() {
        let mut sum = 0.0;
        for j in (i + 1)..n {
            sum += l[[j, i]] * x[j];
        }
        x[i] = (y[i] - sum) / l[[i, i]];
    }

    x
}

/// Gauss-Jordan solve with partial pivoting (fallback for singular normal equations)
fn gauss_jordan_solve(m: &Array2<f64>, b: &Array1<f64>) -> Option<Array1<f64>> {
    let n = m.nrows();
    if n != m.ncols() || n != b.len() {
        return None;
    }

    let mut aug = Array2::zeros((n, n + 1));
    for i in 0..n {
        for j in 0..n {
            aug[[i, j]] = m[[i, j]];
        }
        aug[[i, n]] = b[i];
    }

    for col in 0..n {
        let mut max_row = col;
        for row in col + 1..n {
            if aug[[row, col]].abs() > aug[[max_row, col]].abs() {
                max_row = row;
            }
        }

        if max_row != col {
            for j in 0..=n {
                aug.swap([col, j], [max_row, j]);
            }
        }

        if aug[[col, col]].abs() < 1e-12 {
            return None;
        }

        let pivot = aug[[col, col]];
        for j in 0..=n {
            aug[[col, j]] /= pivot;
        }

        for row in 0..n {
            if row != col {
                let factor = aug[[row, col]];
                if factor != 0.0 {
                    for j in 0..=n {
                        aug[[row, j]] -= factor * aug[[col, j]];
                    }
                }
            }
        }
    }

    Some(aug.column(n).to_owned())
}

/// Fitted weighted linear model: `intercept + coefficients · x`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearFit {
    pub intercept: f64,
    pub coefficients: Array1<f64>,
}

impl LinearFit {
    /// Evaluate the fitted model at a single point
    pub fn predict_one(&self, x: ArrayView1<f64>) -> f64 {
        self.intercept + self.coefficients.dot(&x)
    }
}

/// Weighted ridge regression with an unpenalized intercept.
///
/// Minimizes `Σ wᵢ (yᵢ - b - xᵢ·β)² + alpha ‖β‖²`. Rows with zero weight are
/// ignored. With `fit_intercept = false` the intercept is fixed at zero.
pub fn fit_weighted_ridge(
    x: ArrayView2<f64>,
    y: ArrayView1<f64>,
    weights: Option<ArrayView1<f64>>,
    alpha: f64,
    fit_intercept: bool,
) -> Result<LinearFit> {
    let n_samples = x.nrows();
    let n_features = x.ncols();

    if n_samples != y.len() {
        return Err(FidelityError::ShapeError {
            expected: format!("y length = {}", n_samples),
            actual: format!("y length = {}", y.len()),
        });
    }
    if let Some(w) = &weights {
        if w.len() != n_samples {
            return Err(FidelityError::ShapeError {
                expected: format!("weights length = {}", n_samples),
                actual: format!("weights length = {}", w.len()),
            });
        }
    }
    if alpha < 0.0 || !alpha.is_finite() {
        return Err(FidelityError::InvalidParameter {
            name: "alpha".to_string(),
            value: alpha.to_string(),
            reason: "must be a finite non-negative number".to_string(),
        });
    }

    let w: Array1<f64> = match weights {
        Some(w) => w.to_owned(),
        None => Array1::ones(n_samples),
    };
    let w_sum = w.sum();
    if w_sum <= 0.0 || !w_sum.is_finite() {
        return Err(FidelityError::ComputationError(
            "Sample weights must have a positive finite sum".to_string(),
        ));
    }

    // Weighted centering
    let (x_mean, y_mean) = if fit_intercept {
        let x_mean = x.t().dot(&w) / w_sum;
        let y_mean = y.dot(&w) / w_sum;
        (x_mean, y_mean)
    } else {
        (Array1::zeros(n_features), 0.0)
    };

    let x_c = &x - &x_mean.view().insert_axis(Axis(0));
    let y_c = &y - y_mean;

    // Scale rows by sqrt(w) so the plain normal equations become weighted ones
    let sqrt_w = w.mapv(f64::sqrt);
    let x_w = &x_c * &sqrt_w.view().insert_axis(Axis(1));
    let y_w = &y_c * &sqrt_w;

    let mut xtx = x_w.t().dot(&x_w);
    for i in 0..n_features {
        xtx[[i, i]] += alpha;
    }
    let xty = x_w.t().dot(&y_w);

    let coefficients = match cholesky_solve(&xtx, &xty) {
        Some(coef) => coef,
        None => gauss_jordan_solve(&xtx, &xty).ok_or_else(|| {
            FidelityError::ComputationError(
                "Matrix is singular, cannot solve least squares".to_string(),
            )
        })?,
    };

    if coefficients.iter().any(|c| !c.is_finite()) {
        return Err(FidelityError::ComputationError(
            "Least squares produced non-finite coefficients".to_string(),
        ));
    }

    let intercept = if fit_intercept {
        y_mean - coefficients.dot(&x_mean)
    } else {
        0.0
    };

    Ok(LinearFit {
        intercept,
        coefficients,
    })
}

/// Linear regression model (ridge when `alpha > 0`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinearRegression {
    /// Fitted model
    fit: Option<LinearFit>,
    /// Whether to fit intercept
    pub fit_intercept: bool,
    /// Regularization strength (L2)
    pub alpha: f64,
}

impl Default for LinearRegression {
    fn default() -> Self {
        Self::new()
    }
}

impl LinearRegression {
    /// Create a new ordinary least squares model
    pub fn new() -> Self {
        Self {
            fit: None,
            fit_intercept: true,
            alpha: 0.0,
        }
    }

    /// Create a ridge model with the given L2 strength
    pub fn ridge(alpha: f64) -> Self {
        Self::new().with_alpha(alpha)
    }

    /// Set regularization strength
    pub fn with_alpha(mut self, alpha: f64) -> Self {
        self.alpha = alpha;
        self
    }

    /// Fit the model to training data
    pub fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<&mut Self> {
        self.fit = Some(fit_weighted_ridge(x.view(), y.view(), None, self.alpha, self.fit_intercept)?);
        Ok(self)
    }

    /// Fitted coefficients (without intercept)
    pub fn coefficients(&self) -> Option<&Array1<f64>> {
        self.fit.as_ref().map(|f| &f.coefficients)
    }

    /// Fitted intercept
    pub fn intercept(&self) -> Option<f64> {
        self.fit.as_ref().map(|f| f.intercept)
    }

    /// Make predictions
    pub fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let fit = self.fit.as_ref().ok_or(FidelityError::ModelNotFitted)?;
        if x.ncols() != fit.coefficients.len() {
            return Err(FidelityError::ShapeError {
                expected: format!("{} features", fit.coefficients.len()),
                actual: format!("{} features", x.ncols()),
            });
        }
        Ok(x.dot(&fit.coefficients) + fit.intercept)
    }

}

impl Predictor for LinearRegression {
    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        LinearRegression::predict(self, x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_linear_regression_simple() {
        let x = array![
            [1.0, 1.0],
            [2.0, 1.0],
            [1.0, 2.0],
            [2.0, 2.0],
            [3.0, 1.0],
        ];
        // y = 2*x1 + 3*x2 + 1
        let y = array![6.0, 8.0, 9.0, 11.0, 10.0];

        let mut model = LinearRegression::new();
        model.fit(&x, &y).unwrap();

        let coef = model.coefficients().unwrap();
        assert!((coef[0] - 2.0).abs() < 1e-8);
        assert!((coef[1] - 3.0).abs() < 1e-8);
        assert!((model.intercept().unwrap() - 1.0).abs() < 1e-8);

        let pred = model.predict(&array![[4.0, 4.0]]).unwrap();
        assert!((pred[0] - 21.0).abs() < 1e-8);
    }

    #[test]
    fn test_ridge_shrinks_coefficients() {
        let x = array![[1.0], [2.0], [3.0], [4.0]];
        let y = array![2.0, 4.0, 6.0, 8.0];

        let mut ols = LinearRegression::new();
        ols.fit(&x, &y).unwrap();
        let mut ridge = LinearRegression::ridge(10.0);
        ridge.fit(&x, &y).unwrap();

        let ols_slope = ols.coefficients().unwrap()[0];
        let ridge_slope = ridge.coefficients().unwrap()[0];
        assert!((ols_slope - 2.0).abs() < 1e-8);
        assert!(ridge_slope < ols_slope);
        assert!(ridge_slope > 0.0);
    }

    #[test]
    fn test_zero_weights_are_ignored() {
        // Last row is an outlier with zero weight
        let x = array![[0.0], [1.0], [2.0], [3.0], [10.0]];
        let y = array![1.0, 3.0, 5.0, 7.0, -100.0];
        let w = array![1.0, 1.0, 1.0, 1.0, 0.0];

        let fit = fit_weighted_ridge(x.view(), y.view(), Some(w.view()), 0.0, true).unwrap();
        assert!((fit.coefficients[0] - 2.0).abs() < 1e-8);
        assert!((fit.intercept - 1.0).abs() < 1e-8);
    }

    #[test]
    fn test_constant_target_gives_zero_slope() {
        let x = array![[0.5, -1.0], [1.0, 2.0], [-0.3, 0.7]];
        let y = array![0.0, 0.0, 0.0];

        let fit = fit_weighted_ridge(x.view(), y.view(), None, 1.0, true).unwrap();
        assert!(fit.coefficients.iter().all(|c| c.abs() < 1e-12));
        assert!(fit.intercept.abs() < 1e-12);
    }

    #[test]
    fn test_singular_design_with_ridge_is_solved() {
        // Duplicate columns make X^T X singular without regularization
        let x = array![[1.0, 1.0], [2.0, 2.0], [3.0, 3.0]];
        let y = array![2.0, 4.0, 6.0];

        let fit = fit_weighted_ridge(x.view(), y.view(), None, 0.1, true).unwrap();
        let pred = fit.predict_one(array![2.0, 2.0].view());
        assert!((pred - 4.0).abs() < 0.1);
    }

    #[test]
    fn test_rejects_bad_weights() {
        let x = array![[1.0], [2.0]];
        let y = array![1.0, 2.0];
        let w = array![0.0, 0.0];
        assert!(fit_weighted_ridge(x.view(), y.view(), Some(w.view()), 0.0, true).is_err());

        let short = array![1.0];
        assert!(matches!(
            fit_weighted_ridge(x.view(), y.view(), Some(short.view()), 0.0, true),
            Err(FidelityError::ShapeError { .. })
        ));
    }

    #[test]
    fn test_predict_requires_fit() {
        let model = LinearRegression::new();
        let x = array![[1.0]];
        assert!(matches!(model.predict(&x), Err(FidelityError::ModelNotFitted)));
    }
}
