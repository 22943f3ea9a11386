//! Local explanation methods
//!
//! Provides local linear surrogates of a black-box regression model:
//! - Perturbation-weighted linear regression (LIME-style)
//! - Forest-weighted local ridge regression (MAPLE-style)
//! - Reproducible Gaussian perturbations for probing surrogates

mod lime;
mod maple;
mod perturbation;

pub use lime::{BoundLime, LimeConfig, LimeExplainer, SamplingStrategy};
pub use maple::{MapleConfig, MapleExplainer};
pub use perturbation::PerturbationGenerator;

use crate::error::{FidelityError, Result};
use ndarray::{s, Array1, ArrayView1};
use rand::RngCore;
use serde::{Deserialize, Serialize};

/// Intercept-first coefficients of a local linear surrogate.
///
/// Position 0 is the intercept and position `j + 1` is the weight of feature
/// `j`, so the surrogate's value at `x` is `[1, x] · c`. Only meaningful for
/// the query point that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurrogateCoefficients(Array1<f64>);

impl SurrogateCoefficients {
    /// Wrap an intercept-first vector for a model over `n_features` features
    pub fn new(values: Array1<f64>, n_features: usize) -> Result<Self> {
        if values.len() != n_features + 1 {
            return Err(FidelityError::ShapeError {
                expected: format!("{} coefficients (intercept + {} features)", n_features + 1, n_features),
                actual: format!("{} coefficients", values.len()),
            });
        }
        Ok(Self(values))
    }

    /// Build from an intercept and per-feature weights
    pub fn from_parts(intercept: f64, weights: ArrayView1<f64>) -> Self {
        let mut values = Array1::zeros(weights.len() + 1);
        values[0] = intercept;
        values.slice_mut(s![1..]).assign(&weights);
        Self(values)
    }

    pub fn intercept(&self) -> f64 {
        self.0[0]
    }

    pub fn weights(&self) -> ArrayView1<'_, f64> {
        self.0.slice(s![1..])
    }

    pub fn n_features(&self) -> usize {
        self.0.len() - 1
    }

    pub fn as_array(&self) -> &Array1<f64> {
        &self.0
    }

    /// Linear prediction `[1, x] · c`
    pub fn predict(&self, x: ArrayView1<f64>) -> Result<f64> {
        if x.len() != self.n_features() {
            return Err(FidelityError::ShapeError {
                expected: format!("{} features", self.n_features()),
                actual: format!("{} features", x.len()),
            });
        }
        Ok(self.intercept() + self.weights().dot(&x))
    }
}

/// Result of explaining one query point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Explanation {
    /// The surrogate's own prediction at the query point
    pub prediction: f64,
    /// Local linear coefficients, intercept first
    pub coefficients: SurrogateCoefficients,
}

/// A method producing a local linear approximation around a query point.
///
/// `rng` is the caller's random stream; deterministic explainers ignore it.
pub trait Explainer: Send + Sync {
    /// Short identifier used in metric names (`lime`, `maple`)
    fn name(&self) -> &'static str;

    /// Explain a single query point
    fn explain(&self, x: ArrayView1<f64>, rng: &mut dyn RngCore) -> Result<Explanation>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_intercept_is_first() {
        let c = SurrogateCoefficients::from_parts(0.5, array![2.0, -1.0].view());
        assert_eq!(c.as_array(), &array![0.5, 2.0, -1.0]);
        assert_eq!(c.intercept(), 0.5);
        assert_eq!(c.weights(), array![2.0, -1.0]);
        assert_eq!(c.n_features(), 2);
    }

    #[test]
    fn test_predict_prepends_one() {
        let c = SurrogateCoefficients::new(array![1.0, 2.0, -1.0], 2).unwrap();
        // 1 + 2*3 - 1*4
        assert_eq!(c.predict(array![3.0, 4.0].view()).unwrap(), 3.0);
    }

    #[test]
    fn test_length_mismatch_is_rejected() {
        assert!(SurrogateCoefficients::new(array![1.0, 2.0], 2).is_err());
        let c = SurrogateCoefficients::new(array![1.0, 2.0, 3.0], 2).unwrap();
        assert!(c.predict(array![1.0].view()).is_err());
    }
}
