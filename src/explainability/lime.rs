//! Perturbation-weighted local linear explanations (LIME-style)
//!
//! Neighbours of the query are sampled in standardized feature space, the
//! black box is queried on them, and a proximity-weighted ridge regression is
//! fit. Coefficients are mapped back to raw feature units so they can be
//! applied directly to perturbed raw inputs.

use super::{Explainer, Explanation, SurrogateCoefficients};
use crate::error::{FidelityError, Result};
use crate::training::{fit_weighted_ridge, Predictor};
use ndarray::{Array1, Array2, ArrayView1, Axis};
use rand::{Rng, RngCore};
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

/// Where synthetic neighbours are centred
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SamplingStrategy {
    /// Gaussian around the query point
    AroundInstance,
    /// Gaussian around the training mean
    TrainingDistribution,
}

/// LIME configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimeConfig {
    /// Number of synthetic neighbours (including the query itself)
    pub num_samples: usize,
    /// Kernel width; `None` means `0.75 * sqrt(d)`
    pub kernel_width: Option<f64>,
    /// L2 strength of the local ridge fit
    pub ridge_alpha: f64,
    /// Neighbourhood centre
    pub sampling: SamplingStrategy,
}

impl Default for LimeConfig {
    fn default() -> Self {
        Self {
            num_samples: 500,
            kernel_width: None,
            ridge_alpha: 1.0,
            sampling: SamplingStrategy::AroundInstance,
        }
    }
}

impl LimeConfig {
    pub fn with_num_samples(mut self, n: usize) -> Self {
        self.num_samples = n;
        self
    }

    pub fn with_kernel_width(mut self, width: f64) -> Self {
        self.kernel_width = Some(width);
        self
    }

    pub fn with_ridge_alpha(mut self, alpha: f64) -> Self {
        self.ridge_alpha = alpha;
        self
    }

    pub fn with_sampling(mut self, sampling: SamplingStrategy) -> Self {
        self.sampling = sampling;
        self
    }

    /// Check parameter ranges
    pub fn validate(&self) -> Result<()> {
        if self.num_samples < 2 {
            return Err(FidelityError::InvalidParameter {
                name: "num_samples".to_string(),
                value: self.num_samples.to_string(),
                reason: "need the query plus at least one neighbour".to_string(),
            });
        }
        if let Some(w) = self.kernel_width {
            if !(w > 0.0 && w.is_finite()) {
                return Err(FidelityError::InvalidParameter {
                    name: "kernel_width".to_string(),
                    value: w.to_string(),
                    reason: "must be positive".to_string(),
                });
            }
        }
        if !(self.ridge_alpha >= 0.0 && self.ridge_alpha.is_finite()) {
            return Err(FidelityError::InvalidParameter {
                name: "ridge_alpha".to_string(),
                value: self.ridge_alpha.to_string(),
                reason: "must be non-negative".to_string(),
            });
        }
        Ok(())
    }
}

/// Perturbation-weighted linear explainer.
///
/// Holds only the training feature statistics; the black box is supplied per
/// query, or bound once with [`LimeExplainer::bind`].
#[derive(Debug, Clone)]
pub struct LimeExplainer {
    mean: Array1<f64>,
    scale: Array1<f64>,
    kernel_width: f64,
    config: LimeConfig,
}

impl LimeExplainer {
    /// Build from the training features
    pub fn new(x_train: &Array2<f64>, config: LimeConfig) -> Result<Self> {
        config.validate()?;

        let n_features = x_train.ncols();
        if x_train.nrows() == 0 || n_features == 0 {
            return Err(FidelityError::DataError(format!(
                "LIME needs a non-empty training matrix, got {}x{}",
                x_train.nrows(),
                n_features
            )));
        }

        let mean = x_train
            .mean_axis(Axis(0))
            .ok_or_else(|| FidelityError::DataError("empty training matrix".to_string()))?;
        // Constant features keep unit scale, as a standard scaler would
        let scale = x_train
            .std_axis(Axis(0), 0.0)
            .mapv(|s| if s > 0.0 && s.is_finite() { s } else { 1.0 });
        let kernel_width = config
            .kernel_width
            .unwrap_or_else(|| 0.75 * (n_features as f64).sqrt());

        Ok(Self {
            mean,
            scale,
            kernel_width,
            config,
        })
    }

    pub fn n_features(&self) -> usize {
        self.mean.len()
    }

    pub fn config(&self) -> &LimeConfig {
        &self.config
    }

    pub fn kernel_width(&self) -> f64 {
        self.kernel_width
    }

    /// Explain `predictor` around `x`, drawing neighbours from `rng`
    pub fn explain_instance<P, R>(&self, x: ArrayView1<f64>, predictor: &P, rng: &mut R) -> Result<Explanation>
    where
        P: Predictor + ?Sized,
        R: Rng + ?Sized,
    {
        let d = self.n_features();
        if x.len() != d {
            return Err(FidelityError::ShapeError {
                expected: format!("{} features", d),
                actual: format!("{} features", x.len()),
            });
        }

        let n = self.config.num_samples;
        let z_query = (&x - &self.mean) / &self.scale;
        let centre = match self.config.sampling {
            SamplingStrategy::AroundInstance => z_query.clone(),
            SamplingStrategy::TrainingDistribution => Array1::zeros(d),
        };

        // Row 0 is the query itself
        let mut z = Array2::<f64>::zeros((n, d));
        z.row_mut(0).assign(&z_query);
        for mut row in z.rows_mut().into_iter().skip(1) {
            for (j, v) in row.iter_mut().enumerate() {
                let eps: f64 = rng.sample(StandardNormal);
                *v = centre[j] + eps;
            }
        }

        let mut raw = &z * &self.scale.view().insert_axis(Axis(0)) + &self.mean.view().insert_axis(Axis(0));
        raw.row_mut(0).assign(&x);

        let targets = predictor.predict(&raw)?;
        if targets.len() != n {
            return Err(FidelityError::ShapeError {
                expected: format!("{} predictions", n),
                actual: format!("{} predictions", targets.len()),
            });
        }

        let width_sq = self.kernel_width * self.kernel_width;
        let weights: Array1<f64> = z
            .rows()
            .into_iter()
            .map(|row| {
                let dist_sq = (&row - &z_query).mapv(|v| v * v).sum();
                (-dist_sq / width_sq).exp().sqrt()
            })
            .collect();

        let fit = fit_weighted_ridge(
            z.view(),
            targets.view(),
            Some(weights.view()),
            self.config.ridge_alpha,
            true,
        )?;

        // Undo standardization: w_raw = w_std / scale, b_raw = b_std - w_raw · mean
        let raw_weights = &fit.coefficients / &self.scale;
        let raw_intercept = fit.intercept - raw_weights.dot(&self.mean);

        Ok(Explanation {
            prediction: fit.predict_one(z_query.view()),
            coefficients: SurrogateCoefficients::from_parts(raw_intercept, raw_weights.view()),
        })
    }

    /// Pair this explainer with the black box it explains
    pub fn bind<'a, P: Predictor + ?Sized>(&'a self, predictor: &'a P) -> BoundLime<'a, P> {
        BoundLime {
            explainer: self,
            predictor,
        }
    }
}

/// A [`LimeExplainer`] bound to a fixed black box
pub struct BoundLime<'a, P: ?Sized> {
    explainer: &'a LimeExplainer,
    predictor: &'a P,
}

impl<P: Predictor + ?Sized> Explainer for BoundLime<'_, P> {
    fn name(&self) -> &'static str {
        "lime"
    }

    fn explain(&self, x: ArrayView1<f64>, rng: &mut dyn RngCore) -> Result<Explanation> {
        self.explainer.explain_instance(x, self.predictor, rng)
    }
}
