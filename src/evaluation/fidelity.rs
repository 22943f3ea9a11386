//! Perturbation fidelity of local surrogates
//!
//! Each test point is explained once by every explainer; the frozen surrogates
//! are then compared with the model on Gaussian perturbations of the point.
//! One noise draw per repetition is shared by all scales and explainers.

use super::rmse_metric;
use crate::error::{FidelityError, Result};
use crate::explainability::{Explainer, PerturbationGenerator, SurrogateCoefficients};
use crate::training::Predictor;
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::debug;

/// Position of the fidelity-driven explainer in the per-point loop
const MAPLE: usize = 1;

/// Perturbation protocol settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FidelityEvaluator {
    /// Noise multipliers applied to each shared standard-normal draw
    pub scales: Vec<f64>,
    /// Perturbations per test point
    pub n_perturbations: usize,
}

impl Default for FidelityEvaluator {
    fn default() -> Self {
        Self {
            scales: vec![0.1, 0.25],
            n_perturbations: 5,
        }
    }
}

impl FidelityEvaluator {
    pub fn new(scales: Vec<f64>, n_perturbations: usize) -> Result<Self> {
        let evaluator = Self {
            scales,
            n_perturbations,
        };
        evaluator.validate()?;
        Ok(evaluator)
    }

    pub fn validate(&self) -> Result<()> {
        if self.scales.is_empty() {
            return Err(FidelityError::ConfigError("at least one noise scale is required".to_string()));
        }
        if let Some(bad) = self.scales.iter().find(|s| !(s.is_finite() && **s >= 0.0)) {
            return Err(FidelityError::InvalidParameter {
                name: "scales".to_string(),
                value: bad.to_string(),
                reason: "noise scales must be finite and non-negative".to_string(),
            });
        }
        if self.n_perturbations == 0 {
            return Err(FidelityError::InvalidParameter {
                name: "n_perturbations".to_string(),
                value: "0".to_string(),
                reason: "need at least one perturbation per point".to_string(),
            });
        }
        Ok(())
    }

    /// Score `lime` and `maple` against `model` on every row of `x_test`.
    ///
    /// `generator` supplies both the perturbation noise and any randomness the
    /// explainers need, so a seeded generator makes the whole pass reproducible.
    pub fn evaluate<P: Predictor + ?Sized>(
        &self,
        x_test: &Array2<f64>,
        model: &P,
        lime: &dyn Explainer,
        maple: &dyn Explainer,
        generator: &mut PerturbationGenerator,
    ) -> Result<FidelityReport> {
        self.validate()?;

        let n = x_test.nrows();
        let d = x_test.ncols();
        if n == 0 {
            return Err(FidelityError::DataError("fidelity evaluation needs at least one test point".to_string()));
        }

        let start = Instant::now();
        let n_scales = self.scales.len();
        let explainers = [lime, maple];
        let mut sq_errors = vec![vec![0.0; n_scales]; explainers.len()];
        let mut model_preds = Array1::zeros(n);

        for (i, x) in x_test.rows().into_iter().enumerate() {
            let mut coefficients: Vec<SurrogateCoefficients> = Vec::with_capacity(explainers.len());
            for (e, explainer) in explainers.iter().enumerate() {
                let explanation = explainer.explain(x, generator.rng_mut())?;
                if explanation.coefficients.n_features() != d {
                    return Err(FidelityError::ShapeError {
                        expected: format!("{} coefficients from {}", d + 1, explainer.name()),
                        actual: format!("{}", explanation.coefficients.n_features() + 1),
                    });
                }
                if e == MAPLE {
                    model_preds[i] = explanation.prediction;
                }
                coefficients.push(explanation.coefficients);
            }

            // Rows ordered (repetition, scale)
            let mut perturbed = Array2::zeros((self.n_perturbations * n_scales, d));
            for rep in 0..self.n_perturbations {
                let noise = generator.noise(d);
                for (k, &scale) in self.scales.iter().enumerate() {
                    let x_pert = &x + &(&noise * scale);
                    perturbed.row_mut(rep * n_scales + k).assign(&x_pert);
                }
            }

            let truth = model.predict(&perturbed)?;
            if truth.len() != perturbed.nrows() {
                return Err(FidelityError::ShapeError {
                    expected: format!("{} predictions", perturbed.nrows()),
                    actual: format!("{} predictions", truth.len()),
                });
            }

            for (row, x_pert) in perturbed.rows().into_iter().enumerate() {
                let k = row % n_scales;
                for (e, coefs) in coefficients.iter().enumerate() {
                    let err = coefs.predict(x_pert)? - truth[row];
                    sq_errors[e][k] += err * err;
                }
            }
        }

        debug!(
            points = n,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "fidelity evaluation finished"
        );

        Ok(FidelityReport {
            scales: self.scales.clone(),
            explainers: explainers.iter().map(|e| e.name().to_string()).collect(),
            sq_errors,
            n_points: n,
            n_perturbations: self.n_perturbations,
            model_preds,
        })
    }
}

/// Accumulated squared surrogate errors from one evaluation pass
#[derive(Debug, Clone)]
pub struct FidelityReport {
    scales: Vec<f64>,
    explainers: Vec<String>,
    /// `sq_errors[explainer][scale]`
    sq_errors: Vec<Vec<f64>>,
    n_points: usize,
    n_perturbations: usize,
    model_preds: Array1<f64>,
}

impl FidelityReport {
    /// Root-mean-square infidelity of `explainer` at `scale`
    pub fn rmse(&self, explainer: &str, scale: f64) -> Option<f64> {
        let e = self.explainers.iter().position(|name| name == explainer)?;
        let k = self.scales.iter().position(|&s| s == scale)?;
        let count = (self.n_points * self.n_perturbations) as f64;
        Some((self.sq_errors[e][k] / count).sqrt())
    }

    /// The fidelity-driven explainer's direct prediction at each test point
    pub fn model_preds(&self) -> &Array1<f64> {
        &self.model_preds
    }

    pub fn scales(&self) -> &[f64] {
        &self.scales
    }

    pub fn n_points(&self) -> usize {
        self.n_points
    }

    /// Every `(metric name, rmse)` pair, explainer-major
    pub fn metrics(&self) -> Vec<(String, f64)> {
        let count = (self.n_points * self.n_perturbations) as f64;
        self.explainers
            .iter()
            .zip(&self.sq_errors)
            .flat_map(|(name, errors)| {
                self.scales
                    .iter()
                    .zip(errors)
                    .map(move |(&scale, &acc)| (rmse_metric(name, scale), (acc / count).sqrt()))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::explainability::Explanation;
    use crate::training::FnPredictor;
    use ndarray::{array, ArrayView1};
    use rand::RngCore;
    use std::sync::Mutex;

    /// Always returns the same linear surrogate
    struct Fixed {
        name: &'static str,
        coefs: Array1<f64>,
    }

    impl Explainer for Fixed {
        fn name(&self) -> &'static str {
            self.name
        }

        fn explain(&self, x: ArrayView1<f64>, _rng: &mut dyn RngCore) -> Result<Explanation> {
            let coefficients = SurrogateCoefficients::new(self.coefs.clone(), x.len())?;
            Ok(Explanation {
                prediction: coefficients.predict(x)?,
                coefficients,
            })
        }
    }

    fn linear_model() -> FnPredictor<impl Fn(&Array2<f64>) -> Result<Array1<f64>>> {
        FnPredictor(|x: &Array2<f64>| -> Result<Array1<f64>> { Ok(x.column(0).mapv(|v| 2.0 * v) - &x.column(1)) })
    }

    #[test]
    fn test_exact_surrogates_have_zero_error() {
        let exact = Fixed { name: "lime", coefs: array![0.0, 2.0, -1.0] };
        let also_exact = Fixed { name: "maple", coefs: array![0.0, 2.0, -1.0] };
        let x_test = array![[0.0, 1.0], [1.0, -1.0], [0.5, 0.5]];

        let report = FidelityEvaluator::default()
            .evaluate(&x_test, &linear_model(), &exact, &also_exact, &mut PerturbationGenerator::seeded(1))
            .unwrap();

        for scale in [0.1, 0.25] {
            assert!(report.rmse("lime", scale).unwrap() < 1e-12);
            assert!(report.rmse("maple", scale).unwrap() < 1e-12);
        }
        assert_eq!(report.model_preds(), &array![-1.0, 3.0, 0.5]);
    }

    #[test]
    fn test_error_grows_linearly_with_scale() {
        // Slope error of 1 on feature 0: error = scale * noise0
        let off = Fixed { name: "lime", coefs: array![0.0, 3.0, -1.0] };
        let exact = Fixed { name: "maple", coefs: array![0.0, 2.0, -1.0] };
        // Feature 0 is zero at every base point
        let x_test = Array2::from_shape_fn((40, 2), |(i, j)| (i * j) as f64 * 0.1);

        let report = FidelityEvaluator::default()
            .evaluate(&x_test, &linear_model(), &off, &exact, &mut PerturbationGenerator::seeded(5))
            .unwrap();

        let small = report.rmse("lime", 0.1).unwrap();
        let large = report.rmse("lime", 0.25).unwrap();
        assert!(small > 0.0);
        // Shared noise makes the ratio exact
        assert!((large / small - 2.5).abs() < 1e-9);
        assert!(report.rmse("maple", 0.25).unwrap() < 1e-12);
    }

    #[test]
    fn test_noise_is_fresh_per_repetition_and_point() {
        let seen: Mutex<Vec<Array2<f64>>> = Mutex::new(Vec::new());
        let recording = FnPredictor(|x: &Array2<f64>| -> Result<Array1<f64>> {
            seen.lock().unwrap().push(x.clone());
            Ok(Array1::zeros(x.nrows()))
        });
        let a = Fixed { name: "lime", coefs: array![0.0, 0.0, 0.0, 0.0] };
        let b = Fixed { name: "maple", coefs: array![0.0, 0.0, 0.0, 0.0] };
        let x_test = array![[1.0, -1.0, 0.5], [1.0, -1.0, 0.5]];
        let scales = [0.1, 0.25];

        FidelityEvaluator::new(scales.to_vec(), 3)
            .unwrap()
            .evaluate(&x_test, &recording, &a, &b, &mut PerturbationGenerator::seeded(8))
            .unwrap();

        drop(recording);
        let batches = seen.into_inner().unwrap();
        assert_eq!(batches.len(), 2);

        // Unit noise behind each row, rows ordered (repetition, scale)
        let directions: Vec<Vec<Array1<f64>>> = batches
            .iter()
            .zip(x_test.rows())
            .map(|(batch, x)| {
                assert_eq!(batch.nrows(), 3 * scales.len());
                batch
                    .rows()
                    .into_iter()
                    .enumerate()
                    .map(|(r, row)| (&row - &x) / scales[r % scales.len()])
                    .collect()
            })
            .collect();

        let close = |u: &Array1<f64>, v: &Array1<f64>| (u - v).iter().all(|d| d.abs() < 1e-9);
        for point in &directions {
            for rep in 0..3 {
                // Same draw across scales within a repetition
                assert!(close(&point[rep * 2], &point[rep * 2 + 1]));
            }
            assert!(!close(&point[0], &point[2]));
            assert!(!close(&point[2], &point[4]));
        }
        // Identical points still get their own draws
        assert!(!close(&directions[0][0], &directions[1][0]));
    }

    #[test]
    fn test_metrics_names_and_missing_lookups() {
        let a = Fixed { name: "lime", coefs: array![1.0, 0.0, 0.0] };
        let b = Fixed { name: "maple", coefs: array![0.0, 0.0, 0.0] };
        let model = FnPredictor(|x: &Array2<f64>| -> Result<Array1<f64>> { Ok(Array1::zeros(x.nrows())) });

        let report = FidelityEvaluator::default()
            .evaluate(&array![[1.0, 2.0]], &model, &a, &b, &mut PerturbationGenerator::seeded(2))
            .unwrap();

        let names: Vec<String> = report.metrics().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["lime_rmse_0.1", "lime_rmse_0.25", "maple_rmse_0.1", "maple_rmse_0.25"]);
        assert_eq!(report.rmse("lime", 0.1), Some(1.0));
        assert_eq!(report.rmse("shap", 0.1), None);
        assert_eq!(report.rmse("lime", 0.5), None);
    }

    #[test]
    fn test_empty_test_set_is_an_error() {
        let a = Fixed { name: "lime", coefs: array![0.0, 0.0, 0.0] };
        let b = Fixed { name: "maple", coefs: array![0.0, 0.0, 0.0] };
        let result = FidelityEvaluator::default().evaluate(
            &Array2::zeros((0, 2)),
            &linear_model(),
            &a,
            &b,
            &mut PerturbationGenerator::seeded(0),
        );
        assert!(matches!(result, Err(FidelityError::DataError(_))));
    }

    #[test]
    fn test_invalid_settings() {
        assert!(FidelityEvaluator::new(vec![], 5).is_err());
        assert!(FidelityEvaluator::new(vec![-0.1], 5).is_err());
        assert!(FidelityEvaluator::new(vec![0.1], 0).is_err());
        assert!(FidelityEvaluator::new(vec![0.0, 0.1], 1).is_ok());
    }
}
