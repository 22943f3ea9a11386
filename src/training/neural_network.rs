//! Multi-layer perceptron regressor
//!
//! A feedforward network with a linear output unit, trained on squared error
//! with mini-batch Adam and an L2 penalty.

use crate::error::{FidelityError, Result};
use super::Predictor;
use ndarray::{Array1, Array2, Axis};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

/// Activation function for hidden layers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Activation {
    /// Rectified Linear Unit
    #[default]
    ReLU,
    /// Logistic sigmoid
    Sigmoid,
    /// Hyperbolic tangent
    Tanh,
}

/// Neural network configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MLPConfig {
    /// Hidden layer sizes
    pub hidden_layers: Vec<usize>,
    /// Activation function for hidden layers
    pub activation: Activation,
    /// Adam step size
    pub learning_rate: f64,
    /// Maximum number of epochs
    pub max_epochs: usize,
    /// Mini-batch size, capped at the number of samples
    pub batch_size: usize,
    /// L2 regularization
    pub alpha: f64,
    /// Minimum improvement of the training loss that resets patience
    pub tol: f64,
    /// Epochs without improvement before stopping
    pub n_iter_no_change: usize,
    /// Random seed for initialization and shuffling
    pub random_state: Option<u64>,
}

impl Default for MLPConfig {
    fn default() -> Self {
        Self {
            hidden_layers: vec![100],
            activation: Activation::ReLU,
            learning_rate: 0.001,
            max_epochs: 500,
            batch_size: 200,
            alpha: 0.0001,
            tol: 1e-4,
            n_iter_no_change: 10,
            random_state: Some(42),
        }
    }
}

const BETA_1: f64 = 0.9;
const BETA_2: f64 = 0.999;
const ADAM_EPS: f64 = 1e-8;

/// First and second moment estimates for one layer
#[derive(Debug, Clone)]
struct AdamState {
    m_w: Array2<f64>,
    v_w: Array2<f64>,
    m_b: Array1<f64>,
    v_b: Array1<f64>,
}

/// Multi-Layer Perceptron Regressor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MLPRegressor {
    config: MLPConfig,
    weights: Vec<Array2<f64>>,
    biases: Vec<Array1<f64>>,
    n_features: usize,
    n_epochs: usize,
    is_fitted: bool,
}

impl MLPRegressor {
    pub fn new(config: MLPConfig) -> Self {
        Self {
            config,
            weights: Vec::new(),
            biases: Vec::new(),
            n_features: 0,
            n_epochs: 0,
            is_fitted: false,
        }
    }

    /// Fit the model
    pub fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
        let n_samples = x.nrows();
        if n_samples == 0 {
            return Err(FidelityError::TrainingError("cannot fit MLP on zero samples".to_string()));
        }
        if y.len() != n_samples {
            return Err(FidelityError::ShapeError {
                expected: format!("{} targets", n_samples),
                actual: format!("{} targets", y.len()),
            });
        }
        if self.config.hidden_layers.iter().any(|&h| h == 0) {
            return Err(FidelityError::InvalidParameter {
                name: "hidden_layers".to_string(),
                value: format!("{:?}", self.config.hidden_layers),
                reason: "every layer needs at least one unit".to_string(),
            });
        }

        self.n_features = x.ncols();
        let mut rng = match self.config.random_state {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };
        self.initialize_weights(&mut rng)?;

        let mut adam: Vec<AdamState> = self
            .weights
            .iter()
            .zip(self.biases.iter())
            .map(|(w, b)| AdamState {
                m_w: Array2::zeros(w.raw_dim()),
                v_w: Array2::zeros(w.raw_dim()),
                m_b: Array1::zeros(b.len()),
                v_b: Array1::zeros(b.len()),
            })
            .collect();

        let batch_size = self.config.batch_size.clamp(1, n_samples);
        let mut step: i32 = 0;
        let mut best_loss = f64::INFINITY;
        let mut no_improvement = 0;
        let mut indices: Vec<usize> = (0..n_samples).collect();
        self.n_epochs = 0;

        for _epoch in 0..self.config.max_epochs {
            indices.shuffle(&mut rng);
            let mut epoch_loss = 0.0;

            for batch in indices.chunks(batch_size) {
                let x_batch = x.select(Axis(0), batch);
                let y_batch = y.select(Axis(0), batch);

                let (activations, z_values) = self.forward(&x_batch);
                let output = activations.last().map(|a| a.column(0).to_owned()).unwrap_or_default();
                epoch_loss += (&output - &y_batch).mapv(|v| v * v).sum() / 2.0;

                let gradients = self.backward(&y_batch, &activations, &z_values);
                step = step.saturating_add(1);
                let lr = self.config.learning_rate * (1.0 - BETA_2.powi(step)).sqrt()
                    / (1.0 - BETA_1.powi(step));

                for (i, (grad_w, grad_b)) in gradients.into_iter().enumerate() {
                    let state = &mut adam[i];
                    state.m_w = &state.m_w * BETA_1 + &grad_w * (1.0 - BETA_1);
                    state.v_w = &state.v_w * BETA_2 + &grad_w.mapv(|g| g * g) * (1.0 - BETA_2);
                    state.m_b = &state.m_b * BETA_1 + &grad_b * (1.0 - BETA_1);
                    state.v_b = &state.v_b * BETA_2 + &grad_b.mapv(|g| g * g) * (1.0 - BETA_2);

                    self.weights[i] -= &(&state.m_w / &state.v_w.mapv(|v| v.sqrt() + ADAM_EPS) * lr);
                    self.biases[i] -= &(&state.m_b / &state.v_b.mapv(|v| v.sqrt() + ADAM_EPS) * lr);
                }
            }

            let penalty: f64 = self.weights.iter().map(|w| w.mapv(|v| v * v).sum()).sum::<f64>()
                * self.config.alpha
                / 2.0;
            let loss = (epoch_loss + penalty) / n_samples as f64;
            self.n_epochs += 1;

            if !loss.is_finite() {
                return Err(FidelityError::TrainingError(format!(
                    "MLP training diverged after {} epochs",
                    self.n_epochs
                )));
            }
            if loss > best_loss - self.config.tol {
                no_improvement += 1;
            } else {
                no_improvement = 0;
            }
            best_loss = best_loss.min(loss);
            if no_improvement >= self.config.n_iter_no_change {
                break;
            }
        }

        self.is_fitted = true;
        Ok(())
    }

    /// Make predictions
    pub fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        if !self.is_fitted {
            return Err(FidelityError::ModelNotFitted);
        }
        if x.ncols() != self.n_features {
            return Err(FidelityError::ShapeError {
                expected: format!("{} features", self.n_features),
                actual: format!("{} features", x.ncols()),
            });
        }
        let (activations, _) = self.forward(x);
        activations
            .last()
            .map(|a| a.column(0).to_owned())
            .ok_or(FidelityError::ModelNotFitted)
    }

    /// Epochs run by the last fit
    pub fn n_epochs(&self) -> usize {
        self.n_epochs
    }

    fn initialize_weights(&mut self, rng: &mut ChaCha8Rng) -> Result<()> {
        self.weights.clear();
        self.biases.clear();

        let mut layer_sizes = vec![self.n_features];
        layer_sizes.extend(&self.config.hidden_layers);
        layer_sizes.push(1);

        for pair in layer_sizes.windows(2) {
            let (n_in, n_out) = (pair[0], pair[1]);
            // Glorot uniform
            let bound = (6.0 / (n_in + n_out) as f64).sqrt();
            let weights: Vec<f64> = (0..n_in * n_out).map(|_| rng.gen_range(-bound..bound)).collect();
            self.weights.push(Array2::from_shape_vec((n_in, n_out), weights)?);
            self.biases.push(Array1::from_iter((0..n_out).map(|_| rng.gen_range(-bound..bound))));
        }
        Ok(())
    }

    fn forward(&self, x: &Array2<f64>) -> (Vec<Array2<f64>>, Vec<Array2<f64>>) {
        let mut activations = vec![x.clone()];
        let mut z_values = Vec::with_capacity(self.weights.len());
        let last = self.weights.len().saturating_sub(1);

        for (i, (w, b)) in self.weights.iter().zip(self.biases.iter()).enumerate() {
            let z = activations[i].dot(w) + b;
            let a = if i < last {
                activate(&z, self.config.activation)
            } else {
                z.clone()
            };
            z_values.push(z);
            activations.push(a);
        }

        (activations, z_values)
    }

    fn backward(
        &self,
        y: &Array1<f64>,
        activations: &[Array2<f64>],
        z_values: &[Array2<f64>],
    ) -> Vec<(Array2<f64>, Array1<f64>)> {
        let n = y.len() as f64;
        let mut gradients = Vec::with_capacity(self.weights.len());

        let y_2d = y.clone().insert_axis(Axis(1));
        let mut delta = (&activations[activations.len() - 1] - &y_2d) / n;

        for i in (0..self.weights.len()).rev() {
            let grad_w = activations[i].t().dot(&delta) + &self.weights[i] * (self.config.alpha / n);
            let grad_b = delta.sum_axis(Axis(0));
            gradients.push((grad_w, grad_b));

            if i > 0 {
                delta = delta.dot(&self.weights[i].t()) * activate_derivative(&z_values[i - 1], self.config.activation);
            }
        }

        gradients.reverse();
        gradients
    }
}

fn activate(z: &Array2<f64>, activation: Activation) -> Array2<f64> {
    match activation {
        Activation::ReLU => z.mapv(|v| v.max(0.0)),
        Activation::Sigmoid => z.mapv(|v| 1.0 / (1.0 + (-v).exp())),
        Activation::Tanh => z.mapv(f64::tanh),
    }
}

fn activate_derivative(z: &Array2<f64>, activation: Activation) -> Array2<f64> {
    match activation {
        Activation::ReLU => z.mapv(|v| if v > 0.0 { 1.0 } else { 0.0 }),
        Activation::Sigmoid => z.mapv(|v| {
            let s = 1.0 / (1.0 + (-v).exp());
            s * (1.0 - s)
        }),
        Activation::Tanh => z.mapv(|v| 1.0 - v.tanh().powi(2)),
    }
}

impl Predictor for MLPRegressor {
    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        MLPRegressor::predict(self, x)
    }
}
