//! Explain Fidelity - local explanation fidelity benchmark
//!
//! Compares two ways of explaining a regression model around a single point:
//! a perturbation-weighted linear surrogate (LIME-style) and a forest-weighted
//! local ridge surrogate (MAPLE-style). Each surrogate is frozen at a test
//! point and scored by how well it tracks the model under Gaussian
//! perturbations of that point.
//!
//! # Modules
//!
//! ## Benchmark
//! - [`explainability`] - Perturbation generator and the two explainers
//! - [`evaluation`] - Fidelity protocol, trial runner, aggregation and Welch tests
//!
//! ## Supporting
//! - [`training`] - `Predictor` trait and the black-box regression models
//! - [`data`] - CSV datasets and train / validation / test splits
//! - [`config`] - Experiment configuration
//! - [`cli`] - Command-line interface

// Core error handling
pub mod error;

pub mod config;
pub mod data;
pub mod training;

// Benchmark
pub mod explainability;
pub mod evaluation;

// Services
pub mod cli;

pub use error::{FidelityError, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::error::{FidelityError, Result};

    pub use crate::config::{ExperimentConfig, ExperimentMode};
    pub use crate::data::{DatasetLoader, DatasetSplit};

    pub use crate::training::{
        ConstantPredictor, FnPredictor, LinearRegression, MLPRegressor, ModelKind, Predictor, RandomForest,
        SVMRegressor, TrainedModel,
    };

    pub use crate::explainability::{
        Explainer, Explanation, LimeConfig, LimeExplainer, MapleConfig, MapleExplainer, PerturbationGenerator,
        SurrogateCoefficients,
    };

    pub use crate::evaluation::{
        aggregate_means, significance, welch_t_test, AggregateTable, FidelityEvaluator, FidelityReport,
        SignificanceReport, TrialFailure, TrialRecord, TrialRunner, TrialSet, WelchResult,
    };
}
