//! Experiment configuration

use crate::error::{FidelityError, Result};
use crate::evaluation::FidelityEvaluator;
use crate::explainability::{LimeConfig, MapleConfig};
use crate::training::ModelKind;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// What the explainers are asked to explain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExperimentMode {
    /// Fit a black-box model and explain it with both methods
    ExplainModel { model: ModelKind },
    /// MAPLE is fit on the labels and is itself the model being explained
    SelfExplanation,
}

impl Default for ExperimentMode {
    fn default() -> Self {
        ExperimentMode::ExplainModel {
            model: ModelKind::RandomForest,
        }
    }
}

impl fmt::Display for ExperimentMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExperimentMode::ExplainModel { model } => write!(f, "explain-model ({})", model),
            ExperimentMode::SelfExplanation => f.write_str("self-explanation"),
        }
    }
}

/// Configuration for a full benchmark run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentConfig {
    /// Directory holding `<dataset>.csv` files
    pub datasets_dir: PathBuf,

    /// Directory receiving one JSON record per (dataset, trial)
    pub trials_dir: PathBuf,

    /// Aggregate means table
    pub results_path: PathBuf,

    /// Significance test output
    pub stats_path: PathBuf,

    /// Dataset names, in output order
    pub datasets: Vec<String>,

    /// Trials per dataset, numbered from 1
    pub trials: usize,

    /// Worker threads for the trial pool
    pub workers: usize,

    pub mode: ExperimentMode,

    /// Base seed; `None` seeds every trial from OS entropy
    pub seed: Option<u64>,

    /// Share of rows used for training
    pub train_fraction: f64,

    /// Share of rows used for validation
    pub valid_fraction: f64,

    pub lime: LimeConfig,

    pub maple: MapleConfig,

    pub fidelity: FidelityEvaluator,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            datasets_dir: PathBuf::from("Datasets"),
            trials_dir: PathBuf::from("Trials"),
            results_path: PathBuf::from("results.csv"),
            stats_path: PathBuf::from("stats.txt"),
            datasets: [
                "autompgs",
                "happiness",
                "winequality-red",
                "housing",
                "day",
                "crimes",
                "music",
                "communities",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            trials: 25,
            workers: 12,
            mode: ExperimentMode::default(),
            seed: None,
            train_fraction: 0.5,
            valid_fraction: 0.25,
            lime: LimeConfig::default(),
            maple: MapleConfig::default(),
            fidelity: FidelityEvaluator::default(),
        }
    }
}

impl ExperimentConfig {
    /// Load from a JSON file; omitted fields take their defaults
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| FidelityError::ConfigError(format!("cannot read {}: {}", path.display(), e)))?;
        let config: Self = serde_json::from_str(&text)
            .map_err(|e| FidelityError::ConfigError(format!("invalid config {}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_datasets_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.datasets_dir = dir.into();
        self
    }

    pub fn with_trials_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.trials_dir = dir.into();
        self
    }

    pub fn with_results_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.results_path = path.into();
        self
    }

    pub fn with_stats_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.stats_path = path.into();
        self
    }

    pub fn with_datasets<S: Into<String>>(mut self, datasets: impl IntoIterator<Item = S>) -> Self {
        self.datasets = datasets.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_trials(mut self, trials: usize) -> Self {
        self.trials = trials;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_mode(mut self, mode: ExperimentMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_lime(mut self, lime: LimeConfig) -> Self {
        self.lime = lime;
        self
    }

    pub fn with_maple(mut self, maple: MapleConfig) -> Self {
        self.maple = maple;
        self
    }

    pub fn with_fidelity(mut self, fidelity: FidelityEvaluator) -> Self {
        self.fidelity = fidelity;
        self
    }

    /// Trial indices, `1..=trials`
    pub fn trial_indices(&self) -> Vec<usize> {
        (1..=self.trials).collect()
    }

    /// CSV path of a dataset
    pub fn dataset_path(&self, dataset: &str) -> PathBuf {
        self.datasets_dir.join(format!("{}.csv", dataset))
    }

    pub fn validate(&self) -> Result<()> {
        if self.datasets.is_empty() {
            return Err(FidelityError::ConfigError("no datasets configured".to_string()));
        }
        if let Some(bad) = self
            .datasets
            .iter()
            .find(|d| d.is_empty() || d.contains('/') || d.contains('\\'))
        {
            return Err(FidelityError::ConfigError(format!("invalid dataset name '{}'", bad)));
        }
        if self.trials == 0 {
            return Err(FidelityError::ConfigError("trials must be at least 1".to_string()));
        }
        if self.workers == 0 {
            return Err(FidelityError::ConfigError("workers must be at least 1".to_string()));
        }
        self.lime.validate()?;
        self.maple.validate()?;
        self.fidelity.validate()?;
        Ok(())
    }
}
