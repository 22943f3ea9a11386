//! Trial execution
//!
//! A trial is one (dataset, trial index) unit: load and split the data, fit
//! the model and both explainers, run the fidelity protocol, and persist one
//! JSON record. Units share nothing but the output directory, so they run
//! independently on a fixed-size rayon pool.

use super::{TrialRecord, MODEL_RMSE};
use crate::config::{ExperimentConfig, ExperimentMode};
use crate::data::{DatasetLoader, DatasetSplit};
use crate::error::{FidelityError, Result};
use crate::explainability::{LimeExplainer, MapleExplainer, PerturbationGenerator};
use crate::training::{rmse, Predictor};
use ndarray::{Array1, Array2};
use rand::RngCore;
use rayon::prelude::*;
use std::collections::hash_map::DefaultHasher;
use std::fs;
use std::io;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// File name of a trial record, `<dataset>_<trial>.json`
pub fn trial_file_name(dataset: &str, trial: usize) -> String {
    format!("{}_{}.json", dataset, trial)
}

/// A unit that did not produce a record
#[derive(Debug)]
pub struct TrialFailure {
    pub dataset: String,
    pub trial: usize,
    pub error: FidelityError,
}

/// Runs trials according to an [`ExperimentConfig`]
#[derive(Debug, Clone)]
pub struct TrialRunner {
    config: ExperimentConfig,
    loader: DatasetLoader,
}

impl TrialRunner {
    pub fn new(config: ExperimentConfig) -> Result<Self> {
        config.validate()?;
        let loader = DatasetLoader::new()
            .with_train_fraction(config.train_fraction)
            .with_valid_fraction(config.valid_fraction);
        Ok(Self { config, loader })
    }

    pub fn config(&self) -> &ExperimentConfig {
        &self.config
    }

    /// Where the record of `(dataset, trial)` is written
    pub fn trial_path(&self, dataset: &str, trial: usize) -> PathBuf {
        self.config.trials_dir.join(trial_file_name(dataset, trial))
    }

    /// Fresh random stream for one unit.
    ///
    /// Without a configured seed every unit draws from OS entropy; with one,
    /// the unit's stream is derived from the seed and the unit's identity.
    pub fn generator_for(&self, dataset: &str, trial: usize) -> PerturbationGenerator {
        match self.config.seed {
            Some(base) => {
                let mut hasher = DefaultHasher::new();
                dataset.hash(&mut hasher);
                trial.hash(&mut hasher);
                PerturbationGenerator::seeded(base ^ hasher.finish())
            }
            None => PerturbationGenerator::from_entropy(),
        }
    }

    /// Run one unit end to end and write its record
    pub fn run(&self, dataset: &str, trial: usize) -> Result<TrialRecord> {
        let start = Instant::now();
        let result = self.run_unit(dataset, trial);

        match &result {
            Ok(record) => info!(
                dataset,
                trial,
                metrics = record.len(),
                elapsed_ms = start.elapsed().as_millis() as u64,
                "trial finished"
            ),
            Err(e) => error!(dataset, trial, error = %e, "trial failed"),
        }

        result.map_err(|e| e.in_trial(dataset, trial))
    }

    fn run_unit(&self, dataset: &str, trial: usize) -> Result<TrialRecord> {
        let path = self.trial_path(dataset, trial);
        // A record left by an earlier run must not outlive a failure of this one
        match fs::remove_file(&path) {
            Ok(()) => debug!(path = %path.display(), "removed previous trial record"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let mut generator = self.generator_for(dataset, trial);

        let split = self
            .loader
            .load(&self.config.dataset_path(dataset), generator.rng_mut())?;
        let record = self.run_on_split(&split, &mut generator)?;

        fs::create_dir_all(&self.config.trials_dir)?;
        record.write_json(&path)?;
        Ok(record)
    }

    /// Fit and evaluate on an already prepared split, in the configured mode
    pub fn run_on_split(&self, split: &DatasetSplit, generator: &mut PerturbationGenerator) -> Result<TrialRecord> {
        match self.config.mode {
            ExperimentMode::ExplainModel { model } => {
                let seed = generator.rng_mut().next_u64();
                let black_box = model.fit(&split.x_train, &split.y_train, seed)?;
                self.evaluate_model(split, &black_box, generator)
            }
            ExperimentMode::SelfExplanation => {
                let maple = self.fit_maple(split, &split.y_train, &split.y_valid, generator)?;
                let lime = LimeExplainer::new(&split.x_train, self.config.lime.clone())?;
                let bound = lime.bind(&maple);

                let report = self
                    .config
                    .fidelity
                    .evaluate(&split.x_test, &maple, &bound, &maple, generator)?;

                let mut record: TrialRecord = report.metrics().into_iter().collect();
                record.insert(MODEL_RMSE, rmse(&split.y_test, report.model_preds())?);
                Ok(record)
            }
        }
    }

    /// Explain a supplied black box with both methods and score them
    pub fn evaluate_model<P: Predictor + ?Sized>(
        &self,
        split: &DatasetSplit,
        model: &P,
        generator: &mut PerturbationGenerator,
    ) -> Result<TrialRecord> {
        let mr_train = predict_rows(model, &split.x_train)?;
        let mr_valid = predict_rows(model, &split.x_valid)?;
        let model_rmse = rmse(&split.y_test, &predict_rows(model, &split.x_test)?)?;

        let maple = self.fit_maple(split, &mr_train, &mr_valid, generator)?;
        let lime = LimeExplainer::new(&split.x_train, self.config.lime.clone())?;
        let bound = lime.bind(model);

        let report = self
            .config
            .fidelity
            .evaluate(&split.x_test, model, &bound, &maple, generator)?;

        let mut record: TrialRecord = report.metrics().into_iter().collect();
        record.insert(MODEL_RMSE, model_rmse);
        Ok(record)
    }

    fn fit_maple(
        &self,
        split: &DatasetSplit,
        mr_train: &Array1<f64>,
        mr_valid: &Array1<f64>,
        generator: &mut PerturbationGenerator,
    ) -> Result<MapleExplainer> {
        let mut config = self.config.maple.clone();
        if config.seed.is_none() {
            config.seed = Some(generator.rng_mut().next_u64());
        }
        MapleExplainer::fit(&split.x_train, mr_train, &split.x_valid, mr_valid, &config)
    }

    /// Run every configured (dataset, trial) unit on a pool of `workers` threads.
    ///
    /// Returns after all units finish. Failed units are reported, never
    /// retried, and do not stop the others.
    pub fn run_all(&self) -> Result<Vec<TrialFailure>> {
        let units: Vec<(&str, usize)> = self
            .config
            .datasets
            .iter()
            .flat_map(|d| self.config.trial_indices().into_iter().map(move |t| (d.as_str(), t)))
            .collect();

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.workers)
            .build()
            .map_err(|e| FidelityError::ComputationError(format!("cannot build worker pool: {}", e)))?;

        info!(
            units = units.len(),
            workers = self.config.workers,
            mode = %self.config.mode,
            "running trials"
        );
        let start = Instant::now();

        let failures: Vec<TrialFailure> = pool.install(|| {
            units
                .par_iter()
                .filter_map(|&(dataset, trial)| {
                    self.run(dataset, trial).err().map(|error| TrialFailure {
                        dataset: dataset.to_string(),
                        trial,
                        error,
                    })
                })
                .collect()
        });

        if failures.is_empty() {
            info!(elapsed_ms = start.elapsed().as_millis() as u64, "all trials finished");
        } else {
            warn!(
                failed = failures.len(),
                total = units.len(),
                elapsed_ms = start.elapsed().as_millis() as u64,
                "some trials failed"
            );
        }
        Ok(failures)
    }
}

/// Predictions for `x`, skipping the model entirely for an empty matrix
fn predict_rows<P: Predictor + ?Sized>(model: &P, x: &Array2<f64>) -> Result<Array1<f64>> {
    if x.nrows() == 0 {
        return Ok(Array1::zeros(0));
    }
    let preds = model.predict(x)?;
    if preds.len() != x.nrows() {
        return Err(FidelityError::ShapeError {
            expected: format!("{} predictions", x.nrows()),
            actual: format!("{} predictions", preds.len()),
        });
    }
    Ok(preds)
}
