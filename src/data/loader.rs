//! CSV dataset loader

use super::DatasetSplit;
use crate::error::{FidelityError, Result};
use ndarray::{Array1, Array2, Axis};
use polars::prelude::*;
use rand::seq::SliceRandom;
use rand::Rng;
use std::path::Path;
use tracing::debug;

/// Reads a labelled CSV and cuts it into shuffled, standardized splits
#[derive(Debug, Clone)]
pub struct DatasetLoader {
    /// Share of rows used for training
    train_fraction: f64,
    /// Share of rows used for validation; the rest is test
    valid_fraction: f64,
    /// Standardize features with training statistics
    normalize: bool,
}

impl Default for DatasetLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl DatasetLoader {
    pub fn new() -> Self {
        Self {
            train_fraction: 0.5,
            valid_fraction: 0.25,
            normalize: true,
        }
    }

    pub fn with_train_fraction(mut self, fraction: f64) -> Self {
        self.train_fraction = fraction;
        self
    }

    pub fn with_valid_fraction(mut self, fraction: f64) -> Self {
        self.valid_fraction = fraction;
        self
    }

    pub fn with_normalize(mut self, normalize: bool) -> Self {
        self.normalize = normalize;
        self
    }

    /// Read features and labels; the last column is the label
    pub fn read_csv(&self, path: &Path) -> Result<(Array2<f64>, Array1<f64>)> {
        if !path.exists() {
            return Err(FidelityError::DataError(format!("dataset not found: {}", path.display())));
        }

        let df = CsvReadOptions::default()
            .with_has_header(true)
            .with_infer_schema_length(Some(1000))
            .try_into_reader_with_file_path(Some(path.to_path_buf()))?
            .finish()?;

        if df.width() < 2 {
            return Err(FidelityError::DataError(format!(
                "{} needs at least one feature column and a label column, found {} columns",
                path.display(),
                df.width()
            )));
        }

        let columns = df
            .get_columns()
            .iter()
            .map(|series| {
                let cast = series.cast(&DataType::Float64)?;
                cast.f64()?
                    .into_iter()
                    .enumerate()
                    .map(|(row, v)| {
                        v.ok_or_else(|| {
                            FidelityError::DataError(format!(
                                "missing or non-numeric value in column '{}' at row {}",
                                series.name(),
                                row
                            ))
                        })
                    })
                    .collect::<Result<Vec<f64>>>()
            })
            .collect::<Result<Vec<Vec<f64>>>>()?;

        let n_rows = df.height();
        let d = columns.len() - 1;
        let x = Array2::from_shape_fn((n_rows, d), |(r, c)| columns[c][r]);
        let y = Array1::from_vec(columns[d].clone());

        debug!(path = %path.display(), rows = n_rows, features = d, "dataset read");
        Ok((x, y))
    }

    /// Read `path` and split it with a fresh shuffle drawn from `rng`
    pub fn load<R: Rng + ?Sized>(&self, path: &Path, rng: &mut R) -> Result<DatasetSplit> {
        let (x, y) = self.read_csv(path)?;
        self.split(&x, &y, rng)
    }

    /// Shuffle rows and cut them into train / validation / test
    pub fn split<R: Rng + ?Sized>(&self, x: &Array2<f64>, y: &Array1<f64>, rng: &mut R) -> Result<DatasetSplit> {
        self.validate()?;

        let n = x.nrows();
        if y.len() != n {
            return Err(FidelityError::ShapeError {
                expected: format!("{} labels", n),
                actual: format!("{} labels", y.len()),
            });
        }

        let n_train = (n as f64 * self.train_fraction) as usize;
        let n_valid = (n as f64 * self.valid_fraction) as usize;
        if n_train == 0 || n_train + n_valid >= n {
            return Err(FidelityError::DataError(format!(
                "{} rows are too few for a {}/{} split with a non-empty test set",
                n, self.train_fraction, self.valid_fraction
            )));
        }

        let mut order: Vec<usize> = (0..n).collect();
        order.shuffle(rng);
        let (train_idx, rest) = order.split_at(n_train);
        let (valid_idx, test_idx) = rest.split_at(n_valid);

        let split = DatasetSplit::new(
            x.select(Axis(0), train_idx),
            y.select(Axis(0), train_idx),
            x.select(Axis(0), valid_idx),
            y.select(Axis(0), valid_idx),
            x.select(Axis(0), test_idx),
            y.select(Axis(0), test_idx),
        )?;

        Ok(if self.normalize { split.standardized() } else { split })
    }

    fn validate(&self) -> Result<()> {
        let ok = |f: f64| f.is_finite() && (0.0..1.0).contains(&f);
        if !ok(self.train_fraction) || self.train_fraction == 0.0 {
            return Err(FidelityError::InvalidParameter {
                name: "train_fraction".to_string(),
                value: self.train_fraction.to_string(),
                reason: "must be in (0, 1)".to_string(),
            });
        }
        if !ok(self.valid_fraction) || self.train_fraction + self.valid_fraction >= 1.0 {
            return Err(FidelityError::InvalidParameter {
                name: "valid_fraction".to_string(),
                value: self.valid_fraction.to_string(),
                reason: "must be in [0, 1) and leave room for a test split".to_string(),
            });
        }
        Ok(())
    }
}
