//! Dataset splits and CSV loading
//!
//! A dataset is one CSV file whose last column is the regression label. Each
//! trial reshuffles it into train / validation / test splits and standardizes
//! the features with statistics taken from the training rows only.

mod loader;

pub use loader::DatasetLoader;

use crate::error::{FidelityError, Result};
use ndarray::{Array1, Array2, Axis};

/// Train / validation / test matrices for one trial
#[derive(Debug, Clone)]
pub struct DatasetSplit {
    pub x_train: Array2<f64>,
    pub y_train: Array1<f64>,
    pub x_valid: Array2<f64>,
    pub y_valid: Array1<f64>,
    pub x_test: Array2<f64>,
    pub y_test: Array1<f64>,
    /// Per-feature training mean before standardization
    pub train_mean: Array1<f64>,
    /// Per-feature training standard deviation (zero replaced by one)
    pub train_std: Array1<f64>,
}

impl DatasetSplit {
    /// Assemble a split from raw matrices, checking every part agrees on `d`.
    ///
    /// The statistics are computed from `x_train` but not applied; see
    /// [`DatasetSplit::standardized`].
    pub fn new(
        x_train: Array2<f64>,
        y_train: Array1<f64>,
        x_valid: Array2<f64>,
        y_valid: Array1<f64>,
        x_test: Array2<f64>,
        y_test: Array1<f64>,
    ) -> Result<Self> {
        let d = x_train.ncols();
        for (name, x, y) in [
            ("train", &x_train, &y_train),
            ("valid", &x_valid, &y_valid),
            ("test", &x_test, &y_test),
        ] {
            if x.ncols() != d {
                return Err(FidelityError::ShapeError {
                    expected: format!("{} features in {} split", d, name),
                    actual: format!("{} features", x.ncols()),
                });
            }
            if x.nrows() != y.len() {
                return Err(FidelityError::ShapeError {
                    expected: format!("{} labels in {} split", x.nrows(), name),
                    actual: format!("{} labels", y.len()),
                });
            }
        }
        if x_train.nrows() == 0 {
            return Err(FidelityError::DataError("training split is empty".to_string()));
        }

        let (train_mean, train_std) = feature_stats(&x_train)?;
        Ok(Self {
            x_train,
            y_train,
            x_valid,
            y_valid,
            x_test,
            y_test,
            train_mean,
            train_std,
        })
    }

    /// Shift and scale every split's features by the training statistics
    pub fn standardized(mut self) -> Self {
        let mean = self.train_mean.view().insert_axis(Axis(0));
        let std = self.train_std.view().insert_axis(Axis(0));
        for x in [&mut self.x_train, &mut self.x_valid, &mut self.x_test] {
            *x -= &mean;
            *x /= &std;
        }
        self
    }

    pub fn n_features(&self) -> usize {
        self.x_train.ncols()
    }
}

/// Training mean and population standard deviation per feature
fn feature_stats(x: &Array2<f64>) -> Result<(Array1<f64>, Array1<f64>)> {
    let mean = x
        .mean_axis(Axis(0))
        .ok_or_else(|| FidelityError::DataError("cannot take statistics of an empty matrix".to_string()))?;
    let std = x
        .std_axis(Axis(0), 0.0)
        .mapv(|s| if s > 0.0 && s.is_finite() { s } else { 1.0 });
    Ok((mean, std))
}
