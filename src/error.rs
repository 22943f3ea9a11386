//! Error types for the fidelity benchmark

use thiserror::Error;

/// Result type alias for fidelity operations
pub type Result<T> = std::result::Result<T, FidelityError>;

/// Main error type for the benchmark
#[derive(Error, Debug)]
pub enum FidelityError {
    #[error("Data error: {0}")]
    DataError(String),

    #[error("Training error: {0}")]
    TrainingError(String),

    #[error("Computation error: {0}")]
    ComputationError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Invalid shape: expected {expected}, got {actual}")]
    ShapeError { expected: String, actual: String },

    #[error("Model not fitted")]
    ModelNotFitted,

    #[error("Invalid parameter: {name} = {value}, {reason}")]
    InvalidParameter {
        name: String,
        value: String,
        reason: String,
    },

    #[error("Trial {dataset}#{trial} failed: {source}")]
    Trial {
        dataset: String,
        trial: usize,
        #[source]
        source: Box<FidelityError>,
    },

    #[error("Aggregation error: {0}")]
    Aggregation(String),
}

impl FidelityError {
    /// Attach the (dataset, trial) unit that produced this error
    pub fn in_trial(self, dataset: &str, trial: usize) -> Self {
        match self {
            already @ FidelityError::Trial { .. } => already,
            other => FidelityError::Trial {
                dataset: dataset.to_string(),
                trial,
                source: Box::new(other),
            },
        }
    }
}

impl From<polars::error::PolarsError> for FidelityError {
    fn from(err: polars::error::PolarsError) -> Self {
        FidelityError::DataError(err.to_string())
    }
}

impl From<serde_json::Error> for FidelityError {
    fn from(err: serde_json::Error) -> Self {
        FidelityError::SerializationError(err.to_string())
    }
}

impl From<ndarray::ShapeError> for FidelityError {
    fn from(err: ndarray::ShapeError) -> Self {
        FidelityError::ShapeError {
            expected: "valid shape".to_string(),
            actual: err.to_string(),
        }
    }
}
