//! Explanation-fidelity evaluation
//!
//! - [`fidelity`] - perturbation protocol comparing surrogates to the model
//! - [`trial`] - one (dataset, trial) unit and the parallel runner
//! - [`aggregate`] - loading trial records and averaging them per dataset
//! - [`stats`] - Welch's unequal-variance t-test between explainers

pub mod aggregate;
pub mod fidelity;
pub mod stats;
pub mod trial;

pub use aggregate::{aggregate_means, AggregateTable, TrialSet};
pub use fidelity::{FidelityEvaluator, FidelityReport};
pub use stats::{significance, welch_t_test, SignificanceReport, WelchResult};
pub use trial::{trial_file_name, TrialFailure, TrialRunner};

use crate::error::{FidelityError, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Metric holding the model's test-set RMSE against labels
pub const MODEL_RMSE: &str = "model_rmse";

/// Name of the fidelity metric for `explainer` at noise `scale`, e.g. `lime_rmse_0.1`.
///
/// Whole-number scales keep their decimal point: `lime_rmse_1.0`.
pub fn rmse_metric(explainer: &str, scale: f64) -> String {
    format!("{}_rmse_{:?}", explainer, scale)
}

/// Metric name → value for one (dataset, trial) unit.
///
/// Non-finite values are stored as JSON `null` and read back as NaN, so a
/// diverged trial stays visible instead of breaking the file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrialRecord(BTreeMap<String, f64>);

impl TrialRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, metric: impl Into<String>, value: f64) {
        self.0.insert(metric.into(), value);
    }

    pub fn get(&self, metric: &str) -> Option<f64> {
        self.0.get(metric).copied()
    }

    pub fn metrics(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Read a record written by [`TrialRecord::write_json`]
    pub fn read_json(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Write the record, replacing `path` only once the full file is on disk
    pub fn write_json(&self, path: &Path) -> Result<()> {
        let tmp = path.with_extension("json.tmp");
        let text = serde_json::to_string_pretty(self)?;
        fs::write(&tmp, text)?;
        fs::rename(&tmp, path).map_err(|e| {
            let _ = fs::remove_file(&tmp);
            FidelityError::IoError(e)
        })
    }
}

impl FromIterator<(String, f64)> for TrialRecord {
    fn from_iter<I: IntoIterator<Item = (String, f64)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl Serialize for TrialRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let finite: BTreeMap<&str, Option<f64>> = self
            .0
            .iter()
            .map(|(k, &v)| (k.as_str(), v.is_finite().then_some(v)))
            .collect();
        finite.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for TrialRecord {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = BTreeMap::<String, Option<f64>>::deserialize(deserializer)?;
        Ok(Self(
            raw.into_iter()
                .map(|(k, v)| (k, v.unwrap_or(f64::NAN)))
                .collect(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_metric_names() {
        assert_eq!(rmse_metric("lime", 0.1), "lime_rmse_0.1");
        assert_eq!(rmse_metric("maple", 0.25), "maple_rmse_0.25");
        assert_eq!(rmse_metric("lime", 1.0), "lime_rmse_1.0");
        assert_eq!(rmse_metric("maple", 0.0), "maple_rmse_0.0");
    }

    #[test]
    fn test_nan_written_as_null() {
        let mut record = TrialRecord::new();
        record.insert("a", 1.5);
        record.insert("b", f64::NAN);

        let json = serde_json::to_string(&record).unwrap();
        assert_eq!(json, r#"{"a":1.5,"b":null}"#);

        let back: TrialRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back.get("a"), Some(1.5));
        assert!(back.get("b").unwrap().is_nan());
    }

    #[test]
    fn test_write_leaves_no_temp_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("toy_1.json");
        let record: TrialRecord = vec![("m".to_string(), 2.0)].into_iter().collect();

        record.write_json(&path).unwrap();
        assert_eq!(TrialRecord::read_json(&path).unwrap(), record);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
