//! Loading and averaging trial records

use super::{trial_file_name, TrialRecord};
use crate::error::{FidelityError, Result};
use polars::prelude::*;
use std::collections::BTreeMap;
use std::fs::File;
use std::path::Path;
use tracing::{debug, info};

/// The complete, validated set of trial records for a run.
///
/// Every (dataset, trial) pair must be present and every record must carry
/// the same metric names; anything else is an aggregation error.
#[derive(Debug, Clone)]
pub struct TrialSet {
    /// Dataset name and its records in trial order
    datasets: Vec<(String, Vec<TrialRecord>)>,
    metrics: Vec<String>,
}

impl TrialSet {
    /// Read `<trials_dir>/<dataset>_<trial>.json` for every pair
    pub fn load(trials_dir: &Path, datasets: &[String], trials: &[usize]) -> Result<Self> {
        if datasets.is_empty() || trials.is_empty() {
            return Err(FidelityError::Aggregation("no datasets or trials to aggregate".to_string()));
        }

        let mut problems = Vec::new();
        let mut loaded = Vec::with_capacity(datasets.len());

        for dataset in datasets {
            let mut records = Vec::with_capacity(trials.len());
            for &trial in trials {
                let path = trials_dir.join(trial_file_name(dataset, trial));
                match TrialRecord::read_json(&path) {
                    Ok(record) => records.push(record),
                    Err(e) => problems.push(format!("{}#{} ({}): {}", dataset, trial, path.display(), e)),
                }
            }
            loaded.push((dataset.clone(), records));
        }

        if !problems.is_empty() {
            return Err(FidelityError::Aggregation(format!(
                "{} of {} trial records missing or unreadable: {}",
                problems.len(),
                datasets.len() * trials.len(),
                problems.join("; ")
            )));
        }

        debug!(records = datasets.len() * trials.len(), dir = %trials_dir.display(), "trial records loaded");
        Self::from_records(loaded)
    }

    /// Build from in-memory records, applying the same consistency checks
    pub fn from_records(datasets: Vec<(String, Vec<TrialRecord>)>) -> Result<Self> {
        let first = datasets
            .iter()
            .flat_map(|(_, records)| records.first())
            .next()
            .ok_or_else(|| FidelityError::Aggregation("no trial records".to_string()))?;
        let metrics: Vec<String> = first.metrics().map(str::to_string).collect();

        let mut problems = Vec::new();
        for (dataset, records) in &datasets {
            if records.is_empty() {
                problems.push(format!("{} has no trials", dataset));
            }
            for (i, record) in records.iter().enumerate() {
                if !record.metrics().eq(metrics.iter().map(String::as_str)) {
                    let keys: Vec<&str> = record.metrics().collect();
                    problems.push(format!("{} record {} has metrics [{}]", dataset, i + 1, keys.join(", ")));
                }
            }
        }

        if !problems.is_empty() {
            return Err(FidelityError::Aggregation(format!(
                "inconsistent trial records (expected [{}]): {}",
                metrics.join(", "),
                problems.join("; ")
            )));
        }

        Ok(Self { datasets, metrics })
    }

    /// Metric names shared by every record, sorted
    pub fn metrics(&self) -> &[String] {
        &self.metrics
    }

    pub fn datasets(&self) -> impl Iterator<Item = &str> {
        self.datasets.iter().map(|(name, _)| name.as_str())
    }

    pub fn records(&self, dataset: &str) -> Option<&[TrialRecord]> {
        self.datasets
            .iter()
            .find(|(name, _)| name == dataset)
            .map(|(_, records)| records.as_slice())
    }

    /// Per-trial values of one metric, NaN included, in trial order
    pub fn samples(&self, dataset: &str, metric: &str) -> Option<Vec<f64>> {
        let records = self.records(dataset)?;
        records.iter().map(|r| r.get(metric)).collect()
    }
}

/// Per-dataset means of every metric
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateTable {
    metrics: Vec<String>,
    rows: Vec<(String, Vec<f64>)>,
}

/// Running sums per (dataset, metric), finalized by one division pass
pub fn aggregate_means(set: &TrialSet) -> AggregateTable {
    let mut sums: BTreeMap<(&str, &str), (f64, usize)> = BTreeMap::new();
    for (dataset, records) in &set.datasets {
        for record in records {
            for (metric, value) in record.iter() {
                let entry = sums.entry((dataset.as_str(), metric)).or_insert((0.0, 0));
                entry.0 += value;
                entry.1 += 1;
            }
        }
    }

    let rows = set
        .datasets()
        .map(|dataset| {
            let means = set
                .metrics
                .iter()
                .map(|metric| match sums.get(&(dataset, metric.as_str())) {
                    Some(&(sum, count)) if count > 0 => sum / count as f64,
                    _ => f64::NAN,
                })
                .collect();
            (dataset.to_string(), means)
        })
        .collect();

    AggregateTable {
        metrics: set.metrics.clone(),
        rows,
    }
}

impl AggregateTable {
    pub fn metrics(&self) -> &[String] {
        &self.metrics
    }

    /// Mean of `metric` over the trials of `dataset`
    pub fn mean(&self, dataset: &str, metric: &str) -> Option<f64> {
        let col = self.metrics.iter().position(|m| m == metric)?;
        self.rows
            .iter()
            .find(|(name, _)| name == dataset)
            .map(|(_, values)| values[col])
    }

    pub fn rows(&self) -> impl Iterator<Item = (&str, &[f64])> {
        self.rows.iter().map(|(name, values)| (name.as_str(), values.as_slice()))
    }

    /// Columnar view: `dataset` followed by one column per metric
    pub fn to_dataframe(&self) -> Result<DataFrame> {
        let mut columns = Vec::with_capacity(self.metrics.len() + 1);
        let names: Vec<&str> = self.rows.iter().map(|(name, _)| name.as_str()).collect();
        columns.push(Series::new("dataset".into(), names));
        for (col, metric) in self.metrics.iter().enumerate() {
            let values: Vec<f64> = self.rows.iter().map(|(_, values)| values[col]).collect();
            columns.push(Series::new(metric.as_str().into(), values));
        }
        Ok(DataFrame::new(columns)?)
    }

    /// Write the table as CSV with a `dataset,<metrics...>` header
    pub fn write_csv(&self, path: &Path) -> Result<()> {
        let mut df = self.to_dataframe()?;
        let mut file = File::create(path)?;
        CsvWriter::new(&mut file).include_header(true).finish(&mut df)?;
        info!(path = %path.display(), datasets = self.rows.len(), "aggregate table written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(pairs: &[(&str, f64)]) -> TrialRecord {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_mean_of_two_trials() {
        let set = TrialSet::from_records(vec![(
            "toy".to_string(),
            vec![record(&[("m", 1.0)]), record(&[("m", 3.0)])],
        )])
        .unwrap();
        let table = aggregate_means(&set);
        assert_eq!(table.mean("toy", "m"), Some(2.0));
        assert_eq!(table.mean("toy", "other"), None);
    }

    #[test]
    fn test_nan_propagates_into_mean() {
        let set = TrialSet::from_records(vec![(
            "toy".to_string(),
            vec![record(&[("m", 1.0)]), record(&[("m", f64::NAN)])],
        )])
        .unwrap();
        assert!(aggregate_means(&set).mean("toy", "m").unwrap().is_nan());
        assert_eq!(set.samples("toy", "m").unwrap().len(), 2);
    }

    #[test]
    fn test_inconsistent_keys_rejected() {
        let result = TrialSet::from_records(vec![
            ("a".to_string(), vec![record(&[("m", 1.0)])]),
            ("b".to_string(), vec![record(&[("m", 1.0), ("n", 2.0)])]),
        ]);
        match result {
            Err(FidelityError::Aggregation(msg)) => assert!(msg.contains("b record 1")),
            other => panic!("expected aggregation error, got {:?}", other),
        }
    }

    #[test]
    fn test_rows_follow_dataset_order() {
        let set = TrialSet::from_records(vec![
            ("zeta".to_string(), vec![record(&[("m", 1.0)])]),
            ("alpha".to_string(), vec![record(&[("m", 2.0)])]),
        ])
        .unwrap();
        let table = aggregate_means(&set);
        let names: Vec<&str> = table.rows().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["zeta", "alpha"]);

        let df = table.to_dataframe().unwrap();
        assert_eq!(df.shape(), (2, 2));
    }
}
