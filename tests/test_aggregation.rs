//! Integration test: merging trial records and significance testing

use explain_fidelity::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::tempdir;

fn write_record(dir: &Path, dataset: &str, trial: usize, pairs: &[(&str, f64)]) {
    let record: TrialRecord = pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect();
    record
        .write_json(&dir.join(format!("{}_{}.json", dataset, trial)))
        .unwrap();
}

fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

#[test]
fn test_merge_two_trials_averages() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("toy_1.json"), r#"{"m": 1.0}"#).unwrap();
    fs::write(dir.path().join("toy_2.json"), r#"{"m": 3.0}"#).unwrap();

    let set = TrialSet::load(dir.path(), &names(&["toy"]), &[1, 2]).unwrap();
    let table = aggregate_means(&set);
    assert_eq!(table.mean("toy", "m"), Some(2.0));

    let csv = dir.path().join("results.csv");
    table.write_csv(&csv).unwrap();
    let text = fs::read_to_string(&csv).unwrap();
    let mut lines = text.lines();
    assert_eq!(lines.next(), Some("dataset,m"));
    assert!(lines.next().unwrap().starts_with("toy,2"));
}

#[test]
fn test_missing_trial_file_fails_loudly() {
    let dir = tempdir().unwrap();
    write_record(dir.path(), "toy", 1, &[("m", 1.0)]);

    match TrialSet::load(dir.path(), &names(&["toy"]), &[1, 2]) {
        Err(FidelityError::Aggregation(msg)) => {
            assert!(msg.contains("toy#2"), "{}", msg);
            assert!(msg.contains("1 of 2"), "{}", msg);
        }
        other => panic!("expected aggregation error, got {:?}", other),
    }
}

#[test]
fn test_null_metric_reads_as_nan() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("toy_1.json"), r#"{"m": null}"#).unwrap();
    fs::write(dir.path().join("toy_2.json"), r#"{"m": 2.0}"#).unwrap();

    let set = TrialSet::load(dir.path(), &names(&["toy"]), &[1, 2]).unwrap();
    assert!(aggregate_means(&set).mean("toy", "m").unwrap().is_nan());
}

#[test]
fn test_significance_separates_shifted_samples() {
    let dir = tempdir().unwrap();
    let lime = [0.50, 0.52, 0.49, 0.51, 0.50, 0.48];
    let maple = [0.20, 0.21, 0.19, 0.20, 0.22, 0.20];
    for (i, (&l, &m)) in lime.iter().zip(maple.iter()).enumerate() {
        write_record(
            dir.path(),
            "shifted",
            i + 1,
            &[("lime_rmse_0.1", l), ("maple_rmse_0.1", m), ("lime_rmse_0.25", l), ("maple_rmse_0.25", l)],
        );
    }

    let set = TrialSet::load(dir.path(), &names(&["shifted"]), &[1, 2, 3, 4, 5, 6]).unwrap();
    let report = significance(&set, &[0.1, 0.25]);

    assert!(report.p_value("shifted", 0.1).unwrap() < 0.01);
    assert!((report.p_value("shifted", 0.25).unwrap() - 1.0).abs() < 1e-9);
}

#[test]
fn test_rerun_produces_identical_outputs() {
    let dir = tempdir().unwrap();
    let trials_dir = dir.path().join("trials");
    fs::create_dir_all(&trials_dir).unwrap();
    for (dataset, offset) in [("a", 0.0), ("b", 0.3)] {
        for trial in 1..=3 {
            let t = trial as f64;
            write_record(
                &trials_dir,
                dataset,
                trial,
                &[
                    ("model_rmse", 1.0 + offset),
                    ("lime_rmse_0.1", 0.4 + 0.01 * t + offset),
                    ("maple_rmse_0.1", 0.2 + 0.02 * t),
                    ("lime_rmse_0.25", 0.6 + 0.03 * t),
                    ("maple_rmse_0.25", 0.3 + 0.01 * t + offset),
                ],
            );
        }
    }

    let config = ExperimentConfig::default()
        .with_trials_dir(&trials_dir)
        .with_datasets(["a", "b"])
        .with_trials(3);

    let mut outputs = Vec::new();
    for run in 0..2 {
        let results = dir.path().join(format!("results_{}.csv", run));
        let stats = dir.path().join(format!("stats_{}.txt", run));

        let set = TrialSet::load(&config.trials_dir, &config.datasets, &config.trial_indices()).unwrap();
        aggregate_means(&set).write_csv(&results).unwrap();
        significance(&set, &config.fidelity.scales).write_text(&stats).unwrap();

        outputs.push((fs::read(&results).unwrap(), fs::read_to_string(&stats).unwrap()));
    }

    assert_eq!(outputs[0], outputs[1]);
    let stats = &outputs[0].1;
    assert!(stats.starts_with("a\nSigma = 0.1: "));
    assert_eq!(stats.lines().count(), 6);
}
