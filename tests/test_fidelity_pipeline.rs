//! Integration test: explainers, fidelity protocol and trial runner end-to-end

use explain_fidelity::prelude::*;
use ndarray::{array, Array1, Array2};
use polars::prelude::*;
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;
use std::fs::File;
use std::path::Path;
use tempfile::tempdir;

fn linear_target(x: &Array2<f64>) -> Array1<f64> {
    x.column(0).mapv(|v| 2.0 * v) - &x.column(1)
}

fn uniform(rng: &mut Xoshiro256PlusPlus, n: usize) -> Array2<f64> {
    Array2::from_shape_simple_fn((n, 2), || rng.gen_range(-2.0..2.0))
}

fn linear_split(seed: u64) -> DatasetSplit {
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
    let x_train = uniform(&mut rng, 200);
    let x_valid = uniform(&mut rng, 100);
    let x_test = uniform(&mut rng, 20);
    DatasetSplit::new(
        x_train.clone(),
        linear_target(&x_train),
        x_valid.clone(),
        linear_target(&x_valid),
        x_test.clone(),
        linear_target(&x_test),
    )
    .unwrap()
}

/// `x0,x1,target` CSV with a linear target
fn write_linear_csv(path: &Path, n: usize, seed: u64) {
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
    let x = uniform(&mut rng, n);
    let y = linear_target(&x);
    let mut df = df!(
        "x0" => x.column(0).to_vec(),
        "x1" => x.column(1).to_vec(),
        "target" => y.to_vec()
    )
    .unwrap();
    let mut file = File::create(path).unwrap();
    CsvWriter::new(&mut file).finish(&mut df).unwrap();
}

fn true_model() -> FnPredictor<fn(&Array2<f64>) -> Result<Array1<f64>>> {
    fn predict(x: &Array2<f64>) -> Result<Array1<f64>> {
        Ok(linear_target(x))
    }
    FnPredictor(predict as fn(&Array2<f64>) -> Result<Array1<f64>>)
}

#[test]
fn test_linear_model_coefficients_recovered_by_both_explainers() {
    let split = linear_split(1);
    let model = true_model();

    let lime = LimeExplainer::new(&split.x_train, LimeConfig::default()).unwrap();
    let maple = MapleExplainer::fit(
        &split.x_train,
        &model.predict(&split.x_train).unwrap(),
        &split.x_valid,
        &model.predict(&split.x_valid).unwrap(),
        &MapleConfig::default().with_seed(5),
    )
    .unwrap();

    let mut rng = Xoshiro256PlusPlus::seed_from_u64(2);
    let expected = array![0.0, 2.0, -1.0];
    for x in split.x_test.rows().into_iter().take(5) {
        let from_lime = lime.explain_instance(x, &model, &mut rng).unwrap();
        let from_maple = maple.explain_point(x).unwrap();

        for (got, want) in from_lime.coefficients.as_array().iter().zip(expected.iter()) {
            assert!((got - want).abs() < 0.05, "lime {} vs {}", got, want);
        }
        for (got, want) in from_maple.coefficients.as_array().iter().zip(expected.iter()) {
            assert!((got - want).abs() < 0.05, "maple {} vs {}", got, want);
        }
    }
}

#[test]
fn test_linear_model_has_near_zero_infidelity() {
    let split = linear_split(3);
    let runner = TrialRunner::new(ExperimentConfig::default().with_datasets(["linear"]).with_seed(9)).unwrap();
    let mut generator = runner.generator_for("linear", 1);

    let record = runner.evaluate_model(&split, &true_model(), &mut generator).unwrap();
    for metric in ["lime_rmse_0.1", "lime_rmse_0.25", "maple_rmse_0.1", "maple_rmse_0.25"] {
        let v = record.get(metric).unwrap();
        assert!((0.0..0.05).contains(&v), "{} = {}", metric, v);
    }
    assert!(record.get("model_rmse").unwrap() < 1e-12);
}

#[test]
fn test_zero_noise_scale_scores_the_explained_point() {
    let split = linear_split(6);
    let runner = TrialRunner::new(
        ExperimentConfig::default()
            .with_datasets(["linear"])
            .with_seed(2)
            .with_fidelity(FidelityEvaluator::new(vec![0.0, 0.1], 5).unwrap()),
    )
    .unwrap();
    let mut generator = runner.generator_for("linear", 1);

    let record = runner.evaluate_model(&split, &true_model(), &mut generator).unwrap();
    let names: Vec<&str> = record.metrics().collect();
    assert_eq!(
        names,
        vec!["lime_rmse_0.0", "lime_rmse_0.1", "maple_rmse_0.0", "maple_rmse_0.1", "model_rmse"]
    );
    for metric in ["lime_rmse_0.0", "maple_rmse_0.0"] {
        let v = record.get(metric).unwrap();
        assert!((0.0..0.05).contains(&v), "{} = {}", metric, v);
    }
}

#[test]
fn test_rmse_grows_at_most_linearly_with_scale() {
    let split = linear_split(4);
    let runner = TrialRunner::new(ExperimentConfig::default().with_datasets(["linear"]).with_seed(1)).unwrap();
    let mut generator = runner.generator_for("linear", 1);

    let record = runner.evaluate_model(&split, &true_model(), &mut generator).unwrap();
    for explainer in ["lime", "maple"] {
        let small = record.get(&format!("{}_rmse_0.1", explainer)).unwrap();
        let large = record.get(&format!("{}_rmse_0.25", explainer)).unwrap();
        assert!(small >= 0.0 && large >= 0.0);
        assert!(large <= 2.5 * small + 1e-3, "{}: {} at 0.25 vs {} at 0.1", explainer, large, small);
    }
}

#[test]
fn test_constant_zero_model_has_zero_infidelity() {
    let dir = tempdir().unwrap();
    let csv = dir.path().join("toy.csv");
    write_linear_csv(&csv, 120, 7);

    let mut generator = PerturbationGenerator::from_entropy();
    let split = DatasetLoader::new().load(&csv, generator.rng_mut()).unwrap();
    let runner = TrialRunner::new(ExperimentConfig::default().with_datasets(["toy"])).unwrap();

    let record = runner
        .evaluate_model(&split, &ConstantPredictor(0.0), &mut generator)
        .unwrap();
    for metric in ["lime_rmse_0.1", "lime_rmse_0.25", "maple_rmse_0.1", "maple_rmse_0.25"] {
        assert!(record.get(metric).unwrap().abs() < 1e-12, "{} should be zero", metric);
    }
}

#[test]
fn test_run_all_isolates_failures() {
    let dir = tempdir().unwrap();
    write_linear_csv(&dir.path().join("good.csv"), 80, 1);

    let config = ExperimentConfig::default()
        .with_datasets_dir(dir.path())
        .with_trials_dir(dir.path().join("trials"))
        .with_datasets(["good", "missing"])
        .with_trials(2)
        .with_workers(2)
        .with_seed(3)
        .with_mode(ExperimentMode::ExplainModel { model: ModelKind::Linear })
        .with_lime(LimeConfig::default().with_num_samples(50))
        .with_maple(MapleConfig::default().with_n_estimators(10));
    let runner = TrialRunner::new(config).unwrap();

    let failures = runner.run_all().unwrap();
    assert_eq!(failures.len(), 2);
    assert!(failures.iter().all(|f| f.dataset == "missing"));

    for trial in 1..=2 {
        let record = TrialRecord::read_json(&runner.trial_path("good", trial)).unwrap();
        assert_eq!(record.len(), 5);
        assert!(!runner.trial_path("missing", trial).exists());
    }
}

#[test]
fn test_seeded_runs_are_reproducible() {
    let dir = tempdir().unwrap();
    write_linear_csv(&dir.path().join("toy.csv"), 60, 2);

    let config = ExperimentConfig::default()
        .with_datasets_dir(dir.path())
        .with_trials_dir(dir.path().join("trials"))
        .with_datasets(["toy"])
        .with_seed(42)
        .with_mode(ExperimentMode::ExplainModel { model: ModelKind::RandomForest })
        .with_lime(LimeConfig::default().with_num_samples(50))
        .with_maple(MapleConfig::default().with_n_estimators(10));
    let runner = TrialRunner::new(config).unwrap();

    let first = runner.run("toy", 1).unwrap();
    let second = runner.run("toy", 1).unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_kernel_and_network_black_boxes_run_end_to_end() {
    let split = linear_split(8);
    let runner = TrialRunner::new(
        ExperimentConfig::default()
            .with_datasets(["linear"])
            .with_seed(3)
            .with_lime(LimeConfig::default().with_num_samples(100))
            .with_maple(MapleConfig::default().with_n_estimators(20)),
    )
    .unwrap();

    for kind in [ModelKind::Svr, ModelKind::Mlp] {
        let mut generator = runner.generator_for("linear", 1);
        let model = kind.fit(&split.x_train, &split.y_train, 5).unwrap();
        let record = runner.evaluate_model(&split, &model, &mut generator).unwrap();

        assert_eq!(record.len(), 5, "{}", kind);
        assert!(record.iter().all(|(_, v)| v.is_finite() && v >= 0.0), "{}", kind);
    }
}
