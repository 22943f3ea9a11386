use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use explain_fidelity::prelude::*;
use ndarray::{Array1, Array2};
use rand::prelude::*;
use rand_xoshiro::Xoshiro256PlusPlus;

fn create_regression_data(n_rows: usize, n_features: usize, seed: u64) -> (Array2<f64>, Array1<f64>) {
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
    let x = Array2::from_shape_simple_fn((n_rows, n_features), || rng.gen_range(-2.0..2.0));
    // Smooth nonlinear target so both surrogates have something to approximate
    let y = x
        .rows()
        .into_iter()
        .map(|r| r.iter().enumerate().map(|(j, v)| (v * (j + 1) as f64).sin()).sum::<f64>())
        .collect();
    (x, y)
}

fn bench_explainers(c: &mut Criterion) {
    let mut group = c.benchmark_group("explain");
    group.sample_size(10);

    for n_features in [4, 8].iter() {
        let (x_train, y_train) = create_regression_data(400, *n_features, 1);
        let (x_valid, y_valid) = create_regression_data(200, *n_features, 2);
        let (x_test, _) = create_regression_data(10, *n_features, 3);

        let mut model = RandomForest::new(50).with_random_state(0);
        model.fit(&x_train, &y_train).unwrap();

        let lime = LimeExplainer::new(&x_train, LimeConfig::default()).unwrap();
        let maple = MapleExplainer::fit(
            &x_train,
            &y_train,
            &x_valid,
            &y_valid,
            &MapleConfig::default().with_n_estimators(50).with_seed(0),
        )
        .unwrap();

        group.bench_with_input(BenchmarkId::new("lime", n_features), &x_test, |b, x_test| {
            let mut rng = Xoshiro256PlusPlus::seed_from_u64(0);
            b.iter(|| {
                for row in x_test.rows() {
                    black_box(lime.explain_instance(row, &model, &mut rng).unwrap());
                }
            })
        });

        group.bench_with_input(BenchmarkId::new("maple", n_features), &x_test, |b, x_test| {
            b.iter(|| {
                for row in x_test.rows() {
                    black_box(maple.explain_point(row).unwrap());
                }
            })
        });
    }

    group.finish();
}

fn bench_fidelity_pass(c: &mut Criterion) {
    let mut group = c.benchmark_group("fidelity");
    group.sample_size(10);

    let (x_train, y_train) = create_regression_data(300, 6, 4);
    let (x_valid, y_valid) = create_regression_data(150, 6, 5);
    let (x_test, y_test) = create_regression_data(30, 6, 6);
    let split = DatasetSplit::new(x_train, y_train, x_valid, y_valid, x_test, y_test).unwrap();

    let runner = TrialRunner::new(
        ExperimentConfig::default()
            .with_datasets(["bench"])
            .with_seed(0)
            .with_maple(MapleConfig::default().with_n_estimators(50)),
    )
    .unwrap();
    let model = ModelKind::Ridge.fit(&split.x_train, &split.y_train, 0).unwrap();

    group.bench_function("evaluate_model", |b| {
        b.iter(|| {
            let mut generator = runner.generator_for("bench", 1);
            black_box(runner.evaluate_model(&split, &model, &mut generator).unwrap())
        })
    });

    group.finish();
}

fn bench_welch(c: &mut Criterion) {
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(7);
    let a: Vec<f64> = (0..25).map(|_| rng.gen::<f64>()).collect();
    let b: Vec<f64> = (0..25).map(|_| rng.gen::<f64>() + 0.1).collect();

    c.bench_function("welch_t_test", |bench| bench.iter(|| welch_t_test(black_box(&a), black_box(&b))));
}

criterion_group!(benches, bench_explainers, bench_fidelity_pass, bench_welch);
criterion_main!(benches);
