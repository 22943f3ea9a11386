//! Explain Fidelity CLI Module
//!
//! Command-line interface for running trials, merging records and testing
//! significance.

use clap::{Args, Parser, Subcommand, ValueEnum};
use colored::*;
use std::path::PathBuf;
use std::time::Instant;

use crate::config::{ExperimentConfig, ExperimentMode};
use crate::evaluation::{aggregate_means, significance, TrialRunner, TrialSet};
use crate::training::ModelKind;

// ─── Styling helpers ───────────────────────────────────────────────────────────

fn dim(s: &str) -> ColoredString    { s.truecolor(100, 100, 100) }
fn accent(s: &str) -> ColoredString { s.truecolor(120, 170, 255) }
fn muted(s: &str) -> ColoredString  { s.truecolor(140, 140, 140) }
fn ok(s: &str) -> ColoredString     { s.truecolor(100, 210, 120) }

fn step_run(msg: &str) {
    print!("  {} {}... ", accent("›"), msg);
}

fn step_done(detail: &str) {
    println!("{} {}", ok("done"), dim(detail));
}

fn section(title: &str) {
    println!();
    println!("  {}", title.white().bold());
    println!("  {}", dim(&"─".repeat(56)));
}

fn format_value(v: f64) -> String {
    if v.is_nan() { "nan".to_string() } else { format!("{:.4}", v) }
}

// ─── CLI definition ────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "explain-fidelity")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Local explanation fidelity benchmark: LIME-style vs MAPLE-style surrogates")]
#[command(long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run every (dataset, trial) unit and write one JSON record each
    Run(ExperimentArgs),

    /// Average trial records per dataset into the results table
    Merge(ExperimentArgs),

    /// Welch t-test of LIME vs MAPLE fidelity per dataset and noise scale
    Stats(ExperimentArgs),

    /// Run, then merge, then stats
    All(ExperimentArgs),
}

/// Which experiment the trials run
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ModeArg {
    /// Fit a black-box model and explain it
    ExplainModel,
    /// MAPLE is the model; LIME explains MAPLE
    SelfExplanation,
}

/// Options shared by every command; each overrides the config file
#[derive(Args, Debug, Clone, Default)]
pub struct ExperimentArgs {
    /// JSON experiment configuration
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Directory holding <dataset>.csv files
    #[arg(long)]
    pub datasets_dir: Option<PathBuf>,

    /// Directory for per-trial JSON records
    #[arg(long)]
    pub trials_dir: Option<PathBuf>,

    /// Dataset name (repeatable)
    #[arg(short, long = "dataset")]
    pub datasets: Vec<String>,

    /// Trials per dataset
    #[arg(short, long)]
    pub trials: Option<usize>,

    /// Worker threads
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Experiment mode
    #[arg(long, value_enum)]
    pub mode: Option<ModeArg>,

    /// Black-box model (random_forest, ridge, linear, svr, mlp)
    #[arg(long)]
    pub model: Option<ModelKind>,

    /// Neighbours sampled per LIME explanation
    #[arg(long)]
    pub lime_samples: Option<usize>,

    /// Base seed for reproducible runs
    #[arg(long)]
    pub seed: Option<u64>,

    /// Output path of the aggregate table
    #[arg(long)]
    pub results: Option<PathBuf>,

    /// Output path of the significance report
    #[arg(long)]
    pub stats: Option<PathBuf>,
}

impl ExperimentArgs {
    /// Config file (or defaults) with command-line overrides applied
    pub fn resolve(&self) -> anyhow::Result<ExperimentConfig> {
        let mut config = match &self.config {
            Some(path) => ExperimentConfig::from_json_file(path)?,
            None => ExperimentConfig::default(),
        };

        if let Some(dir) = &self.datasets_dir {
            config.datasets_dir = dir.clone();
        }
        if let Some(dir) = &self.trials_dir {
            config.trials_dir = dir.clone();
        }
        if !self.datasets.is_empty() {
            config.datasets = self.datasets.clone();
        }
        if let Some(trials) = self.trials {
            config.trials = trials;
        }
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if let Some(samples) = self.lime_samples {
            config.lime.num_samples = samples;
        }
        if let Some(seed) = self.seed {
            config.seed = Some(seed);
        }
        if let Some(path) = &self.results {
            config.results_path = path.clone();
        }
        if let Some(path) = &self.stats {
            config.stats_path = path.clone();
        }

        let current_model = match config.mode {
            ExperimentMode::ExplainModel { model } => model,
            ExperimentMode::SelfExplanation => ModelKind::RandomForest,
        };
        config.mode = match (self.mode, self.model) {
            (Some(ModeArg::SelfExplanation), Some(_)) => {
                anyhow::bail!("--model has no effect in self-explanation mode")
            }
            (Some(ModeArg::SelfExplanation), None) => ExperimentMode::SelfExplanation,
            (Some(ModeArg::ExplainModel), model) => ExperimentMode::ExplainModel {
                model: model.unwrap_or(current_model),
            },
            (None, Some(model)) => ExperimentMode::ExplainModel { model },
            (None, None) => config.mode,
        };

        config.validate()?;
        Ok(config)
    }
}

// ─── Commands ──────────────────────────────────────────────────────────────────

pub fn cmd_run(config: &ExperimentConfig) -> anyhow::Result<()> {
    section("Run");
    println!("  {:<12} {}", muted("Mode"), config.mode);
    println!("  {:<12} {}", muted("Datasets"), config.datasets.join(", "));
    println!("  {:<12} {} × {} workers", muted("Trials"), config.trials, config.workers);
    println!("  {:<12} {}", muted("LIME budget"), config.lime.num_samples);
    println!();

    let runner = TrialRunner::new(config.clone())?;
    let total = config.datasets.len() * config.trials;

    step_run(&format!("Running {} trials", total));
    let start = Instant::now();
    let failures = runner.run_all()?;
    step_done(&format!("{:.1?}", start.elapsed()));

    if failures.is_empty() {
        println!("  {} {} records in {}", ok("✓"), total, config.trials_dir.display());
        println!();
        return Ok(());
    }

    println!();
    for failure in &failures {
        println!(
            "  {} {}#{} {}",
            "✗".red(),
            failure.dataset,
            failure.trial,
            dim(&failure.error.to_string())
        );
    }
    println!();
    anyhow::bail!("{} of {} trials failed", failures.len(), total)
}

pub fn cmd_merge(config: &ExperimentConfig) -> anyhow::Result<()> {
    section("Merge");

    step_run("Loading trial records");
    let set = TrialSet::load(&config.trials_dir, &config.datasets, &config.trial_indices())?;
    step_done(&format!("{} datasets × {} trials", config.datasets.len(), config.trials));

    let table = aggregate_means(&set);
    table.write_csv(&config.results_path)?;

    println!();
    print!("  {:<20}", muted("dataset"));
    for metric in table.metrics() {
        print!(" {:>16}", muted(metric));
    }
    println!();
    println!("  {}", dim(&"─".repeat(20 + 17 * table.metrics().len())));
    for (dataset, values) in table.rows() {
        print!("  {:<20}", dataset);
        for &v in values {
            print!(" {:>16}", format_value(v));
        }
        println!();
    }
    println!();
    println!("  {} {}", ok("✓"), config.results_path.display());
    println!();
    Ok(())
}

pub fn cmd_stats(config: &ExperimentConfig) -> anyhow::Result<()> {
    section("Significance");

    step_run("Loading trial records");
    let set = TrialSet::load(&config.trials_dir, &config.datasets, &config.trial_indices())?;
    step_done(&format!("{} datasets × {} trials", config.datasets.len(), config.trials));

    let report = significance(&set, &config.fidelity.scales);
    report.write_text(&config.stats_path)?;

    println!();
    for dataset in set.datasets() {
        println!("  {}", dataset.white().bold());
        for &scale in report.scales() {
            let p = report.p_value(dataset, scale).unwrap_or(f64::NAN);
            let shown = format_value(p);
            let shown = if p < 0.05 { shown.green() } else { shown.normal() };
            println!("    {:<14} {}", muted(&format!("sigma = {}", scale)), shown);
        }
    }
    println!();
    println!("  {} {}", ok("✓"), config.stats_path.display());
    println!();
    Ok(())
}

pub fn cmd_all(config: &ExperimentConfig) -> anyhow::Result<()> {
    cmd_run(config)?;
    cmd_merge(config)?;
    cmd_stats(config)
}
