//! Significance testing between explainers
//!
//! For each dataset and noise scale the per-trial fidelity RMSEs of the two
//! explainers are compared with Welch's unequal-variance t-test.

use super::{rmse_metric, TrialSet};
use crate::error::Result;
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, StudentsT};
use std::fmt::Write as _;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

/// Outcome of a two-sided Welch t-test
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WelchResult {
    /// t statistic, `(mean_a - mean_b) / se`
    pub t: f64,
    /// Welch-Satterthwaite degrees of freedom
    pub df: f64,
    /// Two-sided p-value
    pub p_value: f64,
}

impl WelchResult {
    fn undefined() -> Self {
        Self {
            t: f64::NAN,
            df: f64::NAN,
            p_value: f64::NAN,
        }
    }
}

fn mean_var(samples: &[f64]) -> (f64, f64) {
    let n = samples.len() as f64;
    let mean = samples.iter().sum::<f64>() / n;
    let var = samples.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1.0);
    (mean, var)
}

/// Two-sample t-test without assuming equal variances.
///
/// Fewer than two samples in either group gives NaN. When both groups have
/// zero variance the p-value is 1 for equal means and 0 otherwise.
pub fn welch_t_test(a: &[f64], b: &[f64]) -> WelchResult {
    if a.len() < 2 || b.len() < 2 {
        return WelchResult::undefined();
    }

    let (n1, n2) = (a.len() as f64, b.len() as f64);
    let (mean1, var1) = mean_var(a);
    let (mean2, var2) = mean_var(b);
    let se1 = var1 / n1;
    let se2 = var2 / n2;
    let se_sq = se1 + se2;

    if se_sq == 0.0 {
        let df = n1 + n2 - 2.0;
        return if mean1 == mean2 {
            WelchResult { t: 0.0, df, p_value: 1.0 }
        } else {
            let t = if mean1 > mean2 { f64::INFINITY } else { f64::NEG_INFINITY };
            WelchResult { t, df, p_value: 0.0 }
        };
    }

    let t = (mean1 - mean2) / se_sq.sqrt();
    let df = se_sq * se_sq / (se1 * se1 / (n1 - 1.0) + se2 * se2 / (n2 - 1.0));

    let p_value = match StudentsT::new(0.0, 1.0, df) {
        Ok(dist) => (2.0 * dist.cdf(-t.abs())).min(1.0),
        Err(_) => f64::NAN,
    };

    WelchResult { t, df, p_value }
}

/// Welch test results per dataset and noise scale
#[derive(Debug, Clone, PartialEq)]
pub struct SignificanceReport {
    scales: Vec<f64>,
    /// Dataset name and one result per scale
    rows: Vec<(String, Vec<WelchResult>)>,
}

/// Compare `lime_rmse_<s>` with `maple_rmse_<s>` for every dataset and scale.
///
/// NaN trials are dropped from each sample before testing; the number dropped
/// is logged since it changes the effective sample size.
pub fn significance(set: &TrialSet, scales: &[f64]) -> SignificanceReport {
    let rows = set
        .datasets()
        .map(|dataset| {
            let results = scales
                .iter()
                .map(|&scale| {
                    let lime = finite_samples(set, dataset, &rmse_metric("lime", scale));
                    let maple = finite_samples(set, dataset, &rmse_metric("maple", scale));
                    welch_t_test(&lime, &maple)
                })
                .collect();
            (dataset.to_string(), results)
        })
        .collect();

    SignificanceReport {
        scales: scales.to_vec(),
        rows,
    }
}

fn finite_samples(set: &TrialSet, dataset: &str, metric: &str) -> Vec<f64> {
    let all = set.samples(dataset, metric).unwrap_or_default();
    let kept: Vec<f64> = all.iter().copied().filter(|v| !v.is_nan()).collect();
    if kept.len() < all.len() {
        warn!(
            dataset,
            metric,
            dropped = all.len() - kept.len(),
            kept = kept.len(),
            "NaN trials excluded from significance test"
        );
    }
    if all.is_empty() {
        warn!(dataset, metric, "metric missing from trial records");
    }
    kept
}

impl SignificanceReport {
    pub fn scales(&self) -> &[f64] {
        &self.scales
    }

    /// Test result for `dataset` at `scale`
    pub fn result(&self, dataset: &str, scale: f64) -> Option<WelchResult> {
        let k = self.scales.iter().position(|&s| s == scale)?;
        self.rows
            .iter()
            .find(|(name, _)| name == dataset)
            .map(|(_, results)| results[k])
    }

    pub fn p_value(&self, dataset: &str, scale: f64) -> Option<f64> {
        self.result(dataset, scale).map(|r| r.p_value)
    }

    /// One block per dataset: the name, then `Sigma = <s>: <p>` per scale
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (dataset, results) in &self.rows {
            let _ = writeln!(out, "{}", dataset);
            for (scale, result) in self.scales.iter().zip(results) {
                let _ = writeln!(out, "Sigma = {:?}: {}", scale, result.p_value);
            }
        }
        out
    }

    pub fn write_text(&self, path: &Path) -> Result<()> {
        fs::write(path, self.render())?;
        info!(path = %path.display(), datasets = self.rows.len(), "significance report written");
        Ok(())
    }
}
