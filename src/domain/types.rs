//! Shared domain types.
//!
//! These types are intentionally lightweight and serializable so they can be:
//!
//! - used in-memory during fitting
//! - exported to JSON/CSV
//! - reloaded later for plotting or comparisons

use std::path::PathBuf;

use chrono::NaiveDateTime;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Objective used by the optimizer and the sampler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum FitMethod {
    /// Weighted least squares: residuals `(y - f) / yerr`.
    Chisquare,
    /// Poisson maximum likelihood for counting data, expressed through
    /// deviance residuals so the same least-squares driver performs it.
    Poisson,
}

impl FitMethod {
    pub fn display_name(self) -> &'static str {
        match self {
            FitMethod::Chisquare => "chi-square",
            FitMethod::Poisson => "Poisson likelihood",
        }
    }
}

/// Goodness-of-fit numbers in lmfit's conventions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitStatistics {
    pub chisqr: f64,
    pub redchi: f64,
    pub aic: f64,
    pub bic: f64,
    pub ndata: usize,
    pub nvarys: usize,
    /// Degrees of freedom, `ndata - nvarys`.
    pub nfree: usize,
    /// Log-likelihood (`-chisqr/2`); reported for likelihood fits.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub llh: Option<f64>,
}

/// One parameter after a fit, with its uncertainty if available.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FittedParameter {
    /// Qualified name (`source___model___param`).
    pub name: String,
    pub value: f64,
    pub stderr: Option<f64>,
    pub min: f64,
    pub max: f64,
    pub vary: bool,
    /// Qualified name of the parameter this one is tied to, if any.
    pub tied_to: Option<String>,
}

/// Fitted curve for a single source (evaluated at the data x-grid).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceCurve {
    pub source: String,
    pub x: Vec<f64>,
    pub y_fit: Vec<f64>,
}

/// A saved fit file (JSON): the portable representation of a finished fit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitFile {
    pub tool: String,
    pub created: NaiveDateTime,
    pub method: FitMethod,
    pub statistics: FitStatistics,
    pub parameters: Vec<FittedParameter>,
    /// Pairwise correlations above the report threshold.
    pub correlations: Vec<(String, String, f64)>,
    pub curves: Vec<SourceCurve>,
}

/// Noise applied when generating synthetic spectra.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NoiseKind {
    None,
    Poisson,
    Gaussian(f64),
}

impl NoiseKind {
    /// Parse the CLI form: `none`, `poisson`, or `gaussian:<sigma>`.
    pub fn parse(text: &str) -> Result<Self, AppError> {
        let lower = text.to_ascii_lowercase();
        if lower == "none" {
            return Ok(NoiseKind::None);
        }
        if lower == "poisson" {
            return Ok(NoiseKind::Poisson);
        }
        if let Some(sigma) = lower.strip_prefix("gaussian:") {
            let sigma: f64 = sigma
                .parse()
                .map_err(|_| AppError::new(2, format!("Invalid gaussian noise sigma: '{sigma}'")))?;
            if !(sigma.is_finite() && sigma > 0.0) {
                return Err(AppError::new(2, "Gaussian noise sigma must be finite and > 0."));
            }
            return Ok(NoiseKind::Gaussian(sigma));
        }
        Err(AppError::new(
            2,
            format!("Unknown noise kind '{text}' (expected none, poisson, or gaussian:<sigma>)."),
        ))
    }
}

/// A full `fit` run configuration, derived from CLI flags.
#[derive(Debug, Clone)]
pub struct FitConfig {
    pub setup_path: PathBuf,
    pub method: FitMethod,
    pub max_iter: usize,

    pub plot: bool,
    pub plot_width: usize,
    pub plot_height: usize,

    pub export_results: Option<PathBuf>,
    pub export_fit: Option<PathBuf>,
}

/// A full `mcmc` run configuration, derived from CLI flags.
#[derive(Debug, Clone)]
pub struct McmcConfig {
    pub setup_path: PathBuf,
    pub method: FitMethod,
    pub refit: bool,

    pub steps: usize,
    pub walkers: usize,
    pub burn: usize,
    pub thin: usize,
    pub seed: u64,

    pub chain_path: Option<PathBuf>,
    pub progress: bool,
}

/// A full `simulate` run configuration, derived from CLI flags.
#[derive(Debug, Clone)]
pub struct SimulateConfig {
    pub setup_path: PathBuf,
    pub out_path: PathBuf,
    pub x_min: f64,
    pub x_max: f64,
    pub points: usize,
    pub noise: NoiseKind,
    pub seed: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noise_kind_parses_forms() {
        assert_eq!(NoiseKind::parse("none").unwrap(), NoiseKind::None);
        assert_eq!(NoiseKind::parse("poisson").unwrap(), NoiseKind::Poisson);
        assert_eq!(
            NoiseKind::parse("gaussian:2.5").unwrap(),
            NoiseKind::Gaussian(2.5)
        );
        assert!(NoiseKind::parse("gaussian:-1").is_err());
        assert!(NoiseKind::parse("uniform").is_err());
    }
}
