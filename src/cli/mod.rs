//! Command-line parsing for the hyperfine spectrum fitter.
//!
//! The goal of this module is to keep **argument parsing** and **command
//! dispatch** separate from the modeling/math code.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::domain::FitMethod;

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(name = "hfsfit", version, about = "Hyperfine-structure spectrum fitter")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fit the setup's model to its spectra, print a report, optionally
    /// plot/export.
    Fit(FitArgs),
    /// Sample the posterior of the free parameters with an ensemble MCMC
    /// walker.
    Mcmc(McmcArgs),
    /// Generate synthetic spectra from a setup file.
    Simulate(SimulateArgs),
}

/// Options for `hfsfit fit`.
#[derive(Debug, Parser, Clone)]
pub struct FitArgs {
    /// Setup JSON describing sources, models, and ties.
    #[arg(value_name = "SETUP")]
    pub setup: PathBuf,

    /// Fit objective.
    #[arg(long, value_enum, default_value_t = FitMethod::Chisquare)]
    pub method: FitMethod,

    /// Maximum optimizer iterations.
    #[arg(long, default_value_t = 200)]
    pub max_iter: usize,

    /// Render an ASCII plot in the terminal (enabled by default).
    #[arg(long, default_value_t = true)]
    pub plot: bool,

    /// Disable the terminal plot.
    #[arg(long)]
    pub no_plot: bool,

    /// Plot width (columns).
    #[arg(long, default_value_t = 100)]
    pub width: usize,

    /// Plot height (rows).
    #[arg(long, default_value_t = 25)]
    pub height: usize,

    /// Export per-point results to CSV.
    #[arg(long)]
    pub export: Option<PathBuf>,

    /// Export the fit (parameters + statistics + curves) to JSON.
    #[arg(long = "export-fit")]
    pub export_fit: Option<PathBuf>,
}

/// Options for `hfsfit mcmc`.
#[derive(Debug, Parser, Clone)]
pub struct McmcArgs {
    /// Setup JSON describing sources, models, and ties.
    #[arg(value_name = "SETUP")]
    pub setup: PathBuf,

    /// Fit objective (defines the likelihood).
    #[arg(long, value_enum, default_value_t = FitMethod::Chisquare)]
    pub method: FitMethod,

    /// Run the optimizer first and start walkers from the fitted values
    /// (enabled by default).
    #[arg(long, default_value_t = true)]
    pub refit: bool,

    /// Start walkers from the setup values without optimizing first.
    #[arg(long)]
    pub no_refit: bool,

    /// Chain length (steps per walker).
    #[arg(long, default_value_t = 1000)]
    pub steps: usize,

    /// Number of walkers (even, at least twice the free parameter count).
    #[arg(long, default_value_t = 50)]
    pub walkers: usize,

    /// Steps to discard before the posterior summary.
    #[arg(long, default_value_t = 200)]
    pub burn: usize,

    /// Keep every n-th step in the posterior summary.
    #[arg(long, default_value_t = 1)]
    pub thin: usize,

    /// Random seed for walker initialization and proposals.
    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// Export the full chain to CSV.
    #[arg(long = "export-chain")]
    pub export_chain: Option<PathBuf>,

    /// Hide the progress bar.
    #[arg(long)]
    pub no_progress: bool,
}

/// Options for `hfsfit simulate`.
#[derive(Debug, Parser, Clone)]
pub struct SimulateArgs {
    /// Setup JSON describing the sources and models to evaluate.
    #[arg(value_name = "SETUP")]
    pub setup: PathBuf,

    /// Output CSV path (suffixed with the source name when the setup has
    /// several sources).
    #[arg(short = 'o', long, default_value = "spectrum.csv")]
    pub out: PathBuf,

    /// Grid start.
    #[arg(long, allow_hyphen_values = true)]
    pub x_min: f64,

    /// Grid end.
    #[arg(long, allow_hyphen_values = true)]
    pub x_max: f64,

    /// Number of grid points.
    #[arg(long, default_value_t = 500)]
    pub points: usize,

    /// Noise to apply: `none`, `poisson`, or `gaussian:<sigma>`.
    #[arg(long, default_value = "poisson")]
    pub noise: String,

    /// Random seed for the noise.
    #[arg(long, default_value_t = 42)]
    pub seed: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_fit_subcommand() {
        let cli = Cli::parse_from(["hfsfit", "fit", "setup.json", "--method", "poisson", "--no-plot"]);
        match cli.command {
            Command::Fit(args) => {
                assert_eq!(args.setup, PathBuf::from("setup.json"));
                assert_eq!(args.method, FitMethod::Poisson);
                assert!(args.no_plot);
            }
            _ => panic!("expected fit"),
        }
    }

    #[test]
    fn parses_mcmc_defaults() {
        let cli = Cli::parse_from(["hfsfit", "mcmc", "setup.json"]);
        match cli.command {
            Command::Mcmc(args) => {
                assert_eq!(args.steps, 1000);
                assert_eq!(args.walkers, 50);
                assert_eq!(args.burn, 200);
                assert!(args.refit);
                assert!(!args.no_refit);
            }
            _ => panic!("expected mcmc"),
        }
    }

    #[test]
    fn parses_simulate_with_negative_range() {
        let cli = Cli::parse_from([
            "hfsfit", "simulate", "setup.json", "--x-min", "-2000", "--x-max", "2000",
            "--noise", "gaussian:5.0",
        ]);
        match cli.command {
            Command::Simulate(args) => {
                assert_eq!(args.x_min, -2000.0);
                assert_eq!(args.x_max, 2000.0);
                assert_eq!(args.noise, "gaussian:5.0");
            }
            _ => panic!("expected simulate"),
        }
    }
}
