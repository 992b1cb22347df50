//! Top-level application orchestration.
//!
//! `src/main.rs` is intentionally tiny; this module is the "real main" that:
//! - parses CLI arguments
//! - loads setup files and spectra
//! - runs fitting / sampling / simulation
//! - prints reports/plots
//! - writes optional exports

use clap::Parser;

use crate::cli::{Cli, Command, FitArgs, McmcArgs, SimulateArgs};
use crate::domain::{FitConfig, FitFile, McmcConfig, NoiseKind, SimulateConfig};
use crate::error::AppError;
use crate::mcmc::McmcOptions;

pub mod pipeline;

/// Entry point for the `hfsfit` binary.
pub fn run() -> Result<(), AppError> {
    let cli = Cli::parse();

    match cli.command {
        Command::Fit(args) => handle_fit(args),
        Command::Mcmc(args) => handle_mcmc(args),
        Command::Simulate(args) => handle_simulate(args),
    }
}

fn handle_fit(args: FitArgs) -> Result<(), AppError> {
    let config = fit_config_from_args(&args);
    let run = pipeline::run_fit(&config.setup_path, config.method, config.max_iter)?;

    let ingest_summary = crate::report::format_ingest_summary(&run.ingest);
    if !ingest_summary.is_empty() {
        println!("{ingest_summary}");
    }
    println!("{}", crate::report::format_fit_report(&run.outcome));

    if config.plot {
        let plot = crate::plot::render_ascii_plots(
            &run.fitter.sources,
            &run.outcome.curves,
            config.plot_width,
            config.plot_height,
        );
        println!("{plot}");
    }

    if let Some(path) = &config.export_results {
        crate::io::write_results_csv(path, &run.fitter.sources, &run.outcome.curves)?;
    }
    if let Some(path) = &config.export_fit {
        let fit = FitFile {
            tool: "hfsfit".to_string(),
            created: chrono::Local::now().naive_local(),
            method: run.outcome.method,
            statistics: run.outcome.statistics.clone(),
            parameters: run.outcome.parameters.clone(),
            correlations: run.outcome.correlations.clone(),
            curves: run.outcome.curves.clone(),
        };
        crate::io::write_fit_json(path, &fit)?;
    }

    Ok(())
}

fn handle_mcmc(args: McmcArgs) -> Result<(), AppError> {
    let config = mcmc_config_from_args(&args);

    let mut fitter = if config.refit {
        let run = pipeline::run_fit(&config.setup_path, config.method, 200)?;
        println!("{}", crate::report::format_fit_report(&run.outcome));
        run.fitter
    } else {
        let (_, fitter, _) = pipeline::load(&config.setup_path)?;
        fitter
    };

    // Auto-widen the walker count when the default is too small for the
    // number of free parameters. 2*ndim is always even.
    let ndim = fitter.free_parameters()?.len();
    let walkers = config.walkers.max(2 * ndim);

    let opts = McmcOptions {
        steps: config.steps,
        walkers,
        seed: config.seed,
        progress: config.progress,
    };
    let chain = crate::mcmc::sample(&fitter, config.method, &opts)?;

    let percentiles = chain.percentiles(config.burn, config.thin)?;
    println!(
        "{}",
        crate::report::format_mcmc_summary(
            &percentiles,
            chain.acceptance_fraction(),
            chain.steps,
            chain.walkers,
            config.burn,
            config.thin,
        )
    );

    // Leave the fitter at the posterior medians.
    let medians: Vec<f64> = percentiles.iter().map(|(_, q)| q[1]).collect();
    fitter.set_free_values(&medians)?;

    if let Some(path) = &config.chain_path {
        crate::io::write_chain_csv(path, &chain)?;
        println!("Chain written to {}", path.display());
    }

    Ok(())
}

fn handle_simulate(args: SimulateArgs) -> Result<(), AppError> {
    let config = simulate_config_from_args(&args)?;
    let setup = crate::io::load_setup(&config.setup_path)?;
    let written = crate::data::simulate(&setup, &config)?;

    for w in &written {
        println!("Source {}: {} points written to {}", w.source, w.points, w.path.display());
    }
    Ok(())
}

pub fn fit_config_from_args(args: &FitArgs) -> FitConfig {
    FitConfig {
        setup_path: args.setup.clone(),
        method: args.method,
        max_iter: args.max_iter.max(1),
        plot: args.plot && !args.no_plot,
        plot_width: args.width,
        plot_height: args.height,
        export_results: args.export.clone(),
        export_fit: args.export_fit.clone(),
    }
}

pub fn mcmc_config_from_args(args: &McmcArgs) -> McmcConfig {
    McmcConfig {
        setup_path: args.setup.clone(),
        method: args.method,
        refit: args.refit && !args.no_refit,
        steps: args.steps,
        walkers: args.walkers,
        burn: args.burn,
        thin: args.thin.max(1),
        seed: args.seed,
        chain_path: args.export_chain.clone(),
        progress: !args.no_progress,
    }
}

pub fn simulate_config_from_args(args: &SimulateArgs) -> Result<SimulateConfig, AppError> {
    Ok(SimulateConfig {
        setup_path: args.setup.clone(),
        out_path: args.out.clone(),
        x_min: args.x_min,
        x_max: args.x_max,
        points: args.points,
        noise: NoiseKind::parse(&args.noise)?,
        seed: args.seed,
    })
}
