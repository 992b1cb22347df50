//! Export fit results, fitted curves, and posterior chains.
//!
//! Three artifacts:
//! - results CSV: one row per data point with the fitted value and residual,
//!   easy to consume in spreadsheets or downstream scripts
//! - fit JSON: the portable representation of a finished fit
//!   (`domain::FitFile` defines the schema)
//! - chain CSV: one row per (step, walker) with a column per free parameter

use std::fs::File;
use std::io::Write;
use std::path::Path;

use crate::domain::{FitFile, SourceCurve};
use crate::error::AppError;
use crate::fit::Source;
use crate::mcmc::Chain;

/// Write per-point results for every source. `curves` must follow the same
/// source order as `sources` (as produced by `Fitter::curves`).
pub fn write_results_csv(
    path: &Path,
    sources: &[Source],
    curves: &[SourceCurve],
) -> Result<(), AppError> {
    if sources.len() != curves.len() {
        return Err(AppError::new(2, "Source and curve counts differ."));
    }

    let mut file = File::create(path).map_err(|e| {
        AppError::new(2, format!("Failed to create results CSV '{}': {e}", path.display()))
    })?;

    writeln!(file, "source,x,y,yerr,y_fit,residual")
        .map_err(|e| AppError::new(2, format!("Failed to write results CSV header: {e}")))?;

    for (source, curve) in sources.iter().zip(curves.iter()) {
        for (i, &x) in source.x.iter().enumerate() {
            let y = source.y[i];
            let yerr = source.yerr[i];
            let y_fit = curve.y_fit[i];
            writeln!(
                file,
                "{},{:.10},{:.10},{:.10},{:.10},{:.10}",
                source.name,
                x,
                y,
                yerr,
                y_fit,
                (y - y_fit) / yerr,
            )
            .map_err(|e| AppError::new(2, format!("Failed to write results CSV row: {e}")))?;
        }
    }
    Ok(())
}

/// Write a fit JSON file.
pub fn write_fit_json(path: &Path, fit: &FitFile) -> Result<(), AppError> {
    let file = File::create(path).map_err(|e| {
        AppError::new(2, format!("Failed to create fit JSON '{}': {e}", path.display()))
    })?;
    serde_json::to_writer_pretty(file, fit)
        .map_err(|e| AppError::new(2, format!("Failed to write fit JSON: {e}")))?;
    Ok(())
}

/// Read a fit JSON file.
pub fn read_fit_json(path: &Path) -> Result<FitFile, AppError> {
    let file = File::open(path).map_err(|e| {
        AppError::new(2, format!("Failed to open fit JSON '{}': {e}", path.display()))
    })?;
    let fit: FitFile = serde_json::from_reader(file)
        .map_err(|e| AppError::new(2, format!("Invalid fit JSON: {e}")))?;
    Ok(fit)
}

/// Write the full chain: `step,walker` plus one column per free parameter.
pub fn write_chain_csv(path: &Path, chain: &Chain) -> Result<(), AppError> {
    let mut file = File::create(path).map_err(|e| {
        AppError::new(2, format!("Failed to create chain CSV '{}': {e}", path.display()))
    })?;

    writeln!(file, "step,walker,{}", chain.names.join(","))
        .map_err(|e| AppError::new(2, format!("Failed to write chain CSV header: {e}")))?;

    for step in 0..chain.steps {
        for walker in 0..chain.walkers {
            let row = chain
                .position(step, walker)
                .iter()
                .map(|v| format!("{v:.10e}"))
                .collect::<Vec<_>>()
                .join(",");
            writeln!(file, "{step},{walker},{row}")
                .map_err(|e| AppError::new(2, format!("Failed to write chain CSV row: {e}")))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{FitMethod, FitStatistics, FittedParameter};
    use std::path::PathBuf;

    fn temp_path(tag: &str, ext: &str) -> PathBuf {
        let mut p = std::env::temp_dir();
        p.push(format!("hfsfit-export-{}-{tag}.{ext}", std::process::id()));
        p
    }

    #[test]
    fn fit_json_round_trips() {
        let fit = FitFile {
            tool: "hfsfit".to_string(),
            created: chrono::NaiveDate::from_ymd_opt(2025, 3, 14)
                .unwrap()
                .and_hms_opt(9, 26, 53)
                .unwrap(),
            method: FitMethod::Poisson,
            statistics: FitStatistics {
                chisqr: 42.0,
                redchi: 1.05,
                aic: 10.0,
                bic: 12.0,
                ndata: 44,
                nvarys: 4,
                nfree: 40,
                llh: Some(-21.0),
            },
            parameters: vec![FittedParameter {
                name: "scan___hfs___a_lower".to_string(),
                value: 501.2,
                stderr: Some(0.8),
                min: f64::NEG_INFINITY,
                max: f64::INFINITY,
                vary: true,
                tied_to: None,
            }],
            correlations: vec![(
                "scan___hfs___a_lower".to_string(),
                "scan___hfs___centroid".to_string(),
                -0.42,
            )],
            curves: vec![SourceCurve {
                source: "scan".to_string(),
                x: vec![0.0, 1.0],
                y_fit: vec![10.0, 11.0],
            }],
        };

        let path = temp_path("roundtrip", "json");
        write_fit_json(&path, &fit).unwrap();
        let loaded = read_fit_json(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(loaded.tool, "hfsfit");
        assert_eq!(loaded.created, fit.created);
        assert_eq!(loaded.method, FitMethod::Poisson);
        assert_eq!(loaded.statistics.ndata, 44);
        assert_eq!(loaded.statistics.llh, Some(-21.0));
        assert_eq!(loaded.parameters[0].name, "scan___hfs___a_lower");
        assert_eq!(loaded.correlations[0].2, -0.42);
        assert_eq!(loaded.curves[0].y_fit, vec![10.0, 11.0]);
    }

    #[test]
    fn results_csv_has_one_row_per_point() {
        let source = Source::new("scan", vec![0.0, 1.0, 2.0], vec![4.0, 9.0, 16.0], None).unwrap();
        let curve = SourceCurve {
            source: "scan".to_string(),
            x: vec![0.0, 1.0, 2.0],
            y_fit: vec![4.0, 10.0, 16.0],
        };

        let path = temp_path("results", "csv");
        write_results_csv(&path, std::slice::from_ref(&source), &[curve]).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        std::fs::remove_file(&path).ok();

        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "source,x,y,yerr,y_fit,residual");
        assert_eq!(lines.len(), 4);
        assert!(lines[2].starts_with("scan,1.0000000000,9.0000000000,3.0000000000,10.0000000000,"));
    }

    #[test]
    fn mismatched_curve_count_is_rejected() {
        let path = temp_path("mismatch", "csv");
        let source = Source::new("scan", vec![0.0], vec![1.0], None).unwrap();
        let err = write_results_csv(&path, std::slice::from_ref(&source), &[]).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }
}
