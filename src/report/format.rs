//! Formatted terminal output for fits and posterior summaries.
//!
//! Formatting code lives in one place so:
//! - the math/fitting code stays clean and testable
//! - output changes are localized (important for future snapshot tests)

use crate::domain::{FitMethod, FitStatistics, FittedParameter};
use crate::fit::FitOutcome;
use crate::io::setup::IngestReport;

/// Format the full fit summary: statistics, parameter table, correlations.
pub fn format_fit_report(outcome: &FitOutcome) -> String {
    let mut out = String::new();

    out.push_str("=== hfsfit - hyperfine spectrum fit ===\n");
    out.push_str(&format!("Method: {}\n", outcome.method.display_name()));
    out.push_str(&format!(
        "Converged: {} ({} iterations)\n",
        if outcome.converged { "yes" } else { "no" },
        outcome.n_iter
    ));
    out.push_str(&format_statistics(&outcome.statistics, outcome.method));

    out.push_str("\nParameters:\n");
    out.push_str(&format_parameter_table(&outcome.parameters));

    if !outcome.correlations.is_empty() {
        out.push_str("\nCorrelations (|rho| >= 0.1):\n");
        let mut sorted = outcome.correlations.clone();
        sorted.sort_by(|a, b| b.2.abs().partial_cmp(&a.2.abs()).unwrap_or(std::cmp::Ordering::Equal));
        for (a, b, rho) in &sorted {
            out.push_str(&format!("  {a} ~ {b}: {rho:+.3}\n"));
        }
    }

    out
}

fn format_statistics(stats: &FitStatistics, method: FitMethod) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "Points: n={} | free parameters: {} | dof: {}\n",
        stats.ndata, stats.nvarys, stats.nfree
    ));
    out.push_str(&format!(
        "chisqr={:.6} | redchi={:.6} | AIC={:.3} | BIC={:.3}\n",
        stats.chisqr, stats.redchi, stats.aic, stats.bic
    ));
    if method == FitMethod::Poisson {
        if let Some(llh) = stats.llh {
            out.push_str(&format!("log-likelihood (up to a constant): {llh:.6}\n"));
        }
    }
    out
}

fn format_parameter_table(parameters: &[FittedParameter]) -> String {
    let name_width = parameters
        .iter()
        .map(|p| p.name.len())
        .max()
        .unwrap_or(4)
        .max(4);

    let mut out = String::new();
    out.push_str(&format!(
        "{:<name_width$} {:>14} {:>12} {:>9}  {}\n",
        "name", "value", "stderr", "rel", "note"
    ));
    out.push_str(&format!(
        "{:-<name_width$} {:-<14} {:-<12} {:-<9}  {:-<20}\n",
        "", "", "", "", ""
    ));

    for p in parameters {
        let stderr = match p.stderr {
            Some(e) => format!("{e:>12.5}"),
            None => format!("{:>12}", "-"),
        };
        let rel = match p.stderr {
            Some(e) if p.value != 0.0 => {
                format!("{:>8.2}%", 100.0 * e / p.value.abs())
            }
            _ => format!("{:>9}", "-"),
        };
        let note = match (&p.tied_to, p.vary) {
            (Some(anchor), _) => format!("= {anchor}"),
            (None, false) => "fixed".to_string(),
            (None, true) => bounds_note(p),
        };
        out.push_str(&format!(
            "{:<name_width$} {:>14.6} {stderr} {rel}  {note}\n",
            p.name, p.value
        ));
    }
    out.push_str(&format_derived_widths(parameters));
    out
}

/// Derived Voigt widths per model, from the fitted Gaussian and Lorentzian
/// FWHMs (Olivero & Longbothum approximation).
fn format_derived_widths(parameters: &[FittedParameter]) -> String {
    let mut out = String::new();
    for p in parameters {
        let Some(prefix) = p.name.strip_suffix("___fwhm_gauss") else {
            continue;
        };
        let lorentz = format!("{prefix}___fwhm_lorentz");
        if let Some(l) = parameters.iter().find(|q| q.name == lorentz) {
            out.push_str(&format!(
                "{prefix} total FWHM: {:.6}\n",
                crate::math::total_fwhm(p.value, l.value)
            ));
        }
    }
    out
}

fn bounds_note(p: &FittedParameter) -> String {
    match (p.min.is_finite(), p.max.is_finite()) {
        (false, false) => String::new(),
        (true, false) => format!("min={}", p.min),
        (false, true) => format!("max={}", p.max),
        (true, true) => format!("in [{}, {}]", p.min, p.max),
    }
}

/// Format per-source ingest outcomes, including row-level problems.
pub fn format_ingest_summary(reports: &[IngestReport]) -> String {
    let mut out = String::new();
    for r in reports {
        out.push_str(&format!(
            "Source {}: {} rows read, {} used\n",
            r.source, r.rows_read, r.rows_used
        ));
        for e in r.row_errors.iter().take(10) {
            out.push_str(&format!("  line {}: {}\n", e.line, e.message));
        }
        if r.row_errors.len() > 10 {
            out.push_str(&format!("  ... and {} more\n", r.row_errors.len() - 10));
        }
    }
    out
}

/// Format the posterior percentile table from a sampled chain.
pub fn format_mcmc_summary(
    percentiles: &[(String, [f64; 3])],
    acceptance: f64,
    steps: usize,
    walkers: usize,
    burn: usize,
    thin: usize,
) -> String {
    let name_width = percentiles
        .iter()
        .map(|(n, _)| n.len())
        .max()
        .unwrap_or(4)
        .max(4);

    let mut out = String::new();
    out.push_str("=== hfsfit - posterior summary ===\n");
    out.push_str(&format!(
        "Chain: {steps} steps x {walkers} walkers | burn={burn} thin={thin}\n"
    ));
    out.push_str(&format!("Acceptance fraction: {acceptance:.3}\n\n"));

    out.push_str(&format!(
        "{:<name_width$} {:>14} {:>14} {:>14}\n",
        "name", "16%", "median", "84%"
    ));
    out.push_str(&format!(
        "{:-<name_width$} {:-<14} {:-<14} {:-<14}\n",
        "", "", "", ""
    ));
    for (name, q) in percentiles {
        out.push_str(&format!(
            "{name:<name_width$} {:>14.6} {:>14.6} {:>14.6}\n",
            q[0], q[1], q[2]
        ));
    }
    out
}
