//! Shared fit pipeline used by the `fit` and `mcmc` front-ends.
//!
//! Keeping this in one place avoids duplicating the core workflow:
//! setup load -> spectrum ingest -> fitter build -> optimize
//!
//! The command handlers can then focus on presentation and exports.

use std::path::Path;

use crate::domain::FitMethod;
use crate::error::AppError;
use crate::fit::{FitOutcome, Fitter};
use crate::fit::levmar::LevMarOptions;
use crate::io::setup::{self, IngestReport, SetupFile};

/// All computed outputs of a single fit run.
pub struct RunOutput {
    pub fitter: Fitter,
    pub ingest: Vec<IngestReport>,
    pub outcome: FitOutcome,
}

/// Load the setup, build the fitter from its spectra, and optimize.
pub fn run_fit(setup_path: &Path, method: FitMethod, max_iter: usize) -> Result<RunOutput, AppError> {
    let (_, mut fitter, ingest) = load(setup_path)?;

    let opts = LevMarOptions {
        max_iter,
        ..LevMarOptions::default()
    };
    let outcome = fitter.fit(method, &opts)?;

    Ok(RunOutput {
        fitter,
        ingest,
        outcome,
    })
}

/// Load the setup and build the fitter without optimizing.
pub fn load(setup_path: &Path) -> Result<(SetupFile, Fitter, Vec<IngestReport>), AppError> {
    let setup = setup::load_setup(setup_path)?;
    let base_dir = setup_path.parent().unwrap_or_else(|| Path::new("."));
    let (fitter, ingest) = setup::build_fitter(&setup, base_dir)?;
    Ok((setup, fitter, ingest))
}
