//! Input/output: spectrum CSV ingest, setup files, result exports.

pub mod export;
pub mod ingest;
pub mod setup;

pub use export::{read_fit_json, write_chain_csv, write_fit_json, write_results_csv};
pub use ingest::{RowError, Spectrum, load_spectrum};
pub use setup::{IngestReport, SetupFile, build_fitter, build_fitter_on_grid, load_setup};
