//! Reporting utilities: formatted fit and posterior summaries.

pub mod format;

pub use format::{format_fit_report, format_ingest_summary, format_mcmc_summary};
