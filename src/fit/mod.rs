//! Fitting: objective construction, the damped least-squares driver, and the
//! multi-source fitter.

pub mod fitter;
pub mod levmar;

pub use fitter::{FitOutcome, Fitter, NamedModel, Source};
pub use levmar::{LevMarOptions, minimize};
