//! Numeric building blocks: least-squares solves, line profiles, angular
//! momentum coupling coefficients.

pub mod linalg;
pub mod voigt;
pub mod wigner;

pub use linalg::solve_least_squares;
pub use voigt::{erf, fwhm_to_gamma, fwhm_to_sigma, total_fwhm, voigt_height_normalized, voigt_profile};
pub use wigner::sixj;
