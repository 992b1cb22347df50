//! Spectral models.
//!
//! A model declares an ordered list of named parameters (with defaults) and
//! evaluates itself on an x-grid given current parameter values in that same
//! order. The fitter owns the parameter values; models stay stateless with
//! respect to the fit so the same model can be evaluated from optimizer
//! threads in parallel.

use crate::params::Parameter;

pub mod hfs;
pub mod shapes;

pub use hfs::Hfs;
pub use shapes::{ExponentialDecay, PiecewiseConstant, Polynomial, SkewedVoigt, Voigt};

/// A spectral component that can be superimposed on a data source.
pub trait Model: Send + Sync {
    /// Short kind label for reports (e.g. `hfs`, `polynomial`).
    fn kind(&self) -> &'static str;

    /// Ordered parameter declarations with default values/bounds.
    ///
    /// `eval` receives values in exactly this order.
    fn default_parameters(&self) -> Vec<(String, Parameter)>;

    /// Evaluate the model on `x` with parameter values `p`.
    fn eval(&self, x: &[f64], p: &[f64]) -> Vec<f64>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shape_models_report_kinds() {
        let m = Polynomial::new(2);
        assert_eq!(m.kind(), "polynomial");
        let m = ExponentialDecay::new();
        assert_eq!(m.kind(), "exponential_decay");
    }
}
