//! Background and standalone-peak models.

use crate::math::{erf, fwhm_to_gamma, fwhm_to_sigma, voigt_height_normalized};
use crate::models::Model;
use crate::params::Parameter;

/// Polynomial background `c0 + c1·x + … + cn·xⁿ`.
#[derive(Debug, Clone)]
pub struct Polynomial {
    degree: usize,
}

impl Polynomial {
    pub fn new(degree: usize) -> Self {
        Self { degree }
    }
}

impl Model for Polynomial {
    fn kind(&self) -> &'static str {
        "polynomial"
    }

    fn default_parameters(&self) -> Vec<(String, Parameter)> {
        (0..=self.degree)
            .map(|i| (format!("c{i}"), Parameter::new(0.0)))
            .collect()
    }

    fn eval(&self, x: &[f64], p: &[f64]) -> Vec<f64> {
        x.iter()
            .map(|&xi| p.iter().rev().fold(0.0, |acc, &c| acc * xi + c))
            .collect()
    }
}

/// Exponential decay `amplitude · exp(-x / tau)`.
#[derive(Debug, Clone)]
pub struct ExponentialDecay;

impl ExponentialDecay {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ExponentialDecay {
    fn default() -> Self {
        Self::new()
    }
}

impl Model for ExponentialDecay {
    fn kind(&self) -> &'static str {
        "exponential_decay"
    }

    fn default_parameters(&self) -> Vec<(String, Parameter)> {
        vec![
            ("amplitude".to_string(), Parameter::new(1.0)),
            ("tau".to_string(), {
                let mut p = Parameter::new(1.0);
                p.min = 0.0;
                p
            }),
        ]
    }

    fn eval(&self, x: &[f64], p: &[f64]) -> Vec<f64> {
        let (amplitude, tau) = (p[0], p[1].max(1e-300));
        x.iter().map(|&xi| amplitude * (-xi / tau).exp()).collect()
    }
}

/// Constant background per region between user-supplied step edges.
///
/// With edges `[e0, …, e_{m-1}]` there are `m + 1` values: `value0` left of
/// `e0`, `value_i` in `[e_{i-1}, e_i)`, `value_m` at and beyond `e_{m-1}`.
#[derive(Debug, Clone)]
pub struct PiecewiseConstant {
    edges: Vec<f64>,
}

impl PiecewiseConstant {
    pub fn new(mut edges: Vec<f64>) -> Self {
        edges.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        Self { edges }
    }
}

impl Model for PiecewiseConstant {
    fn kind(&self) -> &'static str {
        "piecewise_constant"
    }

    fn default_parameters(&self) -> Vec<(String, Parameter)> {
        (0..=self.edges.len())
            .map(|i| (format!("value{i}"), Parameter::new(0.0)))
            .collect()
    }

    fn eval(&self, x: &[f64], p: &[f64]) -> Vec<f64> {
        x.iter()
            .map(|&xi| {
                let region = self.edges.partition_point(|&e| e <= xi);
                p[region]
            })
            .collect()
    }
}

/// A single Voigt peak; `amplitude` is the peak height.
#[derive(Debug, Clone)]
pub struct Voigt;

impl Voigt {
    pub fn new() -> Self {
        Self
    }
}

impl Default for Voigt {
    fn default() -> Self {
        Self::new()
    }
}

fn width_parameter(value: f64) -> Parameter {
    let mut p = Parameter::new(value);
    p.min = 0.0;
    p
}

impl Model for Voigt {
    fn kind(&self) -> &'static str {
        "voigt"
    }

    fn default_parameters(&self) -> Vec<(String, Parameter)> {
        vec![
            ("centroid".to_string(), Parameter::new(0.0)),
            ("amplitude".to_string(), Parameter::new(1.0)),
            ("fwhm_gauss".to_string(), width_parameter(1.0)),
            ("fwhm_lorentz".to_string(), width_parameter(1.0)),
        ]
    }

    fn eval(&self, x: &[f64], p: &[f64]) -> Vec<f64> {
        let (centroid, amplitude) = (p[0], p[1]);
        let sigma = fwhm_to_sigma(p[2]);
        let gamma = fwhm_to_gamma(p[3]);
        x.iter()
            .map(|&xi| amplitude * voigt_height_normalized(xi - centroid, sigma, gamma))
            .collect()
    }
}

/// Voigt peak modulated by an error-function skew factor:
/// `V(x) · (1 + erf(skew · (x - centroid) / (σ√2)))`.
#[derive(Debug, Clone)]
pub struct SkewedVoigt;

impl SkewedVoigt {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SkewedVoigt {
    fn default() -> Self {
        Self::new()
    }
}

impl Model for SkewedVoigt {
    fn kind(&self) -> &'static str {
        "skewed_voigt"
    }

    fn default_parameters(&self) -> Vec<(String, Parameter)> {
        vec![
            ("centroid".to_string(), Parameter::new(0.0)),
            ("amplitude".to_string(), Parameter::new(1.0)),
            ("fwhm_gauss".to_string(), width_parameter(1.0)),
            ("fwhm_lorentz".to_string(), width_parameter(1.0)),
            ("skew".to_string(), Parameter::new(0.0)),
        ]
    }

    fn eval(&self, x: &[f64], p: &[f64]) -> Vec<f64> {
        let (centroid, amplitude) = (p[0], p[1]);
        let sigma = fwhm_to_sigma(p[2]).max(1e-300);
        let gamma = fwhm_to_gamma(p[3]);
        let skew = p[4];
        let norm = sigma * std::f64::consts::SQRT_2;
        x.iter()
            .map(|&xi| {
                let dx = xi - centroid;
                let peak = amplitude * voigt_height_normalized(dx, sigma, gamma);
                peak * (1.0 + erf(skew * dx / norm))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn polynomial_horner_eval() {
        let m = Polynomial::new(2);
        // 1 + 2x + 3x²
        let y = m.eval(&[0.0, 1.0, 2.0], &[1.0, 2.0, 3.0]);
        assert_eq!(y, vec![1.0, 6.0, 17.0]);
    }

    #[test]
    fn exponential_decay_eval() {
        let m = ExponentialDecay::new();
        let y = m.eval(&[0.0, 2.0], &[5.0, 2.0]);
        assert!((y[0] - 5.0).abs() < 1e-12);
        assert!((y[1] - 5.0 * (-1.0f64).exp()).abs() < 1e-12);
    }

    #[test]
    fn piecewise_constant_regions() {
        let m = PiecewiseConstant::new(vec![0.0, 10.0]);
        let y = m.eval(&[-5.0, 0.0, 5.0, 10.0, 20.0], &[1.0, 2.0, 3.0]);
        assert_eq!(y, vec![1.0, 2.0, 2.0, 3.0, 3.0]);
    }

    #[test]
    fn voigt_peak_height_is_amplitude() {
        let m = Voigt::new();
        let y = m.eval(&[5.0], &[5.0, 7.5, 1.0, 0.5]);
        assert!((y[0] - 7.5).abs() < 1e-9);
    }

    #[test]
    fn skewed_voigt_reduces_to_voigt_at_zero_skew() {
        let sv = SkewedVoigt::new();
        let v = Voigt::new();
        let xs = [-2.0, 0.0, 1.5];
        let a = sv.eval(&xs, &[0.0, 2.0, 1.0, 0.5, 0.0]);
        let b = v.eval(&xs, &[0.0, 2.0, 1.0, 0.5]);
        for (ai, bi) in a.iter().zip(b.iter()) {
            assert!((ai - bi).abs() < 1e-12);
        }
    }

    #[test]
    fn skewed_voigt_is_asymmetric_with_skew() {
        let sv = SkewedVoigt::new();
        let y = sv.eval(&[-1.0, 1.0], &[0.0, 2.0, 1.0, 0.5, 1.0]);
        assert!(y[1] > y[0]);
    }
}
