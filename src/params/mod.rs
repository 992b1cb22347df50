//! Fit parameters: values, bounds, vary flags, and linear ties.
//!
//! Each model declares an ordered list of named parameters. The fitter
//! flattens them into one set with qualified names
//! (`source___model___param`), removes fixed and tied entries from the free
//! vector, and hands the optimizer *internal* coordinates in which bounds
//! cannot be violated.
//!
//! Bound handling follows the MINUIT-style transforms:
//!
//! - two-sided:  `v = min + (max - min) · (sin(u) + 1) / 2`
//! - lower only: `v = min - 1 + sqrt(u² + 1)`
//! - upper only: `v = max + 1 - sqrt(u² + 1)`
//! - unbounded:  `v = u`

use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// A single fit parameter.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Parameter {
    pub value: f64,
    pub min: f64,
    pub max: f64,
    pub vary: bool,
}

impl Parameter {
    pub fn new(value: f64) -> Self {
        Self {
            value,
            min: f64::NEG_INFINITY,
            max: f64::INFINITY,
            vary: true,
        }
    }

    pub fn fixed(value: f64) -> Self {
        Self {
            vary: false,
            ..Self::new(value)
        }
    }

    pub fn bounded(value: f64, min: f64, max: f64) -> Self {
        Self {
            value: value.clamp(min, max),
            min,
            max,
            vary: true,
        }
    }

    /// Clamp the stored value into the bounds.
    pub fn clamp_value(&mut self) {
        self.value = self.value.clamp(self.min, self.max);
    }

    pub fn has_lower(&self) -> bool {
        self.min.is_finite()
    }

    pub fn has_upper(&self) -> bool {
        self.max.is_finite()
    }

    /// Map the external value into internal (unbounded) coordinates.
    pub fn to_internal(&self) -> Result<f64, AppError> {
        if !(self.min < self.max) {
            return Err(AppError::new(
                2,
                format!("Invalid bounds: min={} >= max={}", self.min, self.max),
            ));
        }
        let v = self.value.clamp(self.min, self.max);
        Ok(match (self.has_lower(), self.has_upper()) {
            (true, true) => {
                let frac = (2.0 * (v - self.min) / (self.max - self.min) - 1.0).clamp(-1.0, 1.0);
                frac.asin()
            }
            (true, false) => ((v - self.min + 1.0).powi(2) - 1.0).max(0.0).sqrt(),
            (false, true) => ((self.max - v + 1.0).powi(2) - 1.0).max(0.0).sqrt(),
            (false, false) => v,
        })
    }

    /// Map internal coordinates back to the external (bounded) value.
    pub fn to_external(&self, u: f64) -> f64 {
        match (self.has_lower(), self.has_upper()) {
            (true, true) => self.min + (self.max - self.min) * (u.sin() + 1.0) / 2.0,
            (true, false) => self.min - 1.0 + (u * u + 1.0).sqrt(),
            (false, true) => self.max + 1.0 - (u * u + 1.0).sqrt(),
            (false, false) => u,
        }
    }

    /// `dv/du` at internal coordinate `u`; used to convert the covariance of
    /// internal coordinates into external-parameter uncertainties.
    pub fn external_gradient(&self, u: f64) -> f64 {
        match (self.has_lower(), self.has_upper()) {
            (true, true) => (self.max - self.min) / 2.0 * u.cos(),
            (true, false) => u / (u * u + 1.0).sqrt(),
            (false, true) => -u / (u * u + 1.0).sqrt(),
            (false, false) => 1.0,
        }
    }
}

/// A linear tie: `target = scale * source + offset`.
///
/// Ties are resolved once per objective evaluation; the target drops out of
/// the free vector. Sharing a parameter across sources is the identity tie.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tie {
    pub target: String,
    pub source: String,
    #[serde(default = "one")]
    pub scale: f64,
    #[serde(default)]
    pub offset: f64,
}

fn one() -> f64 {
    1.0
}

impl Tie {
    pub fn same_as(target: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            source: source.into(),
            scale: 1.0,
            offset: 0.0,
        }
    }

    pub fn apply(&self, source_value: f64) -> f64 {
        self.scale * source_value + self.offset
    }
}

/// Join a source, model, and parameter name into the qualified form used in
/// reports and chain exports.
pub fn qualified_name(source: &str, model: &str, param: &str) -> String {
    format!("{source}___{model}___{param}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_sided_transform_round_trips() {
        let p = Parameter::bounded(3.0, 1.0, 10.0);
        let u = p.to_internal().unwrap();
        assert!((p.to_external(u) - 3.0).abs() < 1e-12);
    }

    #[test]
    fn two_sided_transform_respects_bounds() {
        let p = Parameter::bounded(3.0, 1.0, 10.0);
        for &u in &[-100.0, -1.0, 0.0, 2.0, 50.0] {
            let v = p.to_external(u);
            assert!((1.0..=10.0).contains(&v), "u={u} -> v={v}");
        }
    }

    #[test]
    fn one_sided_transforms_round_trip() {
        let mut p = Parameter::new(5.0);
        p.min = 2.0;
        let u = p.to_internal().unwrap();
        assert!((p.to_external(u) - 5.0).abs() < 1e-12);

        let mut p = Parameter::new(-4.0);
        p.max = 0.0;
        let u = p.to_internal().unwrap();
        assert!((p.to_external(u) - -4.0).abs() < 1e-12);
    }

    #[test]
    fn unbounded_transform_is_identity() {
        let p = Parameter::new(1.25);
        let u = p.to_internal().unwrap();
        assert_eq!(u, 1.25);
        assert_eq!(p.to_external(u), 1.25);
        assert_eq!(p.external_gradient(u), 1.0);
    }

    #[test]
    fn invalid_bounds_are_rejected() {
        let p = Parameter::bounded(1.0, 5.0, 5.0);
        assert!(p.to_internal().is_err());
    }

    #[test]
    fn tie_applies_scale_and_offset() {
        let tie = Tie {
            target: "a___m___x".to_string(),
            source: "b___m___x".to_string(),
            scale: 2.0,
            offset: 1.0,
        };
        assert_eq!(tie.apply(3.0), 7.0);
    }
}
