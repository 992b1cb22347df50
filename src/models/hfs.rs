//! Hyperfine-structure spectrum model.
//!
//! For a nuclear spin `I` and an electronic transition `J_lower → J_upper`,
//! each fine-structure level splits into hyperfine levels labelled by
//! `F = |I - J| … I + J`. The level shift relative to the fine-structure
//! energy is parameterized by the hyperfine constants `A` (magnetic dipole),
//! `B` (electric quadrupole) and `C` (magnetic octupole):
//!
//! ```text
//! K  = F(F+1) - I(I+1) - J(J+1)
//! ΔE = A·K/2
//!    + B·(¾K(K+1) - I(I+1)J(J+1)) / (2I(2I-1)J(2J-1))          (I,J > ½)
//!    + C·5·(K³/4 + K² + K(-3I(I+1)J(J+1) + I(I+1) + J(J+1) + 3)/4
//!           - I(I+1)J(J+1)) / (I(I-1)(2I-1)J(J-1)(2J-1))       (I,J > 1)
//! ```
//!
//! Transitions obey ΔF ∈ {-1, 0, +1} with F=0 → F=0 forbidden. Relative
//! line strengths default to the Racah intensities
//! `(2F_l+1)(2F_u+1)·{J_u F_u I; F_l J_l 1}²`, normalized to unit sum; a
//! free-amplitude mode replaces them with one fit parameter per line.
//!
//! Each line is a Voigt profile with FWHMs shared across the spectrum, and
//! the model optionally repeats every line `n` times at multiples of a
//! sidepeak offset (supersonic-gas-cell satellite peaks) with relative
//! intensities `poisson^k / k!`.

use crate::error::AppError;
use crate::math::{fwhm_to_gamma, fwhm_to_sigma, sixj, voigt_profile};
use crate::models::Model;
use crate::params::Parameter;

/// Per-level coefficients of the A/B/C constants in the hyperfine shift.
#[derive(Debug, Clone, Copy, PartialEq)]
struct ShiftCoeffs {
    a: f64,
    b: f64,
    c: f64,
}

fn shift_coeffs(two_i: i64, two_j: i64, two_f: i64) -> ShiftCoeffs {
    let i = two_i as f64 / 2.0;
    let j = two_j as f64 / 2.0;
    let f = two_f as f64 / 2.0;
    let k = f * (f + 1.0) - i * (i + 1.0) - j * (j + 1.0);

    let a = 0.5 * k;

    // Quadrupole and octupole denominators vanish at low spins; the
    // corresponding constants are physically zero there.
    let b = if two_i > 1 && two_j > 1 {
        (0.75 * k * (k + 1.0) - i * (i + 1.0) * j * (j + 1.0))
            / (2.0 * i * (2.0 * i - 1.0) * j * (2.0 * j - 1.0))
    } else {
        0.0
    };

    let c = if two_i > 2 && two_j > 2 {
        5.0 * (k.powi(3) / 4.0 + k * k
            + k * (-3.0 * i * (i + 1.0) * j * (j + 1.0) + i * (i + 1.0) + j * (j + 1.0) + 3.0)
                / 4.0
            - i * (i + 1.0) * j * (j + 1.0))
            / (i * (i - 1.0) * (2.0 * i - 1.0) * j * (j - 1.0) * (2.0 * j - 1.0))
    } else {
        0.0
    };

    ShiftCoeffs { a, b, c }
}

/// One allowed hyperfine transition.
#[derive(Debug, Clone)]
struct Transition {
    two_f_lower: i64,
    two_f_upper: i64,
    lower: ShiftCoeffs,
    upper: ShiftCoeffs,
    /// Normalized Racah intensity.
    racah: f64,
}

impl Transition {
    fn label(&self) -> String {
        format!(
            "{}__{}",
            f_label(self.two_f_lower),
            f_label(self.two_f_upper)
        )
    }
}

/// Render a (half-)integer F value for parameter names: `2`, `5_2`, …
fn f_label(two_f: i64) -> String {
    if two_f % 2 == 0 {
        format!("{}", two_f / 2)
    } else {
        format!("{two_f}_2")
    }
}

/// Hyperfine-structure spectrum for one atomic transition.
#[derive(Debug, Clone)]
pub struct Hfs {
    two_i: i64,
    two_j_lower: i64,
    two_j_upper: i64,
    /// Fixed Racah intensities (true) or one free amplitude per line (false).
    racah_amplitudes: bool,
    n_sidepeaks: usize,
    transitions: Vec<Transition>,
}

/// Convert a spin quantum number to its doubled integer representation.
fn to_two_j(value: f64, what: &str) -> Result<i64, AppError> {
    let doubled = value * 2.0;
    if !(doubled.is_finite() && doubled >= 0.0 && (doubled - doubled.round()).abs() < 1e-9) {
        return Err(AppError::new(
            2,
            format!("{what} must be a non-negative integer or half-integer, got {value}"),
        ));
    }
    Ok(doubled.round() as i64)
}

impl Hfs {
    pub fn new(
        spin: f64,
        j_lower: f64,
        j_upper: f64,
        racah_amplitudes: bool,
        n_sidepeaks: usize,
    ) -> Result<Self, AppError> {
        let two_i = to_two_j(spin, "Nuclear spin I")?;
        let two_j_lower = to_two_j(j_lower, "J (lower level)")?;
        let two_j_upper = to_two_j(j_upper, "J (upper level)")?;

        let transitions = build_transitions(two_i, two_j_lower, two_j_upper)?;

        Ok(Self {
            two_i,
            two_j_lower,
            two_j_upper,
            racah_amplitudes,
            n_sidepeaks,
            transitions,
        })
    }

    pub fn n_transitions(&self) -> usize {
        self.transitions.len()
    }

    /// Peak positions for the given parameter values (main peaks only).
    pub fn positions(&self, p: &[f64]) -> Vec<f64> {
        let centroid = p[0];
        self.transitions
            .iter()
            .map(|t| {
                let lower = p[1] * t.lower.a + p[2] * t.lower.b + p[3] * t.lower.c;
                let upper = p[4] * t.upper.a + p[5] * t.upper.b + p[6] * t.upper.c;
                centroid + upper - lower
            })
            .collect()
    }

    /// True when the quadrupole term vanishes identically for this spin
    /// combination (the B constants then have no effect on the spectrum).
    fn quadrupole_inactive(&self) -> bool {
        self.two_i <= 1 || (self.two_j_lower <= 1 && self.two_j_upper <= 1)
    }
}

fn build_transitions(
    two_i: i64,
    two_j_lower: i64,
    two_j_upper: i64,
) -> Result<Vec<Transition>, AppError> {
    // J = 0 on both levels carries no hyperfine splitting (and no dipole
    // strength either); the spectrum is the bare fine-structure line.
    if two_j_lower == 0 && two_j_upper == 0 {
        let coeffs = shift_coeffs(two_i, 0, two_i);
        return Ok(vec![Transition {
            two_f_lower: two_i,
            two_f_upper: two_i,
            lower: coeffs,
            upper: coeffs,
            racah: 1.0,
        }]);
    }

    let mut transitions = Vec::new();

    let mut two_f_lower = (two_i - two_j_lower).abs();
    while two_f_lower <= two_i + two_j_lower {
        let mut two_f_upper = (two_i - two_j_upper).abs();
        while two_f_upper <= two_i + two_j_upper {
            let allowed =
                (two_f_upper - two_f_lower).abs() <= 2 && !(two_f_lower == 0 && two_f_upper == 0);
            if allowed {
                let w = sixj(two_j_upper, two_f_upper, two_i, two_f_lower, two_j_lower, 2);
                let intensity = (two_f_lower as f64 + 1.0) * (two_f_upper as f64 + 1.0) * w * w;
                if intensity > 0.0 {
                    transitions.push(Transition {
                        two_f_lower,
                        two_f_upper,
                        lower: shift_coeffs(two_i, two_j_lower, two_f_lower),
                        upper: shift_coeffs(two_i, two_j_upper, two_f_upper),
                        racah: intensity,
                    });
                }
            }
            two_f_upper += 2;
        }
        two_f_lower += 2;
    }

    if transitions.is_empty() {
        return Err(AppError::new(
            2,
            format!(
                "No allowed hyperfine transitions for 2I={two_i}, 2J_lower={two_j_lower}, \
                 2J_upper={two_j_upper}"
            ),
        ));
    }

    let total: f64 = transitions.iter().map(|t| t.racah).sum();
    for t in &mut transitions {
        t.racah /= total;
    }

    Ok(transitions)
}

impl Model for Hfs {
    fn kind(&self) -> &'static str {
        "hfs"
    }

    fn default_parameters(&self) -> Vec<(String, Parameter)> {
        let mut out = vec![
            ("centroid".to_string(), Parameter::new(0.0)),
            ("a_lower".to_string(), Parameter::new(0.0)),
            ("b_lower".to_string(), Parameter::fixed(0.0)),
            ("c_lower".to_string(), Parameter::fixed(0.0)),
            ("a_upper".to_string(), Parameter::new(0.0)),
            ("b_upper".to_string(), Parameter::fixed(0.0)),
            ("c_upper".to_string(), Parameter::fixed(0.0)),
        ];

        // Parameters that cannot influence the spectrum stay fixed even if a
        // setup file tries to free them elsewhere; here we just pick sensible
        // defaults (B vary only when the quadrupole term is active).
        if !self.quadrupole_inactive() {
            out[2].1 = Parameter::new(0.0);
            out[5].1 = Parameter::new(0.0);
        }

        let mut width = Parameter::new(1.0);
        width.min = 0.0;
        out.push(("fwhm_gauss".to_string(), width));
        out.push(("fwhm_lorentz".to_string(), width));

        if self.racah_amplitudes {
            let mut scale = Parameter::new(1.0);
            scale.min = 0.0;
            out.push(("scale".to_string(), scale));
        } else {
            out.push(("scale".to_string(), Parameter::fixed(1.0)));
        }

        if !self.racah_amplitudes {
            for t in &self.transitions {
                let mut amp = Parameter::new(t.racah);
                amp.min = 0.0;
                out.push((format!("amp{}", t.label()), amp));
            }
        }

        if self.n_sidepeaks > 0 {
            out.push(("sidepeak_offset".to_string(), Parameter::new(0.0)));
            let mut poisson = Parameter::new(0.5);
            poisson.min = 0.0;
            out.push(("poisson".to_string(), poisson));
        }

        out
    }

    fn eval(&self, x: &[f64], p: &[f64]) -> Vec<f64> {
        let sigma = fwhm_to_sigma(p[7]);
        let gamma = fwhm_to_gamma(p[8]);
        let scale = p[9];

        let peak = voigt_profile(0.0, sigma, gamma);
        if !(peak.is_finite() && peak > 0.0) {
            return vec![f64::NAN; x.len()];
        }
        let inv_peak = 1.0 / peak;

        let positions = self.positions(p);
        let amplitudes: Vec<f64> = if self.racah_amplitudes {
            self.transitions.iter().map(|t| scale * t.racah).collect()
        } else {
            (0..self.transitions.len())
                .map(|i| scale * p[10 + i])
                .collect()
        };

        // Sidepeak train: weight_k = poisson^k / k! relative to the main peak.
        let base = if self.racah_amplitudes { 10 } else { 10 + self.transitions.len() };
        let mut offsets = vec![(0.0, 1.0)];
        if self.n_sidepeaks > 0 {
            let offset = p[base];
            let poisson = p[base + 1];
            let mut weight = 1.0;
            for k in 1..=self.n_sidepeaks {
                weight *= poisson / k as f64;
                offsets.push((offset * k as f64, weight));
            }
        }

        x.iter()
            .map(|&xi| {
                let mut y = 0.0;
                for (pos, amp) in positions.iter().zip(amplitudes.iter()) {
                    for &(shift, weight) in &offsets {
                        y += amp * weight * voigt_profile(xi - pos - shift, sigma, gamma) * inv_peak;
                    }
                }
                y
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params_for(model: &Hfs) -> Vec<f64> {
        model
            .default_parameters()
            .iter()
            .map(|(_, p)| p.value)
            .collect()
    }

    #[test]
    fn transition_count_spin_three_halves() {
        // I=3/2, J: 1/2 -> 3/2 has the classic six allowed lines.
        let m = Hfs::new(1.5, 0.5, 1.5, true, 0).unwrap();
        assert_eq!(m.n_transitions(), 6);
    }

    #[test]
    fn zero_spin_gives_single_line() {
        let m = Hfs::new(0.0, 0.5, 1.5, true, 0).unwrap();
        assert_eq!(m.n_transitions(), 1);
    }

    #[test]
    fn zero_j_both_levels_gives_single_unsplit_line() {
        let m = Hfs::new(1.5, 0.0, 0.0, true, 0).unwrap();
        assert_eq!(m.n_transitions(), 1);

        // K vanishes at F = I, J = 0, so the line sits at the centroid no
        // matter the hyperfine constants.
        let mut p = params_for(&m);
        p[0] = 1000.0;
        p[1] = 50.0;
        p[4] = 80.0;
        let positions = m.positions(&p);
        assert!((positions[0] - 1000.0).abs() < 1e-9);
    }

    #[test]
    fn racah_intensities_are_normalized() {
        let m = Hfs::new(1.5, 0.5, 1.5, true, 0).unwrap();
        let total: f64 = m.transitions.iter().map(|t| t.racah).sum();
        assert!((total - 1.0).abs() < 1e-12);
        assert!(m.transitions.iter().all(|t| t.racah > 0.0));
    }

    #[test]
    fn selection_rule_holds() {
        let m = Hfs::new(2.5, 1.5, 2.5, true, 0).unwrap();
        for t in &m.transitions {
            let df = (t.two_f_upper - t.two_f_lower).abs();
            assert!(df <= 2);
            assert!(!(t.two_f_lower == 0 && t.two_f_upper == 0));
        }
    }

    #[test]
    fn positions_follow_dipole_shift() {
        // I=1/2, J 1/2 -> 1/2: levels F ∈ {0, 1} on both sides, K = F(F+1) - 3/2.
        let m = Hfs::new(0.5, 0.5, 0.5, true, 0).unwrap();
        let mut p = params_for(&m);
        p[0] = 1000.0; // centroid
        p[1] = 10.0; // a_lower
        p[4] = 40.0; // a_upper

        let positions = m.positions(&p);
        for (t, &pos) in m.transitions.iter().zip(positions.iter()) {
            let k_l = {
                let f = t.two_f_lower as f64 / 2.0;
                f * (f + 1.0) - 0.75 - 0.75
            };
            let k_u = {
                let f = t.two_f_upper as f64 / 2.0;
                f * (f + 1.0) - 0.75 - 0.75
            };
            let expected = 1000.0 + 40.0 * k_u / 2.0 - 10.0 * k_l / 2.0;
            assert!((pos - expected).abs() < 1e-9);
        }
    }

    #[test]
    fn quadrupole_term_vanishes_for_low_spin() {
        let coeffs = shift_coeffs(1, 1, 2); // I=1/2, J=1/2, F=1
        assert_eq!(coeffs.b, 0.0);
        assert_eq!(coeffs.c, 0.0);

        let coeffs = shift_coeffs(3, 3, 6); // I=3/2, J=3/2, F=3
        assert!(coeffs.b != 0.0);
        assert_eq!(coeffs.c, 0.0); // octupole needs I,J > 1
    }

    #[test]
    fn eval_produces_peaks_at_line_positions() {
        let m = Hfs::new(1.5, 0.5, 1.5, true, 0).unwrap();
        let mut p = params_for(&m);
        p[0] = 0.0;
        p[1] = 50.0;
        p[4] = 100.0;
        p[7] = 5.0; // fwhm_gauss
        p[8] = 5.0; // fwhm_lorentz
        p[9] = 1000.0; // scale

        let positions = m.positions(&p);
        let y_on: Vec<f64> = m.eval(&positions, &p);
        // Evaluate far away from all lines.
        let far = positions.iter().cloned().fold(f64::MIN, f64::max) + 500.0;
        let y_off = m.eval(&[far], &p)[0];

        for &y in &y_on {
            assert!(y > y_off * 10.0, "peak {y} not above background {y_off}");
        }
    }

    #[test]
    fn sidepeaks_add_intensity_at_offset() {
        let main = Hfs::new(0.0, 0.0, 1.0, true, 0).unwrap();
        let with_side = Hfs::new(0.0, 0.0, 1.0, true, 1).unwrap();

        let mut p_main = params_for(&main);
        p_main[7] = 2.0;
        p_main[8] = 2.0;
        p_main[9] = 100.0;

        let mut p_side = params_for(&with_side);
        p_side[7] = 2.0;
        p_side[8] = 2.0;
        p_side[9] = 100.0;
        p_side[10] = -30.0; // sidepeak_offset
        p_side[11] = 0.5; // poisson

        let y_main = main.eval(&[-30.0], &p_main)[0];
        let y_side = with_side.eval(&[-30.0], &p_side)[0];
        assert!(y_side > y_main + 1.0, "main={y_main}, side={y_side}");
    }

    #[test]
    fn free_amplitude_mode_declares_per_line_parameters() {
        let m = Hfs::new(1.5, 0.5, 1.5, false, 0).unwrap();
        let names: Vec<String> = m
            .default_parameters()
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        let n_amp = names.iter().filter(|n| n.starts_with("amp")).count();
        assert_eq!(n_amp, 6);
        // Scale is fixed in free-amplitude mode.
        let scale = m
            .default_parameters()
            .into_iter()
            .find(|(name, _)| name == "scale")
            .unwrap()
            .1;
        assert!(!scale.vary);
    }

    #[test]
    fn rejects_invalid_spin() {
        assert!(Hfs::new(0.3, 0.5, 1.5, true, 0).is_err());
        assert!(Hfs::new(-1.0, 0.5, 1.5, true, 0).is_err());
    }
}
