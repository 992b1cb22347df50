//! Wigner 6-j symbols for half-integer angular momenta.
//!
//! Racah intensities of hyperfine transitions need
//! `{J_u F_u I; F_l J_l 1}`, so a general 6-j evaluator over half-integers is
//! required. Angular momenta are passed as doubled integers (`two_j = 2j`) so
//! half-integer spins stay exact.
//!
//! Evaluation uses the Racah single-sum formula with log-factorials. The
//! arguments encountered in hyperfine spectra are tiny (j ≲ 15), so neither
//! overflow nor cancellation is a concern at f64 precision.

/// `ln(n!)` for small non-negative `n`.
fn ln_fact(n: i64) -> f64 {
    debug_assert!(n >= 0);
    (2..=n).map(|k| (k as f64).ln()).sum()
}

/// Triangle condition on doubled angular momenta, including the parity
/// requirement that `j1 + j2 + j3` be an integer.
fn triangle_ok(two_a: i64, two_b: i64, two_c: i64) -> bool {
    (two_a + two_b + two_c) % 2 == 0
        && two_c >= (two_a - two_b).abs()
        && two_c <= two_a + two_b
}

/// `ln Δ(abc)` for a valid triad (doubled arguments).
fn ln_delta(two_a: i64, two_b: i64, two_c: i64) -> f64 {
    0.5 * (ln_fact((two_a + two_b - two_c) / 2)
        + ln_fact((two_a - two_b + two_c) / 2)
        + ln_fact((-two_a + two_b + two_c) / 2)
        - ln_fact((two_a + two_b + two_c) / 2 + 1))
}

/// Wigner 6-j symbol `{j1 j2 j3; j4 j5 j6}` with doubled arguments.
///
/// Returns 0 when any of the four triangle conditions fails.
pub fn sixj(
    two_j1: i64,
    two_j2: i64,
    two_j3: i64,
    two_j4: i64,
    two_j5: i64,
    two_j6: i64,
) -> f64 {
    if two_j1 < 0 || two_j2 < 0 || two_j3 < 0 || two_j4 < 0 || two_j5 < 0 || two_j6 < 0 {
        return 0.0;
    }
    if !triangle_ok(two_j1, two_j2, two_j3)
        || !triangle_ok(two_j1, two_j5, two_j6)
        || !triangle_ok(two_j4, two_j2, two_j6)
        || !triangle_ok(two_j4, two_j5, two_j3)
    {
        return 0.0;
    }

    let a = [
        (two_j1 + two_j2 + two_j3) / 2,
        (two_j1 + two_j5 + two_j6) / 2,
        (two_j4 + two_j2 + two_j6) / 2,
        (two_j4 + two_j5 + two_j3) / 2,
    ];
    let b = [
        (two_j1 + two_j2 + two_j4 + two_j5) / 2,
        (two_j2 + two_j3 + two_j5 + two_j6) / 2,
        (two_j3 + two_j1 + two_j6 + two_j4) / 2,
    ];

    let t_min = *a.iter().max().unwrap();
    let t_max = *b.iter().min().unwrap();
    if t_max < t_min {
        return 0.0;
    }

    let ln_pref = ln_delta(two_j1, two_j2, two_j3)
        + ln_delta(two_j1, two_j5, two_j6)
        + ln_delta(two_j4, two_j2, two_j6)
        + ln_delta(two_j4, two_j5, two_j3);

    let mut sum = 0.0;
    for t in t_min..=t_max {
        let ln_term = ln_fact(t + 1)
            - a.iter().map(|&ai| ln_fact(t - ai)).sum::<f64>()
            - b.iter().map(|&bi| ln_fact(bi - t)).sum::<f64>();
        let sign = if t % 2 == 0 { 1.0 } else { -1.0 };
        sum += sign * (ln_pref + ln_term).exp();
    }

    sum
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sixj_known_half_integer_value() {
        // {1/2 1/2 1; 1/2 1/2 1} = 1/6
        let v = sixj(1, 1, 2, 1, 1, 2);
        assert!((v - 1.0 / 6.0).abs() < 1e-12, "got {v}");
    }

    #[test]
    fn sixj_known_integer_value() {
        // {1 1 1; 1 1 1} = 1/6
        let v = sixj(2, 2, 2, 2, 2, 2);
        assert!((v - 1.0 / 6.0).abs() < 1e-12, "got {v}");
    }

    #[test]
    fn sixj_triangle_violation_is_zero() {
        // j1 + j2 < j3 in the first triad.
        assert_eq!(sixj(1, 1, 6, 1, 1, 2), 0.0);
        // Parity violation: 1/2 + 1/2 + 1/2 is not an integer.
        assert_eq!(sixj(1, 1, 1, 1, 1, 1), 0.0);
    }

    #[test]
    fn sixj_orthogonality_sum() {
        // Σ_{j3} (2j3+1) {1 1 j3; 1 1 1}² = 1/(2·1+1) = 1/3
        let mut total = 0.0;
        for two_j3 in [0, 2, 4] {
            let v = sixj(2, 2, two_j3, 2, 2, 2);
            total += (two_j3 as f64 + 1.0) * v * v;
        }
        assert!((total - 1.0 / 3.0).abs() < 1e-12, "got {total}");
    }
}
