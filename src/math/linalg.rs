//! Least squares solver.
//!
//! The damped Gauss–Newton step inside the optimizer is computed by solving a
//! (tall) linear least-squares problem each iteration:
//!
//! ```text
//! minimize ‖r + J δ‖²  (with λ-scaled damping rows appended)
//! ```
//!
//! Implementation choices:
//! - SVD solve, so tall and nearly rank-deficient systems are handled without
//!   panicking. (Nalgebra's `QR::solve` is intended for square systems.)
//! - The parameter dimension is small (a handful of hyperfine constants plus
//!   lineshape widths), so SVD cost is negligible next to model evaluation.

use nalgebra::{DMatrix, DVector};

/// Solve a least squares problem using SVD.
///
/// Returns `None` if the system is too ill-conditioned to solve robustly.
pub fn solve_least_squares(x: &DMatrix<f64>, y: &DVector<f64>) -> Option<DVector<f64>> {
    let svd = x.clone().svd(true, true);

    // Try progressively looser tolerances if the strict solve fails. Voigt
    // width parameters can produce nearly collinear Jacobian columns when the
    // Gaussian and Lorentzian widths trade off against each other.
    for &tol in &[1e-10, 1e-8, 1e-6] {
        if let Ok(beta) = svd.solve(y, tol) {
            if beta.iter().all(|v| v.is_finite()) {
                return Some(beta);
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn least_squares_solves_simple_system() {
        // Fit y = 2 + 3x on x = [0,1,2]
        let x = DMatrix::from_row_slice(3, 2, &[1.0, 0.0, 1.0, 1.0, 1.0, 2.0]);
        let y = DVector::from_row_slice(&[2.0, 5.0, 8.0]);

        let beta = solve_least_squares(&x, &y).unwrap();
        assert!((beta[0] - 2.0).abs() < 1e-10);
        assert!((beta[1] - 3.0).abs() < 1e-10);
    }

    #[test]
    fn least_squares_handles_tall_overdetermined_system() {
        // y = 1 + 2x with a consistent extra row.
        let x = DMatrix::from_row_slice(4, 2, &[1.0, 0.0, 1.0, 1.0, 1.0, 2.0, 1.0, 3.0]);
        let y = DVector::from_row_slice(&[1.0, 3.0, 5.0, 7.0]);

        let beta = solve_least_squares(&x, &y).unwrap();
        assert!((beta[0] - 1.0).abs() < 1e-10);
        assert!((beta[1] - 2.0).abs() < 1e-10);
    }
}
