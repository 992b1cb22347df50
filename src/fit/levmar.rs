//! Damped least-squares (Levenberg–Marquardt) driver.
//!
//! The driver minimizes `‖r(u)‖²` over unconstrained internal coordinates
//! (bound transforms live in the parameter layer). Each iteration:
//!
//! - builds a central-difference Jacobian (columns in parallel)
//! - solves the λ-damped step as a stacked least-squares problem
//!   `[J; √λ·D] δ = [-r; 0]` with Marquardt column scaling `D`
//! - accepts the step if the cost drops, otherwise raises λ and retries
//!
//! The objective returns `None` for parameter sets it cannot evaluate
//! (non-finite model output, non-positive Poisson rates); such steps are
//! treated as rejected.

use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;

use crate::error::AppError;
use crate::math::solve_least_squares;

/// Iteration controls.
#[derive(Debug, Clone)]
pub struct LevMarOptions {
    pub max_iter: usize,
    /// Relative cost-decrease threshold for convergence.
    pub ftol: f64,
    /// Relative step-size threshold for convergence.
    pub xtol: f64,
}

impl Default for LevMarOptions {
    fn default() -> Self {
        Self {
            max_iter: 200,
            ftol: 1e-10,
            xtol: 1e-10,
        }
    }
}

/// Result of a minimization.
#[derive(Debug, Clone)]
pub struct LevMarOutcome {
    /// Final internal coordinates.
    pub u: Vec<f64>,
    /// Final cost `‖r‖²`.
    pub cost: f64,
    /// Jacobian at the solution (internal coordinates).
    pub jacobian: DMatrix<f64>,
    pub n_iter: usize,
    pub converged: bool,
}

/// Minimize `‖r(u)‖²` starting from `u0`.
pub fn minimize<F>(residual_fn: F, u0: &[f64], opts: &LevMarOptions) -> Result<LevMarOutcome, AppError>
where
    F: Fn(&[f64]) -> Option<DVector<f64>> + Sync,
{
    if u0.is_empty() {
        return Err(AppError::new(2, "No free parameters to optimize."));
    }

    let mut u = u0.to_vec();
    let mut r = residual_fn(&u).ok_or_else(|| {
        AppError::new(4, "Objective is not evaluable at the starting parameters.")
    })?;
    let mut cost = r.norm_squared();
    if !cost.is_finite() {
        return Err(AppError::new(4, "Non-finite cost at the starting parameters."));
    }

    let mut lambda = 1e-3;
    let mut converged = false;
    let mut n_iter = 0;

    while n_iter < opts.max_iter {
        n_iter += 1;

        let jac = numerical_jacobian(&residual_fn, &u).ok_or_else(|| {
            AppError::new(4, "Jacobian evaluation failed (non-evaluable neighborhood).")
        })?;

        // Marquardt column scaling; zero columns get unit damping so the
        // system stays solvable when a parameter has no local effect.
        let scales: Vec<f64> = (0..u.len())
            .map(|j| {
                let norm = jac.column(j).norm();
                if norm > 0.0 { norm } else { 1.0 }
            })
            .collect();

        let mut accepted = false;
        let mut any_solved = false;
        for _ in 0..16 {
            let Some(delta) = solve_damped_step(&jac, &r, &scales, lambda) else {
                lambda *= 10.0;
                continue;
            };
            any_solved = true;

            let u_new: Vec<f64> = u.iter().zip(delta.iter()).map(|(a, d)| a + d).collect();
            let Some(r_new) = residual_fn(&u_new) else {
                lambda *= 10.0;
                continue;
            };
            let cost_new = r_new.norm_squared();
            if !cost_new.is_finite() || cost_new >= cost {
                lambda *= 10.0;
                if lambda > 1e12 {
                    break;
                }
                continue;
            }

            // Accepted step.
            let step_norm = delta.norm();
            let u_norm = u.iter().map(|v| v * v).sum::<f64>().sqrt();
            let cost_drop = cost - cost_new;

            u = u_new;
            r = r_new;
            cost = cost_new;
            lambda = (lambda * 0.3).max(1e-12);
            accepted = true;

            if cost_drop <= opts.ftol * cost.max(f64::MIN_POSITIVE)
                || step_norm <= opts.xtol * (u_norm + opts.xtol)
            {
                converged = true;
            }
            break;
        }

        if !accepted {
            if !any_solved {
                return Err(AppError::new(
                    4,
                    "Damped least-squares step is singular at every damping value.",
                ));
            }
            // Steps solved but none reduced the cost: we are at
            // (numerically) a local minimum.
            converged = true;
        }
        if converged {
            break;
        }
    }

    let jacobian = numerical_jacobian(&residual_fn, &u)
        .ok_or_else(|| AppError::new(4, "Jacobian evaluation failed at the solution."))?;

    Ok(LevMarOutcome {
        u,
        cost,
        jacobian,
        n_iter,
        converged,
    })
}

fn solve_damped_step(
    jac: &DMatrix<f64>,
    r: &DVector<f64>,
    scales: &[f64],
    lambda: f64,
) -> Option<DVector<f64>> {
    let n_res = jac.nrows();
    let n_par = jac.ncols();

    let mut stacked = DMatrix::<f64>::zeros(n_res + n_par, n_par);
    stacked.view_mut((0, 0), (n_res, n_par)).copy_from(jac);
    let sqrt_lambda = lambda.sqrt();
    for j in 0..n_par {
        stacked[(n_res + j, j)] = sqrt_lambda * scales[j];
    }

    let mut rhs = DVector::<f64>::zeros(n_res + n_par);
    rhs.rows_mut(0, n_res).copy_from(&(-r));

    solve_least_squares(&stacked, &rhs)
}

/// Central-difference Jacobian; columns evaluated in parallel.
fn numerical_jacobian<F>(residual_fn: &F, u: &[f64]) -> Option<DMatrix<f64>>
where
    F: Fn(&[f64]) -> Option<DVector<f64>> + Sync,
{
    let cols: Vec<Option<DVector<f64>>> = (0..u.len())
        .into_par_iter()
        .map(|j| {
            let h = 1e-6 * u[j].abs().max(1.0);
            let mut up = u.to_vec();
            up[j] += h;
            let mut dn = u.to_vec();
            dn[j] -= h;
            let rp = residual_fn(&up)?;
            let rn = residual_fn(&dn)?;
            let col = (rp - rn) / (2.0 * h);
            if col.iter().any(|v| !v.is_finite()) {
                return None;
            }
            Some(col)
        })
        .collect();

    let mut assembled: Option<DMatrix<f64>> = None;
    for (j, col) in cols.into_iter().enumerate() {
        let col = col?;
        let m = assembled.get_or_insert_with(|| DMatrix::zeros(col.len(), u.len()));
        m.set_column(j, &col);
    }
    assembled
}
