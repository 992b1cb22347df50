//! Affine-invariant ensemble sampler.
//!
//! Implements the Goodman & Weare stretch move with the conventional
//! stretch scale a = 2. Walkers are split into two halves; each half is
//! updated against the other so the whole move stays parallelizable. The
//! posterior is the fit objective with flat priors inside the parameter
//! bounds.

use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use rayon::prelude::*;

use crate::domain::FitMethod;
use crate::error::AppError;
use crate::fit::Fitter;

/// Stretch scale of the proposal distribution.
const STRETCH_SCALE: f64 = 2.0;

/// Relative size of the starting ball around the current fit values.
const INIT_BALL_SCALE: f64 = 1e-4;

const MAX_INIT_ATTEMPTS: usize = 100;

#[derive(Debug, Clone)]
pub struct McmcOptions {
    pub steps: usize,
    pub walkers: usize,
    pub seed: u64,
    pub progress: bool,
}

/// Recorded walker positions, stored step-major.
#[derive(Debug)]
pub struct Chain {
    pub names: Vec<String>,
    pub steps: usize,
    pub walkers: usize,
    data: Vec<f64>,
    accepted: u64,
}

impl Chain {
    pub fn ndim(&self) -> usize {
        self.names.len()
    }

    /// Position of one walker at one step.
    pub fn position(&self, step: usize, walker: usize) -> &[f64] {
        let ndim = self.ndim();
        let start = (step * self.walkers + walker) * ndim;
        &self.data[start..start + ndim]
    }

    pub fn acceptance_fraction(&self) -> f64 {
        let proposals = (self.steps * self.walkers) as f64;
        if proposals == 0.0 {
            0.0
        } else {
            self.accepted as f64 / proposals
        }
    }

    /// Flattened samples after discarding `burn` steps and keeping every
    /// `thin`-th of the rest.
    pub fn flat(&self, burn: usize, thin: usize) -> Result<Vec<Vec<f64>>, AppError> {
        if burn >= self.steps {
            return Err(AppError::new(
                2,
                format!("Burn-in ({burn}) must be below the chain length ({}).", self.steps),
            ));
        }
        let thin = thin.max(1);
        let mut out = Vec::new();
        let mut step = burn;
        while step < self.steps {
            for walker in 0..self.walkers {
                out.push(self.position(step, walker).to_vec());
            }
            step += thin;
        }
        Ok(out)
    }

    /// Per-parameter 1-sigma quantiles `[15.87, 50, 84.13]` of the flat chain.
    pub fn percentiles(&self, burn: usize, thin: usize) -> Result<Vec<(String, [f64; 3])>, AppError> {
        let flat = self.flat(burn, thin)?;
        let mut out = Vec::with_capacity(self.ndim());
        for (dim, name) in self.names.iter().enumerate() {
            let mut values: Vec<f64> = flat.iter().map(|row| row[dim]).collect();
            values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
            let q = [15.87, 50.0, 84.13].map(|p| percentile_sorted(&values, p));
            out.push((name.clone(), q));
        }
        Ok(out)
    }
}

/// Linear-interpolation percentile of an ascending slice.
fn percentile_sorted(sorted: &[f64], p: f64) -> f64 {
    let n = sorted.len();
    if n == 1 {
        return sorted[0];
    }
    let rank = p / 100.0 * (n - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    sorted[lo] * (1.0 - frac) + sorted[hi] * frac
}

/// One pre-drawn proposal for a walker in the moving half.
struct Draw {
    partner: usize,
    z: f64,
    accept_u: f64,
}

/// Run the sampler starting from a ball around the current parameter values.
pub fn sample(fitter: &Fitter, method: FitMethod, opts: &McmcOptions) -> Result<Chain, AppError> {
    let free = fitter.free_parameters()?;
    let ndim = free.len();
    if ndim == 0 {
        return Err(AppError::new(2, "No free parameters to sample."));
    }
    if opts.walkers < 2 * ndim || opts.walkers % 2 != 0 {
        return Err(AppError::new(
            2,
            format!(
                "Need an even walker count of at least {} for {} free parameters (got {}).",
                2 * ndim,
                ndim,
                opts.walkers
            ),
        ));
    }
    if opts.steps == 0 {
        return Err(AppError::new(2, "Chain length must be at least 1."));
    }

    let names: Vec<String> = free.iter().map(|(name, _)| name.clone()).collect();
    let mut rng = StdRng::seed_from_u64(opts.seed);
    let ball = Normal::new(0.0, 1.0)
        .map_err(|e| AppError::new(4, format!("Sampler initialization failed: {e}")))?;

    // Each walker starts in a small Gaussian ball, clamped into bounds and
    // re-drawn until its posterior is finite.
    let mut positions: Vec<Vec<f64>> = Vec::with_capacity(opts.walkers);
    for w in 0..opts.walkers {
        let mut attempt = 0;
        let start = loop {
            let candidate: Vec<f64> = free
                .iter()
                .map(|(_, p)| {
                    let scale = INIT_BALL_SCALE * p.value.abs().max(1.0);
                    (p.value + scale * ball.sample(&mut rng)).clamp(p.min, p.max)
                })
                .collect();
            if fitter
                .log_prob(&candidate, method)
                .unwrap_or(f64::NEG_INFINITY)
                .is_finite()
            {
                break candidate;
            }
            attempt += 1;
            if attempt >= MAX_INIT_ATTEMPTS {
                return Err(AppError::new(
                    4,
                    format!("Walker {w} could not find a finite starting posterior."),
                ));
            }
        };
        positions.push(start);
    }
    let mut log_probs: Vec<f64> = positions
        .iter()
        .map(|p| fitter.log_prob(p, method).unwrap_or(f64::NEG_INFINITY))
        .collect();

    let bar = progress_bar(opts.steps as u64, opts.progress);
    let half = opts.walkers / 2;
    let mut data = Vec::with_capacity(opts.steps * opts.walkers * ndim);
    let mut accepted = 0u64;

    for _ in 0..opts.steps {
        for moving_half in 0..2 {
            let (move_start, other_start) = if moving_half == 0 { (0, half) } else { (half, 0) };

            // Randomness is drawn up front so the parallel evaluation stays
            // deterministic for a given seed.
            let draws: Vec<Draw> = (0..half)
                .map(|_| Draw {
                    partner: other_start + rng.gen_range(0..half),
                    z: stretch_z(rng.gen_range(0.0..1.0)),
                    accept_u: rng.gen_range(0.0..1.0_f64),
                })
                .collect();

            let updates: Vec<Option<(Vec<f64>, f64)>> = draws
                .par_iter()
                .enumerate()
                .map(|(offset, draw)| {
                    let walker = move_start + offset;
                    let current = &positions[walker];
                    let partner = &positions[draw.partner];
                    let proposal: Vec<f64> = current
                        .iter()
                        .zip(partner.iter())
                        .map(|(&c, &p)| p + draw.z * (c - p))
                        .collect();
                    let lp = match fitter.log_prob(&proposal, method) {
                        Ok(v) => v,
                        Err(_) => f64::NEG_INFINITY,
                    };
                    let ln_accept =
                        (ndim as f64 - 1.0) * draw.z.ln() + lp - log_probs[walker];
                    if lp.is_finite() && draw.accept_u.ln() < ln_accept {
                        Some((proposal, lp))
                    } else {
                        None
                    }
                })
                .collect();

            for (offset, update) in updates.into_iter().enumerate() {
                if let Some((proposal, lp)) = update {
                    let walker = move_start + offset;
                    positions[walker] = proposal;
                    log_probs[walker] = lp;
                    accepted += 1;
                }
            }
        }

        for position in &positions {
            data.extend_from_slice(position);
        }
        bar.inc(1);
    }
    bar.finish_and_clear();

    Ok(Chain {
        names,
        steps: opts.steps,
        walkers: opts.walkers,
        data,
        accepted,
    })
}

/// Stretch factor z ~ g(z) ∝ 1/√z on [1/a, a], from a uniform draw.
fn stretch_z(u: f64) -> f64 {
    let a = STRETCH_SCALE;
    ((a - 1.0) * u + 1.0).powi(2) / a
}

fn progress_bar(len: u64, visible: bool) -> ProgressBar {
    if !visible {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new(len);
    bar.set_prefix("mcmc");
    bar.enable_steady_tick(Duration::from_millis(100));
    bar.set_style(
        ProgressStyle::with_template(
            "[{prefix}] {elapsed_precise} {bar:36.cyan/blue} {pos:>6}/{len:6}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("■■□"),
    );
    bar
}
