//! Multi-source fitter.
//!
//! A `Source` is one measured spectrum (x, y, yerr) plus the models
//! superimposed on it; the source prediction is the sum of its model outputs.
//! The `Fitter` flattens every model parameter into one qualified set
//! (`source___model___param`), applies ties and sharing, and minimizes the
//! chosen objective over the free parameters:
//!
//! - `chisquare`: residuals `(y - f) / yerr`
//! - `poisson`: deviance residuals
//!   `sign(y - f) · sqrt(2(f - y + y·ln(y/f)))`, so the Poisson MLE runs
//!   through the same least-squares driver
//!
//! Uncertainties come from `(JᵀJ)⁻¹ · redchi` propagated through the bound
//! transforms back to external coordinates.

use nalgebra::{DMatrix, DVector};

use crate::domain::{FitMethod, FitStatistics, FittedParameter, SourceCurve};
use crate::error::AppError;
use crate::fit::levmar::{self, LevMarOptions};
use crate::models::Model;
use crate::params::{Parameter, Tie, qualified_name};

/// Correlations below this are left out of reports and exports.
const CORRELATION_THRESHOLD: f64 = 0.1;

/// A model instance attached to a source, with its own parameter values.
pub struct NamedModel {
    pub name: String,
    pub model: Box<dyn Model>,
    pub params: Vec<(String, Parameter)>,
}

/// One measured spectrum and its composite model.
pub struct Source {
    pub name: String,
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    pub yerr: Vec<f64>,
    pub models: Vec<NamedModel>,
}

impl Source {
    /// Create a source. Without explicit uncertainties, the spectroscopic
    /// default `sqrt(max(y, 1))` applies.
    pub fn new(
        name: impl Into<String>,
        x: Vec<f64>,
        y: Vec<f64>,
        yerr: Option<Vec<f64>>,
    ) -> Result<Self, AppError> {
        let name = name.into();
        if x.is_empty() {
            return Err(AppError::new(3, format!("Source '{name}' has no data points.")));
        }
        if x.len() != y.len() {
            return Err(AppError::new(
                3,
                format!("Source '{name}': x and y lengths differ ({} vs {}).", x.len(), y.len()),
            ));
        }
        let yerr = match yerr {
            Some(e) => {
                if e.len() != y.len() {
                    return Err(AppError::new(
                        3,
                        format!("Source '{name}': yerr length {} != {} points.", e.len(), y.len()),
                    ));
                }
                if e.iter().any(|v| !(v.is_finite() && *v > 0.0)) {
                    return Err(AppError::new(
                        3,
                        format!("Source '{name}': yerr values must be finite and > 0."),
                    ));
                }
                e
            }
            None => y.iter().map(|&v| v.max(1.0).sqrt()).collect(),
        };
        if x.iter().chain(y.iter()).any(|v| !v.is_finite()) {
            return Err(AppError::new(3, format!("Source '{name}' contains non-finite data.")));
        }

        Ok(Self {
            name,
            x,
            y,
            yerr,
            models: Vec::new(),
        })
    }

    /// Attach a model under a per-source-unique name.
    pub fn add_model(&mut self, name: impl Into<String>, model: Box<dyn Model>) {
        let params = model.default_parameters();
        self.models.push(NamedModel {
            name: name.into(),
            model,
            params,
        });
    }

    /// Sum of all model outputs given per-model parameter value slices.
    fn eval(&self, values_per_model: &[&[f64]]) -> Vec<f64> {
        let mut total = vec![0.0; self.x.len()];
        for (nm, values) in self.models.iter().zip(values_per_model.iter()) {
            let y = nm.model.eval(&self.x, values);
            for (t, v) in total.iter_mut().zip(y.into_iter()) {
                *t += v;
            }
        }
        total
    }
}

/// Location of one parameter inside the fitter.
#[derive(Debug, Clone, Copy)]
struct EntryRef {
    source: usize,
    model: usize,
    param: usize,
}

/// Flattened parameter index built once per fit/sample call.
struct Resolved {
    qualified: Vec<String>,
    refs: Vec<EntryRef>,
    /// Current external values in entry order.
    base_values: Vec<f64>,
    params: Vec<Parameter>,
    /// Entry indices of free (varying, untied) parameters.
    free: Vec<usize>,
    /// `(target entry, source entry, scale, offset)` in application order.
    ties: Vec<(usize, usize, f64, f64)>,
    /// `model_offsets[source][model]` = first entry index for that model.
    model_offsets: Vec<Vec<usize>>,
}

impl Resolved {
    /// Expand free values into the full entry-ordered external value vector.
    fn expand(&self, free_values: &[f64]) -> Vec<f64> {
        let mut all = self.base_values.clone();
        for (slot, &v) in self.free.iter().zip(free_values.iter()) {
            all[*slot] = v;
        }
        for &(target, source, scale, offset) in &self.ties {
            all[target] = scale * all[source] + offset;
        }
        all
    }
}

/// Outcome of `Fitter::fit`.
#[derive(Debug, Clone)]
pub struct FitOutcome {
    pub method: FitMethod,
    pub statistics: FitStatistics,
    pub parameters: Vec<FittedParameter>,
    /// Pairs with |correlation| above the report threshold.
    pub correlations: Vec<(String, String, f64)>,
    pub curves: Vec<SourceCurve>,
    pub n_iter: usize,
    pub converged: bool,
}

/// Combines sources, shared/tied parameters, and the objective.
pub struct Fitter {
    pub sources: Vec<Source>,
    ties: Vec<Tie>,
}

impl std::fmt::Debug for Fitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fitter")
            .field("sources", &self.sources.len())
            .field("ties", &self.ties.len())
            .finish()
    }
}

impl Fitter {
    pub fn new() -> Self {
        Self {
            sources: Vec::new(),
            ties: Vec::new(),
        }
    }

    pub fn add_source(&mut self, source: Source) -> Result<(), AppError> {
        if self.sources.iter().any(|s| s.name == source.name) {
            return Err(AppError::new(
                2,
                format!("Duplicate source name '{}'.", source.name),
            ));
        }
        self.sources.push(source);
        Ok(())
    }

    /// Tie `target` to `source` (qualified names), `target = scale*source + offset`.
    pub fn tie(&mut self, tie: Tie) {
        self.ties.push(tie);
    }

    /// Share one named parameter across all sources: every occurrence after
    /// the first is tied to the first.
    pub fn share_param(&mut self, param: &str) -> Result<(), AppError> {
        let mut first: Option<String> = None;
        for source in &self.sources {
            for nm in &source.models {
                if nm.params.iter().any(|(name, _)| name == param) {
                    let qualified = qualified_name(&source.name, &nm.name, param);
                    match &first {
                        None => first = Some(qualified),
                        Some(anchor) => self.ties.push(Tie::same_as(qualified, anchor.clone())),
                    }
                }
            }
        }
        if first.is_none() {
            return Err(AppError::new(2, format!("No model has a parameter '{param}'.")));
        }
        Ok(())
    }

    /// Share all parameters of every model named `model` across sources.
    pub fn share_model_params(&mut self, model: &str) -> Result<(), AppError> {
        let mut anchor: Option<(String, Vec<String>)> = None;
        for source in &self.sources {
            for nm in &source.models {
                if nm.name != model {
                    continue;
                }
                let param_names: Vec<String> =
                    nm.params.iter().map(|(name, _)| name.clone()).collect();
                match &anchor {
                    None => anchor = Some((source.name.clone(), param_names)),
                    Some((anchor_source, anchor_params)) => {
                        if *anchor_params != param_names {
                            return Err(AppError::new(
                                2,
                                format!(
                                    "Model '{model}' has different parameters in sources \
                                     '{anchor_source}' and '{}'.",
                                    source.name
                                ),
                            ));
                        }
                        for p in &param_names {
                            self.ties.push(Tie::same_as(
                                qualified_name(&source.name, model, p),
                                qualified_name(anchor_source, model, p),
                            ));
                        }
                    }
                }
            }
        }
        if anchor.is_none() {
            return Err(AppError::new(2, format!("No source has a model named '{model}'.")));
        }
        Ok(())
    }

    /// Mutable access to a parameter by qualified name.
    pub fn param_mut(&mut self, qualified: &str) -> Option<&mut Parameter> {
        let parts: Vec<&str> = qualified.split("___").collect();
        if parts.len() != 3 {
            return None;
        }
        let source = self.sources.iter_mut().find(|s| s.name == parts[0])?;
        let nm = source.models.iter_mut().find(|m| m.name == parts[1])?;
        nm.params
            .iter_mut()
            .find(|(name, _)| name == parts[2])
            .map(|(_, p)| p)
    }

    /// Qualified names and parameters of the free (fitted) parameters.
    pub fn free_parameters(&self) -> Result<Vec<(String, Parameter)>, AppError> {
        let resolved = self.resolve()?;
        Ok(resolved
            .free
            .iter()
            .map(|&i| (resolved.qualified[i].clone(), resolved.params[i]))
            .collect())
    }

    /// Write external values for the free parameters back into the models
    /// (tied parameters follow).
    pub fn set_free_values(&mut self, values: &[f64]) -> Result<(), AppError> {
        let resolved = self.resolve()?;
        if values.len() != resolved.free.len() {
            return Err(AppError::new(
                2,
                format!(
                    "Expected {} free parameter values, got {}.",
                    resolved.free.len(),
                    values.len()
                ),
            ));
        }
        let all = resolved.expand(values);
        self.store_values(&resolved, &all);
        Ok(())
    }

    fn store_values(&mut self, resolved: &Resolved, all: &[f64]) {
        for (r, &v) in resolved.refs.iter().zip(all.iter()) {
            self.sources[r.source].models[r.model].params[r.param].1.value = v;
        }
    }

    fn resolve(&self) -> Result<Resolved, AppError> {
        if self.sources.is_empty() {
            return Err(AppError::new(2, "Fitter has no sources."));
        }

        let mut qualified = Vec::new();
        let mut refs = Vec::new();
        let mut base_values = Vec::new();
        let mut params = Vec::new();
        let mut model_offsets = Vec::with_capacity(self.sources.len());

        for (si, source) in self.sources.iter().enumerate() {
            if source.models.is_empty() {
                return Err(AppError::new(
                    2,
                    format!("Source '{}' has no models attached.", source.name),
                ));
            }
            let mut offsets = Vec::with_capacity(source.models.len());
            let mut seen = std::collections::HashSet::new();
            for (mi, nm) in source.models.iter().enumerate() {
                if !seen.insert(nm.name.clone()) {
                    return Err(AppError::new(
                        2,
                        format!("Source '{}' has duplicate model name '{}'.", source.name, nm.name),
                    ));
                }
                offsets.push(qualified.len());
                for (pi, (pname, p)) in nm.params.iter().enumerate() {
                    qualified.push(qualified_name(&source.name, &nm.name, pname));
                    refs.push(EntryRef {
                        source: si,
                        model: mi,
                        param: pi,
                    });
                    base_values.push(p.value);
                    params.push(*p);
                }
            }
            model_offsets.push(offsets);
        }

        // Resolve ties to entry indices; a tie source must itself be untied.
        let index_of = |name: &str| qualified.iter().position(|q| q == name);
        let mut tie_targets = std::collections::HashSet::new();
        let mut ties = Vec::with_capacity(self.ties.len());
        for tie in &self.ties {
            let target = index_of(&tie.target).ok_or_else(|| {
                AppError::new(2, format!("Tie target '{}' does not exist.", tie.target))
            })?;
            let source = index_of(&tie.source).ok_or_else(|| {
                AppError::new(2, format!("Tie source '{}' does not exist.", tie.source))
            })?;
            if target == source {
                return Err(AppError::new(2, format!("Parameter '{}' tied to itself.", tie.target)));
            }
            if !tie_targets.insert(target) {
                return Err(AppError::new(
                    2,
                    format!("Parameter '{}' is tied more than once.", tie.target),
                ));
            }
            if !(tie.scale.is_finite() && tie.offset.is_finite()) {
                return Err(AppError::new(2, format!("Tie on '{}' has non-finite terms.", tie.target)));
            }
            ties.push((target, source, tie.scale, tie.offset));
        }
        for &(_, source, _, _) in &ties {
            if tie_targets.contains(&source) {
                return Err(AppError::new(
                    2,
                    format!(
                        "Tie chains are not supported ('{}' is both tie source and target).",
                        qualified[source]
                    ),
                ));
            }
        }

        let free: Vec<usize> = (0..params.len())
            .filter(|i| params[*i].vary && !tie_targets.contains(i))
            .collect();

        Ok(Resolved {
            qualified,
            refs,
            base_values,
            params,
            free,
            ties,
            model_offsets,
        })
    }

    /// Residual vector for the given full external value vector.
    fn residuals(&self, resolved: &Resolved, all: &[f64], method: FitMethod) -> Option<DVector<f64>> {
        let ndata: usize = self.sources.iter().map(|s| s.x.len()).sum();
        let mut out = Vec::with_capacity(ndata);

        for (si, source) in self.sources.iter().enumerate() {
            let slices: Vec<&[f64]> = source
                .models
                .iter()
                .enumerate()
                .map(|(mi, nm)| {
                    let start = resolved.model_offsets[si][mi];
                    &all[start..start + nm.params.len()]
                })
                .collect();
            let y_fit = source.eval(&slices);

            for ((&y, &yerr), &f) in source
                .y
                .iter()
                .zip(source.yerr.iter())
                .zip(y_fit.iter())
            {
                if !f.is_finite() {
                    return None;
                }
                let r = match method {
                    FitMethod::Chisquare => (y - f) / yerr,
                    FitMethod::Poisson => {
                        if f <= 0.0 {
                            return None;
                        }
                        // Deviance residual; the y·ln(y/f) term vanishes at y=0.
                        let dev = if y > 0.0 {
                            2.0 * (f - y + y * (y / f).ln())
                        } else {
                            2.0 * f
                        };
                        (y - f).signum() * dev.max(0.0).sqrt()
                    }
                };
                out.push(r);
            }
        }

        Some(DVector::from_vec(out))
    }

    /// Log-probability of the free external values under the chosen
    /// objective, with flat priors inside the parameter bounds.
    pub fn log_prob(&self, resolved_free: &[f64], method: FitMethod) -> Result<f64, AppError> {
        let resolved = self.resolve()?;
        Ok(self.log_prob_resolved(&resolved, resolved_free, method))
    }

    fn log_prob_resolved(&self, resolved: &Resolved, free_values: &[f64], method: FitMethod) -> f64 {
        for (&slot, &v) in resolved.free.iter().zip(free_values.iter()) {
            let p = &resolved.params[slot];
            if !(v.is_finite() && v >= p.min && v <= p.max) {
                return f64::NEG_INFINITY;
            }
        }
        let all = resolved.expand(free_values);
        match self.residuals(resolved, &all, method) {
            Some(r) => -0.5 * r.norm_squared(),
            None => f64::NEG_INFINITY,
        }
    }

    /// Fitted curve per source at the current parameter values.
    pub fn curves(&self) -> Result<Vec<SourceCurve>, AppError> {
        let resolved = self.resolve()?;
        let free_values: Vec<f64> = resolved.free.iter().map(|&i| resolved.base_values[i]).collect();
        let all = resolved.expand(&free_values);

        let mut out = Vec::with_capacity(self.sources.len());
        for (si, source) in self.sources.iter().enumerate() {
            let slices: Vec<&[f64]> = source
                .models
                .iter()
                .enumerate()
                .map(|(mi, nm)| {
                    let start = resolved.model_offsets[si][mi];
                    &all[start..start + nm.params.len()]
                })
                .collect();
            out.push(SourceCurve {
                source: source.name.clone(),
                x: source.x.clone(),
                y_fit: source.eval(&slices),
            });
        }
        Ok(out)
    }

    /// Run the optimizer and update the stored parameter values.
    pub fn fit(&mut self, method: FitMethod, opts: &LevMarOptions) -> Result<FitOutcome, AppError> {
        let resolved = self.resolve()?;
        let ndata: usize = self.sources.iter().map(|s| s.x.len()).sum();
        let nvarys = resolved.free.len();

        if nvarys == 0 {
            return Err(AppError::new(2, "No free parameters to fit."));
        }
        if ndata <= nvarys {
            return Err(AppError::new(
                3,
                format!("Underdetermined fit: {ndata} points for {nvarys} free parameters."),
            ));
        }
        if method == FitMethod::Poisson {
            for source in &self.sources {
                if source.y.iter().any(|&v| v < 0.0) {
                    return Err(AppError::new(
                        3,
                        format!(
                            "Source '{}' has negative counts; Poisson likelihood needs y >= 0.",
                            source.name
                        ),
                    ));
                }
            }
        }

        // Internal starting coordinates for the free parameters.
        let mut u0 = Vec::with_capacity(nvarys);
        for &i in &resolved.free {
            u0.push(resolved.params[i].to_internal().map_err(|e| {
                AppError::new(2, format!("Parameter '{}': {e}", resolved.qualified[i]))
            })?);
        }

        // Evaluate once at the start so a bad model configuration blames the
        // source instead of surfacing as an opaque optimizer failure.
        let start_all = resolved.expand(
            &resolved
                .free
                .iter()
                .map(|&i| resolved.base_values[i])
                .collect::<Vec<f64>>(),
        );
        for (si, source) in self.sources.iter().enumerate() {
            let slices: Vec<&[f64]> = source
                .models
                .iter()
                .enumerate()
                .map(|(mi, nm)| {
                    let start = resolved.model_offsets[si][mi];
                    &start_all[start..start + nm.params.len()]
                })
                .collect();
            if source.eval(&slices).iter().any(|v| !v.is_finite()) {
                return Err(AppError::new(
                    4,
                    format!(
                        "Source '{}' produces non-finite model values at the starting parameters.",
                        source.name
                    ),
                ));
            }
        }

        let objective = |u: &[f64]| {
            let free_values: Vec<f64> = resolved
                .free
                .iter()
                .zip(u.iter())
                .map(|(&i, &ui)| resolved.params[i].to_external(ui))
                .collect();
            let all = resolved.expand(&free_values);
            self.residuals(&resolved, &all, method)
        };

        let outcome = levmar::minimize(objective, &u0, opts)?;

        // External values at the solution.
        let free_values: Vec<f64> = resolved
            .free
            .iter()
            .zip(outcome.u.iter())
            .map(|(&i, &ui)| resolved.params[i].to_external(ui))
            .collect();
        let all = resolved.expand(&free_values);
        self.store_values(&resolved, &all);

        let chisqr = outcome.cost;
        let ndof = (ndata - nvarys) as f64;
        let redchi = chisqr / ndof;
        let n_f = ndata as f64;
        let k_f = nvarys as f64;
        let ln_term = n_f * (chisqr / n_f).max(1e-300).ln();
        let stats = FitStatistics {
            chisqr,
            redchi,
            aic: ln_term + 2.0 * k_f,
            bic: ln_term + k_f * n_f.ln(),
            ndata,
            nvarys,
            nfree: ndata - nvarys,
            llh: match method {
                FitMethod::Chisquare => None,
                FitMethod::Poisson => Some(-0.5 * chisqr),
            },
        };

        let (stderr, correlations) =
            covariance_report(&resolved, &outcome.jacobian, &outcome.u, redchi);

        let tied_to: std::collections::HashMap<usize, String> = resolved
            .ties
            .iter()
            .map(|&(target, source, _, _)| (target, resolved.qualified[source].clone()))
            .collect();
        let free_pos: std::collections::HashMap<usize, usize> = resolved
            .free
            .iter()
            .enumerate()
            .map(|(pos, &i)| (i, pos))
            .collect();

        let parameters: Vec<FittedParameter> = (0..resolved.params.len())
            .map(|i| FittedParameter {
                name: resolved.qualified[i].clone(),
                value: all[i],
                stderr: free_pos.get(&i).and_then(|&pos| stderr[pos]),
                min: resolved.params[i].min,
                max: resolved.params[i].max,
                vary: resolved.params[i].vary && !tied_to.contains_key(&i),
                tied_to: tied_to.get(&i).cloned(),
            })
            .collect();

        let correlations = correlations
            .into_iter()
            .map(|(a, b, rho)| {
                (
                    resolved.qualified[resolved.free[a]].clone(),
                    resolved.qualified[resolved.free[b]].clone(),
                    rho,
                )
            })
            .collect();

        let curves = self.curves()?;

        Ok(FitOutcome {
            method,
            statistics: stats,
            parameters,
            correlations,
            curves,
            n_iter: outcome.n_iter,
            converged: outcome.converged,
        })
    }
}

impl Default for Fitter {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-free-parameter stderr and the above-threshold correlation pairs
/// (indices into the free vector).
fn covariance_report(
    resolved: &Resolved,
    jacobian: &DMatrix<f64>,
    u: &[f64],
    redchi: f64,
) -> (Vec<Option<f64>>, Vec<(usize, usize, f64)>) {
    let nvarys = u.len();
    let jtj = jacobian.transpose() * jacobian;

    let Ok(cov_int) = jtj.svd(true, true).pseudo_inverse(1e-12) else {
        return (vec![None; nvarys], Vec::new());
    };

    // Chain rule through the bound transforms: cov_ext = G · cov_int · Gᵀ
    // with G diagonal.
    let grads: Vec<f64> = resolved
        .free
        .iter()
        .zip(u.iter())
        .map(|(&i, &ui)| resolved.params[i].external_gradient(ui))
        .collect();

    let mut stderr = Vec::with_capacity(nvarys);
    for i in 0..nvarys {
        let var = cov_int[(i, i)] * redchi * grads[i] * grads[i];
        stderr.push(if var.is_finite() && var >= 0.0 {
            Some(var.sqrt())
        } else {
            None
        });
    }

    let mut correlations = Vec::new();
    for i in 0..nvarys {
        for j in (i + 1)..nvarys {
            let denom = (cov_int[(i, i)] * cov_int[(j, j)]).sqrt();
            if denom <= 0.0 || !denom.is_finite() {
                continue;
            }
            // The gradient factors cancel in the correlation up to sign.
            let sign = (grads[i] * grads[j]).signum();
            let rho = sign * cov_int[(i, j)] / denom;
            if rho.is_finite() && rho.abs() >= CORRELATION_THRESHOLD {
                correlations.push((i, j, rho));
            }
        }
    }

    (stderr, correlations)
}
