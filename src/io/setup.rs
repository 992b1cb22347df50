//! Fit setup files.
//!
//! A setup file is a JSON document describing the sources, the models on
//! each source, parameter overrides, and the sharing/tie structure:
//!
//! ```json
//! {
//!   "sources": [
//!     {
//!       "name": "scan1",
//!       "data": "scan1.csv",
//!       "models": [
//!         {
//!           "name": "hfs",
//!           "kind": "hfs",
//!           "spin": 1.5, "j_lower": 0.5, "j_upper": 1.5,
//!           "params": { "a_lower": { "value": 500.0 } }
//!         },
//!         { "name": "bkg", "kind": "polynomial", "degree": 1 }
//!       ]
//!     }
//!   ],
//!   "share": ["fwhm_gauss"],
//!   "ties": [
//!     { "target": "scan1___hfs___a_upper", "source": "scan1___hfs___a_lower",
//!       "scale": 0.32 }
//!   ]
//! }
//! ```
//!
//! Spectrum paths are resolved relative to the setup file's directory.

use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::fit::{Fitter, Source};
use crate::io::ingest::{self, RowError};
use crate::models::{
    ExponentialDecay, Hfs, Model, PiecewiseConstant, Polynomial, SkewedVoigt, Voigt,
};
use crate::params::Tie;

fn default_true() -> bool {
    true
}

fn default_scale() -> f64 {
    1.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SetupFile {
    pub sources: Vec<SourceSpec>,
    /// Parameter names shared across all sources (tied to the first occurrence).
    #[serde(default)]
    pub share: Vec<String>,
    /// Model names whose full parameter sets are shared across sources.
    #[serde(default)]
    pub share_model: Vec<String>,
    #[serde(default)]
    pub ties: Vec<TieSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceSpec {
    pub name: String,
    pub data: PathBuf,
    pub models: Vec<ModelSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSpec {
    pub name: String,
    #[serde(flatten)]
    pub kind: ModelKind,
    #[serde(default)]
    pub params: BTreeMap<String, ParamSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModelKind {
    Hfs {
        spin: f64,
        j_lower: f64,
        j_upper: f64,
        #[serde(default = "default_true")]
        racah: bool,
        #[serde(default)]
        n_sidepeaks: usize,
    },
    Polynomial {
        degree: usize,
    },
    ExponentialDecay,
    PiecewiseConstant {
        edges: Vec<f64>,
    },
    Voigt,
    SkewedVoigt,
}

/// Partial parameter override; unset fields keep the model default.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ParamSpec {
    pub value: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub vary: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TieSpec {
    pub target: String,
    pub source: String,
    #[serde(default = "default_scale")]
    pub scale: f64,
    #[serde(default)]
    pub offset: f64,
}

/// Ingest problems per source, carried along for reporting.
#[derive(Debug, Clone)]
pub struct IngestReport {
    pub source: String,
    pub rows_read: usize,
    pub rows_used: usize,
    pub row_errors: Vec<RowError>,
}

pub fn load_setup(path: &Path) -> Result<SetupFile, AppError> {
    let file = File::open(path).map_err(|e| {
        AppError::new(2, format!("Failed to open setup '{}': {e}", path.display()))
    })?;
    let setup: SetupFile = serde_json::from_reader(file)
        .map_err(|e| AppError::new(2, format!("Invalid setup '{}': {e}", path.display())))?;
    if setup.sources.is_empty() {
        return Err(AppError::new(2, "Setup lists no sources."));
    }
    Ok(setup)
}

impl ModelKind {
    pub fn build(&self) -> Result<Box<dyn Model>, AppError> {
        Ok(match self {
            ModelKind::Hfs {
                spin,
                j_lower,
                j_upper,
                racah,
                n_sidepeaks,
            } => Box::new(Hfs::new(*spin, *j_lower, *j_upper, *racah, *n_sidepeaks)?),
            ModelKind::Polynomial { degree } => Box::new(Polynomial::new(*degree)),
            ModelKind::ExponentialDecay => Box::new(ExponentialDecay::new()),
            ModelKind::PiecewiseConstant { edges } => {
                Box::new(PiecewiseConstant::new(edges.clone()))
            }
            ModelKind::Voigt => Box::new(Voigt::new()),
            ModelKind::SkewedVoigt => Box::new(SkewedVoigt::new()),
        })
    }
}

/// Build a fitter from the setup, loading each source's spectrum from disk.
pub fn build_fitter(
    setup: &SetupFile,
    base_dir: &Path,
) -> Result<(Fitter, Vec<IngestReport>), AppError> {
    let mut fitter = Fitter::new();
    let mut reports = Vec::with_capacity(setup.sources.len());

    for spec in &setup.sources {
        let data_path = if spec.data.is_absolute() {
            spec.data.clone()
        } else {
            base_dir.join(&spec.data)
        };
        let spectrum = ingest::load_spectrum(&data_path)?;
        reports.push(IngestReport {
            source: spec.name.clone(),
            rows_read: spectrum.rows_read,
            rows_used: spectrum.rows_used,
            row_errors: spectrum.row_errors,
        });

        let source = build_source(spec, spectrum.x, spectrum.y, spectrum.yerr)?;
        fitter.add_source(source)?;
    }

    apply_structure(&mut fitter, setup)?;
    Ok((fitter, reports))
}

/// Build a fitter on a synthetic grid instead of measured spectra. Used by
/// the simulator, which only needs the composite model.
pub fn build_fitter_on_grid(setup: &SetupFile, x: &[f64]) -> Result<Fitter, AppError> {
    let mut fitter = Fitter::new();
    for spec in &setup.sources {
        let zeros = vec![0.0; x.len()];
        let source = build_source(spec, x.to_vec(), zeros, None)?;
        fitter.add_source(source)?;
    }
    apply_structure(&mut fitter, setup)?;
    Ok(fitter)
}

fn build_source(
    spec: &SourceSpec,
    x: Vec<f64>,
    y: Vec<f64>,
    yerr: Option<Vec<f64>>,
) -> Result<Source, AppError> {
    let mut source = Source::new(spec.name.clone(), x, y, yerr)?;
    for model_spec in &spec.models {
        source.add_model(model_spec.name.clone(), model_spec.kind.build()?);
        let nm = source
            .models
            .last_mut()
            .ok_or_else(|| AppError::new(2, "Model list unexpectedly empty."))?;
        for (pname, over) in &model_spec.params {
            let slot = nm
                .params
                .iter_mut()
                .find(|(name, _)| name == pname)
                .map(|(_, p)| p)
                .ok_or_else(|| {
                    AppError::new(
                        2,
                        format!(
                            "Model '{}' in source '{}' has no parameter '{pname}'.",
                            model_spec.name, spec.name
                        ),
                    )
                })?;
            if let Some(v) = over.value {
                slot.value = v;
            }
            if let Some(v) = over.min {
                slot.min = v;
            }
            if let Some(v) = over.max {
                slot.max = v;
            }
            if let Some(v) = over.vary {
                slot.vary = v;
            }
            if !(slot.min < slot.max) {
                return Err(AppError::new(
                    2,
                    format!(
                        "Parameter '{pname}' of model '{}' has empty bounds [{}, {}].",
                        model_spec.name, slot.min, slot.max
                    ),
                ));
            }
            slot.clamp_value();
        }
    }
    Ok(source)
}

fn apply_structure(fitter: &mut Fitter, setup: &SetupFile) -> Result<(), AppError> {
    for param in &setup.share {
        fitter.share_param(param)?;
    }
    for model in &setup.share_model {
        fitter.share_model_params(model)?;
    }
    for tie in &setup.ties {
        fitter.tie(Tie {
            target: tie.target.clone(),
            source: tie.source.clone(),
            scale: tie.scale,
            offset: tie.offset,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::FitMethod;

    const SETUP: &str = r#"{
        "sources": [
            {
                "name": "scan1",
                "data": "scan1.csv",
                "models": [
                    {
                        "name": "hfs",
                        "kind": "hfs",
                        "spin": 1.5,
                        "j_lower": 0.5,
                        "j_upper": 1.5,
                        "params": {
                            "a_lower": { "value": 500.0 },
                            "fwhm_gauss": { "value": 40.0, "min": 1.0 }
                        }
                    },
                    { "name": "bkg", "kind": "polynomial", "degree": 0,
                      "params": { "c0": { "value": 10.0 } } }
                ]
            }
        ],
        "ties": [
            { "target": "scan1___hfs___a_upper",
              "source": "scan1___hfs___a_lower", "scale": 0.32 }
        ]
    }"#;

    #[test]
    fn parses_setup_and_builds_models() {
        let setup: SetupFile = serde_json::from_str(SETUP).unwrap();
        assert_eq!(setup.sources.len(), 1);
        assert_eq!(setup.ties.len(), 1);
        assert!((setup.ties[0].scale - 0.32).abs() < 1e-12);
        assert_eq!(setup.ties[0].offset, 0.0);

        let x: Vec<f64> = (0..50).map(|i| -2000.0 + 80.0 * i as f64).collect();
        let fitter = build_fitter_on_grid(&setup, &x).unwrap();
        let free = fitter.free_parameters().unwrap();
        // a_upper is tied, so it is not free.
        assert!(free.iter().all(|(n, _)| n != "scan1___hfs___a_upper"));
        assert!(free.iter().any(|(n, _)| n == "scan1___hfs___a_lower"));
    }

    #[test]
    fn parameter_overrides_are_applied() {
        let setup: SetupFile = serde_json::from_str(SETUP).unwrap();
        let x: Vec<f64> = (0..10).map(|i| i as f64).collect();
        let mut fitter = build_fitter_on_grid(&setup, &x).unwrap();
        assert_eq!(fitter.param_mut("scan1___hfs___a_lower").unwrap().value, 500.0);
        assert_eq!(fitter.param_mut("scan1___hfs___fwhm_gauss").unwrap().min, 1.0);
        assert_eq!(fitter.param_mut("scan1___bkg___c0").unwrap().value, 10.0);
    }

    #[test]
    fn tied_parameter_follows_linear_relation() {
        let setup: SetupFile = serde_json::from_str(SETUP).unwrap();
        let x: Vec<f64> = (0..10).map(|i| i as f64 * 100.0).collect();
        let fitter = build_fitter_on_grid(&setup, &x).unwrap();
        // Evaluating log_prob forces tie expansion; a finite value means the
        // tied structure resolved.
        let free = fitter.free_parameters().unwrap();
        let values: Vec<f64> = free.iter().map(|(_, p)| p.value).collect();
        assert!(fitter.log_prob(&values, FitMethod::Chisquare).unwrap().is_finite());
    }

    #[test]
    fn setup_round_trips_through_serde() {
        let setup: SetupFile = serde_json::from_str(SETUP).unwrap();
        let text = serde_json::to_string(&setup).unwrap();
        let again: SetupFile = serde_json::from_str(&text).unwrap();

        assert_eq!(again.sources.len(), 1);
        assert_eq!(again.sources[0].name, "scan1");
        assert_eq!(again.sources[0].models.len(), 2);
        assert_eq!(again.ties.len(), 1);
        assert!((again.ties[0].scale - 0.32).abs() < 1e-12);
        assert_eq!(
            again.sources[0].models[0].params["a_lower"].value,
            Some(500.0)
        );

        // The reloaded setup still builds the same model structure.
        let x: Vec<f64> = (0..50).map(|i| -2000.0 + 80.0 * i as f64).collect();
        let a = build_fitter_on_grid(&setup, &x).unwrap();
        let b = build_fitter_on_grid(&again, &x).unwrap();
        assert_eq!(
            a.free_parameters().unwrap().len(),
            b.free_parameters().unwrap().len()
        );
    }

    #[test]
    fn unknown_parameter_override_is_rejected() {
        let bad = SETUP.replace("a_lower", "a_nope");
        let setup: SetupFile = serde_json::from_str(&bad).unwrap();
        let x = vec![0.0, 1.0, 2.0];
        let err = build_fitter_on_grid(&setup, &x).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn unknown_model_kind_fails_to_parse() {
        let bad = SETUP.replace("\"kind\": \"polynomial\"", "\"kind\": \"spline\"");
        assert!(serde_json::from_str::<SetupFile>(&bad).is_err());
    }
}
