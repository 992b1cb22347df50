//! Synthetic spectrum generation.
//!
//! Evaluates the composite model of each setup source on a regular frequency
//! grid, optionally applies counting or Gaussian noise, and writes spectra in
//! the same CSV schema the ingest module reads.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use rand::prelude::*;
use rand::rngs::StdRng;
use rand_distr::{Normal, Poisson};

use crate::domain::{NoiseKind, SimulateConfig};
use crate::error::AppError;
use crate::io::setup::{SetupFile, build_fitter_on_grid};

/// One written spectrum.
#[derive(Debug, Clone)]
pub struct SimulatedSpectrum {
    pub source: String,
    pub path: PathBuf,
    pub points: usize,
}

pub fn simulate(setup: &SetupFile, config: &SimulateConfig) -> Result<Vec<SimulatedSpectrum>, AppError> {
    if config.points < 2 {
        return Err(AppError::new(2, "Simulation needs at least 2 grid points."));
    }
    if !(config.x_min.is_finite() && config.x_max.is_finite() && config.x_max > config.x_min) {
        return Err(AppError::new(2, "Invalid simulation range (need x_min < x_max)."));
    }

    let x = linspace(config.x_min, config.x_max, config.points);
    let fitter = build_fitter_on_grid(setup, &x)?;
    let curves = fitter.curves()?;

    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut written = Vec::with_capacity(curves.len());
    let multi = curves.len() > 1;

    for curve in &curves {
        let path = if multi {
            path_for_source(&config.out_path, &curve.source)
        } else {
            config.out_path.clone()
        };

        let (y, yerr) = apply_noise(&curve.y_fit, config.noise, &mut rng)?;
        write_spectrum_csv(&path, &x, &y, yerr.as_deref())?;

        written.push(SimulatedSpectrum {
            source: curve.source.clone(),
            path,
            points: x.len(),
        });
    }
    Ok(written)
}

pub fn linspace(a: f64, b: f64, n: usize) -> Vec<f64> {
    let step = (b - a) / (n as f64 - 1.0);
    (0..n).map(|i| a + step * i as f64).collect()
}

/// `out.csv` becomes `out-{source}.csv` when several sources are simulated.
fn path_for_source(base: &Path, source: &str) -> PathBuf {
    let stem = base
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "spectrum".to_string());
    let ext = base
        .extension()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "csv".to_string());
    base.with_file_name(format!("{stem}-{source}.{ext}"))
}

fn apply_noise(
    y_true: &[f64],
    noise: NoiseKind,
    rng: &mut StdRng,
) -> Result<(Vec<f64>, Option<Vec<f64>>), AppError> {
    match noise {
        NoiseKind::None => Ok((y_true.to_vec(), None)),
        NoiseKind::Poisson => {
            let mut y = Vec::with_capacity(y_true.len());
            for &f in y_true {
                if f < 0.0 {
                    return Err(AppError::new(
                        4,
                        format!("Model predicts negative counts ({f:.3}); Poisson noise needs y >= 0."),
                    ));
                }
                let counts = if f > 0.0 {
                    let dist = Poisson::new(f).map_err(|e| {
                        AppError::new(4, format!("Poisson noise error at rate {f}: {e}"))
                    })?;
                    dist.sample(rng)
                } else {
                    0.0
                };
                y.push(counts);
            }
            let yerr = y.iter().map(|&v| v.max(1.0).sqrt()).collect();
            Ok((y, Some(yerr)))
        }
        NoiseKind::Gaussian(sigma) => {
            if !(sigma.is_finite() && sigma > 0.0) {
                return Err(AppError::new(2, "Gaussian noise sigma must be > 0."));
            }
            let normal = Normal::new(0.0, sigma)
                .map_err(|e| AppError::new(4, format!("Noise distribution error: {e}")))?;
            let y = y_true.iter().map(|&f| f + normal.sample(rng)).collect();
            Ok((y, Some(vec![sigma; y_true.len()])))
        }
    }
}

fn write_spectrum_csv(path: &Path, x: &[f64], y: &[f64], yerr: Option<&[f64]>) -> Result<(), AppError> {
    let mut file = File::create(path).map_err(|e| {
        AppError::new(2, format!("Failed to create spectrum '{}': {e}", path.display()))
    })?;

    let header = if yerr.is_some() { "x,y,yerr" } else { "x,y" };
    writeln!(file, "{header}")
        .map_err(|e| AppError::new(2, format!("Failed to write spectrum header: {e}")))?;

    for (i, (&xi, &yi)) in x.iter().zip(y.iter()).enumerate() {
        match yerr {
            Some(e) => writeln!(file, "{xi:.10},{yi:.10},{:.10}", e[i]),
            None => writeln!(file, "{xi:.10},{yi:.10}"),
        }
        .map_err(|e| AppError::new(2, format!("Failed to write spectrum row: {e}")))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::FitMethod;
    use crate::io::load_spectrum;

    fn setup_json() -> SetupFile {
        serde_json::from_str(
            r#"{
                "sources": [{
                    "name": "sim",
                    "data": "unused.csv",
                    "models": [
                        { "name": "peak", "kind": "voigt",
                          "params": { "centroid": { "value": 50.0 },
                                      "amplitude": { "value": 300.0 },
                                      "fwhm_gauss": { "value": 8.0 },
                                      "fwhm_lorentz": { "value": 4.0 } } },
                        { "name": "bkg", "kind": "polynomial", "degree": 0,
                          "params": { "c0": { "value": 20.0 } } }
                    ]
                }]
            }"#,
        )
        .unwrap()
    }

    fn temp_path(tag: &str) -> PathBuf {
        let mut p = std::env::temp_dir();
        p.push(format!("hfsfit-sim-{}-{tag}.csv", std::process::id()));
        p
    }

    fn config(out: PathBuf, noise: NoiseKind, seed: u64) -> SimulateConfig {
        SimulateConfig {
            setup_path: PathBuf::from("unused.json"),
            out_path: out,
            x_min: 0.0,
            x_max: 100.0,
            points: 101,
            noise,
            seed,
        }
    }

    #[test]
    fn linspace_endpoints_and_spacing() {
        let g = linspace(-1.0, 1.0, 5);
        assert_eq!(g, vec![-1.0, -0.5, 0.0, 0.5, 1.0]);
    }

    #[test]
    fn noiseless_spectrum_round_trips_through_ingest() {
        let out = temp_path("noiseless");
        let setup = setup_json();
        let written = simulate(&setup, &config(out.clone(), NoiseKind::None, 1)).unwrap();
        assert_eq!(written.len(), 1);
        assert_eq!(written[0].points, 101);

        let spectrum = load_spectrum(&out).unwrap();
        std::fs::remove_file(&out).ok();
        assert_eq!(spectrum.x.len(), 101);
        assert!(spectrum.yerr.is_none());
        // Peak sits on the background near the configured centroid.
        let peak_idx = spectrum
            .y
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
            .unwrap()
            .0;
        assert!((spectrum.x[peak_idx] - 50.0).abs() <= 1.0);
        assert!(spectrum.y.iter().all(|&v| v >= 20.0 - 1e-9));
    }

    #[test]
    fn poisson_noise_gives_integer_counts_and_errors() {
        let out = temp_path("poisson");
        let setup = setup_json();
        simulate(&setup, &config(out.clone(), NoiseKind::Poisson, 42)).unwrap();

        let spectrum = load_spectrum(&out).unwrap();
        std::fs::remove_file(&out).ok();
        let yerr = spectrum.yerr.unwrap();
        for (&y, &e) in spectrum.y.iter().zip(yerr.iter()) {
            assert_eq!(y, y.round());
            assert!((e - y.max(1.0).sqrt()).abs() < 1e-9);
        }
    }

    #[test]
    fn same_seed_reproduces_spectrum() {
        let out_a = temp_path("seed-a");
        let out_b = temp_path("seed-b");
        let setup = setup_json();
        simulate(&setup, &config(out_a.clone(), NoiseKind::Gaussian(3.0), 9)).unwrap();
        simulate(&setup, &config(out_b.clone(), NoiseKind::Gaussian(3.0), 9)).unwrap();

        let a = load_spectrum(&out_a).unwrap();
        let b = load_spectrum(&out_b).unwrap();
        std::fs::remove_file(&out_a).ok();
        std::fs::remove_file(&out_b).ok();
        assert_eq!(a.y, b.y);
    }

    #[test]
    fn simulated_data_is_fittable() {
        let out = temp_path("fittable");
        let setup = setup_json();
        simulate(&setup, &config(out.clone(), NoiseKind::Poisson, 7)).unwrap();

        let spectrum = load_spectrum(&out).unwrap();
        std::fs::remove_file(&out).ok();

        let mut fitter = crate::fit::Fitter::new();
        let mut source =
            crate::fit::Source::new("sim", spectrum.x, spectrum.y, spectrum.yerr).unwrap();
        source.add_model("peak", Box::new(crate::models::Voigt::new()));
        source.add_model("bkg", Box::new(crate::models::Polynomial::new(0)));
        fitter.add_source(source).unwrap();
        for (name, value) in [
            ("sim___peak___centroid", 48.0),
            ("sim___peak___amplitude", 200.0),
            ("sim___peak___fwhm_gauss", 6.0),
            ("sim___peak___fwhm_lorentz", 6.0),
            ("sim___bkg___c0", 15.0),
        ] {
            fitter.param_mut(name).unwrap().value = value;
        }

        let outcome = fitter
            .fit(FitMethod::Chisquare, &Default::default())
            .unwrap();
        let centroid = outcome
            .parameters
            .iter()
            .find(|p| p.name == "sim___peak___centroid")
            .unwrap()
            .value;
        assert!((centroid - 50.0).abs() < 1.0);
        assert!(outcome.statistics.redchi < 3.0);
    }

    #[test]
    fn invalid_range_is_rejected() {
        let setup = setup_json();
        let mut c = config(temp_path("bad"), NoiseKind::None, 1);
        c.x_max = c.x_min;
        assert_eq!(simulate(&setup, &c).unwrap_err().exit_code(), 2);
    }
}
