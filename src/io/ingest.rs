//! Spectrum CSV ingest.
//!
//! Turns a measured-spectrum CSV into clean `(x, y, yerr)` vectors that are
//! safe to fit:
//! - strict schema for the required columns (clear errors + exit code 2)
//! - row-level validation (skip bad rows, but report what happened)
//! - no fitting logic here

use std::collections::HashMap;
use std::fs::File;
use std::path::Path;

use csv::StringRecord;

use crate::error::AppError;

/// Accepted synonyms per column, checked in order.
const X_COLUMNS: [&str; 3] = ["x", "frequency", "freq"];
const Y_COLUMNS: [&str; 2] = ["y", "counts"];
const YERR_COLUMNS: [&str; 4] = ["yerr", "y_err", "unc", "error"];

/// A row-level error encountered during ingest.
#[derive(Debug, Clone)]
pub struct RowError {
    pub line: usize,
    pub message: String,
}

/// Ingest output: clean columns plus what happened to the rest.
#[derive(Debug, Clone)]
pub struct Spectrum {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    pub yerr: Option<Vec<f64>>,
    pub row_errors: Vec<RowError>,
    pub rows_read: usize,
    pub rows_used: usize,
}

/// Load a spectrum CSV with columns `x,y[,yerr]` (synonyms accepted).
pub fn load_spectrum(path: &Path) -> Result<Spectrum, AppError> {
    let file = File::open(path).map_err(|e| {
        AppError::new(2, format!("Failed to open spectrum '{}': {e}", path.display()))
    })?;

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(file);

    let headers = reader
        .headers()
        .map_err(|e| AppError::new(2, format!("Failed to read CSV headers: {e}")))?
        .clone();
    let header_map = build_header_map(&headers);

    let x_idx = resolve_column(&header_map, &X_COLUMNS).ok_or_else(|| {
        AppError::new(2, format!("Missing x column (one of: {}).", X_COLUMNS.join(", ")))
    })?;
    let y_idx = resolve_column(&header_map, &Y_COLUMNS).ok_or_else(|| {
        AppError::new(2, format!("Missing y column (one of: {}).", Y_COLUMNS.join(", ")))
    })?;
    let yerr_idx = resolve_column(&header_map, &YERR_COLUMNS);

    let mut x = Vec::new();
    let mut y = Vec::new();
    let mut yerr = yerr_idx.map(|_| Vec::new());
    let mut row_errors = Vec::new();
    let mut rows_read = 0usize;

    for (idx, result) in reader.records().enumerate() {
        // +2: records() starts after the header row, CSV lines are 1-based.
        let line = idx + 2;
        rows_read += 1;

        let record = match result {
            Ok(r) => r,
            Err(e) => {
                row_errors.push(RowError {
                    line,
                    message: format!("CSV parse error: {e}"),
                });
                continue;
            }
        };

        match parse_row(&record, x_idx, y_idx, yerr_idx) {
            Ok((xi, yi, ei)) => {
                x.push(xi);
                y.push(yi);
                if let (Some(out), Some(e)) = (yerr.as_mut(), ei) {
                    out.push(e);
                }
            }
            Err(message) => row_errors.push(RowError { line, message }),
        }
    }

    if x.is_empty() {
        return Err(AppError::new(
            3,
            format!("No valid rows in spectrum '{}'.", path.display()),
        ));
    }
    if let Some(e) = &yerr {
        if e.len() != x.len() {
            return Err(AppError::new(
                3,
                format!("Spectrum '{}' has an uncertainty column with gaps.", path.display()),
            ));
        }
    }

    let rows_used = x.len();
    Ok(Spectrum {
        x,
        y,
        yerr,
        row_errors,
        rows_read,
        rows_used,
    })
}

fn build_header_map(headers: &StringRecord) -> HashMap<String, usize> {
    headers
        .iter()
        .enumerate()
        .map(|(idx, name)| (normalize_header_name(name), idx))
        .collect()
}

fn normalize_header_name(name: &str) -> String {
    // Spreadsheet exports sometimes prefix the first header with a BOM;
    // without stripping it schema validation reports a missing column.
    let name = name.trim().trim_start_matches('\u{feff}');
    name.to_ascii_lowercase()
}

fn resolve_column(header_map: &HashMap<String, usize>, names: &[&str]) -> Option<usize> {
    names.iter().find_map(|n| header_map.get(*n).copied())
}

fn parse_row(
    record: &StringRecord,
    x_idx: usize,
    y_idx: usize,
    yerr_idx: Option<usize>,
) -> Result<(f64, f64, Option<f64>), String> {
    let x = parse_f64(record, x_idx, "x")?;
    let y = parse_f64(record, y_idx, "y")?;
    let yerr = match yerr_idx {
        None => None,
        Some(idx) => {
            let e = parse_f64(record, idx, "yerr")?;
            if e <= 0.0 {
                return Err(format!("Invalid `yerr` value {e} (must be > 0)."));
            }
            Some(e)
        }
    };
    Ok((x, y, yerr))
}

fn parse_f64(record: &StringRecord, idx: usize, name: &str) -> Result<f64, String> {
    let raw = record
        .get(idx)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| format!("Missing `{name}` value."))?;
    let v = raw
        .parse::<f64>()
        .map_err(|_| format!("Invalid `{name}` value '{raw}'."))?;
    if !v.is_finite() {
        return Err(format!("Non-finite `{name}` value."));
    }
    Ok(v)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(tag: &str, content: &str) -> std::path::PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!("hfsfit-ingest-{}-{tag}.csv", std::process::id()));
        let mut f = File::create(&path).unwrap();
        f.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn loads_three_column_spectrum() {
        let path = write_temp("three-col", "x,y,yerr\n1.0,10,3.2\n2.0,12,3.5\n");
        let s = load_spectrum(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(s.x, vec![1.0, 2.0]);
        assert_eq!(s.y, vec![10.0, 12.0]);
        assert_eq!(s.yerr, Some(vec![3.2, 3.5]));
        assert!(s.row_errors.is_empty());
    }

    #[test]
    fn accepts_column_synonyms() {
        let path = write_temp("synonyms", "frequency,counts\n-3.5,4\n0.0,9\n");
        let s = load_spectrum(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(s.x, vec![-3.5, 0.0]);
        assert!(s.yerr.is_none());
    }

    #[test]
    fn reports_bad_rows_with_line_numbers() {
        let path = write_temp("bad-rows", "x,y\n1.0,10\nnope,11\n3.0,\n4.0,13\n");
        let s = load_spectrum(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(s.rows_read, 4);
        assert_eq!(s.rows_used, 2);
        assert_eq!(s.row_errors.len(), 2);
        assert_eq!(s.row_errors[0].line, 3);
        assert_eq!(s.row_errors[1].line, 4);
    }

    #[test]
    fn missing_required_column_is_usage_error() {
        let path = write_temp("missing-col", "x,intensity\n1.0,10\n");
        let err = load_spectrum(&path).unwrap_err();
        std::fs::remove_file(&path).ok();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn nonpositive_yerr_is_rejected_per_row() {
        let path = write_temp("bad-yerr", "x,y,yerr\n1.0,10,0\n2.0,12,3.0\n");
        let s = load_spectrum(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(s.rows_used, 1);
        assert_eq!(s.row_errors.len(), 1);
    }
}
