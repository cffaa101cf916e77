//! Simulator output parsing.
//!
//! The simulator writes `<prefix>_point.dat` into its working directory:
//!
//! ```text
//! # n_images  z_source  x_source  y_source
//! 4  3.000000  0.100000  -0.200000
//! # x  y  magnification  time_delay
//! 0.812  0.330  4.21   0.000
//! ...
//! ```
//!
//! Blank lines and `#` comments are skipped. The header declares the image
//! count and is followed by exactly that many image rows.

use std::path::{Path, PathBuf};

use crate::domain::{LensError, LensedImage, Result, TrialResult};

const HEADER_COLUMNS: usize = 4;
const IMAGE_COLUMNS: usize = 4;

/// Path of the point-source output for `prefix` inside `dir`.
pub fn point_output_path(dir: &Path, prefix: &str) -> PathBuf {
    dir.join(format!("{prefix}_point.dat"))
}

/// Read and parse `<prefix>_point.dat` from a galaxy working directory.
pub fn parse_output_dir(dir: &Path, prefix: &str, galaxy_index: u64) -> Result<TrialResult> {
    let path = point_output_path(dir, prefix);
    let text = std::fs::read_to_string(&path).map_err(|e| LensError::ParseError {
        galaxy_index,
        reason: format!("cannot read {}: {e}", path.display()),
    })?;
    parse_point_output(&text, galaxy_index)
}

/// Parse point-source output text.
pub fn parse_point_output(text: &str, galaxy_index: u64) -> Result<TrialResult> {
    let fail = |reason: String| LensError::ParseError {
        galaxy_index,
        reason,
    };

    let mut rows = text
        .lines()
        .enumerate()
        .map(|(i, line)| (i + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty() && !line.starts_with('#'));

    let (header_line, header) = rows
        .next()
        .ok_or_else(|| fail("empty output".to_string()))?;
    let header = numeric_fields(header, header_line, HEADER_COLUMNS).map_err(&fail)?;
    let declared = image_count(header[0]).ok_or_else(|| {
        fail(format!(
            "line {header_line}: image count {} is not a non-negative integer",
            header[0]
        ))
    })?;

    let rows: Vec<(usize, &str)> = rows.collect();
    if rows.len() < declared {
        return Err(fail(format!(
            "truncated output: {declared} images declared, {} found",
            rows.len()
        )));
    }
    if let Some((lineno, _)) = rows.get(declared) {
        return Err(fail(format!(
            "line {lineno}: unexpected row after {declared} declared images"
        )));
    }

    let mut images = Vec::with_capacity(rows.len());
    for (lineno, line) in rows {
        let v = numeric_fields(line, lineno, IMAGE_COLUMNS).map_err(&fail)?;
        images.push(LensedImage {
            x: v[0],
            y: v[1],
            magnification: v[2],
            time_delay: v[3],
        });
    }

    Ok(TrialResult::new(galaxy_index, images))
}

fn numeric_fields(
    line: &str,
    lineno: usize,
    expected: usize,
) -> std::result::Result<Vec<f64>, String> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() != expected {
        return Err(format!(
            "line {lineno}: expected {expected} columns, found {}",
            fields.len()
        ));
    }
    fields
        .iter()
        .map(|f| match f.parse::<f64>() {
            Ok(v) if v.is_finite() => Ok(v),
            Ok(_) => Err(format!("line {lineno}: non-finite field {f:?}")),
            Err(_) => Err(format!("line {lineno}: non-numeric field {f:?}")),
        })
        .collect()
}

fn image_count(value: f64) -> Option<usize> {
    if value.is_finite() && value >= 0.0 && value.fract() == 0.0 {
        Some(value as usize)
    } else {
        None
    }
}
