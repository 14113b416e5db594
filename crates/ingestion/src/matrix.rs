//! Matrix-dump ingestion: a bare 2-D numeric text file treated as one
//! global cylindrical field.
//!
//! The grid is derived from the matrix shape: rows split 180 degrees of
//! latitude top-down, columns split 360 degrees of longitude eastward
//! from Greenwich. Cell centers are used, the y axis is flipped to run
//! south-to-north, and longitudes are shifted into [-180, 180) by the
//! axis normalizer. `NaN` entries become masked cells.

use std::path::Path;

use ndarray::{Array1, Array3};
use tracing::info;

use dataset::{build_meshes, normalize, AxisCoords, Dataset, Origin, SourceKind, DEFAULT_MISSING};
use eval_common::{CalTime, Calendar, EvalError, EvalResult};

use crate::IngestOptions;

/// Parse the whitespace-separated matrix body.
fn parse_matrix(text: &str, location: &str) -> EvalResult<(Vec<f64>, usize, usize)> {
    let mut data = Vec::new();
    let mut width = None;
    for (lineno, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let row: Vec<f64> = line
            .split_whitespace()
            .map(|tok| {
                if tok.eq_ignore_ascii_case("nan") {
                    Ok(f64::NAN)
                } else {
                    tok.parse::<f64>().map_err(|_| {
                        EvalError::UnknownFormat(format!(
                            "{}: line {} is not numeric",
                            location,
                            lineno + 1
                        ))
                    })
                }
            })
            .collect::<EvalResult<_>>()?;
        match width {
            None => width = Some(row.len()),
            Some(w) if w != row.len() => {
                return Err(EvalError::UnknownFormat(format!(
                    "{}: ragged matrix at line {}",
                    location,
                    lineno + 1
                )))
            }
            _ => {}
        }
        data.extend(row);
    }
    let nx = width.ok_or_else(|| EvalError::UnknownFormat(format!("{}: empty matrix", location)))?;
    let ny = data.len() / nx;
    Ok((data, ny, nx))
}

/// Load a matrix dump as a single-time-step dataset.
pub fn load_matrix(path: &Path, options: &IngestOptions) -> EvalResult<Dataset> {
    let location = path.display().to_string();
    let text = std::fs::read_to_string(path)
        .map_err(|_| EvalError::FileNotFound(location.clone()))?;
    let (data, ny, nx) = parse_matrix(&text, &location)?;

    // Cell-centered uniform grid; row 0 is the northernmost band.
    let d_lat = 180.0 / ny as f64;
    let d_lon = 360.0 / nx as f64;
    let lats1d = Array1::from_shape_fn(ny, |j| 90.0 - (j as f64 + 0.5) * d_lat);
    let lons1d = Array1::from_shape_fn(nx, |i| (i as f64 + 0.5) * d_lon);
    let (lats, lons) = build_meshes(AxisCoords::OneD(lats1d), AxisCoords::OneD(lons1d))?;

    let values = Array3::from_shape_vec((1, ny, nx), data).map_err(|_| {
        EvalError::UnknownFormat(format!("{}: matrix body is not rectangular", location))
    })?;
    let mask = values.mapv(|v| v.is_nan());
    let values = values.mapv(|v| if v.is_nan() { DEFAULT_MISSING } else { v });

    let name = options
        .name
        .clone()
        .unwrap_or_else(|| location.clone());
    let ds = Dataset::new(
        name,
        options.variable.clone(),
        options.units.clone().unwrap_or_else(|| "1".to_string()),
        values,
        mask,
        DEFAULT_MISSING,
        lats,
        lons,
        vec![CalTime::from_ymd(Calendar::Gregorian, 2000, 1, 1)?],
        Origin {
            kind: SourceKind::MatrixDump,
            identifier: options.variable.clone(),
            path: Some(path.to_path_buf()),
        },
    )?;
    info!(location = %location, ny, nx, "ingested matrix dump");
    normalize(&ds, options.lon_pivot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_matrix(body: &str) -> (TempDir, std::path::PathBuf) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("field.txt");
        std::fs::File::create(&path)
            .unwrap()
            .write_all(body.as_bytes())
            .unwrap();
        (dir, path)
    }

    #[test]
    fn test_grid_derivation_and_flip() {
        // 2x4 global grid: 90-degree latitude bands, 90-degree sectors
        let (_dir, path) = write_matrix("1 2 3 4\n5 6 7 8\n");
        let ds = load_matrix(&path, &IngestOptions::new("var")).unwrap();
        assert_eq!(ds.ny(), 2);
        assert_eq!(ds.nx(), 4);
        // south row first after normalization
        assert!(ds.lats[[0, 0]] < ds.lats[[1, 0]]);
        assert_eq!(ds.lats[[0, 0]], -45.0);
        // longitudes normalized into [-180, 180) and increasing
        let row: Vec<f64> = ds.lons.row(0).to_vec();
        assert!(row.windows(2).all(|w| w[1] > w[0]));
        assert!(row.iter().all(|&l| (-180.0..180.0).contains(&l)));
        // the south-west value came from the dump's bottom row, rolled by
        // two sectors (centers 45,135,225,315 -> -135,-45,45,135)
        assert_eq!(ds.values[[0, 0, 0]], 7.0);
    }

    #[test]
    fn test_nan_becomes_masked() {
        let (_dir, path) = write_matrix("1 NaN\n3 4\n");
        let ds = load_matrix(&path, &IngestOptions::new("var")).unwrap();
        let masked: usize = ds.mask.iter().filter(|&&m| m).count();
        assert_eq!(masked, 1);
        assert_eq!(ds.unmasked_fraction(), 0.75);
    }

    #[test]
    fn test_ragged_matrix_rejected() {
        let (_dir, path) = write_matrix("1 2 3\n4 5\n");
        assert!(matches!(
            load_matrix(&path, &IngestOptions::new("var")),
            Err(EvalError::UnknownFormat(_))
        ));
    }
}
