//! Named spatial subregions for area-averaged time series.

use std::path::Path;

use ndarray::Array2;

use crate::error::{EvalError, EvalResult};

/// A named spatial window used for area averaging.
///
/// Rectangles are resolved against a dataset's grid at reduction time;
/// mask subregions select cells directly and must match the grid shape.
#[derive(Debug, Clone)]
pub struct SubRegion {
    pub name: String,
    pub shape: SubRegionShape,
}

#[derive(Debug, Clone)]
pub enum SubRegionShape {
    Rectangle {
        lat_min: f64,
        lat_max: f64,
        lon_min: f64,
        lon_max: f64,
    },
    /// `true` marks cells inside the region.
    Mask(Array2<bool>),
}

impl SubRegion {
    pub fn rectangle(
        name: impl Into<String>,
        lat_min: f64,
        lat_max: f64,
        lon_min: f64,
        lon_max: f64,
    ) -> Self {
        Self {
            name: name.into(),
            shape: SubRegionShape::Rectangle {
                lat_min: lat_min.min(lat_max),
                lat_max: lat_min.max(lat_max),
                lon_min: lon_min.min(lon_max),
                lon_max: lon_min.max(lon_max),
            },
        }
    }

    pub fn from_mask(name: impl Into<String>, mask: Array2<bool>) -> Self {
        Self {
            name: name.into(),
            shape: SubRegionShape::Mask(mask),
        }
    }

    /// Whether a cell center falls inside a rectangular region.
    ///
    /// Mask regions are resolved by index, not by coordinate.
    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        match &self.shape {
            SubRegionShape::Rectangle {
                lat_min,
                lat_max,
                lon_min,
                lon_max,
            } => lat >= *lat_min && lat <= *lat_max && lon >= *lon_min && lon <= *lon_max,
            SubRegionShape::Mask(_) => false,
        }
    }
}

/// Parse a subregion file: one record per line,
/// `name, lat_max, lat_min, lon_max, lon_min`, comma or whitespace
/// separated. Blank lines and `#` comments are skipped.
pub fn parse_subregion_records(text: &str) -> EvalResult<Vec<SubRegion>> {
    let mut regions = Vec::new();
    for (lineno, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = line
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|f| !f.is_empty())
            .collect();
        if fields.len() != 5 {
            return Err(EvalError::ConfigInvalid(format!(
                "subregion line {}: expected 5 fields, got {}",
                lineno + 1,
                fields.len()
            )));
        }
        let parse = |s: &str| -> EvalResult<f64> {
            s.parse().map_err(|_| {
                EvalError::ConfigInvalid(format!(
                    "subregion line {}: bad number '{}'",
                    lineno + 1,
                    s
                ))
            })
        };
        let lat_max = parse(fields[1])?;
        let lat_min = parse(fields[2])?;
        let lon_max = parse(fields[3])?;
        let lon_min = parse(fields[4])?;
        regions.push(SubRegion::rectangle(
            fields[0], lat_min, lat_max, lon_min, lon_max,
        ));
    }
    Ok(regions)
}

/// Load subregions from a file on disk.
pub fn load_subregion_file(path: &Path) -> EvalResult<Vec<SubRegion>> {
    let text = std::fs::read_to_string(path)
        .map_err(|_| EvalError::FileNotFound(path.display().to_string()))?;
    parse_subregion_records(&text)
}
