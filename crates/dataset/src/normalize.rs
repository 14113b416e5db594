//! Axis normalization, applied once per dataset on ingestion.
//!
//! Brings any incoming grid onto the canonical orientation: latitude
//! increasing along the y axis, longitude increasing in [-180, 180) along
//! the x axis. Fields roll together with their coordinate arrays so values
//! and masks stay attached to the right cells.

use ndarray::{s, Array1, Array2, Array3};
use tracing::debug;

use eval_common::{EvalError, EvalResult};

use crate::dataset::Dataset;

/// Coordinate axes as they arrive from a source: either separable 1-D
/// vectors or full 2-D (curvilinear) meshes.
#[derive(Debug, Clone)]
pub enum AxisCoords {
    OneD(Array1<f64>),
    TwoD(Array2<f64>),
}

/// Build 2-D coordinate meshes from whatever the source provided.
pub fn build_meshes(lats: AxisCoords, lons: AxisCoords) -> EvalResult<(Array2<f64>, Array2<f64>)> {
    match (lats, lons) {
        (AxisCoords::OneD(la), AxisCoords::OneD(lo)) => {
            let (ny, nx) = (la.len(), lo.len());
            let lat2 = Array2::from_shape_fn((ny, nx), |(j, _)| la[j]);
            let lon2 = Array2::from_shape_fn((ny, nx), |(_, i)| lo[i]);
            Ok((lat2, lon2))
        }
        (AxisCoords::TwoD(la), AxisCoords::TwoD(lo)) => {
            if la.shape() != lo.shape() {
                return Err(EvalError::GridMismatch {
                    stage: "normalize".into(),
                    dataset: "<raw>".into(),
                    reason: format!(
                        "lat mesh {:?} and lon mesh {:?} differ in shape",
                        la.shape(),
                        lo.shape()
                    ),
                });
            }
            Ok((la, lo))
        }
        _ => Err(EvalError::GridMismatch {
            stage: "normalize".into(),
            dataset: "<raw>".into(),
            reason: "latitude and longitude axes must both be 1-D or both 2-D".into(),
        }),
    }
}

/// Direction of a coordinate axis derived from consecutive differences.
enum AxisDirection {
    Increasing,
    Decreasing,
}

fn axis_direction(coords: &[f64], dataset: &str, axis: &str) -> EvalResult<AxisDirection> {
    let mut up = false;
    let mut down = false;
    for w in coords.windows(2) {
        if w[1] > w[0] {
            up = true;
        } else if w[1] < w[0] {
            down = true;
        }
    }
    if up && down {
        return Err(EvalError::NonMonotonicAxis {
            dataset: dataset.to_string(),
            axis: axis.to_string(),
        });
    }
    Ok(if down {
        AxisDirection::Decreasing
    } else {
        AxisDirection::Increasing
    })
}

/// Normalize a dataset's spatial axes. Returns a replacement dataset with
/// monotonically increasing latitude and longitude in [-180, 180).
///
/// `pivot` overrides the longitude the roll is anchored at (default 180°).
pub fn normalize(ds: &Dataset, pivot: Option<f64>) -> EvalResult<Dataset> {
    let mut values = ds.values.clone();
    let mut mask = ds.mask.clone();
    let mut lats = ds.lats.clone();
    let mut lons = ds.lons.clone();

    // Latitude direction from the first column.
    let lat_col: Vec<f64> = lats.column(0).to_vec();
    if let AxisDirection::Decreasing = axis_direction(&lat_col, &ds.name, "latitude")? {
        debug!(dataset = %ds.name, "reversing latitude axis");
        values = values.slice(s![.., ..;-1, ..]).to_owned();
        mask = mask.slice(s![.., ..;-1, ..]).to_owned();
        lats = lats.slice(s![..;-1, ..]).to_owned();
        lons = lons.slice(s![..;-1, ..]).to_owned();
    }

    // A cyclic grid carrying both ends of the seam (e.g. 0° and 360°, or
    // -180° and +180°) duplicates one meridian; drop it before any roll so
    // the duplicate cannot end up in the interior.
    {
        let row: Vec<f64> = lons.row(0).to_vec();
        let nx = row.len();
        if nx > 1 && ((row[nx - 1] - row[0]) - 360.0).abs() <= 1e-4 {
            debug!(dataset = %ds.name, "dropping cyclic duplicate longitude column");
            values = values.slice(s![.., .., ..nx - 1]).to_owned();
            mask = mask.slice(s![.., .., ..nx - 1]).to_owned();
            lats = lats.slice(s![.., ..nx - 1]).to_owned();
            lons = lons.slice(s![.., ..nx - 1]).to_owned();
        }
    }

    // Longitude range: shift into [-180, 180) when the grid runs past 180.
    let lon_max = lons.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    if lon_max > 180.0 {
        let row: Vec<f64> = lons.row(0).to_vec();
        axis_direction(&row, &ds.name, "longitude")?;
        let target = pivot.unwrap_or(180.0);
        // Anchor at the first longitude on or past the pivot: exactly the
        // columns that must wrap by -360. Falls back to the nearest index
        // for pivots beyond the axis.
        let i0 = row.iter().position(|&l| l >= target).unwrap_or_else(|| {
            row.iter()
                .enumerate()
                .min_by(|(_, a), (_, b)| {
                    (*a - target)
                        .abs()
                        .partial_cmp(&(*b - target).abs())
                        .expect("finite longitudes")
                })
                .map(|(i, _)| i)
                .unwrap_or(0)
        });
        debug!(dataset = %ds.name, pivot = target, index = i0, "rolling longitude axis");

        let nx = row.len();
        let (nt, ny) = (values.shape()[0], values.shape()[1]);
        let wrapped = nx - i0;
        let src_col = |k: usize| (i0 + k) % nx;
        values = Array3::from_shape_fn((nt, ny, nx), |(t, j, k)| values[[t, j, src_col(k)]]);
        mask = Array3::from_shape_fn((nt, ny, nx), |(t, j, k)| mask[[t, j, src_col(k)]]);
        lats = Array2::from_shape_fn((ny, nx), |(j, k)| lats[[j, src_col(k)]]);
        lons = Array2::from_shape_fn((ny, nx), |(j, k)| {
            let lon = lons[[j, src_col(k)]];
            if k < wrapped {
                lon - 360.0
            } else {
                lon
            }
        });
    }

    // Post-conditions: both axes monotone non-decreasing.
    let lat_col: Vec<f64> = lats.column(0).to_vec();
    if lat_col.windows(2).any(|w| w[1] < w[0]) {
        return Err(EvalError::NonMonotonicAxis {
            dataset: ds.name.clone(),
            axis: "latitude".into(),
        });
    }
    let lon_row: Vec<f64> = lons.row(0).to_vec();
    if lon_row.windows(2).any(|w| w[1] < w[0]) {
        return Err(EvalError::NonMonotonicAxis {
            dataset: ds.name.clone(),
            axis: "longitude".into(),
        });
    }

    ds.replace(values, mask, lats, lons, ds.times.clone())
}
