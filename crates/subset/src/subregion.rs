//! Area-weighted subregion means.
//!
//! Each subregion reduces a (time, lat, lon) field to a time series using
//! cos(latitude) area weights. Masked cells are excluded from both the
//! numerator and the denominator; a region with zero unmasked cells at a
//! time step emits a masked sample there.

use ndarray::{Array2, Array3, Axis};
use tracing::{debug, warn};

use dataset::{Dataset, DatasetStack};
use eval_common::{EvalError, EvalResult, SubRegion, SubRegionShape};

/// Per-subregion time series for one dataset: arrays are (region, time).
#[derive(Debug, Clone)]
pub struct RegionSeries {
    pub region_names: Vec<String>,
    pub values: Array2<f64>,
    pub mask: Array2<bool>,
    pub missing: f64,
}

/// Resolve the member cells of a region on a grid: (j, i, weight).
fn region_cells(
    region: &SubRegion,
    lats: &Array2<f64>,
    lons: &Array2<f64>,
    dataset_name: &str,
) -> EvalResult<Vec<(usize, usize, f64)>> {
    let (ny, nx) = (lats.shape()[0], lats.shape()[1]);
    let mut cells = Vec::new();
    match &region.shape {
        SubRegionShape::Rectangle { .. } => {
            for j in 0..ny {
                for i in 0..nx {
                    if region.contains(lats[[j, i]], lons[[j, i]]) {
                        cells.push((j, i, lats[[j, i]].to_radians().cos()));
                    }
                }
            }
        }
        SubRegionShape::Mask(mask) => {
            if mask.shape() != [ny, nx] {
                return Err(EvalError::GridMismatch {
                    stage: "subregion".into(),
                    dataset: dataset_name.to_string(),
                    reason: format!(
                        "mask for region '{}' has shape {:?}, grid is ({}, {})",
                        region.name,
                        mask.shape(),
                        ny,
                        nx
                    ),
                });
            }
            for j in 0..ny {
                for i in 0..nx {
                    if mask[[j, i]] {
                        cells.push((j, i, lats[[j, i]].to_radians().cos()));
                    }
                }
            }
        }
    }
    Ok(cells)
}

/// Area-weighted mean time series per subregion for a single dataset.
pub fn region_means(ds: &Dataset, regions: &[SubRegion]) -> EvalResult<RegionSeries> {
    let nt = ds.nt();
    let mut values = Array2::from_elem((regions.len(), nt), ds.missing);
    let mut mask = Array2::from_elem((regions.len(), nt), true);

    for (r, region) in regions.iter().enumerate() {
        let cells = region_cells(region, &ds.lats, &ds.lons, &ds.name)?;
        if cells.is_empty() {
            warn!(
                dataset = %ds.name,
                region = %region.name,
                "subregion intersects no grid cells"
            );
            continue;
        }
        for t in 0..nt {
            let mut num = 0.0;
            let mut den = 0.0;
            for &(j, i, w) in &cells {
                if !ds.mask[[t, j, i]] {
                    num += w * ds.values[[t, j, i]];
                    den += w;
                }
            }
            if den > 0.0 {
                values[[r, t]] = num / den;
                mask[[r, t]] = false;
            }
        }
        debug!(
            dataset = %ds.name,
            region = %region.name,
            cells = cells.len(),
            "reduced subregion"
        );
    }

    Ok(RegionSeries {
        region_names: regions.iter().map(|r| r.name.clone()).collect(),
        values,
        mask,
        missing: ds.missing,
    })
}

/// Subregion means across a stacked collection.
///
/// Returns values and mask shaped (dataset, subregion, time).
pub fn region_means_stack(
    stack: &DatasetStack,
    regions: &[SubRegion],
) -> EvalResult<(Array3<f64>, Array3<bool>)> {
    let n_ds = stack.values.shape()[0];
    let nt = stack.times.len();
    let mut values = Array3::from_elem((n_ds, regions.len(), nt), stack.missing);
    let mut mask = Array3::from_elem((n_ds, regions.len(), nt), true);

    for (r, region) in regions.iter().enumerate() {
        let cells = region_cells(region, &stack.lats, &stack.lons, &stack.names[0])?;
        if cells.is_empty() {
            warn!(region = %region.name, "subregion intersects no grid cells");
            continue;
        }
        for d in 0..n_ds {
            let member = stack.values.index_axis(Axis(0), d);
            let member_mask = stack.mask.index_axis(Axis(0), d);
            for t in 0..nt {
                let mut num = 0.0;
                let mut den = 0.0;
                for &(j, i, w) in &cells {
                    if !member_mask[[t, j, i]] {
                        num += w * member[[t, j, i]];
                        den += w;
                    }
                }
                if den > 0.0 {
                    values[[d, r, t]] = num / den;
                    mask[[d, r, t]] = false;
                }
            }
        }
    }
    Ok((values, mask))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use eval_common::Calendar;
    use ndarray::Array2 as A2;
    use test_utils::{dataset_from_fn, mask_cells, monthly_times, uniform_grid};

    /// Field equal to latitude, on a 0.5-degree-offset grid over 0..20.
    fn lat_field() -> Dataset {
        let (lats, lons) = uniform_grid(0.5, 1.0, 20, 0.5, 1.0, 10);
        dataset_from_fn(
            "latfield",
            "tas",
            "degC",
            monthly_times(Calendar::Gregorian, 2000, 12),
            lats,
            lons,
            |_, lat, _| lat,
        )
    }

    #[test]
    fn test_adjacent_boxes_recover_band_means() {
        let ds = lat_field();
        let regions = vec![
            SubRegion::rectangle("R1", 0.0, 10.0, 0.0, 10.0),
            SubRegion::rectangle("R2", 10.0, 20.0, 0.0, 10.0),
        ];
        let out = region_means(&ds, &regions).unwrap();
        assert_eq!(out.values.shape(), &[2, 12]);
        for t in 0..12 {
            // cos-weighting pulls the mean slightly below the arithmetic
            // center of each band
            assert_relative_eq!(out.values[[0, t]], 5.0, epsilon = 0.05);
            assert_relative_eq!(out.values[[1, t]], 15.0, epsilon = 0.05);
            assert!(!out.mask[[0, t]]);
        }
        // constant-in-time series: zero variance
        let series: Vec<f64> = (0..12).map(|t| out.values[[0, t]]).collect();
        let mean = series.iter().sum::<f64>() / 12.0;
        assert!(series.iter().all(|v| (v - mean).abs() < 1e-12));
    }

    #[test]
    fn test_masked_cells_leave_denominator() {
        let (lats, lons) = uniform_grid(0.0, 1.0, 2, 0.0, 1.0, 2);
        let mut ds = dataset_from_fn(
            "m",
            "tas",
            "degC",
            monthly_times(Calendar::Gregorian, 2000, 1),
            lats,
            lons,
            |_, lat, lon| lat * 10.0 + lon,
        );
        // mask the (1, 1) cell: mean of remaining three, cos-weighted
        mask_cells(&mut ds, &[(0, 1, 1)]);
        let regions = vec![SubRegion::rectangle("all", -1.0, 2.0, -1.0, 2.0)];
        let out = region_means(&ds, &regions).unwrap();
        let w0 = 0.0f64.to_radians().cos();
        let w1 = 1.0f64.to_radians().cos();
        let expect = (w0 * 0.0 + w0 * 1.0 + w1 * 10.0) / (2.0 * w0 + w1);
        assert_relative_eq!(out.values[[0, 0]], expect, epsilon = 1e-12);
    }

    #[test]
    fn test_fully_masked_step_emits_masked() {
        let (lats, lons) = uniform_grid(0.0, 1.0, 2, 0.0, 1.0, 2);
        let mut ds = dataset_from_fn(
            "m",
            "tas",
            "degC",
            monthly_times(Calendar::Gregorian, 2000, 2),
            lats,
            lons,
            |_, _, _| 1.0,
        );
        mask_cells(&mut ds, &[(0, 0, 0), (0, 0, 1), (0, 1, 0), (0, 1, 1)]);
        let regions = vec![SubRegion::rectangle("all", -1.0, 2.0, -1.0, 2.0)];
        let out = region_means(&ds, &regions).unwrap();
        assert!(out.mask[[0, 0]]);
        assert!(!out.mask[[0, 1]]);
    }

    #[test]
    fn test_mask_shaped_region() {
        let ds = lat_field();
        let mut sel = A2::from_elem((20, 10), false);
        sel[[0, 0]] = true;
        sel[[1, 0]] = true;
        let regions = vec![SubRegion::from_mask("picked", sel)];
        let out = region_means(&ds, &regions).unwrap();
        // lats 0.5 and 1.5, cos-weighted
        let w0 = 0.5f64.to_radians().cos();
        let w1 = 1.5f64.to_radians().cos();
        let expect = (w0 * 0.5 + w1 * 1.5) / (w0 + w1);
        assert_relative_eq!(out.values[[0, 0]], expect, epsilon = 1e-12);
    }

    #[test]
    fn test_mask_region_shape_mismatch() {
        let ds = lat_field();
        let regions = vec![SubRegion::from_mask("bad", A2::from_elem((3, 3), true))];
        assert!(matches!(
            region_means(&ds, &regions),
            Err(EvalError::GridMismatch { .. })
        ));
    }
}
