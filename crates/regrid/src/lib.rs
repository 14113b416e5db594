//! Spatial regridding: bilinear interpolation onto a target lat/lon mesh.
//!
//! The only stage that changes a dataset's spatial shape. Interpolation
//! weights depend only on the two grids, so they are computed once per
//! (source, target) pair and then applied frame by frame over the time
//! axis, which is preserved exactly.
//!
//! Mask policy is strict on purpose: a target cell with any masked source
//! corner is masked, and target cells outside the source grid are masked.
//! Interpolating across missing data would silently invent values.

mod weights;

use ndarray::{Array2, Array3};
use tracing::debug;

use dataset::Dataset;
use eval_common::EvalResult;

pub use weights::{BilinearWeights, Corner};

/// Regrid a dataset onto the given target meshes.
///
/// Returns a replacement dataset with the target grid and an unchanged
/// time axis. When the target equals the source grid the dataset is
/// returned as-is (modulo the usual copy).
pub fn regrid(
    ds: &Dataset,
    target_lats: &Array2<f64>,
    target_lons: &Array2<f64>,
) -> EvalResult<Dataset> {
    if ds.lats.shape() == target_lats.shape()
        && ds
            .lats
            .iter()
            .zip(target_lats.iter())
            .all(|(a, b)| (a - b).abs() <= dataset::GRID_EPS)
        && ds
            .lons
            .iter()
            .zip(target_lons.iter())
            .all(|(a, b)| (a - b).abs() <= dataset::GRID_EPS)
    {
        debug!(dataset = %ds.name, "target grid equals source grid, skipping regrid");
        return Ok(ds.clone());
    }

    let w = BilinearWeights::compute(&ds.lats, &ds.lons, target_lats, target_lons, &ds.name)?;

    let (ny, nx) = (target_lats.shape()[0], target_lats.shape()[1]);
    let nt = ds.nt();
    let mut values = Array3::from_elem((nt, ny, nx), ds.missing);
    let mut mask = Array3::from_elem((nt, ny, nx), true);

    for t in 0..nt {
        let frame = ds.values.index_axis(ndarray::Axis(0), t);
        let frame_mask = ds.mask.index_axis(ndarray::Axis(0), t);
        for j in 0..ny {
            for i in 0..nx {
                if let Some(v) = w.interpolate(j, i, &frame, &frame_mask) {
                    values[[t, j, i]] = v;
                    mask[[t, j, i]] = false;
                }
            }
        }
    }

    debug!(
        dataset = %ds.name,
        src = ?ds.lats.shape(),
        dst = ?target_lats.shape(),
        "regridded"
    );
    ds.replace(
        values,
        mask,
        target_lats.clone(),
        target_lons.clone(),
        ds.times.clone(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use eval_common::Calendar;
    use test_utils::{dataset_from_fn, mask_cells, monthly_times, uniform_grid};

    fn linear_field(ny: usize, nx: usize, d: f64) -> Dataset {
        let (lats, lons) = uniform_grid(0.0, d, ny, 0.0, d, nx);
        dataset_from_fn(
            "src",
            "tas",
            "K",
            monthly_times(Calendar::Gregorian, 2000, 2),
            lats,
            lons,
            |_, lat, lon| 2.0 * lat + lon,
        )
    }

    #[test]
    fn test_bilinear_reproduces_linear_field() {
        let src = linear_field(5, 5, 2.0); // covers 0..8 degrees
        let (tlats, tlons) = uniform_grid(1.0, 2.0, 3, 1.0, 2.0, 3); // offset by 1
        let out = regrid(&src, &tlats, &tlons).unwrap();
        for j in 0..3 {
            for i in 0..3 {
                let expect = 2.0 * tlats[[j, i]] + tlons[[j, i]];
                assert_relative_eq!(out.values[[0, j, i]], expect, epsilon = 1e-9);
                assert!(!out.mask[[0, j, i]]);
            }
        }
    }

    #[test]
    fn test_time_axis_preserved() {
        let src = linear_field(5, 5, 2.0);
        let (tlats, tlons) = uniform_grid(1.0, 4.0, 2, 1.0, 4.0, 2);
        let out = regrid(&src, &tlats, &tlons).unwrap();
        assert_eq!(out.times, src.times);
        assert_eq!(out.nt(), 2);
    }

    #[test]
    fn test_masked_corner_masks_target() {
        let mut src = linear_field(5, 5, 2.0);
        mask_cells(&mut src, &[(0, 2, 2)]);
        let (tlats, tlons) = uniform_grid(3.0, 2.0, 2, 3.0, 2.0, 2);
        let out = regrid(&src, &tlats, &tlons).unwrap();
        // target (3,3) interpolates from source cells (1..2, 1..2); corner
        // (2,2) is masked at t=0 only
        assert!(out.mask[[0, 0, 0]]);
        assert!(!out.mask[[1, 0, 0]]);
    }

    #[test]
    fn test_outside_hull_masked() {
        let src = linear_field(3, 3, 1.0); // covers 0..2
        let (tlats, tlons) = uniform_grid(-1.0, 2.0, 3, 0.0, 1.0, 2);
        let out = regrid(&src, &tlats, &tlons).unwrap();
        assert!(out.mask[[0, 0, 0]]); // lat -1 below the grid
        assert!(!out.mask[[0, 1, 0]]); // lat 1 inside
        assert!(out.mask[[0, 2, 0]]); // lat 3 above
    }

    #[test]
    fn test_identity_grid_shortcut() {
        let src = linear_field(4, 4, 1.0);
        let out = regrid(&src, &src.lats.clone(), &src.lons.clone()).unwrap();
        assert_eq!(out.values, src.values);
    }

    #[test]
    fn test_global_seam_wrap() {
        // global 4-degree grid: lons -180..176, cyclic
        let (lats, lons) = uniform_grid(-20.0, 4.0, 11, -180.0, 4.0, 90);
        let src = dataset_from_fn(
            "global",
            "tas",
            "K",
            monthly_times(Calendar::Gregorian, 2000, 1),
            lats,
            lons,
            |_, lat, _| lat,
        );
        // target sits between the last source meridian (176) and the seam
        let (tlats, tlons) = uniform_grid(0.0, 4.0, 2, 178.0, 1.0, 1);
        let out = regrid(&src, &tlats, &tlons).unwrap();
        assert!(!out.mask[[0, 0, 0]], "seam-adjacent target must be filled");
        assert_relative_eq!(out.values[[0, 0, 0]], 0.0, epsilon = 1e-9);
        assert_relative_eq!(out.values[[0, 1, 0]], 4.0, epsilon = 1e-9);
    }
}
