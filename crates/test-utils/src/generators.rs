//! Synthetic dataset generators with predictable, verifiable patterns.
//!
//! The generators build fully valid canonical datasets so individual test
//! suites don't repeat the boilerplate of wiring values, masks, meshes,
//! and time axes together.

use ndarray::{Array2, Array3};

use dataset::{Dataset, Origin, DEFAULT_MISSING};
use eval_common::{CalTime, Calendar};

/// A monthly time axis of `n` steps starting in January of `start_year`.
pub fn monthly_times(calendar: Calendar, start_year: i32, n: usize) -> Vec<CalTime> {
    (0..n)
        .map(|i| {
            let year = start_year + (i / 12) as i32;
            let month = (i % 12) as u32 + 1;
            CalTime::from_ymd(calendar, year, month, 1).expect("valid month start")
        })
        .collect()
}

/// Regular coordinate meshes: `lat_j = lat_min + j*d_lat`, analogous lons.
pub fn uniform_grid(
    lat_min: f64,
    d_lat: f64,
    ny: usize,
    lon_min: f64,
    d_lon: f64,
    nx: usize,
) -> (Array2<f64>, Array2<f64>) {
    let lats = Array2::from_shape_fn((ny, nx), |(j, _)| lat_min + j as f64 * d_lat);
    let lons = Array2::from_shape_fn((ny, nx), |(_, i)| lon_min + i as f64 * d_lon);
    (lats, lons)
}

/// Build a dataset from a closure `f(t, lat, lon) -> value`.
pub fn dataset_from_fn(
    name: &str,
    variable: &str,
    units: &str,
    times: Vec<CalTime>,
    lats: Array2<f64>,
    lons: Array2<f64>,
    f: impl Fn(usize, f64, f64) -> f64,
) -> Dataset {
    let (ny, nx) = (lats.shape()[0], lats.shape()[1]);
    let nt = times.len();
    let values = Array3::from_shape_fn((nt, ny, nx), |(t, j, i)| f(t, lats[[j, i]], lons[[j, i]]));
    let mask = Array3::from_elem((nt, ny, nx), false);
    Dataset::new(
        name,
        variable,
        units,
        values,
        mask,
        DEFAULT_MISSING,
        lats,
        lons,
        times,
        Origin::synthetic(name),
    )
    .expect("generator produces a valid dataset")
}

/// Constant field on a unit-degree grid with a monthly axis from 2000-01.
pub fn constant_dataset(
    name: &str,
    nt: usize,
    ny: usize,
    nx: usize,
    value: f64,
    calendar: Calendar,
) -> Dataset {
    let (lats, lons) = uniform_grid(0.0, 1.0, ny, 0.0, 1.0, nx);
    dataset_from_fn(
        name,
        "var",
        "1",
        monthly_times(calendar, 2000, nt),
        lats,
        lons,
        |_, _, _| value,
    )
}

/// Field equal to the time index everywhere; handy for verifying bin math.
pub fn ramp_dataset(name: &str, nt: usize, ny: usize, nx: usize, calendar: Calendar) -> Dataset {
    let (lats, lons) = uniform_grid(0.0, 1.0, ny, 0.0, 1.0, nx);
    dataset_from_fn(
        name,
        "var",
        "1",
        monthly_times(calendar, 2000, nt),
        lats,
        lons,
        |t, _, _| t as f64,
    )
}

/// Mask specific (t, j, i) cells in place and re-apply the sentinel.
pub fn mask_cells(ds: &mut Dataset, cells: &[(usize, usize, usize)]) {
    for &(t, j, i) in cells {
        ds.mask[[t, j, i]] = true;
    }
    ds.apply_sentinel();
}

/// A land/ocean-style mask: `true` (masked) over the "ocean" half of the
/// grid, `false` over "land" (columns below `land_columns`).
pub fn land_ocean_mask(nt: usize, ny: usize, nx: usize, land_columns: usize) -> Array3<bool> {
    Array3::from_shape_fn((nt, ny, nx), |(_, _, i)| i >= land_columns)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monthly_times_roll_over_years() {
        let times = monthly_times(Calendar::Gregorian, 2000, 14);
        assert_eq!(times[0].month, 1);
        assert_eq!(times[11].month, 12);
        assert_eq!(times[12].year, 2001);
        assert_eq!(times[12].month, 1);
        assert!(times.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_ramp_values() {
        let ds = ramp_dataset("r", 3, 2, 2, Calendar::Gregorian);
        assert_eq!(ds.values[[0, 0, 0]], 0.0);
        assert_eq!(ds.values[[2, 1, 1]], 2.0);
    }

    #[test]
    fn test_mask_cells_applies_sentinel() {
        let mut ds = constant_dataset("c", 2, 2, 2, 7.0, Calendar::Gregorian);
        mask_cells(&mut ds, &[(0, 0, 0)]);
        assert!(ds.mask[[0, 0, 0]]);
        assert_eq!(ds.values[[0, 0, 0]], DEFAULT_MISSING);
        assert_eq!(ds.values[[1, 0, 0]], 7.0);
    }
}
