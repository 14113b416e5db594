//! Spatio-temporal subsetting, dataset overlap, and subregion reduction.

mod subregion;

use ndarray::s;
use tracing::{debug, info};

use dataset::Dataset;
use eval_common::{Bounds, CalTime, EvalError, EvalResult};

pub use subregion::{region_means, region_means_stack, RegionSeries};

/// Clip a dataset to the smallest whole-cell window containing `bounds`.
///
/// The spatial clip keeps entire grid cells; the temporal clip is strict:
/// only timestamps inside the window survive.
pub fn subset(ds: &Dataset, bounds: &Bounds) -> EvalResult<Dataset> {
    // Row/column extent of cells whose center falls inside the window.
    let (ny, nx) = (ds.ny(), ds.nx());
    let mut j_min = ny;
    let mut j_max = 0usize;
    let mut i_min = nx;
    let mut i_max = 0usize;
    let mut any = false;
    for j in 0..ny {
        for i in 0..nx {
            if bounds.contains(ds.lats[[j, i]], ds.lons[[j, i]]) {
                any = true;
                j_min = j_min.min(j);
                j_max = j_max.max(j);
                i_min = i_min.min(i);
                i_max = i_max.max(i);
            }
        }
    }
    if !any {
        return Err(EvalError::EmptyOverlap {
            datasets: vec![ds.name.clone()],
        });
    }

    let keep: Vec<usize> = ds
        .times
        .iter()
        .enumerate()
        .filter(|(_, t)| bounds.contains_time(t))
        .map(|(idx, _)| idx)
        .collect();
    if keep.is_empty() {
        return Err(EvalError::EmptyOverlap {
            datasets: vec![ds.name.clone()],
        });
    }

    let values = ds.values.select(ndarray::Axis(0), &keep);
    let mask = ds.mask.select(ndarray::Axis(0), &keep);
    let values = values
        .slice(s![.., j_min..=j_max, i_min..=i_max])
        .to_owned();
    let mask = mask.slice(s![.., j_min..=j_max, i_min..=i_max]).to_owned();
    let lats = ds.lats.slice(s![j_min..=j_max, i_min..=i_max]).to_owned();
    let lons = ds.lons.slice(s![j_min..=j_max, i_min..=i_max]).to_owned();
    let times: Vec<CalTime> = keep.iter().map(|&idx| ds.times[idx]).collect();

    debug!(
        dataset = %ds.name,
        rows = j_max - j_min + 1,
        cols = i_max - i_min + 1,
        steps = times.len(),
        "subset applied"
    );
    ds.replace(values, mask, lats, lons, times)
}

/// Intersection of the spatio-temporal bounds of a dataset collection.
///
/// Longitudes are already normalized on ingestion, so intersection order
/// is lon, lat, then time (max of starts, min of ends). With
/// `snap_annual`, the time window is narrowed to whole January-December
/// years. Fails with EmptyOverlap when nothing remains.
pub fn overlap(datasets: &[&Dataset], snap_annual: bool) -> EvalResult<Bounds> {
    let names = || datasets.iter().map(|d| d.name.clone()).collect::<Vec<_>>();
    let mut iter = datasets.iter();
    let first = iter.next().ok_or_else(|| EvalError::EmptyOverlap {
        datasets: Vec::new(),
    })?;
    let mut bounds = first.bounds();
    for ds in iter {
        bounds = bounds
            .intersection(&ds.bounds())
            .ok_or_else(|| EvalError::EmptyOverlap { datasets: names() })?;
    }

    if snap_annual {
        let cal = bounds.t_start.calendar;
        let start_year = if bounds.t_start.month == 1 {
            bounds.t_start.year
        } else {
            bounds.t_start.year + 1
        };
        let end_year = if bounds.t_end.month == 12 {
            bounds.t_end.year
        } else {
            bounds.t_end.year - 1
        };
        if start_year > end_year {
            return Err(EvalError::EmptyOverlap { datasets: names() });
        }
        let t_start = CalTime::from_ymd(cal, start_year, 1, 1)?;
        let t_end = CalTime::new(
            cal,
            end_year,
            12,
            cal.days_in_month(end_year, 12),
            23,
            59,
            59,
        )?;
        bounds = Bounds::new(
            bounds.lat_min,
            bounds.lat_max,
            bounds.lon_min,
            bounds.lon_max,
            t_start,
            t_end,
        );
    }

    info!(
        lat_min = bounds.lat_min,
        lat_max = bounds.lat_max,
        lon_min = bounds.lon_min,
        lon_max = bounds.lon_max,
        t_start = %bounds.t_start,
        t_end = %bounds.t_end,
        "computed dataset overlap"
    );
    Ok(bounds)
}

#[cfg(test)]
mod tests {
    use super::*;
    use eval_common::Calendar;
    use test_utils::{dataset_from_fn, monthly_times, uniform_grid};

    fn field(lat0: f64, ny: usize, lon0: f64, nx: usize, year: i32, months: usize) -> Dataset {
        let (lats, lons) = uniform_grid(lat0, 1.0, ny, lon0, 1.0, nx);
        dataset_from_fn(
            "f",
            "tas",
            "K",
            monthly_times(Calendar::Gregorian, year, months),
            lats,
            lons,
            |t, lat, lon| t as f64 + lat + lon,
        )
    }

    fn t(y: i32, m: u32, d: u32) -> CalTime {
        CalTime::from_ymd(Calendar::Gregorian, y, m, d).unwrap()
    }

    #[test]
    fn test_subset_clips_space_and_time() {
        let ds = field(0.0, 10, 0.0, 10, 2000, 24);
        let b = Bounds::new(2.0, 5.0, 3.0, 6.0, t(2000, 7, 1), t(2001, 6, 30));
        let out = subset(&ds, &b).unwrap();
        assert_eq!(out.ny(), 4);
        assert_eq!(out.nx(), 4);
        assert_eq!(out.nt(), 12);
        assert_eq!(out.lats[[0, 0]], 2.0);
        assert_eq!(out.lons[[0, 0]], 3.0);
        assert_eq!(out.times[0], t(2000, 7, 1));
        // values stayed attached: first kept step had index 6
        assert_eq!(out.values[[0, 0, 0]], 6.0 + 2.0 + 3.0);
    }

    #[test]
    fn test_subset_composition_matches_intersection() {
        let ds = field(0.0, 20, 0.0, 20, 2000, 36);
        let b1 = Bounds::new(2.0, 15.0, 2.0, 15.0, t(2000, 1, 1), t(2002, 12, 31));
        let b2 = Bounds::new(5.0, 18.0, 0.0, 12.0, t(2001, 1, 1), t(2002, 12, 31));
        let composed = subset(&subset(&ds, &b1).unwrap(), &b2).unwrap();
        let direct = subset(&ds, &b1.intersection(&b2).unwrap()).unwrap();
        assert_eq!(composed.lats, direct.lats);
        assert_eq!(composed.lons, direct.lons);
        assert_eq!(composed.times, direct.times);
        assert_eq!(composed.values, direct.values);
    }

    #[test]
    fn test_subset_empty_window_fails() {
        let ds = field(0.0, 5, 0.0, 5, 2000, 12);
        let b = Bounds::new(50.0, 60.0, 0.0, 5.0, t(2000, 1, 1), t(2000, 12, 31));
        assert!(matches!(
            subset(&ds, &b),
            Err(EvalError::EmptyOverlap { .. })
        ));
    }

    #[test]
    fn test_overlap_intersects_all_dimensions() {
        let a = field(0.0, 10, 0.0, 10, 2000, 60);
        let mut b = field(5.0, 10, -3.0, 10, 2002, 60);
        b.name = "b".into();
        let bounds = overlap(&[&a, &b], false).unwrap();
        assert_eq!(bounds.lat_min, 5.0);
        assert_eq!(bounds.lat_max, 9.0);
        assert_eq!(bounds.lon_min, 0.0);
        assert_eq!(bounds.lon_max, 6.0);
        assert_eq!(bounds.t_start, t(2002, 1, 1));
        assert_eq!(bounds.t_end, t(2004, 12, 1));
    }

    #[test]
    fn test_overlap_disjoint_time_fails() {
        let a = field(0.0, 5, 0.0, 5, 1990, 120); // 1990-1999
        let mut b = field(0.0, 5, 0.0, 5, 2000, 120); // 2000-2009
        b.name = "late".into();
        let err = overlap(&[&a, &b], false).unwrap_err();
        match err {
            EvalError::EmptyOverlap { datasets } => {
                assert!(datasets.contains(&"late".to_string()));
            }
            other => panic!("expected EmptyOverlap, got {other}"),
        }
    }

    #[test]
    fn test_overlap_annual_snap() {
        // shifting the monthly axis by 59 days gives a series running
        // 2000-02-29 .. 2005-01-29; whole years are 2001..2004
        let a = field(0.0, 5, 0.0, 5, 2000, 60);
        let mut shifted = a.clone();
        shifted.times = a.times.iter().map(|t| t.add_seconds(59 * 86_400)).collect();
        let bounds = overlap(&[&shifted], true).unwrap();
        assert_eq!(bounds.t_start.year, 2001);
        assert_eq!(bounds.t_start.month, 1);
        assert_eq!(bounds.t_end.year, 2004);
        assert_eq!(bounds.t_end.month, 12);
        assert_eq!(bounds.t_end.day, 31);
    }
}
