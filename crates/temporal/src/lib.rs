//! Temporal rebinning: reduce a time axis to a coarser calendar cadence.
//!
//! Bins are calendar-aligned (all samples of one month fall in one bin, no
//! matter where in the month the series starts) and each output timestamp
//! is its bin's start, which makes rebinning idempotent at a fixed scale.
//! Masked-aware means honor the tau threshold: a bin emits masked wherever
//! fewer than `tau` of its samples were unmasked.

use std::collections::BTreeMap;

use ndarray::Array3;
use serde::{Deserialize, Serialize};
use tracing::debug;

use dataset::Dataset;
use eval_common::{CalTime, EvalError, EvalResult};

/// Minimum fraction of unmasked inputs required for an unmasked result.
pub const DEFAULT_TAU: f64 = 0.75;

/// Target cadence of the rebinner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Scale {
    Hourly,
    Daily,
    Monthly,
    /// Months `m_start..=m_end`, wrapping across the year boundary when
    /// `m_start > m_end` (e.g. DJF as `Seasonal { 12, 2 }`).
    Seasonal { m_start: u32, m_end: u32 },
    Annual,
    /// A single bin spanning the whole axis (climatology).
    Full,
}

impl Scale {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scale::Hourly => "hourly",
            Scale::Daily => "daily",
            Scale::Monthly => "monthly",
            Scale::Seasonal { .. } => "seasonal",
            Scale::Annual => "annual",
            Scale::Full => "full",
        }
    }

    /// Upper bound on the input step a bin of this scale can absorb, in
    /// seconds. A step above the bound means the input is coarser than
    /// the requested cadence. Seasons recur yearly, so a one-per-year
    /// series rebins into them (and rebinning stays idempotent). None
    /// means unbounded (Full).
    fn max_step_seconds(&self) -> Option<i64> {
        match self {
            Scale::Hourly => Some(3_600),
            Scale::Daily => Some(86_400),
            Scale::Monthly => Some(31 * 86_400),
            Scale::Seasonal { .. } | Scale::Annual => Some(366 * 86_400),
            Scale::Full => None,
        }
    }
}

impl std::fmt::Display for Scale {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Ranking of cadences for the "coarser wins" temporal-grid policy.
pub fn coarser(a: Scale, b: Scale) -> Scale {
    let rank = |s: &Scale| match s {
        Scale::Hourly => 0,
        Scale::Daily => 1,
        Scale::Monthly => 2,
        Scale::Seasonal { .. } => 3,
        Scale::Annual => 4,
        Scale::Full => 5,
    };
    if rank(&a) >= rank(&b) {
        a
    } else {
        b
    }
}

/// Infer the native cadence of a time axis from its median step.
pub fn native_scale(times: &[CalTime]) -> Scale {
    let step = median_step_seconds(times);
    if step <= 0 {
        Scale::Full
    } else if step < 86_400 {
        Scale::Hourly
    } else if step < 28 * 86_400 {
        Scale::Daily
    } else if step < 360 * 86_400 {
        Scale::Monthly
    } else {
        Scale::Annual
    }
}

fn median_step_seconds(times: &[CalTime]) -> i64 {
    if times.len() < 2 {
        return 0;
    }
    let mut steps: Vec<i64> = times
        .windows(2)
        .map(|w| w[1].second_number() - w[0].second_number())
        .collect();
    steps.sort_unstable();
    steps[steps.len() / 2]
}

/// Bin assignment: key orders the bins, start is the output timestamp.
fn bin_of(t: &CalTime, scale: Scale) -> Option<(i64, CalTime)> {
    let cal = t.calendar;
    let start = |y: i32, mo: u32, d: u32, h: u32| CalTime {
        calendar: cal,
        year: y,
        month: mo,
        day: d,
        hour: h,
        minute: 0,
        second: 0,
    };
    match scale {
        Scale::Hourly => Some((
            t.day_number() * 24 + t.hour as i64,
            start(t.year, t.month, t.day, t.hour),
        )),
        Scale::Daily => Some((t.day_number(), start(t.year, t.month, t.day, 0))),
        Scale::Monthly => Some((
            t.year as i64 * 12 + t.month as i64 - 1,
            start(t.year, t.month, 1, 0),
        )),
        Scale::Annual => Some((t.year as i64, start(t.year, 1, 1, 0))),
        Scale::Seasonal { m_start, m_end } => {
            if m_start <= m_end {
                if t.month < m_start || t.month > m_end {
                    return None;
                }
                Some((t.year as i64, start(t.year, m_start, 1, 0)))
            } else {
                // Wrapped season: months >= m_start open season-year y,
                // months <= m_end close the season opened in y-1.
                if t.month >= m_start {
                    Some((t.year as i64, start(t.year, m_start, 1, 0)))
                } else if t.month <= m_end {
                    Some((t.year as i64 - 1, start(t.year - 1, m_start, 1, 0)))
                } else {
                    None
                }
            }
        }
        Scale::Full => Some((0, *t)),
    }
}

/// Rebin a dataset to the requested cadence.
///
/// Fails with IncompatibleScale when the input cadence is coarser than the
/// requested bin (e.g. daily data rebinned to hourly).
pub fn rebin(ds: &Dataset, scale: Scale, tau: f64) -> EvalResult<Dataset> {
    if let Some(bin_secs) = scale.max_step_seconds() {
        let step = median_step_seconds(&ds.times);
        if step > bin_secs {
            return Err(EvalError::IncompatibleScale {
                dataset: ds.name.clone(),
                from: native_scale(&ds.times).as_str().to_string(),
                to: scale.as_str().to_string(),
            });
        }
    }

    // Gather time indices per bin, ordered by bin key.
    let mut bins: BTreeMap<i64, (CalTime, Vec<usize>)> = BTreeMap::new();
    for (idx, t) in ds.times.iter().enumerate() {
        if let Some((key, bin_start)) = bin_of(t, scale) {
            bins.entry(key)
                .or_insert_with(|| (bin_start, Vec::new()))
                .1
                .push(idx);
        }
    }

    // Wrapped seasons at the edges of a sub-annual record are incomplete;
    // drop the leading bin opened before the record and the trailing one
    // cut short. A series already reduced to one sample per season (step
    // of a year) has no incomplete edges.
    if let Scale::Seasonal { m_start, m_end } = scale {
        if m_start > m_end && bins.len() > 1 && median_step_seconds(&ds.times) < 360 * 86_400 {
            let first_year = ds.times[0].year as i64;
            let last_year = ds.times[ds.times.len() - 1].year as i64;
            bins.retain(|&key, _| key >= first_year && key < last_year);
        }
    }

    if bins.is_empty() {
        return Err(EvalError::AllMasked {
            stage: "rebin".into(),
            dataset: ds.name.clone(),
        });
    }

    let (ny, nx) = (ds.ny(), ds.nx());
    let n_bins = bins.len();
    let mut values = Array3::from_elem((n_bins, ny, nx), ds.missing);
    let mut mask = Array3::from_elem((n_bins, ny, nx), true);
    let mut times = Vec::with_capacity(n_bins);

    for (b, (_, (bin_start, idxs))) in bins.into_iter().enumerate() {
        times.push(bin_start);
        let n_in_bin = idxs.len() as f64;
        for j in 0..ny {
            for i in 0..nx {
                let mut sum = 0.0;
                let mut count = 0usize;
                for &t in &idxs {
                    if !ds.mask[[t, j, i]] {
                        sum += ds.values[[t, j, i]];
                        count += 1;
                    }
                }
                if count > 0 && count as f64 / n_in_bin >= tau {
                    values[[b, j, i]] = sum / count as f64;
                    mask[[b, j, i]] = false;
                }
            }
        }
    }

    debug!(
        dataset = %ds.name,
        scale = %scale,
        bins = n_bins,
        input_steps = ds.nt(),
        "rebinned time axis"
    );
    ds.replace(values, mask, ds.lats.clone(), ds.lons.clone(), times)
}

/// Mean annual cycle of a monthly series: group samples by calendar month
/// and average across years, producing a 12-step (or shorter, if months
/// are absent) dataset.
pub fn monthly_climatology(ds: &Dataset, tau: f64) -> EvalResult<Dataset> {
    climatology_reduce(ds, tau, false)
}

/// Inter-annual standard deviation (one degree of freedom) of each
/// calendar month of a monthly series.
pub fn monthly_climatology_std(ds: &Dataset, tau: f64) -> EvalResult<Dataset> {
    climatology_reduce(ds, tau, true)
}

fn climatology_reduce(ds: &Dataset, tau: f64, std_dev: bool) -> EvalResult<Dataset> {
    let step = median_step_seconds(&ds.times);
    if step > 31 * 86_400 {
        return Err(EvalError::IncompatibleScale {
            dataset: ds.name.clone(),
            from: native_scale(&ds.times).as_str().to_string(),
            to: "monthly climatology".into(),
        });
    }

    let mut by_month: BTreeMap<u32, Vec<usize>> = BTreeMap::new();
    for (idx, t) in ds.times.iter().enumerate() {
        by_month.entry(t.month).or_default().push(idx);
    }

    let (ny, nx) = (ds.ny(), ds.nx());
    let n_out = by_month.len();
    let mut values = Array3::from_elem((n_out, ny, nx), ds.missing);
    let mut mask = Array3::from_elem((n_out, ny, nx), true);
    let mut times = Vec::with_capacity(n_out);
    let base_year = ds.times[0].year;
    let cal = ds.calendar();

    for (b, (month, idxs)) in by_month.into_iter().enumerate() {
        times.push(CalTime {
            calendar: cal,
            year: base_year,
            month,
            day: 1,
            hour: 0,
            minute: 0,
            second: 0,
        });
        let n_years = idxs.len() as f64;
        for j in 0..ny {
            for i in 0..nx {
                let samples: Vec<f64> = idxs
                    .iter()
                    .filter(|&&t| !ds.mask[[t, j, i]])
                    .map(|&t| ds.values[[t, j, i]])
                    .collect();
                let count = samples.len();
                if count == 0 || (count as f64) / n_years < tau {
                    continue;
                }
                let mean = samples.iter().sum::<f64>() / count as f64;
                let out = if std_dev {
                    if count < 2 {
                        continue;
                    }
                    let ss: f64 = samples.iter().map(|v| (v - mean).powi(2)).sum();
                    (ss / (count - 1) as f64).sqrt()
                } else {
                    mean
                };
                values[[b, j, i]] = out;
                mask[[b, j, i]] = false;
            }
        }
    }

    ds.replace(values, mask, ds.lats.clone(), ds.lons.clone(), times)
}
