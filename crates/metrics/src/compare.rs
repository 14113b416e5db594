//! The comparison formulas.
//!
//! Every reduction works on the cells (or steps) where both inputs are
//! unmasked and honors the tau threshold: a result element whose common
//! unmasked fraction falls below tau is emitted masked. Standard
//! deviations use one degree of freedom throughout.

use ndarray::Array2;

use dataset::Dataset;
use eval_common::{EvalError, EvalResult};

/// Per-cell reduction over the time axis: `f(diffs) -> value` applied to
/// the target-minus-reference differences at common unmasked steps.
fn time_reduce_map(
    reference: &Dataset,
    target: &Dataset,
    tau: f64,
    f: impl Fn(&[f64]) -> f64,
) -> (Array2<f64>, Array2<bool>) {
    let (nt, ny, nx) = (reference.nt(), reference.ny(), reference.nx());
    let mut values = Array2::from_elem((ny, nx), reference.missing);
    let mut mask = Array2::from_elem((ny, nx), true);
    for j in 0..ny {
        for i in 0..nx {
            let diffs: Vec<f64> = (0..nt)
                .filter(|&t| !reference.mask[[t, j, i]] && !target.mask[[t, j, i]])
                .map(|t| target.values[[t, j, i]] - reference.values[[t, j, i]])
                .collect();
            if !diffs.is_empty() && diffs.len() as f64 / nt as f64 >= tau {
                values[[j, i]] = f(&diffs);
                mask[[j, i]] = false;
            }
        }
    }
    (values, mask)
}

fn mean(xs: &[f64]) -> f64 {
    xs.iter().sum::<f64>() / xs.len() as f64
}

/// Sample standard deviation, one degree of freedom.
fn stddev(xs: &[f64]) -> f64 {
    let m = mean(xs);
    (xs.iter().map(|x| (x - m).powi(2)).sum::<f64>() / (xs.len() - 1) as f64).sqrt()
}

fn pearson(xs: &[f64], ys: &[f64]) -> Option<f64> {
    let n = xs.len();
    if n < 2 {
        return None;
    }
    let mx = mean(xs);
    let my = mean(ys);
    let mut sxy = 0.0;
    let mut sxx = 0.0;
    let mut syy = 0.0;
    for k in 0..n {
        let dx = xs[k] - mx;
        let dy = ys[k] - my;
        sxy += dx * dy;
        sxx += dx * dx;
        syy += dy * dy;
    }
    if sxx <= 0.0 || syy <= 0.0 {
        return None;
    }
    Some(sxy / (sxx * syy).sqrt())
}

fn require_not_all_masked(
    mask: &Array2<bool>,
    stage: &str,
    dataset: &str,
) -> EvalResult<()> {
    if mask.iter().all(|&m| m) {
        return Err(EvalError::AllMasked {
            stage: stage.to_string(),
            dataset: dataset.to_string(),
        });
    }
    Ok(())
}

/// Mean bias per cell: mean over time of (target - reference).
pub fn bias_map(
    reference: &Dataset,
    target: &Dataset,
    tau: f64,
) -> EvalResult<(Array2<f64>, Array2<bool>)> {
    let (values, mask) = time_reduce_map(reference, target, tau, mean);
    require_not_all_masked(&mask, "bias", &target.name)?;
    Ok((values, mask))
}

/// Mean absolute error per cell.
pub fn mae_map(
    reference: &Dataset,
    target: &Dataset,
    tau: f64,
) -> EvalResult<(Array2<f64>, Array2<bool>)> {
    let (values, mask) = time_reduce_map(reference, target, tau, |d| {
        d.iter().map(|x| x.abs()).sum::<f64>() / d.len() as f64
    });
    require_not_all_masked(&mask, "mae", &target.name)?;
    Ok((values, mask))
}

/// Root-mean-square error per cell.
pub fn rmse_map(
    reference: &Dataset,
    target: &Dataset,
    tau: f64,
) -> EvalResult<(Array2<f64>, Array2<bool>)> {
    let (values, mask) = time_reduce_map(reference, target, tau, |d| {
        (d.iter().map(|x| x * x).sum::<f64>() / d.len() as f64).sqrt()
    });
    require_not_all_masked(&mask, "rmse", &target.name)?;
    Ok((values, mask))
}

/// Domain-mean bias: mean of (target - reference) over all common
/// unmasked samples in time and space.
pub fn bias_domain(reference: &Dataset, target: &Dataset) -> EvalResult<f64> {
    let mut sum = 0.0;
    let mut count = 0usize;
    ndarray::Zip::from(&reference.values)
        .and(&reference.mask)
        .and(&target.values)
        .and(&target.mask)
        .for_each(|&rv, &rm, &tv, &tm| {
            if !rm && !tm {
                sum += tv - rv;
                count += 1;
            }
        });
    if count == 0 {
        return Err(EvalError::AllMasked {
            stage: "bias_domain".into(),
            dataset: target.name.clone(),
        });
    }
    Ok(sum / count as f64)
}

/// Spatial pattern correlation per time step.
pub fn pattern_corr_spatial(
    reference: &Dataset,
    target: &Dataset,
    tau: f64,
) -> EvalResult<(Vec<f64>, Vec<bool>)> {
    let (nt, ny, nx) = (reference.nt(), reference.ny(), reference.nx());
    let n_cells = ny * nx;
    if n_cells < 2 {
        return Err(EvalError::MetricIncompatible {
            metric: "pc_spatial".into(),
            reason: "spatial correlation needs at least two grid cells".into(),
        });
    }
    let mut values = vec![reference.missing; nt];
    let mut mask = vec![true; nt];
    for t in 0..nt {
        let mut xs = Vec::with_capacity(n_cells);
        let mut ys = Vec::with_capacity(n_cells);
        for j in 0..ny {
            for i in 0..nx {
                if !reference.mask[[t, j, i]] && !target.mask[[t, j, i]] {
                    xs.push(reference.values[[t, j, i]]);
                    ys.push(target.values[[t, j, i]]);
                }
            }
        }
        if xs.len() as f64 / n_cells as f64 >= tau {
            if let Some(r) = pearson(&xs, &ys) {
                values[t] = r;
                mask[t] = false;
            }
        }
    }
    if mask.iter().all(|&m| m) {
        return Err(EvalError::AllMasked {
            stage: "pc_spatial".into(),
            dataset: target.name.clone(),
        });
    }
    Ok((values, mask))
}

/// Temporal correlation per cell.
pub fn pattern_corr_temporal(
    reference: &Dataset,
    target: &Dataset,
    tau: f64,
) -> EvalResult<(Array2<f64>, Array2<bool>)> {
    let (nt, ny, nx) = (reference.nt(), reference.ny(), reference.nx());
    let mut values = Array2::from_elem((ny, nx), reference.missing);
    let mut mask = Array2::from_elem((ny, nx), true);
    for j in 0..ny {
        for i in 0..nx {
            let mut xs = Vec::with_capacity(nt);
            let mut ys = Vec::with_capacity(nt);
            for t in 0..nt {
                if !reference.mask[[t, j, i]] && !target.mask[[t, j, i]] {
                    xs.push(reference.values[[t, j, i]]);
                    ys.push(target.values[[t, j, i]]);
                }
            }
            if xs.len() as f64 / nt as f64 >= tau {
                if let Some(r) = pearson(&xs, &ys) {
                    values[[j, i]] = r;
                    mask[[j, i]] = false;
                }
            }
        }
    }
    require_not_all_masked(&mask, "pc_temporal", &target.name)?;
    Ok((values, mask))
}

/// Gather the common unmasked samples of both fields, flattened.
fn common_samples(reference: &Dataset, target: &Dataset) -> (Vec<f64>, Vec<f64>) {
    let mut xs = Vec::new();
    let mut ys = Vec::new();
    ndarray::Zip::from(&reference.values)
        .and(&reference.mask)
        .and(&target.values)
        .and(&target.mask)
        .for_each(|&rv, &rm, &tv, &tm| {
            if !rm && !tm {
                xs.push(rv);
                ys.push(tv);
            }
        });
    (xs, ys)
}

/// Ratio of standard deviations over the common unmasked cells.
pub fn stdev_ratio(reference: &Dataset, target: &Dataset) -> EvalResult<f64> {
    let (xs, ys) = common_samples(reference, target);
    if xs.len() < 2 {
        return Err(EvalError::AllMasked {
            stage: "stdev_ratio".into(),
            dataset: target.name.clone(),
        });
    }
    let sr = stddev(&xs);
    if sr == 0.0 {
        return Err(EvalError::MetricIncompatible {
            metric: "stdev_ratio".into(),
            reason: format!("reference '{}' has zero variance", reference.name),
        });
    }
    Ok(stddev(&ys) / sr)
}

/// Nash-Sutcliffe efficiency per time step:
/// `1 - sum((R-T)^2) / sum((R - mean(R))^2)` over the spatial domain.
pub fn nash_sutcliffe(
    reference: &Dataset,
    target: &Dataset,
    tau: f64,
) -> EvalResult<(Vec<f64>, Vec<bool>)> {
    let (nt, ny, nx) = (reference.nt(), reference.ny(), reference.nx());
    let n_cells = ny * nx;
    if n_cells < 2 {
        return Err(EvalError::MetricIncompatible {
            metric: "nash_sutcliffe".into(),
            reason: "spatial efficiency needs at least two grid cells".into(),
        });
    }
    let mut values = vec![reference.missing; nt];
    let mut mask = vec![true; nt];
    for t in 0..nt {
        let mut rs = Vec::with_capacity(n_cells);
        let mut ts = Vec::with_capacity(n_cells);
        for j in 0..ny {
            for i in 0..nx {
                if !reference.mask[[t, j, i]] && !target.mask[[t, j, i]] {
                    rs.push(reference.values[[t, j, i]]);
                    ts.push(target.values[[t, j, i]]);
                }
            }
        }
        if rs.is_empty() || (rs.len() as f64 / n_cells as f64) < tau {
            continue;
        }
        let mr = mean(&rs);
        let denom: f64 = rs.iter().map(|r| (r - mr).powi(2)).sum();
        if denom <= 0.0 {
            continue;
        }
        let num: f64 = rs
            .iter()
            .zip(ts.iter())
            .map(|(r, t)| (r - t).powi(2))
            .sum();
        values[t] = 1.0 - num / denom;
        mask[t] = false;
    }
    if mask.iter().all(|&m| m) {
        return Err(EvalError::AllMasked {
            stage: "nash_sutcliffe".into(),
            dataset: target.name.clone(),
        });
    }
    Ok((values, mask))
}

/// Histogram overlap score in [0, 1]: `sum(min(hist(R), hist(T)))` over a
/// shared binning, each histogram normalized to unit mass. Equals 1 iff
/// the two histograms are identical.
pub fn pdf_similarity(reference: &Dataset, target: &Dataset, bins: usize) -> EvalResult<f64> {
    let (xs, ys) = common_samples(reference, target);
    if xs.is_empty() {
        return Err(EvalError::AllMasked {
            stage: "pdf_similarity".into(),
            dataset: target.name.clone(),
        });
    }
    let lo = xs
        .iter()
        .chain(ys.iter())
        .cloned()
        .fold(f64::INFINITY, f64::min);
    let hi = xs
        .iter()
        .chain(ys.iter())
        .cloned()
        .fold(f64::NEG_INFINITY, f64::max);
    if hi <= lo {
        // All samples identical: histograms trivially coincide.
        return Ok(1.0);
    }
    let width = (hi - lo) / bins as f64;
    let histogram = |samples: &[f64]| -> Vec<f64> {
        let mut h = vec![0.0; bins];
        for &v in samples {
            let b = (((v - lo) / width) as usize).min(bins - 1);
            h[b] += 1.0;
        }
        let total = samples.len() as f64;
        h.iter_mut().for_each(|c| *c /= total);
        h
    };
    let hr = histogram(&xs);
    let ht = histogram(&ys);
    Ok(hr.iter().zip(ht.iter()).map(|(a, b)| a.min(*b)).sum())
}

/// The Taylor-diagram coordinates of a target against its reference:
/// (stddev ratio, correlation) over the common unmasked samples.
pub fn taylor_point(reference: &Dataset, target: &Dataset) -> EvalResult<(f64, f64)> {
    let (xs, ys) = common_samples(reference, target);
    if xs.len() < 2 {
        return Err(EvalError::AllMasked {
            stage: "taylor_point".into(),
            dataset: target.name.clone(),
        });
    }
    let sr = stddev(&xs);
    if sr == 0.0 {
        return Err(EvalError::MetricIncompatible {
            metric: "taylor_point".into(),
            reason: format!("reference '{}' has zero variance", reference.name),
        });
    }
    let corr = pearson(&xs, &ys).ok_or_else(|| EvalError::MetricIncompatible {
        metric: "taylor_point".into(),
        reason: "degenerate variance in correlation".into(),
    })?;
    Ok((stddev(&ys) / sr, corr))
}
