//! Paired-sample significance for per-cell comparisons.

use ndarray::Array2;
use statrs::distribution::{ContinuousCDF, StudentsT};

use dataset::Dataset;
use eval_common::{EvalError, EvalResult};

/// Paired t-test over time at every grid cell.
///
/// Returns the two-sided p-value field aligned with the per-cell metric
/// maps: the probability that the target-minus-reference differences are
/// explained by chance, 1.0 where the inputs are indistinguishable and
/// near 0.0 for a systematic offset. A cell is masked whenever either
/// input's unmasked fraction over time falls below tau, or fewer than two
/// paired samples exist.
pub fn paired_t_test(
    reference: &Dataset,
    target: &Dataset,
    tau: f64,
) -> EvalResult<(Array2<f64>, Array2<bool>)> {
    let (nt, ny, nx) = (reference.nt(), reference.ny(), reference.nx());
    let mut values = Array2::from_elem((ny, nx), reference.missing);
    let mut mask = Array2::from_elem((ny, nx), true);

    for j in 0..ny {
        for i in 0..nx {
            let mut r_count = 0usize;
            let mut t_count = 0usize;
            let mut diffs = Vec::with_capacity(nt);
            for t in 0..nt {
                let rm = reference.mask[[t, j, i]];
                let tm = target.mask[[t, j, i]];
                if !rm {
                    r_count += 1;
                }
                if !tm {
                    t_count += 1;
                }
                if !rm && !tm {
                    diffs.push(target.values[[t, j, i]] - reference.values[[t, j, i]]);
                }
            }
            let steps = nt as f64;
            if (r_count as f64) / steps < tau || (t_count as f64) / steps < tau {
                continue;
            }
            let n = diffs.len();
            if n < 2 {
                continue;
            }
            let mean = diffs.iter().sum::<f64>() / n as f64;
            let var = diffs.iter().map(|d| (d - mean).powi(2)).sum::<f64>() / (n - 1) as f64;
            let p_value = if var <= 0.0 {
                // Degenerate spread: identical series are pure chance,
                // a constant offset is certain.
                if mean == 0.0 {
                    1.0
                } else {
                    0.0
                }
            } else {
                let t_stat = mean / (var / n as f64).sqrt();
                let dist = StudentsT::new(0.0, 1.0, (n - 1) as f64).map_err(|_| {
                    EvalError::NumericalOverflow {
                        stage: "paired_t_test".into(),
                    }
                })?;
                (2.0 * (1.0 - dist.cdf(t_stat.abs()))).clamp(0.0, 1.0)
            };
            values[[j, i]] = p_value;
            mask[[j, i]] = false;
        }
    }
    Ok((values, mask))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use eval_common::Calendar;
    use test_utils::{constant_dataset, mask_cells};

    #[test]
    fn test_identical_inputs_give_p_of_one() {
        let r = constant_dataset("r", 12, 1, 1, 1.0, Calendar::Gregorian);
        let (p, mask) = paired_t_test(&r, &r, 0.75).unwrap();
        assert!(!mask[[0, 0]]);
        assert_relative_eq!(p[[0, 0]], 1.0);
    }

    #[test]
    fn test_constant_offset_gives_p_of_zero() {
        let r = constant_dataset("r", 12, 2, 2, 1.0, Calendar::Gregorian);
        let t = constant_dataset("t", 12, 2, 2, 1.5, Calendar::Gregorian);
        let (p, mask) = paired_t_test(&r, &t, 0.75).unwrap();
        assert!(!mask[[0, 0]]);
        assert_relative_eq!(p[[0, 0]], 0.0);
    }

    #[test]
    fn test_noisy_offset_is_significant() {
        let r = constant_dataset("r", 24, 1, 1, 10.0, Calendar::Gregorian);
        let mut t = constant_dataset("t", 24, 1, 1, 10.0, Calendar::Gregorian);
        // large systematic offset with a small alternating wobble
        for k in 0..24 {
            t.values[[k, 0, 0]] = 12.0 + if k % 2 == 0 { 0.1 } else { -0.1 };
        }
        let (p, mask) = paired_t_test(&r, &t, 0.75).unwrap();
        assert!(!mask[[0, 0]]);
        assert!(p[[0, 0]] < 0.01);
    }

    #[test]
    fn test_sparse_cell_is_masked() {
        let r = constant_dataset("r", 12, 1, 1, 1.0, Calendar::Gregorian);
        let mut t = constant_dataset("t", 12, 1, 1, 2.0, Calendar::Gregorian);
        let cells: Vec<(usize, usize, usize)> = (0..6).map(|i| (i, 0, 0)).collect();
        mask_cells(&mut t, &cells);
        let (_, mask) = paired_t_test(&r, &t, 0.75).unwrap();
        assert!(mask[[0, 0]]);
    }
}
