//! The "ensemble" pseudo-dataset: cell-wise mean across models.

use ndarray::Array3;
use tracing::info;

use dataset::{stack, Dataset, Origin, SourceKind};
use eval_common::{EvalError, EvalResult};

/// Display name given to the ensemble member.
pub const ENSEMBLE_NAME: &str = "ensemble";

/// Build the ensemble mean of a model collection.
///
/// A masked cell in one member drops that member from that cell only;
/// cells masked in every member stay masked. Members must already share
/// grid and time axes.
pub fn ensemble_mean(members: &[Dataset]) -> EvalResult<Dataset> {
    if members.is_empty() {
        return Err(EvalError::GridMismatch {
            stage: "ensemble".into(),
            dataset: "<none>".into(),
            reason: "cannot ensemble an empty collection".into(),
        });
    }
    let stacked = stack(members)?;
    let first = &members[0];
    let (nt, ny, nx) = (first.nt(), first.ny(), first.nx());
    let mut values = Array3::from_elem((nt, ny, nx), first.missing);
    let mut mask = Array3::from_elem((nt, ny, nx), true);

    for t in 0..nt {
        for j in 0..ny {
            for i in 0..nx {
                let mut sum = 0.0;
                let mut count = 0usize;
                for d in 0..members.len() {
                    if !stacked.mask[[d, t, j, i]] {
                        sum += stacked.values[[d, t, j, i]];
                        count += 1;
                    }
                }
                if count > 0 {
                    values[[t, j, i]] = sum / count as f64;
                    mask[[t, j, i]] = false;
                }
            }
        }
    }

    info!(members = members.len(), "built ensemble mean");
    Dataset::new(
        ENSEMBLE_NAME,
        first.variable.clone(),
        first.units.clone(),
        values,
        mask,
        first.missing,
        first.lats.clone(),
        first.lons.clone(),
        first.times.clone(),
        Origin {
            kind: SourceKind::Synthetic,
            identifier: format!("mean of {} members", members.len()),
            path: None,
        },
    )
}
