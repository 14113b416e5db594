//! List-of-files aggregation: concatenate gridded files along time.

use std::path::{Path, PathBuf};

use ndarray::Axis;
use tracing::info;

use dataset::Dataset;
use eval_common::{EvalError, EvalResult};

use crate::IngestOptions;

/// Load a manifest (one gridded file per line, `#` comments allowed) and
/// concatenate the members along the time axis.
pub fn load_file_list(manifest: &Path, options: &IngestOptions) -> EvalResult<Dataset> {
    let location = manifest.display().to_string();
    let text = std::fs::read_to_string(manifest)
        .map_err(|_| EvalError::FileNotFound(location.clone()))?;
    let base = manifest.parent().unwrap_or_else(|| Path::new("."));

    let mut parts = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let member: PathBuf = if Path::new(line).is_absolute() {
            PathBuf::from(line)
        } else {
            base.join(line)
        };
        parts.push(crate::load_path(&member, options)?);
    }
    if parts.is_empty() {
        return Err(EvalError::UnknownFormat(format!(
            "{}: manifest lists no files",
            location
        )));
    }
    let name = options.name.clone().unwrap_or(location);
    concatenate(parts, &name)
}

/// Concatenate already-loaded segments along time.
///
/// All segments must share one spatial grid;
/// segments are ordered by first timestamp and the combined axis must be
/// strictly increasing.
pub fn concatenate(mut parts: Vec<Dataset>, name: &str) -> EvalResult<Dataset> {
    parts.sort_by(|a, b| a.times[0].cmp(&b.times[0]));
    let first = &parts[0];
    for part in &parts[1..] {
        if !first.same_grid(part) {
            return Err(EvalError::GridMismatch {
                stage: "file-list".into(),
                dataset: part.name.clone(),
                reason: format!("spatial grid differs from '{}'", first.name),
            });
        }
    }

    let times: Vec<_> = parts.iter().flat_map(|p| p.times.clone()).collect();
    if times.windows(2).any(|w| w[0] >= w[1]) {
        return Err(EvalError::NonMonotonicAxis {
            dataset: name.to_string(),
            axis: "time".into(),
        });
    }

    let value_views: Vec<_> = parts.iter().map(|p| p.values.view()).collect();
    let mask_views: Vec<_> = parts.iter().map(|p| p.mask.view()).collect();
    let values = ndarray::concatenate(Axis(0), &value_views).map_err(|_| {
        EvalError::GridMismatch {
            stage: "file-list".into(),
            dataset: name.to_string(),
            reason: "segments do not concatenate along time".into(),
        }
    })?;
    let mask = ndarray::concatenate(Axis(0), &mask_views).map_err(|_| {
        EvalError::GridMismatch {
            stage: "file-list".into(),
            dataset: name.to_string(),
            reason: "segment masks do not concatenate along time".into(),
        }
    })?;

    info!(
        segments = parts.len(),
        steps = times.len(),
        name = %name,
        "concatenated file list"
    );
    let template = parts.remove(0);
    let mut out = template.replace(
        values,
        mask,
        template.lats.clone(),
        template.lons.clone(),
        times,
    )?;
    out.name = name.to_string();
    out.origin = dataset::Origin {
        kind: dataset::SourceKind::FileList,
        identifier: template.origin.identifier.clone(),
        path: template.origin.path.clone(),
    };
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_member(dir: &TempDir, name: &str, body: &str) {
        let path = dir.path().join(name);
        std::fs::File::create(&path)
            .unwrap()
            .write_all(body.as_bytes())
            .unwrap();
    }

    #[test]
    fn test_manifest_concatenation() {
        let dir = TempDir::new().unwrap();
        // two matrix dumps on the same implied grid; matrix loads carry a
        // single identical timestamp, so concatenation must reject them
        write_member(&dir, "a.txt", "1 2\n3 4\n");
        write_member(&dir, "b.txt", "5 6\n7 8\n");
        write_member(&dir, "in.lst", "a.txt\nb.txt\n");
        let err = load_file_list(&dir.path().join("in.lst"), &IngestOptions::new("v"))
            .unwrap_err();
        assert!(matches!(err, EvalError::NonMonotonicAxis { .. }));
    }

    #[test]
    fn test_concatenate_orders_segments() {
        use eval_common::{CalTime, Calendar};
        use ndarray::{Array2, Array3};

        let make = |name: &str, start_month: u32, value: f64| {
            let times: Vec<_> = (0..2)
                .map(|k| {
                    CalTime::from_ymd(Calendar::Gregorian, 2000, start_month + k, 1).unwrap()
                })
                .collect();
            Dataset::new(
                name,
                "v",
                "1",
                Array3::from_elem((2, 2, 2), value),
                Array3::from_elem((2, 2, 2), false),
                dataset::DEFAULT_MISSING,
                Array2::from_shape_fn((2, 2), |(j, _)| j as f64),
                Array2::from_shape_fn((2, 2), |(_, i)| i as f64),
                times,
                dataset::Origin::synthetic(name),
            )
            .unwrap()
        };
        // supplied out of order
        let late = make("late", 3, 2.0);
        let early = make("early", 1, 1.0);
        let out = concatenate(vec![late, early], "joined").unwrap();
        assert_eq!(out.nt(), 4);
        assert_eq!(out.values[[0, 0, 0]], 1.0);
        assert_eq!(out.values[[3, 0, 0]], 2.0);
        assert!(out.times.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_grid_mismatch_across_files() {
        use eval_common::{CalTime, Calendar};
        use ndarray::{Array2, Array3};

        let a = Dataset::new(
            "a",
            "v",
            "1",
            Array3::zeros((1, 2, 2)),
            Array3::from_elem((1, 2, 2), false),
            dataset::DEFAULT_MISSING,
            Array2::zeros((2, 2)),
            Array2::from_shape_fn((2, 2), |(_, i)| i as f64),
            vec![CalTime::from_ymd(Calendar::Gregorian, 2000, 1, 1).unwrap()],
            dataset::Origin::synthetic("a"),
        )
        .unwrap();
        let b = Dataset::new(
            "b",
            "v",
            "1",
            Array3::zeros((1, 2, 2)),
            Array3::from_elem((1, 2, 2), false),
            dataset::DEFAULT_MISSING,
            Array2::from_elem((2, 2), 10.0),
            Array2::from_shape_fn((2, 2), |(_, i)| i as f64),
            vec![CalTime::from_ymd(Calendar::Gregorian, 2000, 2, 1).unwrap()],
            dataset::Origin::synthetic("b"),
        )
        .unwrap();
        assert!(matches!(
            concatenate(vec![a, b], "joined"),
            Err(EvalError::GridMismatch { .. })
        ));
    }
}
