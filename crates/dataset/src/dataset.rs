//! The canonical in-memory representation of a gridded dataset.

use std::path::PathBuf;

use ndarray::{Array2, Array3, Array4, Axis};
use serde::{Deserialize, Serialize};

use eval_common::{Bounds, CalTime, Calendar, EvalError, EvalResult};

/// Default missing-value sentinel (CMIP-style fill).
pub const DEFAULT_MISSING: f64 = 1.0e20;

/// Tolerance used when checking that two grids are identical.
pub const GRID_EPS: f64 = 1e-9;

/// Where a dataset came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceKind {
    LocalFile,
    FileList,
    RemoteCatalog,
    MatrixDump,
    Synthetic,
}

/// Provenance record carried by every dataset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Origin {
    pub kind: SourceKind,
    /// Source identifier: variable name, catalog dataset id, etc.
    pub identifier: String,
    /// Original on-disk location, when there was one.
    pub path: Option<PathBuf>,
}

impl Origin {
    pub fn synthetic(identifier: impl Into<String>) -> Self {
        Self {
            kind: SourceKind::Synthetic,
            identifier: identifier.into(),
            path: None,
        }
    }
}

/// A gridded physical field on a common (time, lat, lon) layout.
///
/// `values` and `mask` always share shape `(nt, ny, nx)`; masked cells hold
/// the `missing` sentinel. Pipeline stages never mutate a dataset in place;
/// each returns a replacement built with [`Dataset::replace`].
#[derive(Debug, Clone)]
pub struct Dataset {
    pub name: String,
    pub variable: String,
    pub units: String,
    pub values: Array3<f64>,
    pub mask: Array3<bool>,
    pub missing: f64,
    /// Latitudes, shape (ny, nx).
    pub lats: Array2<f64>,
    /// Longitudes, shape (ny, nx), in [-180, 180).
    pub lons: Array2<f64>,
    pub times: Vec<CalTime>,
    pub origin: Origin,
}

impl Dataset {
    /// Construct and validate a dataset. The sentinel is written into every
    /// masked cell so the array and mask agree from the start.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: impl Into<String>,
        variable: impl Into<String>,
        units: impl Into<String>,
        values: Array3<f64>,
        mask: Array3<bool>,
        missing: f64,
        lats: Array2<f64>,
        lons: Array2<f64>,
        times: Vec<CalTime>,
        origin: Origin,
    ) -> EvalResult<Self> {
        let mut ds = Self {
            name: name.into(),
            variable: variable.into(),
            units: units.into(),
            values,
            mask,
            missing,
            lats,
            lons,
            times,
            origin,
        };
        ds.apply_sentinel();
        ds.validate()?;
        Ok(ds)
    }

    /// Build the successor dataset a pipeline stage returns: same identity
    /// and provenance, new arrays and time axis.
    pub fn replace(
        &self,
        values: Array3<f64>,
        mask: Array3<bool>,
        lats: Array2<f64>,
        lons: Array2<f64>,
        times: Vec<CalTime>,
    ) -> EvalResult<Self> {
        Self::new(
            self.name.clone(),
            self.variable.clone(),
            self.units.clone(),
            values,
            mask,
            self.missing,
            lats,
            lons,
            times,
            self.origin.clone(),
        )
    }

    pub fn nt(&self) -> usize {
        self.values.shape()[0]
    }

    pub fn ny(&self) -> usize {
        self.values.shape()[1]
    }

    pub fn nx(&self) -> usize {
        self.values.shape()[2]
    }

    /// Calendar of the time axis. Datasets always carry at least one step.
    pub fn calendar(&self) -> Calendar {
        self.times[0].calendar
    }

    /// Write the sentinel into every masked cell so values and mask agree.
    pub fn apply_sentinel(&mut self) {
        let missing = self.missing;
        ndarray::Zip::from(&mut self.values)
            .and(&self.mask)
            .for_each(|v, &m| {
                if m {
                    *v = missing;
                }
            });
    }

    /// Check the structural invariants: axis lengths match the field
    /// shape, the mask shadows the values, the time axis is strictly
    /// increasing.
    pub fn validate(&self) -> EvalResult<()> {
        let shape = self.values.shape();
        if shape[0] != self.times.len() {
            return Err(EvalError::GridMismatch {
                stage: "validate".into(),
                dataset: self.name.clone(),
                reason: format!(
                    "time axis length {} != values.shape[0] {}",
                    self.times.len(),
                    shape[0]
                ),
            });
        }
        if self.lats.shape() != [shape[1], shape[2]] || self.lons.shape() != [shape[1], shape[2]] {
            return Err(EvalError::GridMismatch {
                stage: "validate".into(),
                dataset: self.name.clone(),
                reason: format!(
                    "coordinate shape {:?}/{:?} != field shape ({}, {})",
                    self.lats.shape(),
                    self.lons.shape(),
                    shape[1],
                    shape[2]
                ),
            });
        }
        if self.mask.shape() != shape {
            return Err(EvalError::GridMismatch {
                stage: "validate".into(),
                dataset: self.name.clone(),
                reason: "mask shape differs from values shape".into(),
            });
        }
        if self.times.is_empty() {
            return Err(EvalError::GridMismatch {
                stage: "validate".into(),
                dataset: self.name.clone(),
                reason: "empty time axis".into(),
            });
        }
        if self.times.windows(2).any(|w| w[0] >= w[1]) {
            return Err(EvalError::NonMonotonicAxis {
                dataset: self.name.clone(),
                axis: "time".into(),
            });
        }
        Ok(())
    }

    /// The spatio-temporal bounds covered by this dataset.
    pub fn bounds(&self) -> Bounds {
        let lat_min = self.lats.iter().cloned().fold(f64::INFINITY, f64::min);
        let lat_max = self.lats.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let lon_min = self.lons.iter().cloned().fold(f64::INFINITY, f64::min);
        let lon_max = self.lons.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        Bounds::new(
            lat_min,
            lat_max,
            lon_min,
            lon_max,
            self.times[0],
            *self.times.last().expect("non-empty time axis"),
        )
    }

    /// Fraction of unmasked cells over the whole field.
    pub fn unmasked_fraction(&self) -> f64 {
        let total = self.mask.len();
        if total == 0 {
            return 0.0;
        }
        let unmasked = self.mask.iter().filter(|&&m| !m).count();
        unmasked as f64 / total as f64
    }

    /// Whether another dataset shares this grid exactly (within [`GRID_EPS`]).
    pub fn same_grid(&self, other: &Dataset) -> bool {
        self.lats.shape() == other.lats.shape()
            && self
                .lats
                .iter()
                .zip(other.lats.iter())
                .all(|(a, b)| (a - b).abs() <= GRID_EPS)
            && self
                .lons
                .iter()
                .zip(other.lons.iter())
                .all(|(a, b)| (a - b).abs() <= GRID_EPS)
    }

    /// Whether another dataset shares this time axis exactly.
    pub fn same_times(&self, other: &Dataset) -> bool {
        self.times == other.times
    }
}

/// A collection of datasets stacked on a shared grid and time axis,
/// shaped (dataset, time, lat, lon). Built by [`stack`].
#[derive(Debug, Clone)]
pub struct DatasetStack {
    pub names: Vec<String>,
    pub values: Array4<f64>,
    pub mask: Array4<bool>,
    pub missing: f64,
    pub lats: Array2<f64>,
    pub lons: Array2<f64>,
    pub times: Vec<CalTime>,
}

/// Stack datasets for metric calculation. All members must share
/// identical lats, lons, and times.
pub fn stack(datasets: &[Dataset]) -> EvalResult<DatasetStack> {
    let first = datasets.first().ok_or_else(|| EvalError::GridMismatch {
        stage: "stack".into(),
        dataset: "<none>".into(),
        reason: "cannot stack an empty collection".into(),
    })?;
    for ds in &datasets[1..] {
        if !first.same_grid(ds) {
            return Err(EvalError::GridMismatch {
                stage: "stack".into(),
                dataset: ds.name.clone(),
                reason: format!("grid differs from '{}'", first.name),
            });
        }
        if !first.same_times(ds) {
            return Err(EvalError::GridMismatch {
                stage: "stack".into(),
                dataset: ds.name.clone(),
                reason: format!("time axis differs from '{}'", first.name),
            });
        }
    }
    let (nt, ny, nx) = (first.nt(), first.ny(), first.nx());
    let mut values = Array4::from_elem((datasets.len(), nt, ny, nx), first.missing);
    let mut mask = Array4::from_elem((datasets.len(), nt, ny, nx), true);
    for (d, ds) in datasets.iter().enumerate() {
        values.index_axis_mut(Axis(0), d).assign(&ds.values);
        mask.index_axis_mut(Axis(0), d).assign(&ds.mask);
    }
    Ok(DatasetStack {
        names: datasets.iter().map(|d| d.name.clone()).collect(),
        values,
        mask,
        missing: first.missing,
        lats: first.lats.clone(),
        lons: first.lons.clone(),
        times: first.times.clone(),
    })
}
