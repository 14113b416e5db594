//! The evaluation driver: owns the state machine of one evaluation run.
//!
//! States advance INIT -> DATASETS_READY -> WINDOW_CHOSEN -> REGRIDDED ->
//! REDUCED -> METRICS_COMPUTED -> PLOTTED. A failed transition leaves the
//! driver in its previous state and surfaces the typed error; no partial
//! results are retained from the failed step.

use std::path::{Path, PathBuf};

use ndarray::Array3;
use tracing::{info, warn};

use dataset::{align_units, Dataset};
use eval_common::{Bounds, EvalError, EvalResult, GridBox, SubRegion};
use metrics::{ensemble_mean, evaluate, Metric, MetricOutput, MetricResult};
use temporal::{coarser, native_scale, rebin, Scale};

/// Where the common grid comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum GridPolicy {
    Reference,
    Model,
    User(GridBox),
}

/// Where the common cadence comes from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TemporalPolicy {
    Reference,
    Model,
    /// Compatible with both: the coarser native cadence wins.
    Common,
    User(Scale),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    None,
    NetCdf,
}

/// Everything a run needs beyond its datasets.
#[derive(Debug, Clone)]
pub struct EvaluationJob {
    pub subset: Option<Bounds>,
    pub grid: GridPolicy,
    pub temporal: TemporalPolicy,
    pub metric: Metric,
    pub subregions: Vec<SubRegion>,
    pub tau: f64,
    pub mask_enabled: bool,
    pub output: OutputMode,
    pub with_ensemble: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Init,
    DatasetsReady,
    WindowChosen,
    Regridded,
    Reduced,
    MetricsComputed,
    Plotted,
}

impl DriverState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DriverState::Init => "INIT",
            DriverState::DatasetsReady => "DATASETS_READY",
            DriverState::WindowChosen => "WINDOW_CHOSEN",
            DriverState::Regridded => "REGRIDDED",
            DriverState::Reduced => "REDUCED",
            DriverState::MetricsComputed => "METRICS_COMPUTED",
            DriverState::Plotted => "PLOTTED",
        }
    }
}

/// Per-subregion series bundle, indexed (dataset, subregion, time).
#[derive(Debug, Clone)]
pub struct RegionReduction {
    pub dataset_names: Vec<String>,
    pub region_names: Vec<String>,
    pub values: Array3<f64>,
    pub mask: Array3<bool>,
}

/// The result bundle handed to the plotting collaborator.
#[derive(Debug)]
pub struct EvaluationBundle {
    pub window: Bounds,
    pub reference: Dataset,
    pub targets: Vec<Dataset>,
    pub outputs: Vec<MetricOutput>,
    pub regions: Option<RegionReduction>,
}

pub struct Evaluator {
    job: EvaluationJob,
    work_dir: PathBuf,
    state: DriverState,
    reference: Option<Dataset>,
    targets: Vec<Dataset>,
    window: Option<Bounds>,
    regions: Option<RegionReduction>,
    outputs: Vec<MetricOutput>,
}

impl Evaluator {
    /// Create a driver, claiming (and if needed creating) the work dir.
    pub fn new(job: EvaluationJob, work_dir: &Path) -> EvalResult<Self> {
        std::fs::create_dir_all(work_dir)
            .map_err(|_| EvalError::WorkDirUnwritable(work_dir.display().to_string()))?;
        let probe = work_dir.join(".write-probe");
        std::fs::write(&probe, b"ok")
            .map_err(|_| EvalError::WorkDirUnwritable(work_dir.display().to_string()))?;
        std::fs::remove_file(&probe).ok();
        Ok(Self {
            job,
            work_dir: work_dir.to_path_buf(),
            state: DriverState::Init,
            reference: None,
            targets: Vec::new(),
            window: None,
            regions: None,
            outputs: Vec::new(),
        })
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// Masking can be disabled wholesale; reductions then accept any bin
    /// with at least one sample.
    fn effective_tau(&self) -> f64 {
        if self.job.mask_enabled {
            self.job.tau
        } else {
            0.0
        }
    }

    fn expect_state(&self, expected: DriverState) -> EvalResult<()> {
        if self.state != expected {
            return Err(EvalError::ConfigInvalid(format!(
                "driver is in state {}, transition requires {}",
                self.state.as_str(),
                expected.as_str()
            )));
        }
        Ok(())
    }

    /// INIT -> DATASETS_READY once at least one reference and one target
    /// are registered.
    pub fn add_datasets(&mut self, reference: Dataset, targets: Vec<Dataset>) -> EvalResult<()> {
        self.expect_state(DriverState::Init)?;
        if targets.is_empty() {
            return Err(EvalError::ConfigInvalid(
                "evaluation needs at least one target dataset".into(),
            ));
        }
        info!(
            reference = %reference.name,
            targets = targets.len(),
            "datasets registered"
        );
        self.reference = Some(reference);
        self.targets = targets;
        self.state = DriverState::DatasetsReady;
        Ok(())
    }

    /// DATASETS_READY -> WINDOW_CHOSEN: overlap of all datasets,
    /// intersected with the user override, then applied to every dataset.
    pub fn choose_window(&mut self) -> EvalResult<()> {
        self.expect_state(DriverState::DatasetsReady)?;
        let reference = self.reference.as_ref().expect("set at DATASETS_READY");

        let snap_annual = matches!(self.resolved_scale(), Scale::Annual);
        let mut participants: Vec<&Dataset> = vec![reference];
        participants.extend(self.targets.iter());
        let mut window = subset::overlap(&participants, snap_annual)?;
        if let Some(user) = &self.job.subset {
            window = window
                .intersection(user)
                .ok_or_else(|| EvalError::EmptyOverlap {
                    datasets: participants.iter().map(|d| d.name.clone()).collect(),
                })?;
        }

        let new_reference = subset::subset(reference, &window)?;
        let mut new_targets = Vec::with_capacity(self.targets.len());
        for target in &self.targets {
            new_targets.push(subset::subset(target, &window)?);
        }

        info!(
            t_start = %window.t_start,
            t_end = %window.t_end,
            "evaluation window chosen"
        );
        self.reference = Some(new_reference);
        self.targets = new_targets;
        self.window = Some(window);
        self.state = DriverState::WindowChosen;
        Ok(())
    }

    fn resolved_scale(&self) -> Scale {
        match self.job.temporal {
            TemporalPolicy::User(scale) => scale,
            TemporalPolicy::Reference => self
                .reference
                .as_ref()
                .map(|r| native_scale(&r.times))
                .unwrap_or(Scale::Monthly),
            TemporalPolicy::Model => self
                .targets
                .first()
                .map(|t| native_scale(&t.times))
                .unwrap_or(Scale::Monthly),
            TemporalPolicy::Common => {
                let r = self
                    .reference
                    .as_ref()
                    .map(|r| native_scale(&r.times))
                    .unwrap_or(Scale::Monthly);
                let m = self
                    .targets
                    .first()
                    .map(|t| native_scale(&t.times))
                    .unwrap_or(Scale::Monthly);
                coarser(r, m)
            }
        }
    }

    fn target_meshes(&self) -> (ndarray::Array2<f64>, ndarray::Array2<f64>) {
        match &self.job.grid {
            GridPolicy::Reference => {
                let r = self.reference.as_ref().expect("reference present");
                (r.lats.clone(), r.lons.clone())
            }
            GridPolicy::Model => {
                let t = self.targets.first().expect("targets present");
                (t.lats.clone(), t.lons.clone())
            }
            GridPolicy::User(grid_box) => grid_box.meshes(),
        }
    }

    /// WINDOW_CHOSEN -> REGRIDDED: rebin to the resolved cadence, align
    /// units to the reference, regrid onto the resolved grid, and verify
    /// that every participant shares axes afterwards.
    pub fn align(&mut self) -> EvalResult<()> {
        self.expect_state(DriverState::WindowChosen)?;
        let reference = self.reference.clone().expect("set at DATASETS_READY");

        let scale = self.resolved_scale();
        let (tlats, tlons) = self.target_meshes();
        info!(scale = %scale, "aligning datasets");

        let reference = rebin(&reference, scale, self.effective_tau())?;
        let reference = regrid::regrid(&reference, &tlats, &tlons)?;

        let mut targets = Vec::with_capacity(self.targets.len());
        for target in &self.targets {
            let target = align_units(&reference, target)?;
            let target = rebin(&target, scale, self.effective_tau())?;
            let target = regrid::regrid(&target, &tlats, &tlons)?;
            targets.push(target);
        }

        if self.job.with_ensemble && targets.len() > 1 {
            targets.push(ensemble_mean(&targets)?);
        }

        // Transition guard: identical axes across every participant.
        for target in &targets {
            if !reference.same_grid(target) {
                return Err(EvalError::GridMismatch {
                    stage: "align".into(),
                    dataset: target.name.clone(),
                    reason: "grid differs from reference after regridding".into(),
                });
            }
            if !reference.same_times(target) {
                return Err(EvalError::GridMismatch {
                    stage: "align".into(),
                    dataset: target.name.clone(),
                    reason: "time axis differs from reference after rebinning".into(),
                });
            }
        }

        self.reference = Some(reference);
        self.targets = targets;
        self.state = DriverState::Regridded;
        Ok(())
    }

    /// REGRIDDED -> REDUCED: optional subregion reduction.
    pub fn reduce(&mut self) -> EvalResult<()> {
        self.expect_state(DriverState::Regridded)?;
        if self.job.subregions.is_empty() {
            self.state = DriverState::Reduced;
            return Ok(());
        }
        let reference = self.reference.as_ref().expect("aligned");
        let mut members = vec![reference.clone()];
        members.extend(self.targets.iter().cloned());
        let stacked = dataset::stack(&members)?;
        let (values, mask) = subset::region_means_stack(&stacked, &self.job.subregions)?;
        self.regions = Some(RegionReduction {
            dataset_names: stacked.names,
            region_names: self
                .job
                .subregions
                .iter()
                .map(|r| r.name.clone())
                .collect(),
            values,
            mask,
        });
        info!(regions = self.job.subregions.len(), "subregions reduced");
        self.state = DriverState::Reduced;
        Ok(())
    }

    /// REDUCED -> METRICS_COMPUTED: one metric run per target. The guard
    /// rejects any result that leaks NaN through unmasked cells.
    pub fn compute_metrics(&mut self) -> EvalResult<()> {
        self.expect_state(DriverState::Reduced)?;
        let reference = self.reference.as_ref().expect("aligned");
        let mut outputs = Vec::with_capacity(self.targets.len());
        for target in &self.targets {
            let output = evaluate(self.job.metric, reference, target, self.effective_tau())?;
            check_no_unmasked_nan(&output)?;
            outputs.push(output);
        }
        info!(
            metric = %self.job.metric,
            targets = outputs.len(),
            "metrics computed"
        );
        self.outputs = outputs;
        self.state = DriverState::MetricsComputed;
        Ok(())
    }

    /// METRICS_COMPUTED -> PLOTTED: hand the bundle to the plotting
    /// collaborator (and optionally export netCDF into the work dir).
    pub fn finish(mut self) -> EvalResult<EvaluationBundle> {
        self.expect_state(DriverState::MetricsComputed)?;
        let bundle = EvaluationBundle {
            window: self.window.take().expect("window chosen"),
            reference: self.reference.take().expect("aligned"),
            targets: std::mem::take(&mut self.targets),
            outputs: std::mem::take(&mut self.outputs),
            regions: self.regions.take(),
        };
        if self.job.output == OutputMode::NetCdf {
            crate::export::write_netcdf(&bundle, &self.work_dir.join("evaluation.nc"))?;
        }
        self.state = DriverState::Plotted;
        info!("evaluation complete");
        Ok(bundle)
    }
}

/// A metric result may carry NaN only in masked positions.
fn check_no_unmasked_nan(output: &MetricOutput) -> EvalResult<()> {
    let bad = match &output.result {
        MetricResult::Map { values, mask } => values
            .iter()
            .zip(mask.iter())
            .any(|(v, m)| !m && !v.is_finite()),
        MetricResult::Series { values, mask } => values
            .iter()
            .zip(mask.iter())
            .any(|(v, m)| !m && !v.is_finite()),
        MetricResult::Scalar(v) => !v.is_finite(),
        MetricResult::Taylor {
            stddev_ratio,
            correlation,
        } => !stddev_ratio.is_finite() || !correlation.is_finite(),
    };
    if bad {
        warn!(target = %output.target_name, "metric produced unmasked NaN");
        return Err(EvalError::NumericalOverflow {
            stage: format!("metric {}", output.metric),
        });
    }
    Ok(())
}
