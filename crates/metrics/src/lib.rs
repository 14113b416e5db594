//! Metric engine: compare an aligned reference/target pair.
//!
//! Inputs must already be commensurate (identical grid, identical time
//! axis, same units); the evaluation driver guarantees that before any
//! metric runs, and [`evaluate`] re-checks it.

mod compare;
mod ensemble;
mod significance;

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use tracing::debug;

use dataset::Dataset;
use eval_common::{EvalError, EvalResult};

pub use compare::{
    bias_domain, bias_map, mae_map, nash_sutcliffe, pattern_corr_spatial, pattern_corr_temporal,
    pdf_similarity, rmse_map, stdev_ratio, taylor_point,
};
pub use ensemble::{ensemble_mean, ENSEMBLE_NAME};
pub use significance::paired_t_test;

/// Default histogram binning for the PDF similarity score.
pub const DEFAULT_PDF_BINS: usize = 50;

/// The metric family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Bias,
    BiasDomain,
    Mae,
    Rmse,
    PcSpatial,
    PcTemporal,
    StdevRatio,
    NashSutcliffe,
    PdfSimilarity,
    TaylorPoint,
}

impl Metric {
    pub fn parse(s: &str) -> EvalResult<Self> {
        match s.to_lowercase().as_str() {
            "bias" => Ok(Metric::Bias),
            "bias_domain" => Ok(Metric::BiasDomain),
            "mae" => Ok(Metric::Mae),
            "rmse" => Ok(Metric::Rmse),
            "pc_spatial" => Ok(Metric::PcSpatial),
            "pc_temporal" => Ok(Metric::PcTemporal),
            "stdev_ratio" => Ok(Metric::StdevRatio),
            "nash_sutcliffe" => Ok(Metric::NashSutcliffe),
            "pdf_similarity" => Ok(Metric::PdfSimilarity),
            "taylor_point" => Ok(Metric::TaylorPoint),
            other => Err(EvalError::ConfigInvalid(format!(
                "unknown metric '{}'",
                other
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::Bias => "bias",
            Metric::BiasDomain => "bias_domain",
            Metric::Mae => "mae",
            Metric::Rmse => "rmse",
            Metric::PcSpatial => "pc_spatial",
            Metric::PcTemporal => "pc_temporal",
            Metric::StdevRatio => "stdev_ratio",
            Metric::NashSutcliffe => "nash_sutcliffe",
            Metric::PdfSimilarity => "pdf_similarity",
            Metric::TaylorPoint => "taylor_point",
        }
    }

    /// Whether the per-cell significance field accompanies this metric.
    pub fn has_significance(&self) -> bool {
        matches!(
            self,
            Metric::Bias | Metric::Mae | Metric::Rmse | Metric::PcTemporal | Metric::PcSpatial
        )
    }
}

impl std::fmt::Display for Metric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A metric's result in its natural shape.
#[derive(Debug, Clone)]
pub enum MetricResult {
    /// (lat, lon) field plus mask.
    Map {
        values: Array2<f64>,
        mask: Array2<bool>,
    },
    /// One value per time step.
    Series { values: Vec<f64>, mask: Vec<bool> },
    Scalar(f64),
    /// Taylor-diagram coordinates.
    Taylor {
        stddev_ratio: f64,
        correlation: f64,
    },
}

/// Output of one metric run, with the optional significance companion.
#[derive(Debug, Clone)]
pub struct MetricOutput {
    pub metric: Metric,
    pub target_name: String,
    pub result: MetricResult,
    /// Per-cell paired-t-test p-value, for metrics that carry one.
    pub significance: Option<(Array2<f64>, Array2<bool>)>,
}

fn check_aligned(reference: &Dataset, target: &Dataset) -> EvalResult<()> {
    if !reference.same_grid(target) {
        return Err(EvalError::GridMismatch {
            stage: "metric".into(),
            dataset: target.name.clone(),
            reason: format!("grid differs from reference '{}'", reference.name),
        });
    }
    if !reference.same_times(target) {
        return Err(EvalError::GridMismatch {
            stage: "metric".into(),
            dataset: target.name.clone(),
            reason: format!("time axis differs from reference '{}'", reference.name),
        });
    }
    if !dataset::equivalent(&reference.units, &target.units) {
        return Err(EvalError::UnitMismatch {
            reference: reference.units.clone(),
            target: target.units.clone(),
        });
    }
    Ok(())
}

/// Evaluate one metric for one target against the reference.
pub fn evaluate(
    metric: Metric,
    reference: &Dataset,
    target: &Dataset,
    tau: f64,
) -> EvalResult<MetricOutput> {
    check_aligned(reference, target)?;
    debug!(metric = %metric, target = %target.name, "evaluating metric");

    let result = match metric {
        Metric::Bias => {
            let (values, mask) = bias_map(reference, target, tau)?;
            MetricResult::Map { values, mask }
        }
        Metric::BiasDomain => MetricResult::Scalar(bias_domain(reference, target)?),
        Metric::Mae => {
            let (values, mask) = mae_map(reference, target, tau)?;
            MetricResult::Map { values, mask }
        }
        Metric::Rmse => {
            let (values, mask) = rmse_map(reference, target, tau)?;
            MetricResult::Map { values, mask }
        }
        Metric::PcSpatial => {
            let (values, mask) = pattern_corr_spatial(reference, target, tau)?;
            MetricResult::Series { values, mask }
        }
        Metric::PcTemporal => {
            let (values, mask) = pattern_corr_temporal(reference, target, tau)?;
            MetricResult::Map { values, mask }
        }
        Metric::StdevRatio => MetricResult::Scalar(stdev_ratio(reference, target)?),
        Metric::NashSutcliffe => {
            let (values, mask) = nash_sutcliffe(reference, target, tau)?;
            MetricResult::Series { values, mask }
        }
        Metric::PdfSimilarity => {
            MetricResult::Scalar(pdf_similarity(reference, target, DEFAULT_PDF_BINS)?)
        }
        Metric::TaylorPoint => {
            let (stddev_ratio, correlation) = taylor_point(reference, target)?;
            MetricResult::Taylor {
                stddev_ratio,
                correlation,
            }
        }
    };

    let significance = if metric.has_significance() {
        Some(paired_t_test(reference, target, tau)?)
    } else {
        None
    };

    Ok(MetricOutput {
        metric,
        target_name: target.name.clone(),
        result,
        significance,
    })
}
