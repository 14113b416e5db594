//! Evaluation driver service: configuration, the run state machine, and
//! the optional netCDF export.

pub mod config;
pub mod driver;
pub mod export;

pub use config::{load_config, EvalConfig, SourceConfig};
pub use driver::{
    DriverState, EvaluationBundle, EvaluationJob, Evaluator, GridPolicy, OutputMode,
    RegionReduction, TemporalPolicy,
};
