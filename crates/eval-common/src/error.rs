//! Error types shared across the evaluation pipeline.

use thiserror::Error;

/// Result type alias using EvalError.
pub type EvalResult<T> = Result<T, EvalError>;

/// Primary error type for the evaluation pipeline.
///
/// Every variant that can be traced to a dataset carries the dataset's
/// display name so the driver can report which input broke and at which
/// stage. Variants group into input, geometry, semantics, resource, and
/// compute errors; the driver treats the first four as job-fatal and the
/// last as job-fatal only when an entire reduction comes up empty.
#[derive(Debug, Error)]
pub enum EvalError {
    // === Input errors ===
    #[error("file not found: {0}")]
    FileNotFound(String),

    #[error("unrecognized dataset format: {0}")]
    UnknownFormat(String),

    #[error("variable '{variable}' not present in {location}")]
    VariableMissing { variable: String, location: String },

    #[error("ambiguous {axis} axis in {location}: candidates {candidates:?}")]
    AxisInferenceAmbiguous {
        axis: String,
        location: String,
        candidates: Vec<String>,
    },

    #[error("unsupported calendar: {0}")]
    CalendarUnsupported(String),

    #[error("timestamp {timestamp} is invalid in the {calendar} calendar")]
    CalendarMismatch { timestamp: String, calendar: String },

    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    // === Geometry errors ===
    #[error("non-monotonic {axis} axis in dataset '{dataset}'")]
    NonMonotonicAxis { dataset: String, axis: String },

    #[error("grid mismatch at stage '{stage}' for dataset '{dataset}': {reason}")]
    GridMismatch {
        stage: String,
        dataset: String,
        reason: String,
    },

    #[error("empty spatio-temporal overlap across datasets {datasets:?}")]
    EmptyOverlap { datasets: Vec<String> },

    // === Semantics errors ===
    #[error("cannot rebin dataset '{dataset}' from {from} cadence to {to}")]
    IncompatibleScale {
        dataset: String,
        from: String,
        to: String,
    },

    #[error("metric {metric} incompatible with input: {reason}")]
    MetricIncompatible { metric: String, reason: String },

    #[error("unit mismatch: reference in '{reference}', target in '{target}' and no conversion configured")]
    UnitMismatch { reference: String, target: String },

    // === Resource errors ===
    #[error("working directory not writable: {0}")]
    WorkDirUnwritable(String),

    #[error("download cache corrupt at {0}")]
    CacheCorrupt(String),

    #[error("remote fetch failed for {url}: {reason}")]
    RemoteFetchFailed { url: String, reason: String },

    #[error("authentication failed for {0}")]
    AuthFailed(String),

    // === Compute errors ===
    #[error("reduction at stage '{stage}' produced no unmasked cells for dataset '{dataset}'")]
    AllMasked { stage: String, dataset: String },

    #[error("numerical overflow at stage '{stage}'")]
    NumericalOverflow { stage: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
