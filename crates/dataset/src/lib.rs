//! Canonical dataset representation and per-ingestion normalization.

pub mod dataset;
pub mod normalize;
pub mod units;

pub use dataset::{stack, Dataset, DatasetStack, Origin, SourceKind, DEFAULT_MISSING, GRID_EPS};
pub use normalize::{build_meshes, normalize, AxisCoords};
pub use units::{align_units, convert, equivalent};
