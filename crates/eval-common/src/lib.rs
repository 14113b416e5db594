//! Common types shared across the climate-eval workspace.

pub mod bounds;
pub mod error;
pub mod grid;
pub mod subregion;
pub mod time;

pub use bounds::{normalize_lon, Bounds};
pub use error::{EvalError, EvalResult};
pub use grid::GridBox;
pub use subregion::{load_subregion_file, parse_subregion_records, SubRegion, SubRegionShape};
pub use time::{CalTime, Calendar, CfTimeUnits};
