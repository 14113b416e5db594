//! Shared helpers for creating synthetic datasets in tests.

mod generators;

pub use generators::{
    constant_dataset, dataset_from_fn, land_ocean_mask, mask_cells, monthly_times, ramp_dataset,
    uniform_grid,
};
