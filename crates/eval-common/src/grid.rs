//! Target-grid specification for regridding.

use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// Specification of a regular lat/lon target grid.
///
/// Cell centers run from `lat_min`/`lon_min` in steps of `d_lat`/`d_lon`;
/// the derived point counts include both end points.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridBox {
    pub lat_min: f64,
    pub lat_max: f64,
    pub lon_min: f64,
    pub lon_max: f64,
    pub d_lat: f64,
    pub d_lon: f64,
}

impl GridBox {
    pub fn new(
        lat_min: f64,
        lat_max: f64,
        lon_min: f64,
        lon_max: f64,
        d_lat: f64,
        d_lon: f64,
    ) -> Self {
        Self {
            lat_min,
            lat_max,
            lon_min,
            lon_max,
            d_lat,
            d_lon,
        }
    }

    /// Number of grid points along latitude.
    pub fn ny(&self) -> usize {
        ((self.lat_max - self.lat_min) / self.d_lat).floor() as usize + 1
    }

    /// Number of grid points along longitude.
    pub fn nx(&self) -> usize {
        ((self.lon_max - self.lon_min) / self.d_lon).floor() as usize + 1
    }

    /// Latitude of row `j`.
    pub fn lat_at(&self, j: usize) -> f64 {
        self.lat_min + j as f64 * self.d_lat
    }

    /// Longitude of column `i`.
    pub fn lon_at(&self, i: usize) -> f64 {
        self.lon_min + i as f64 * self.d_lon
    }

    /// Materialize the 2-D coordinate meshes, shape (ny, nx).
    pub fn meshes(&self) -> (Array2<f64>, Array2<f64>) {
        let (ny, nx) = (self.ny(), self.nx());
        let lats = Array2::from_shape_fn((ny, nx), |(j, _)| self.lat_at(j));
        let lons = Array2::from_shape_fn((ny, nx), |(_, i)| self.lon_at(i));
        (lats, lons)
    }
}
