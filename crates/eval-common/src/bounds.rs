//! Spatio-temporal bounding boxes.

use serde::{Deserialize, Serialize};

use crate::time::CalTime;

/// Normalize a longitude into [-180, 180).
pub fn normalize_lon(lon: f64) -> f64 {
    let mut l = (lon + 180.0) % 360.0;
    if l < 0.0 {
        l += 360.0;
    }
    l - 180.0
}

/// A spatio-temporal bounding box.
///
/// Longitudes are stored normalized to [-180, 180); `lat_min <= lat_max`,
/// `lon_min <= lon_max`, `t_start <= t_end` hold after construction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub lat_min: f64,
    pub lat_max: f64,
    pub lon_min: f64,
    pub lon_max: f64,
    pub t_start: CalTime,
    pub t_end: CalTime,
}

impl Bounds {
    /// Create bounds, normalizing longitudes and ordering each pair.
    pub fn new(
        lat_min: f64,
        lat_max: f64,
        lon_min: f64,
        lon_max: f64,
        t_start: CalTime,
        t_end: CalTime,
    ) -> Self {
        let (lat_min, lat_max) = if lat_min <= lat_max {
            (lat_min, lat_max)
        } else {
            (lat_max, lat_min)
        };
        let (lon_min, lon_max) = {
            let a = normalize_lon(lon_min);
            // Keep an exact 180 right edge representable as the open upper end.
            let b = if lon_max == 180.0 {
                180.0
            } else {
                normalize_lon(lon_max)
            };
            if a <= b {
                (a, b)
            } else {
                (b, a)
            }
        };
        let (t_start, t_end) = if t_start <= t_end {
            (t_start, t_end)
        } else {
            (t_end, t_start)
        };
        Self {
            lat_min,
            lat_max,
            lon_min,
            lon_max,
            t_start,
            t_end,
        }
    }

    /// Width in degrees longitude.
    pub fn lon_span(&self) -> f64 {
        self.lon_max - self.lon_min
    }

    /// Height in degrees latitude.
    pub fn lat_span(&self) -> f64 {
        self.lat_max - self.lat_min
    }

    /// Whether a point falls inside the spatial window.
    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        lat >= self.lat_min && lat <= self.lat_max && lon >= self.lon_min && lon <= self.lon_max
    }

    /// Whether a timestamp falls inside the temporal window.
    pub fn contains_time(&self, t: &CalTime) -> bool {
        *t >= self.t_start && *t <= self.t_end
    }

    /// Intersection of two bounds, None when empty in any dimension.
    pub fn intersection(&self, other: &Bounds) -> Option<Bounds> {
        let lat_min = self.lat_min.max(other.lat_min);
        let lat_max = self.lat_max.min(other.lat_max);
        let lon_min = self.lon_min.max(other.lon_min);
        let lon_max = self.lon_max.min(other.lon_max);
        let t_start = self.t_start.max(other.t_start);
        let t_end = self.t_end.min(other.t_end);
        if lat_min > lat_max || lon_min > lon_max || t_start > t_end {
            return None;
        }
        Some(Bounds {
            lat_min,
            lat_max,
            lon_min,
            lon_max,
            t_start,
            t_end,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::Calendar;

    fn t(y: i32, m: u32) -> CalTime {
        CalTime::from_ymd(Calendar::Gregorian, y, m, 1).unwrap()
    }

    #[test]
    fn test_normalize_lon() {
        assert_eq!(normalize_lon(0.0), 0.0);
        assert_eq!(normalize_lon(180.0), -180.0);
        assert_eq!(normalize_lon(270.0), -90.0);
        assert_eq!(normalize_lon(-200.0), 160.0);
        assert_eq!(normalize_lon(359.75), -0.25);
    }

    #[test]
    fn test_intersection() {
        let a = Bounds::new(0.0, 20.0, 0.0, 20.0, t(2000, 1), t(2005, 12));
        let b = Bounds::new(10.0, 30.0, 10.0, 30.0, t(2003, 1), t(2010, 12));
        let i = a.intersection(&b).unwrap();
        assert_eq!(i.lat_min, 10.0);
        assert_eq!(i.lat_max, 20.0);
        assert_eq!(i.lon_min, 10.0);
        assert_eq!(i.lon_max, 20.0);
        assert_eq!(i.t_start, t(2003, 1));
        assert_eq!(i.t_end, t(2005, 12));
    }

    #[test]
    fn test_disjoint_time_is_empty() {
        let a = Bounds::new(0.0, 20.0, 0.0, 20.0, t(1990, 1), t(1999, 12));
        let b = Bounds::new(0.0, 20.0, 0.0, 20.0, t(2000, 1), t(2009, 12));
        assert!(a.intersection(&b).is_none());
    }

    #[test]
    fn test_unordered_inputs_are_swapped() {
        let b = Bounds::new(30.0, 10.0, 0.0, 20.0, t(2001, 1), t(2000, 1));
        assert!(b.lat_min < b.lat_max);
        assert!(b.t_start < b.t_end);
    }
}
