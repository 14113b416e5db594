//! Unit handling for compared fields.
//!
//! Metric inputs must agree on units; the conversions here cover the pairs
//! that routinely differ between model output and observations
//! (temperature in K vs °C, precipitation as a flux vs a daily depth).
//! Conversion is idempotent: converting into the units a dataset already
//! has returns an unchanged copy.

use tracing::info;

use eval_common::{EvalError, EvalResult};

use crate::dataset::Dataset;

/// Canonical spelling of a unit string, for equivalence checks.
fn canonical(unit: &str) -> &'static str {
    match unit.trim().to_lowercase().as_str() {
        "k" | "kelvin" | "degk" | "deg_k" => "K",
        "c" | "celsius" | "degc" | "deg_c" | "°c" => "degC",
        "kg m-2 s-1" | "kg/m2/s" | "kg m^-2 s^-1" => "kg m-2 s-1",
        "mm/day" | "mm day-1" | "mm d-1" => "mm/day",
        "mm" | "millimeter" | "millimetre" => "mm",
        _ => "",
    }
}

/// Whether two unit strings denote the same unit.
pub fn equivalent(a: &str, b: &str) -> bool {
    let (ca, cb) = (canonical(a), canonical(b));
    if ca.is_empty() || cb.is_empty() {
        // Unknown units compare textually.
        return a.trim().eq_ignore_ascii_case(b.trim());
    }
    ca == cb
}

/// Affine conversion between two known units, as (scale, offset).
fn conversion(from: &str, to: &str) -> Option<(f64, f64)> {
    match (canonical(from), canonical(to)) {
        ("K", "degC") => Some((1.0, -273.15)),
        ("degC", "K") => Some((1.0, 273.15)),
        // Precipitation flux to daily accumulation (1 kg m^-2 == 1 mm water).
        ("kg m-2 s-1", "mm/day") => Some((86_400.0, 0.0)),
        ("mm/day", "kg m-2 s-1") => Some((1.0 / 86_400.0, 0.0)),
        _ => None,
    }
}

/// Convert a dataset into `target_units`, returning a replacement dataset
/// with the destination unit recorded. No-op when units already agree.
pub fn convert(ds: &Dataset, target_units: &str) -> EvalResult<Dataset> {
    if equivalent(&ds.units, target_units) {
        return Ok(ds.clone());
    }
    let (scale, offset) =
        conversion(&ds.units, target_units).ok_or_else(|| EvalError::UnitMismatch {
            reference: target_units.to_string(),
            target: ds.units.clone(),
        })?;
    info!(
        dataset = %ds.name,
        from = %ds.units,
        to = %target_units,
        "converting units"
    );
    let mut values = ds.values.clone();
    ndarray::Zip::from(&mut values)
        .and(&ds.mask)
        .for_each(|v, &m| {
            if !m {
                *v = *v * scale + offset;
            }
        });
    let mut out = ds.replace(
        values,
        ds.mask.clone(),
        ds.lats.clone(),
        ds.lons.clone(),
        ds.times.clone(),
    )?;
    out.units = target_units.to_string();
    Ok(out)
}

/// Bring `target` onto the reference's units, failing with UnitMismatch
/// when no conversion is known.
pub fn align_units(reference: &Dataset, target: &Dataset) -> EvalResult<Dataset> {
    convert(target, &reference.units)
}
