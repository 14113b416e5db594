//! Axis-name inference for sources that don't label their axes the way
//! the caller expects.

use eval_common::{EvalError, EvalResult};

pub const TIME_SYNONYMS: &[&str] = &["time", "times", "date", "dates", "julian"];
pub const LAT_SYNONYMS: &[&str] = &["latitude", "lat", "lats", "latitudes"];
pub const LON_SYNONYMS: &[&str] = &["longitude", "lon", "lons", "longitudes"];

/// Optional axis-name overrides supplied by the caller.
#[derive(Debug, Clone, Default)]
pub struct AxisNames {
    pub time: Option<String>,
    pub lat: Option<String>,
    pub lon: Option<String>,
}

/// Resolve an axis name among the variables a source exposes.
///
/// An explicit override must exist in the source; otherwise the synonym
/// table is scanned case-insensitively. Zero matches is VariableMissing,
/// two or more is AxisInferenceAmbiguous.
pub fn infer_axis(
    available: &[String],
    override_name: Option<&str>,
    synonyms: &[&str],
    axis: &str,
    location: &str,
) -> EvalResult<String> {
    if let Some(name) = override_name {
        return available
            .iter()
            .find(|v| v.eq_ignore_ascii_case(name))
            .cloned()
            .ok_or_else(|| EvalError::VariableMissing {
                variable: name.to_string(),
                location: location.to_string(),
            });
    }
    let candidates: Vec<String> = available
        .iter()
        .filter(|v| synonyms.iter().any(|s| v.eq_ignore_ascii_case(s)))
        .cloned()
        .collect();
    match candidates.len() {
        0 => Err(EvalError::VariableMissing {
            variable: format!("<{} axis>", axis),
            location: location.to_string(),
        }),
        1 => Ok(candidates.into_iter().next().expect("one candidate")),
        _ => Err(EvalError::AxisInferenceAmbiguous {
            axis: axis.to_string(),
            location: location.to_string(),
            candidates,
        }),
    }
}
