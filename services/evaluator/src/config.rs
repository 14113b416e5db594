//! Evaluation configuration: YAML with environment substitution.
//!
//! Section layout mirrors the classic evaluation configs: a `settings`
//! block for the window, grids, and metric; repeatable `reference` and
//! `targets` source entries; an optional `subregions` block that either
//! inlines records or points at a subregion file.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use eval_common::{
    load_subregion_file, Bounds, CalTime, Calendar, EvalError, EvalResult, GridBox, SubRegion,
};
use metrics::Metric;
use temporal::Scale;

use crate::driver::{EvaluationJob, GridPolicy, OutputMode, TemporalPolicy};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalConfig {
    pub settings: Settings,
    pub reference: Vec<SourceConfig>,
    pub targets: Vec<SourceConfig>,
    #[serde(default)]
    pub subregions: Option<SubregionsConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub work_dir: PathBuf,
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
    #[serde(default)]
    pub start_date: Option<String>,
    #[serde(default)]
    pub end_date: Option<String>,
    #[serde(default)]
    pub lat_min: Option<f64>,
    #[serde(default)]
    pub lat_max: Option<f64>,
    #[serde(default)]
    pub lon_min: Option<f64>,
    #[serde(default)]
    pub lon_max: Option<f64>,
    #[serde(default)]
    pub d_lat: Option<f64>,
    #[serde(default)]
    pub d_lon: Option<f64>,
    /// One of reference | model | user.
    pub spatial_grid: String,
    /// One of hourly | daily | monthly | seasonal | annual | full |
    /// reference | model | common.
    pub temporal_grid: String,
    #[serde(default)]
    pub season_start: Option<u32>,
    #[serde(default)]
    pub season_end: Option<u32>,
    pub metric: String,
    #[serde(default = "default_mask_enabled")]
    pub mask_enabled: bool,
    #[serde(default = "default_tau")]
    pub tau: f64,
    #[serde(default = "default_write_out")]
    pub write_out: String,
    #[serde(default)]
    pub ensemble: bool,
    /// Calendar the start/end dates are interpreted on.
    #[serde(default = "default_calendar")]
    pub calendar: String,
}

fn default_mask_enabled() -> bool {
    true
}

fn default_tau() -> f64 {
    temporal::DEFAULT_TAU
}

fn default_write_out() -> String {
    "none".to_string()
}

fn default_calendar() -> String {
    "standard".to_string()
}

/// One dataset source: a local file or a remote catalog entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default)]
    pub catalog: Option<CatalogConfig>,
    pub variable: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub units: Option<String>,
    #[serde(default)]
    pub lat_name: Option<String>,
    #[serde(default)]
    pub lon_name: Option<String>,
    #[serde(default)]
    pub time_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    pub base_url: String,
    pub dataset_id: String,
    pub parameter_id: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubregionsConfig {
    #[serde(default)]
    pub file: Option<PathBuf>,
    #[serde(default)]
    pub regions: Vec<SubregionRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubregionRecord {
    pub name: String,
    pub lat_min: f64,
    pub lat_max: f64,
    pub lon_min: f64,
    pub lon_max: f64,
}

/// Load a config file, expanding `${VAR}` / `${VAR:-default}` references.
pub fn load_config(path: &Path) -> EvalResult<EvalConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|_| EvalError::FileNotFound(path.display().to_string()))?;
    let expanded = expand_env_vars(&content)?;
    let config: EvalConfig = serde_yaml::from_str(&expanded)
        .map_err(|e| EvalError::ConfigInvalid(format!("{}: {}", path.display(), e)))?;
    validate(&config)?;
    Ok(config)
}

/// Expand environment variables in config text. Supports `${VAR}` and
/// `${VAR:-default}`.
fn expand_env_vars(content: &str) -> EvalResult<String> {
    let mut result = String::with_capacity(content.len());
    let mut chars = content.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch == '$' && chars.peek() == Some(&'{') {
            chars.next();
            let mut expr = String::new();
            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(c) => expr.push(c),
                    None => {
                        return Err(EvalError::ConfigInvalid(format!(
                            "unclosed variable substitution: ${{{}",
                            expr
                        )))
                    }
                }
            }
            let value = if let Some((var, default)) = expr.split_once(":-") {
                match std::env::var(var.trim()) {
                    Ok(v) if !v.is_empty() => v,
                    _ => default.to_string(),
                }
            } else {
                std::env::var(expr.trim()).map_err(|_| {
                    EvalError::ConfigInvalid(format!("environment variable {} not set", expr))
                })?
            };
            result.push_str(&value);
        } else {
            result.push(ch);
        }
    }
    Ok(result)
}

fn validate(config: &EvalConfig) -> EvalResult<()> {
    if config.reference.is_empty() {
        return Err(EvalError::ConfigInvalid(
            "at least one reference source is required".into(),
        ));
    }
    if config.targets.is_empty() {
        return Err(EvalError::ConfigInvalid(
            "at least one target source is required".into(),
        ));
    }
    for (section, sources) in [("reference", &config.reference), ("targets", &config.targets)] {
        for src in sources.iter() {
            if src.file.is_none() && src.catalog.is_none() {
                return Err(EvalError::ConfigInvalid(format!(
                    "{} entry needs either `file` or `catalog`",
                    section
                )));
            }
        }
    }
    if !["reference", "model", "user"].contains(&config.settings.spatial_grid.as_str()) {
        return Err(EvalError::ConfigInvalid(format!(
            "spatial_grid must be reference|model|user, got '{}'",
            config.settings.spatial_grid
        )));
    }
    if config.settings.spatial_grid == "user" {
        let s = &config.settings;
        if s.lat_min.is_none()
            || s.lat_max.is_none()
            || s.lon_min.is_none()
            || s.lon_max.is_none()
            || s.d_lat.is_none()
            || s.d_lon.is_none()
        {
            return Err(EvalError::ConfigInvalid(
                "spatial_grid: user requires lat/lon bounds and d_lat/d_lon".into(),
            ));
        }
    }
    if config.settings.temporal_grid == "seasonal"
        && (config.settings.season_start.is_none() || config.settings.season_end.is_none())
    {
        return Err(EvalError::ConfigInvalid(
            "temporal_grid: seasonal requires season_start and season_end".into(),
        ));
    }
    if !(0.0..=1.0).contains(&config.settings.tau) {
        return Err(EvalError::ConfigInvalid(format!(
            "tau must be in [0, 1], got {}",
            config.settings.tau
        )));
    }
    if !["none", "netcdf"].contains(&config.settings.write_out.as_str()) {
        return Err(EvalError::ConfigInvalid(format!(
            "write_out must be none|netcdf, got '{}'",
            config.settings.write_out
        )));
    }
    Metric::parse(&config.settings.metric)?;
    Calendar::parse(&config.settings.calendar)?;
    Ok(())
}

impl EvalConfig {
    /// Resolve the user subset window, when one is configured.
    pub fn user_bounds(&self) -> EvalResult<Option<Bounds>> {
        let s = &self.settings;
        let spatial = [s.lat_min, s.lat_max, s.lon_min, s.lon_max];
        let temporal = [&s.start_date, &s.end_date];
        if spatial.iter().all(|v| v.is_none()) && temporal.iter().all(|v| v.is_none()) {
            return Ok(None);
        }
        let calendar = Calendar::parse(&s.calendar)?;
        let t_start = match &s.start_date {
            Some(d) => CalTime::from_iso(calendar, d)?,
            None => CalTime::from_ymd(calendar, 1, 1, 1)?,
        };
        let t_end = match &s.end_date {
            Some(d) => {
                let day = CalTime::from_iso(calendar, d)?;
                day.add_seconds(86_399)
            }
            None => CalTime::from_ymd(calendar, 9999, 12, 31)?,
        };
        Ok(Some(Bounds::new(
            s.lat_min.unwrap_or(-90.0),
            s.lat_max.unwrap_or(90.0),
            s.lon_min.unwrap_or(-180.0),
            s.lon_max.unwrap_or(179.999_999),
            t_start,
            t_end,
        )))
    }

    /// Build the evaluation job this config describes.
    pub fn to_job(&self) -> EvalResult<EvaluationJob> {
        let s = &self.settings;
        let need = |field: Option<f64>, name: &str| {
            field.ok_or_else(|| {
                EvalError::ConfigInvalid(format!("spatial_grid: user requires {}", name))
            })
        };
        let grid = match s.spatial_grid.as_str() {
            "reference" => GridPolicy::Reference,
            "model" => GridPolicy::Model,
            _ => GridPolicy::User(GridBox::new(
                need(s.lat_min, "lat_min")?,
                need(s.lat_max, "lat_max")?,
                need(s.lon_min, "lon_min")?,
                need(s.lon_max, "lon_max")?,
                need(s.d_lat, "d_lat")?,
                need(s.d_lon, "d_lon")?,
            )),
        };
        let temporal = match s.temporal_grid.as_str() {
            "reference" => TemporalPolicy::Reference,
            "model" => TemporalPolicy::Model,
            "common" => TemporalPolicy::Common,
            "hourly" => TemporalPolicy::User(Scale::Hourly),
            "daily" => TemporalPolicy::User(Scale::Daily),
            "monthly" => TemporalPolicy::User(Scale::Monthly),
            "annual" => TemporalPolicy::User(Scale::Annual),
            "full" => TemporalPolicy::User(Scale::Full),
            "seasonal" => {
                let (m_start, m_end) = match (s.season_start, s.season_end) {
                    (Some(a), Some(b)) => (a, b),
                    _ => {
                        return Err(EvalError::ConfigInvalid(
                            "temporal_grid: seasonal requires season_start and season_end".into(),
                        ))
                    }
                };
                TemporalPolicy::User(Scale::Seasonal { m_start, m_end })
            }
            other => {
                return Err(EvalError::ConfigInvalid(format!(
                    "unknown temporal_grid '{}'",
                    other
                )))
            }
        };
        let output = match s.write_out.as_str() {
            "netcdf" => OutputMode::NetCdf,
            _ => OutputMode::None,
        };
        Ok(EvaluationJob {
            subset: self.user_bounds()?,
            grid,
            temporal,
            metric: Metric::parse(&s.metric)?,
            subregions: self.load_subregions()?,
            tau: s.tau,
            mask_enabled: s.mask_enabled,
            output,
            with_ensemble: s.ensemble,
        })
    }

    /// Subregions from the inline records and/or the referenced file.
    pub fn load_subregions(&self) -> EvalResult<Vec<SubRegion>> {
        let Some(cfg) = &self.subregions else {
            return Ok(Vec::new());
        };
        let mut regions: Vec<SubRegion> = cfg
            .regions
            .iter()
            .map(|r| SubRegion::rectangle(&r.name, r.lat_min, r.lat_max, r.lon_min, r.lon_max))
            .collect();
        if let Some(path) = &cfg.file {
            regions.extend(load_subregion_file(path)?);
        }
        let mut seen = HashMap::new();
        for r in &regions {
            if seen.insert(r.name.clone(), ()).is_some() {
                return Err(EvalError::ConfigInvalid(format!(
                    "duplicate subregion name '{}'",
                    r.name
                )));
            }
        }
        Ok(regions)
    }
}
