//! Dataset ingestion: turn source-specific handles into canonical datasets.
//!
//! Formats are recognized by a static registry of (probe, loader) pairs
//! scanned in order, first match wins. Remote catalog locations download
//! into the local cache first and then flow through the same registry.

mod matrix;
mod multifile;
#[cfg(feature = "netcdf")]
mod netcdf;
mod probe;
mod remote;
mod synonyms;

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use tracing::debug;

use dataset::{Dataset, SourceKind};
use eval_common::{EvalError, EvalResult};

pub use matrix::load_matrix;
pub use multifile::{concatenate, load_file_list};
pub use remote::{fetch_to_cache, Credentials};
pub use synonyms::{infer_axis, AxisNames, LAT_SYNONYMS, LON_SYNONYMS, TIME_SYNONYMS};

/// Caller-supplied ingestion parameters.
#[derive(Debug, Clone)]
pub struct IngestOptions {
    /// Physical variable to extract.
    pub variable: String,
    /// Display name for the resulting dataset (defaults to the location).
    pub name: Option<String>,
    /// Unit string override for sources that don't carry one.
    pub units: Option<String>,
    /// Axis-name overrides; anything absent is inferred from synonyms.
    pub axis_names: AxisNames,
    /// Download cache directory for remote locations.
    pub cache_dir: Option<PathBuf>,
    /// Longitude pivot override for the axis normalizer.
    pub lon_pivot: Option<f64>,
}

impl IngestOptions {
    pub fn new(variable: impl Into<String>) -> Self {
        Self {
            variable: variable.into(),
            name: None,
            units: None,
            axis_names: AxisNames::default(),
            cache_dir: None,
            lon_pivot: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// One entry of the format registry.
struct Handler {
    name: &'static str,
    probe: fn(&Path, &[u8]) -> bool,
    load: fn(&Path, &IngestOptions) -> EvalResult<Dataset>,
}

#[cfg(feature = "netcdf")]
fn load_netcdf_entry(path: &Path, options: &IngestOptions) -> EvalResult<Dataset> {
    netcdf::load_netcdf(path, options)
}

#[cfg(not(feature = "netcdf"))]
fn load_netcdf_entry(path: &Path, _options: &IngestOptions) -> EvalResult<Dataset> {
    Err(EvalError::UnknownFormat(format!(
        "{}: netCDF source recognized but no reader shim is enabled (build with the `netcdf` feature or ingest through an external reader)",
        path.display()
    )))
}

/// Registry order matters: magic-number formats first, then manifests,
/// then the bare-text fallback.
static REGISTRY: &[Handler] = &[
    Handler {
        name: "netcdf",
        probe: probe::is_netcdf,
        load: load_netcdf_entry,
    },
    Handler {
        name: "file-list",
        probe: probe::is_file_list,
        load: multifile::load_file_list,
    },
    Handler {
        name: "matrix-dump",
        probe: probe::is_matrix_dump,
        load: matrix::load_matrix,
    },
];

/// Ingest a local file through the format registry.
pub fn load_path(path: &Path, options: &IngestOptions) -> EvalResult<Dataset> {
    if !path.exists() {
        return Err(EvalError::FileNotFound(path.display().to_string()));
    }
    let mut header = [0u8; 8];
    let read = File::open(path)
        .and_then(|mut f| f.read(&mut header))
        .map_err(|_| EvalError::FileNotFound(path.display().to_string()))?;
    let header = &header[..read];

    for handler in REGISTRY {
        if (handler.probe)(path, header) {
            debug!(format = handler.name, path = %path.display(), "probe matched");
            return (handler.load)(path, options);
        }
    }
    Err(EvalError::UnknownFormat(path.display().to_string()))
}

/// Ingest from a location string: an `http(s)://` URL is fetched into the
/// cache first, anything else is a local path.
pub fn load(location: &str, options: &IngestOptions) -> EvalResult<Dataset> {
    if location.starts_with("http://") || location.starts_with("https://") {
        let cache_dir = options
            .cache_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("climate-eval-cache"));
        let local = fetch_to_cache(location, None, &cache_dir)?;
        let mut ds = load_path(&local, options)?;
        ds.origin.kind = SourceKind::RemoteCatalog;
        ds.origin.identifier = location.to_string();
        return Ok(ds);
    }
    load_path(Path::new(location), options)
}

/// A remote-catalog reference: the collaborator-facing handle for
/// credentialed bulk downloads.
#[derive(Debug, Clone)]
pub struct CatalogRef {
    pub base_url: String,
    pub dataset_id: String,
    pub parameter_id: String,
    pub credentials: Option<Credentials>,
}

impl CatalogRef {
    fn url(&self) -> String {
        format!(
            "{}?dataset={}&parameter={}",
            self.base_url.trim_end_matches('/'),
            self.dataset_id,
            self.parameter_id
        )
    }
}

/// Fetch a catalog entry into the cache and ingest the local copy.
pub fn load_catalog(catalog: &CatalogRef, options: &IngestOptions) -> EvalResult<Dataset> {
    let cache_dir = options
        .cache_dir
        .clone()
        .unwrap_or_else(|| std::env::temp_dir().join("climate-eval-cache"));
    let url = catalog.url();
    let local = fetch_to_cache(&url, catalog.credentials.as_ref(), &cache_dir)?;
    let mut ds = load_path(&local, options)?;
    ds.origin.kind = SourceKind::RemoteCatalog;
    ds.origin.identifier = format!("{}/{}", catalog.dataset_id, catalog.parameter_id);
    Ok(ds)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_load_dispatches_matrix_dump() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("field.dat");
        File::create(&path)
            .unwrap()
            .write_all(b"1 2 3 4\n5 6 7 8\n")
            .unwrap();
        let ds = load(path.to_str().unwrap(), &IngestOptions::new("pr")).unwrap();
        assert_eq!(ds.variable, "pr");
        assert_eq!(ds.ny(), 2);
        assert_eq!(ds.nx(), 4);
        assert!(matches!(ds.origin.kind, SourceKind::MatrixDump));
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            load("/nonexistent/path.nc", &IngestOptions::new("pr")),
            Err(EvalError::FileNotFound(_))
        ));
    }

    #[test]
    fn test_unknown_format() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("junk.bin");
        File::create(&path)
            .unwrap()
            .write_all(&[0u8, 1, 2, 3, 250, 251])
            .unwrap();
        assert!(matches!(
            load(path.to_str().unwrap(), &IngestOptions::new("pr")),
            Err(EvalError::UnknownFormat(_))
        ));
    }

    #[test]
    fn test_catalog_url_shape() {
        let cat = CatalogRef {
            base_url: "https://catalog.example.org/api/".into(),
            dataset_id: "obs4".into(),
            parameter_id: "pr".into(),
            credentials: None,
        };
        assert_eq!(
            cat.url(),
            "https://catalog.example.org/api?dataset=obs4&parameter=pr"
        );
    }
}
