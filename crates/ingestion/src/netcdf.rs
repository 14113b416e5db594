//! Built-in netCDF reader shim (requires the `netcdf` cargo feature and
//! a system libnetcdf).

use std::path::Path;

use ndarray::{Array1, Array2, Array3};
use tracing::info;

use dataset::{build_meshes, normalize, AxisCoords, Dataset, Origin, SourceKind, DEFAULT_MISSING};
use eval_common::{Calendar, CfTimeUnits, EvalError, EvalResult};

use crate::synonyms::{infer_axis, LAT_SYNONYMS, LON_SYNONYMS, TIME_SYNONYMS};
use crate::IngestOptions;

fn string_attr(var: &netcdf::Variable<'_>, name: &str) -> Option<String> {
    let value = var.attribute_value(name)?.ok()?;
    String::try_from(value).ok()
}

fn numeric_attr(var: &netcdf::Variable<'_>, name: &str) -> Option<f64> {
    let value = var.attribute_value(name)?.ok()?;
    f64::try_from(value).ok()
}

fn read_axis(
    file: &netcdf::File,
    name: &str,
    location: &str,
) -> EvalResult<AxisCoords> {
    let var = file
        .variable(name)
        .ok_or_else(|| EvalError::VariableMissing {
            variable: name.to_string(),
            location: location.to_string(),
        })?;
    let dims = var.dimensions();
    let data = var
        .get_values::<f64, _>(..)
        .map_err(|e| EvalError::UnknownFormat(format!("{}: {}", location, e)))?;
    match dims.len() {
        1 => Ok(AxisCoords::OneD(Array1::from(data))),
        2 => {
            let (ny, nx) = (dims[0].len(), dims[1].len());
            let arr = Array2::from_shape_vec((ny, nx), data).map_err(|_| {
                EvalError::UnknownFormat(format!("{}: bad {} axis shape", location, name))
            })?;
            Ok(AxisCoords::TwoD(arr))
        }
        n => Err(EvalError::UnknownFormat(format!(
            "{}: {}-dimensional {} axis",
            location, n, name
        ))),
    }
}

/// Load a netCDF-family file into the canonical representation.
pub fn load_netcdf(path: &Path, options: &IngestOptions) -> EvalResult<Dataset> {
    let location = path.display().to_string();
    let file = netcdf::open(path)
        .map_err(|e| EvalError::UnknownFormat(format!("{}: {}", location, e)))?;

    let var_names: Vec<String> = file.variables().map(|v| v.name()).collect();
    let var = file
        .variable(&options.variable)
        .ok_or_else(|| EvalError::VariableMissing {
            variable: options.variable.clone(),
            location: location.clone(),
        })?;

    let lat_name = infer_axis(
        &var_names,
        options.axis_names.lat.as_deref(),
        LAT_SYNONYMS,
        "latitude",
        &location,
    )?;
    let lon_name = infer_axis(
        &var_names,
        options.axis_names.lon.as_deref(),
        LON_SYNONYMS,
        "longitude",
        &location,
    )?;
    let time_name = infer_axis(
        &var_names,
        options.axis_names.time.as_deref(),
        TIME_SYNONYMS,
        "time",
        &location,
    )?;

    let lats = read_axis(&file, &lat_name, &location)?;
    let lons = read_axis(&file, &lon_name, &location)?;
    let (lats, lons) = build_meshes(lats, lons)?;

    // Decode the CF time axis: unit string plus calendar attribute.
    let time_var = file
        .variable(&time_name)
        .ok_or_else(|| EvalError::VariableMissing {
            variable: time_name.clone(),
            location: location.clone(),
        })?;
    let time_units = string_attr(&time_var, "units").ok_or_else(|| {
        EvalError::ConfigInvalid(format!(
            "{}: time variable '{}' has no units attribute",
            location, time_name
        ))
    })?;
    let calendar_name =
        string_attr(&time_var, "calendar").unwrap_or_else(|| "standard".to_string());
    let calendar = Calendar::parse(&calendar_name)?;
    let offsets = time_var
        .get_values::<f64, _>(..)
        .map_err(|e| EvalError::UnknownFormat(format!("{}: {}", location, e)))?;
    let times = CfTimeUnits::parse(&time_units, calendar)?.decode(&offsets);

    // Field payload: (time, lat, lon).
    let dims = var.dimensions();
    if dims.len() != 3 {
        return Err(EvalError::UnknownFormat(format!(
            "{}: variable '{}' is {}-dimensional, expected (time, lat, lon)",
            location,
            options.variable,
            dims.len()
        )));
    }
    let (nt, ny, nx) = (dims[0].len(), dims[1].len(), dims[2].len());
    let raw = var
        .get_values::<f64, _>(..)
        .map_err(|e| EvalError::UnknownFormat(format!("{}: {}", location, e)))?;
    let values = Array3::from_shape_vec((nt, ny, nx), raw).map_err(|_| {
        EvalError::UnknownFormat(format!("{}: variable shape mismatch", location))
    })?;

    let missing = numeric_attr(&var, "_FillValue")
        .or_else(|| numeric_attr(&var, "missing_value"))
        .unwrap_or(DEFAULT_MISSING);
    let mask = values.mapv(|v| v.is_nan() || v == missing);
    let values = values.mapv(|v| if v.is_nan() { missing } else { v });

    let units = string_attr(&var, "units").or_else(|| options.units.clone());
    let name = options.name.clone().unwrap_or_else(|| location.clone());

    let ds = Dataset::new(
        name,
        options.variable.clone(),
        units.unwrap_or_else(|| "1".to_string()),
        values,
        mask,
        missing,
        lats,
        lons,
        times,
        Origin {
            kind: SourceKind::LocalFile,
            identifier: options.variable.clone(),
            path: Some(path.to_path_buf()),
        },
    )?;
    info!(
        location = %location,
        variable = %options.variable,
        nt, ny, nx,
        calendar = %calendar,
        "ingested netCDF dataset"
    );
    normalize(&ds, options.lon_pivot)
}
