//! Optional netCDF export of the aligned stacks and region series.
//!
//! Enabled by the `netcdf-export` cargo feature. Schema: dimensions
//! {time, south_north, west_east, datasets_ref, datasets_tgt,
//! subregions?}; variables lat/lon, the reference and target stacks, and
//! the per-subregion series when subregions were reduced. Dataset names
//! travel as per-variable attributes, the sentinel as `missing_value`.

use std::path::Path;

use eval_common::EvalResult;

use crate::driver::EvaluationBundle;

#[cfg(feature = "netcdf-export")]
pub fn write_netcdf(bundle: &EvaluationBundle, path: &Path) -> EvalResult<()> {
    use eval_common::EvalError;
    use tracing::info;

    let to_err = |e: netcdf::Error| {
        EvalError::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))
    };

    let reference = &bundle.reference;
    let (nt, ny, nx) = (reference.nt(), reference.ny(), reference.nx());

    let mut file = netcdf::create(path).map_err(to_err)?;
    file.add_dimension("time", nt).map_err(to_err)?;
    file.add_dimension("south_north", ny).map_err(to_err)?;
    file.add_dimension("west_east", nx).map_err(to_err)?;
    file.add_dimension("datasets_ref", 1).map_err(to_err)?;
    file.add_dimension("datasets_tgt", bundle.targets.len())
        .map_err(to_err)?;

    {
        let mut lat = file
            .add_variable::<f64>("lat", &["south_north", "west_east"])
            .map_err(to_err)?;
        lat.put_values(reference.lats.as_slice().expect("contiguous"), ..)
            .map_err(to_err)?;
        lat.put_attribute("units", "degrees_north").map_err(to_err)?;
    }
    {
        let mut lon = file
            .add_variable::<f64>("lon", &["south_north", "west_east"])
            .map_err(to_err)?;
        lon.put_values(reference.lons.as_slice().expect("contiguous"), ..)
            .map_err(to_err)?;
        lon.put_attribute("units", "degrees_east").map_err(to_err)?;
    }
    {
        // Time axis in days since the window start, on the dataset calendar.
        let t0 = bundle.window.t_start;
        let offsets: Vec<f64> = reference
            .times
            .iter()
            .map(|t| (t.second_number() - t0.second_number()) as f64 / 86_400.0)
            .collect();
        let mut time = file.add_variable::<f64>("time", &["time"]).map_err(to_err)?;
        time.put_values(&offsets, ..).map_err(to_err)?;
        time.put_attribute("units", format!("days since {}", t0))
            .map_err(to_err)?;
        time.put_attribute("calendar", t0.calendar.as_str())
            .map_err(to_err)?;
    }

    {
        let mut var = file
            .add_variable::<f64>(
                "reference",
                &["datasets_ref", "time", "south_north", "west_east"],
            )
            .map_err(to_err)?;
        var.put_values(reference.values.as_slice().expect("contiguous"), ..)
            .map_err(to_err)?;
        var.put_attribute("missing_value", reference.missing)
            .map_err(to_err)?;
        var.put_attribute("units", reference.units.as_str())
            .map_err(to_err)?;
        var.put_attribute("dataset_names", reference.name.as_str())
            .map_err(to_err)?;
    }
    {
        let mut flat = Vec::with_capacity(bundle.targets.len() * nt * ny * nx);
        for target in &bundle.targets {
            flat.extend(target.values.iter().cloned());
        }
        let names = bundle
            .targets
            .iter()
            .map(|t| t.name.as_str())
            .collect::<Vec<_>>()
            .join(",");
        let mut var = file
            .add_variable::<f64>(
                "target",
                &["datasets_tgt", "time", "south_north", "west_east"],
            )
            .map_err(to_err)?;
        var.put_values(&flat, ..).map_err(to_err)?;
        var.put_attribute("missing_value", reference.missing)
            .map_err(to_err)?;
        var.put_attribute("dataset_names", names.as_str())
            .map_err(to_err)?;
    }

    if let Some(regions) = &bundle.regions {
        let n_regions = regions.region_names.len();
        file.add_dimension("subregions", n_regions).map_err(to_err)?;
        let region_names = regions.region_names.join(",");

        // Row 0 of the reduction is the reference, the rest are targets.
        let ref_series: Vec<f64> = regions
            .values
            .index_axis(ndarray::Axis(0), 0)
            .iter()
            .cloned()
            .collect();
        let mut var = file
            .add_variable::<f64>("reference_region", &["datasets_ref", "subregions", "time"])
            .map_err(to_err)?;
        var.put_values(&ref_series, ..).map_err(to_err)?;
        var.put_attribute("missing_value", reference.missing)
            .map_err(to_err)?;
        var.put_attribute("subregion_names", region_names.as_str())
            .map_err(to_err)?;

        let mut tgt_series = Vec::with_capacity(bundle.targets.len() * n_regions * nt);
        for d in 1..regions.values.shape()[0] {
            tgt_series.extend(regions.values.index_axis(ndarray::Axis(0), d).iter().cloned());
        }
        let mut var = file
            .add_variable::<f64>("target_region", &["datasets_tgt", "subregions", "time"])
            .map_err(to_err)?;
        var.put_values(&tgt_series, ..).map_err(to_err)?;
        var.put_attribute("missing_value", reference.missing)
            .map_err(to_err)?;
        var.put_attribute("subregion_names", region_names.as_str())
            .map_err(to_err)?;
    }

    info!(path = %path.display(), "wrote netCDF export");
    Ok(())
}

#[cfg(not(feature = "netcdf-export"))]
pub fn write_netcdf(_bundle: &EvaluationBundle, path: &Path) -> EvalResult<()> {
    Err(eval_common::EvalError::ConfigInvalid(format!(
        "write_out: netcdf requested but this build lacks the `netcdf-export` feature ({})",
        path.display()
    )))
}
