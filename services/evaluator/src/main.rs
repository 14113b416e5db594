//! Regional climate model evaluation driver.
//!
//! Ingests the configured reference and target datasets, aligns them onto
//! a common spatio-temporal grid, computes the requested metric, and
//! leaves the result bundle (optionally as netCDF) in the work directory
//! for the plotting front-end.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use dataset::Dataset;
use eval_common::EvalResult;
use evaluator::config::{load_config, SourceConfig};
use evaluator::driver::Evaluator;
use ingestion::{AxisNames, CatalogRef, Credentials, IngestOptions};
use metrics::MetricResult;

#[derive(Parser, Debug)]
#[command(name = "evaluator")]
#[command(about = "Compare gridded model output against reference observations")]
struct Args {
    /// Evaluation configuration file (YAML)
    #[arg(short, long, env = "EVAL_CONFIG")]
    config: PathBuf,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn load_source(
    source: &SourceConfig,
    cache_dir: Option<PathBuf>,
    fallback_name: &str,
) -> EvalResult<Dataset> {
    let mut options = IngestOptions::new(&source.variable);
    options.name = Some(
        source
            .name
            .clone()
            .unwrap_or_else(|| fallback_name.to_string()),
    );
    options.units = source.units.clone();
    options.axis_names = AxisNames {
        time: source.time_name.clone(),
        lat: source.lat_name.clone(),
        lon: source.lon_name.clone(),
    };
    options.cache_dir = cache_dir;

    if let Some(file) = &source.file {
        return ingestion::load(file, &options);
    }
    let catalog = source.catalog.as_ref().expect("validated by config");
    ingestion::load_catalog(
        &CatalogRef {
            base_url: catalog.base_url.clone(),
            dataset_id: catalog.dataset_id.clone(),
            parameter_id: catalog.parameter_id.clone(),
            credentials: catalog.username.clone().map(|username| Credentials {
                username,
                password: catalog.password.clone().unwrap_or_default(),
            }),
        },
        &options,
    )
}

fn main() -> Result<()> {
    let args = Args::parse();

    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!(config = %args.config.display(), "starting evaluation");

    let config = load_config(&args.config).context("loading configuration")?;
    let job = config.to_job().context("building evaluation job")?;
    let mut driver =
        Evaluator::new(job, &config.settings.work_dir).context("claiming work directory")?;

    let cache_dir = config.settings.cache_dir.clone();
    if config.reference.len() > 1 {
        warn!(
            entries = config.reference.len(),
            "multiple reference entries configured; using the first"
        );
    }
    let reference = load_source(&config.reference[0], cache_dir.clone(), "reference")
        .context("ingesting reference dataset")?;
    let mut targets = Vec::with_capacity(config.targets.len());
    for (idx, source) in config.targets.iter().enumerate() {
        let fallback = format!("target-{}", idx + 1);
        targets.push(
            load_source(source, cache_dir.clone(), &fallback)
                .with_context(|| format!("ingesting target dataset {}", idx + 1))?,
        );
    }

    driver.add_datasets(reference, targets)?;
    driver.choose_window()?;
    driver.align()?;
    driver.reduce()?;
    driver.compute_metrics()?;
    let bundle = driver.finish()?;

    for output in &bundle.outputs {
        match &output.result {
            MetricResult::Scalar(v) => {
                info!(target = %output.target_name, metric = %output.metric, value = v, "result");
            }
            MetricResult::Taylor {
                stddev_ratio,
                correlation,
            } => {
                info!(
                    target = %output.target_name,
                    metric = %output.metric,
                    stddev_ratio,
                    correlation,
                    "result"
                );
            }
            MetricResult::Map { values, mask } => {
                let unmasked: Vec<f64> = values
                    .iter()
                    .zip(mask.iter())
                    .filter(|(_, &m)| !m)
                    .map(|(v, _)| *v)
                    .collect();
                let mean = unmasked.iter().sum::<f64>() / unmasked.len().max(1) as f64;
                info!(
                    target = %output.target_name,
                    metric = %output.metric,
                    cells = unmasked.len(),
                    domain_mean = mean,
                    "result field"
                );
            }
            MetricResult::Series { values, mask } => {
                let unmasked: Vec<f64> = values
                    .iter()
                    .zip(mask.iter())
                    .filter(|(_, &m)| !m)
                    .map(|(v, _)| *v)
                    .collect();
                let mean = unmasked.iter().sum::<f64>() / unmasked.len().max(1) as f64;
                info!(
                    target = %output.target_name,
                    metric = %output.metric,
                    steps = unmasked.len(),
                    mean,
                    "result series"
                );
            }
        }
    }

    info!(
        window_start = %bundle.window.t_start,
        window_end = %bundle.window.t_end,
        targets = bundle.targets.len(),
        "evaluation finished"
    );
    Ok(())
}
