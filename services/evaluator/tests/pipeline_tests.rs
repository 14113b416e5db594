//! End-to-end pipeline scenarios driven through the evaluation driver.

use approx::assert_relative_eq;
use tempfile::TempDir;

use dataset::{Dataset, Origin, DEFAULT_MISSING};
use eval_common::{EvalError, SubRegion};
use evaluator::driver::{
    DriverState, EvaluationJob, Evaluator, GridPolicy, OutputMode, TemporalPolicy,
};
use metrics::{Metric, MetricResult};
use ndarray::Array3;
use temporal::Scale;
use test_utils::{dataset_from_fn, land_ocean_mask, monthly_times, uniform_grid};

fn job(metric: Metric, temporal: TemporalPolicy) -> EvaluationJob {
    EvaluationJob {
        subset: None,
        grid: GridPolicy::Reference,
        temporal,
        metric,
        subregions: Vec::new(),
        tau: temporal::DEFAULT_TAU,
        mask_enabled: true,
        output: OutputMode::None,
        with_ensemble: false,
    }
}

fn run_pipeline(
    job: EvaluationJob,
    reference: Dataset,
    targets: Vec<Dataset>,
) -> evaluator::driver::EvaluationBundle {
    let dir = TempDir::new().unwrap();
    let mut driver = Evaluator::new(job, dir.path()).unwrap();
    driver.add_datasets(reference, targets).unwrap();
    driver.choose_window().unwrap();
    driver.align().unwrap();
    driver.reduce().unwrap();
    driver.compute_metrics().unwrap();
    driver.finish().unwrap()
}

/// S1: precipitation climatology bias on a 2-degree global grid, ocean
/// cells masked in the reference.
#[test]
fn s1_precipitation_climatology_bias() {
    let (lats, lons) = uniform_grid(-89.0, 2.0, 90, -179.0, 2.0, 180);
    let times = monthly_times(eval_common::Calendar::Gregorian, 2000, 72);
    let land_columns = 90;

    let mut reference = dataset_from_fn(
        "obs",
        "pr",
        "mm/day",
        times.clone(),
        lats.clone(),
        lons.clone(),
        |_, _, _| 2.0,
    );
    reference.mask = land_ocean_mask(72, 90, 180, land_columns);
    reference.apply_sentinel();

    let target = dataset_from_fn("model", "pr", "mm/day", times, lats, lons, |_, _, _| 3.0);

    let bundle = run_pipeline(
        job(Metric::Bias, TemporalPolicy::User(Scale::Full)),
        reference.clone(),
        vec![target.clone()],
    );
    match &bundle.outputs[0].result {
        MetricResult::Map { values, mask } => {
            for j in 0..90 {
                for i in 0..180 {
                    if i < land_columns {
                        assert!(!mask[[j, i]], "land cell ({j},{i}) must be unmasked");
                        assert_relative_eq!(values[[j, i]], 1.0, epsilon = 1e-12);
                    } else {
                        assert!(mask[[j, i]], "ocean cell ({j},{i}) must stay masked");
                    }
                }
            }
        }
        other => panic!("expected a map, got {other:?}"),
    }

    // the aligned stacks are exposed for the domain-mean companion
    let domain = metrics::evaluate(
        Metric::BiasDomain,
        &bundle.reference,
        &bundle.targets[0],
        temporal::DEFAULT_TAU,
    )
    .unwrap();
    match domain.result {
        MetricResult::Scalar(v) => assert_relative_eq!(v, 1.0, epsilon = 1e-12),
        other => panic!("expected a scalar, got {other:?}"),
    }
}

/// S2: seasonal RMSE of a 0.5 K offset after regridding the coarser
/// model onto the reference grid.
#[test]
fn s2_seasonal_rmse_after_regridding() {
    let annual_cycle = |month: u32| {
        (2.0 * std::f64::consts::PI * month as f64 / 12.0).sin() + 273.15
    };
    let times = monthly_times(eval_common::Calendar::Gregorian, 2000, 60);

    let (ref_lats, ref_lons) = uniform_grid(0.0, 1.0, 21, 0.0, 1.0, 21);
    let ref_times = times.clone();
    let reference = Dataset::new(
        "obs",
        "tas",
        "K",
        Array3::from_shape_fn((60, 21, 21), |(t, _, _)| {
            annual_cycle(ref_times[t].month)
        }),
        Array3::from_elem((60, 21, 21), false),
        DEFAULT_MISSING,
        ref_lats,
        ref_lons,
        times.clone(),
        Origin::synthetic("obs"),
    )
    .unwrap();

    let (tgt_lats, tgt_lons) = uniform_grid(0.0, 2.0, 11, 0.0, 2.0, 11);
    let tgt_times = times.clone();
    let target = Dataset::new(
        "model",
        "tas",
        "K",
        Array3::from_shape_fn((60, 11, 11), |(t, _, _)| {
            annual_cycle(tgt_times[t].month) + 0.5
        }),
        Array3::from_elem((60, 11, 11), false),
        DEFAULT_MISSING,
        tgt_lats,
        tgt_lons,
        times,
        Origin::synthetic("model"),
    )
    .unwrap();

    let bundle = run_pipeline(
        job(
            Metric::Rmse,
            TemporalPolicy::User(Scale::Seasonal {
                m_start: 6,
                m_end: 8,
            }),
        ),
        reference,
        vec![target],
    );

    assert_eq!(bundle.reference.nt(), 5, "five JJA seasons in 60 months");
    match &bundle.outputs[0].result {
        MetricResult::Map { values, mask } => {
            for (v, m) in values.iter().zip(mask.iter()) {
                assert!(!m);
                assert_relative_eq!(*v, 0.5, epsilon = 1e-9);
            }
        }
        other => panic!("expected a map, got {other:?}"),
    }
    let (_, sig_mask) = bundle.outputs[0].significance.as_ref().unwrap();
    assert!(sig_mask.iter().all(|&m| !m), "significance fully unmasked");
}

/// S3: per-subregion annual cycle of a latitude-valued field.
#[test]
fn s3_subregion_annual_cycle() {
    let (lats, lons) = uniform_grid(0.5, 1.0, 20, 0.5, 1.0, 10);
    let times = monthly_times(eval_common::Calendar::Gregorian, 2000, 12);
    let field = dataset_from_fn(
        "latfield",
        "tas",
        "degC",
        times,
        lats,
        lons,
        |_, lat, _| lat,
    );

    let mut j = job(Metric::Bias, TemporalPolicy::User(Scale::Monthly));
    j.subregions = vec![
        SubRegion::rectangle("R1", 0.0, 10.0, 0.0, 10.0),
        SubRegion::rectangle("R2", 10.0, 20.0, 0.0, 10.0),
    ];
    let bundle = run_pipeline(j, field.clone(), vec![field]);

    let regions = bundle.regions.expect("subregions were configured");
    assert_eq!(regions.region_names, vec!["R1", "R2"]);
    // row 0 is the reference, row 1 the (identical) target
    for d in 0..2 {
        for t in 0..12 {
            assert_relative_eq!(regions.values[[d, 0, t]], 5.0, epsilon = 0.05);
            assert_relative_eq!(regions.values[[d, 1, t]], 15.0, epsilon = 0.05);
            assert!(!regions.mask[[d, 0, t]]);
        }
        // constant over the year: annual-cycle standard deviation is zero
        let series: Vec<f64> = (0..12).map(|t| regions.values[[d, 0, t]]).collect();
        let mean = series.iter().sum::<f64>() / 12.0;
        let var = series.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / 11.0;
        assert_relative_eq!(var.sqrt(), 0.0, epsilon = 1e-12);
    }
}

/// S4: spatial pattern correlation of identical longitude-valued fields.
#[test]
fn s4_pattern_correlation_identical_fields() {
    let (lats, lons) = uniform_grid(-87.5, 5.0, 36, -177.5, 5.0, 72);
    let times = monthly_times(eval_common::Calendar::Gregorian, 2000, 10);
    let make = |name: &str| {
        dataset_from_fn(name, "tas", "K", times.clone(), lats.clone(), lons.clone(), |_, _, lon| lon)
    };

    let bundle = run_pipeline(
        job(Metric::PcSpatial, TemporalPolicy::User(Scale::Monthly)),
        make("obs"),
        vec![make("model")],
    );
    match &bundle.outputs[0].result {
        MetricResult::Series { values, mask } => {
            assert_eq!(values.len(), 10);
            for (v, m) in values.iter().zip(mask.iter()) {
                assert!(!m);
                assert_relative_eq!(*v, 1.0, epsilon = 1e-9);
            }
        }
        other => panic!("expected a series, got {other:?}"),
    }
    // identical fields: the paired test reports pure chance everywhere
    let (sig, sig_mask) = bundle.outputs[0].significance.as_ref().unwrap();
    for (p, m) in sig.iter().zip(sig_mask.iter()) {
        assert!(!m);
        assert_relative_eq!(*p, 1.0);
    }
}

/// S5: Taylor-diagram point of a 1.5x-scaled wave field.
#[test]
fn s5_taylor_point() {
    let (lats, lons) = uniform_grid(-85.0, 5.0, 35, -180.0, 5.0, 72);
    let times = monthly_times(eval_common::Calendar::Gregorian, 2000, 12);
    let wave = |lat: f64, lon: f64| lat.to_radians().cos() * lon.to_radians().sin();
    let reference = dataset_from_fn(
        "obs",
        "tas",
        "K",
        times.clone(),
        lats.clone(),
        lons.clone(),
        |_, lat, lon| wave(lat, lon),
    );
    let target = dataset_from_fn("model", "tas", "K", times, lats, lons, |_, lat, lon| {
        1.5 * wave(lat, lon)
    });

    let bundle = run_pipeline(
        job(Metric::TaylorPoint, TemporalPolicy::User(Scale::Full)),
        reference,
        vec![target],
    );
    match bundle.outputs[0].result {
        MetricResult::Taylor {
            stddev_ratio,
            correlation,
        } => {
            assert_relative_eq!(stddev_ratio, 1.5, epsilon = 1e-9);
            assert_relative_eq!(correlation, 1.0, epsilon = 1e-9);
        }
        ref other => panic!("expected a taylor point, got {other:?}"),
    }
}

/// S6: disjoint periods terminate at WINDOW_CHOSEN with EmptyOverlap and
/// never reach regridding.
#[test]
fn s6_empty_overlap_terminates_window_choice() {
    let (lats, lons) = uniform_grid(0.0, 1.0, 5, 0.0, 1.0, 5);
    let early = dataset_from_fn(
        "obs",
        "tas",
        "K",
        monthly_times(eval_common::Calendar::Gregorian, 1990, 120),
        lats.clone(),
        lons.clone(),
        |_, _, _| 1.0,
    );
    let late = dataset_from_fn(
        "model",
        "tas",
        "K",
        monthly_times(eval_common::Calendar::Gregorian, 2000, 120),
        lats,
        lons,
        |_, _, _| 1.0,
    );

    let dir = TempDir::new().unwrap();
    let mut driver = Evaluator::new(
        job(Metric::Bias, TemporalPolicy::User(Scale::Monthly)),
        dir.path(),
    )
    .unwrap();
    driver.add_datasets(early, vec![late]).unwrap();
    let err = driver.choose_window().unwrap_err();
    assert!(matches!(err, EvalError::EmptyOverlap { .. }));
    // rolled back: still waiting at DATASETS_READY, regridding never ran
    assert_eq!(driver.state(), DriverState::DatasetsReady);
    assert!(driver.align().is_err());
}

/// The ensemble pseudo-dataset appears after alignment and is evaluated
/// like any other target.
#[test]
fn ensemble_member_is_appended() {
    let (lats, lons) = uniform_grid(0.0, 1.0, 4, 0.0, 1.0, 4);
    let times = monthly_times(eval_common::Calendar::Gregorian, 2000, 12);
    let make = |name: &str, value: f64| {
        dataset_from_fn(name, "tas", "K", times.clone(), lats.clone(), lons.clone(), move |_, _, _| value)
    };

    let mut j = job(Metric::Bias, TemporalPolicy::User(Scale::Monthly));
    j.with_ensemble = true;
    let bundle = run_pipeline(j, make("obs", 2.0), vec![make("m1", 1.0), make("m2", 3.0)]);

    assert_eq!(bundle.targets.len(), 3);
    assert_eq!(bundle.targets[2].name, metrics::ENSEMBLE_NAME);
    match &bundle.outputs[2].result {
        MetricResult::Map { values, mask } => {
            // ensemble mean equals the reference: zero bias
            for (v, m) in values.iter().zip(mask.iter()) {
                assert!(!m);
                assert_relative_eq!(*v, 0.0, epsilon = 1e-12);
            }
        }
        other => panic!("expected a map, got {other:?}"),
    }
}

/// Unit mismatches between reference and target are surfaced, not
/// silently averaged over.
#[test]
fn unit_mismatch_is_converted_or_rejected() {
    let (lats, lons) = uniform_grid(0.0, 1.0, 4, 0.0, 1.0, 4);
    let times = monthly_times(eval_common::Calendar::Gregorian, 2000, 12);
    let mut reference = dataset_from_fn(
        "obs",
        "tas",
        "K",
        times.clone(),
        lats.clone(),
        lons.clone(),
        |_, _, _| 300.0,
    );
    reference.units = "K".into();
    // same physical field in Celsius: alignment converts it back
    let mut target = dataset_from_fn("model", "tas", "K", times, lats, lons, |_, _, _| 26.85);
    target.units = "degC".into();

    let bundle = run_pipeline(
        job(Metric::Bias, TemporalPolicy::User(Scale::Monthly)),
        reference,
        vec![target],
    );
    match &bundle.outputs[0].result {
        MetricResult::Map { values, mask } => {
            for (v, m) in values.iter().zip(mask.iter()) {
                assert!(!m);
                assert_relative_eq!(*v, 0.0, epsilon = 1e-9);
            }
        }
        other => panic!("expected a map, got {other:?}"),
    }
}
