use std::fs;
use std::path::{Path, PathBuf};

use chrono::{Duration, NaiveDate, NaiveDateTime};
use energy_importance_core::forest::ForestError;
use energy_importance_core::pipeline::ImportancePipeline;
use energy_importance_core::{PipelineConfig, PipelineError};
use energy_importance_parser::schema::required_columns;
use energy_importance_parser::{RawObservation, CHANNELS};

fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("../energy-importance-parser/tests/data")
        .join(name)
}

fn start() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2016, 1, 11)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
}

/// Hourly readings where the target follows T1 and a daytime bump.
fn synthetic(count: usize) -> Vec<RawObservation> {
    (0..count)
        .map(|k| {
            let mut obs = RawObservation::new(start() + Duration::hours(k as i64));
            for channel in 0..CHANNELS {
                let t = 19.0 + channel as f64 * 0.5 + ((k as f64) / 5.0).sin() * 2.0;
                let rh = 40.0 + ((k * 7 + channel) % 11) as f64;
                obs.temperature[channel] = Some(t);
                obs.humidity[channel] = Some(rh);
            }
            let t1 = obs.temperature[0].unwrap_or_default();
            let daytime = if (6..18).contains(&(k % 24)) { 30.0 } else { 0.0 };
            obs.target = Some(40.0 + 8.0 * t1 + daytime + ((k * 13) % 7) as f64);
            obs
        })
        .collect()
}

fn constant(count: usize) -> Vec<RawObservation> {
    (0..count)
        .map(|k| {
            let mut obs = RawObservation::new(start() + Duration::hours(k as i64));
            obs.target = Some(60.0);
            obs.temperature = [Some(20.0); CHANNELS];
            obs.humidity = [Some(45.0); CHANNELS];
            obs
        })
        .collect()
}

fn quick_config() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.forest.n_trees = 20;
    config
}

fn write_csv(path: &Path, observations: &[RawObservation]) {
    let mut lines = vec![required_columns().join(",")];
    for obs in observations {
        let mut fields = vec![
            obs.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
            obs.target.map(|v| v.to_string()).unwrap_or_else(|| "NA".into()),
        ];
        for value in obs.temperature.iter().chain(obs.humidity.iter()) {
            fields.push(value.map(|v| v.to_string()).unwrap_or_else(|| "NA".into()));
        }
        lines.push(fields.join(","));
    }
    fs::write(path, lines.join("\n")).expect("failed to write csv");
}

#[test]
fn repeated_runs_give_identical_importances() {
    let pipeline = ImportancePipeline::new(quick_config()).expect("pipeline");
    let data = synthetic(150);

    let first = pipeline.run(&data).expect("first run");
    let second = pipeline.run(&data).expect("second run");

    assert_eq!(first.importances, second.importances);
    assert_eq!(
        first.importances.to_json().expect("json"),
        second.importances.to_json().expect("json")
    );
    assert_eq!(first.summary, second.summary);
}

#[test]
fn run_counts_rows_through_every_stage() {
    let pipeline = ImportancePipeline::new(quick_config()).expect("pipeline");
    let outcome = pipeline.run(&synthetic(150)).expect("run");

    assert_eq!(outcome.rows_in, 150);
    assert_eq!(outcome.rows_retained, 126);
    assert_eq!(outcome.test_rows, 26);
    assert_eq!(outcome.train_rows + outcome.test_rows, outcome.rows_retained);
    assert_eq!(outcome.summary.train.samples, outcome.train_rows);
    assert_eq!(outcome.summary.n_trees, 20);
    assert_eq!(outcome.summary.n_features, 73);

    assert_eq!(outcome.missing.total_rows, 150);
    assert_eq!(outcome.missing.missing_for("TARGET_energy_lag24"), Some(24));
    assert_eq!(outcome.missing.missing_for("TARGET_energy_lag1"), Some(1));
    assert_eq!(outcome.missing.missing_for("T1"), Some(0));
}

#[test]
fn importance_table_covers_every_predictor_in_order() {
    let pipeline = ImportancePipeline::new(quick_config()).expect("pipeline");
    let outcome = pipeline.run(&synthetic(150)).expect("run");
    let table = &outcome.importances;

    assert_eq!(table.len(), 73);
    assert!(table.get("TARGET_energy").is_none());
    assert!(table
        .entries
        .windows(2)
        .all(|pair| pair[0].importance >= pair[1].importance));
    let total: f64 = table.entries.iter().map(|entry| entry.importance).sum();
    assert!((total - 1.0).abs() < 1e-9);
    assert!(outcome.summary.train.r2 > 0.8);
}

#[test]
fn thirty_constant_rows_leave_six() {
    let mut config = quick_config();
    config.forest.n_trees = 5;
    let pipeline = ImportancePipeline::new(config).expect("pipeline");
    let outcome = pipeline.run(&constant(30)).expect("run");

    assert_eq!(outcome.rows_retained, 6);
    assert_eq!(outcome.train_rows, 4);
    assert_eq!(outcome.test_rows, 2);

    let first_retained = outcome
        .engineered
        .iter()
        .position(|row| row.to_training_row().is_some())
        .expect("a complete row");
    assert_eq!(first_retained, 24);
    let row = &outcome.engineered[24];
    assert_eq!(row.target_lag_short, outcome.engineered[23].target);
    assert_eq!(row.target_rolling.mean, Some(60.0));
    assert_eq!(row.t1_rolling.mean, Some(20.0));

    // nothing to learn from a constant target: every score is zero and the
    // table falls back to schema order
    assert!(outcome.importances.entries.iter().all(|e| e.importance == 0.0));
    assert_eq!(outcome.importances.entries[0].feature, "T1");
    assert_eq!(outcome.importances.entries[72].feature, "is_day");
}

#[test]
fn csv_run_writes_chart_json_and_features() {
    let dir = tempfile::tempdir().expect("tempdir");
    let input = dir.path().join("energy.csv");
    write_csv(&input, &synthetic(80));

    let mut config = quick_config();
    config.report.chart_path = dir.path().join("charts/feature_importance.png");
    config.report.importance_json = Some(dir.path().join("importance.json"));
    config.report.features_out = Some(dir.path().join("features.csv"));
    let pipeline = ImportancePipeline::new(config).expect("pipeline");

    let outcome = pipeline.run_csv(&input).expect("run");
    pipeline.write_outputs(&outcome).expect("outputs");

    let chart = image::open(dir.path().join("charts/feature_importance.png")).expect("chart");
    assert_eq!((chart.width(), chart.height()), (1800, 2000));

    let json = fs::read_to_string(dir.path().join("importance.json")).expect("json");
    let value: serde_json::Value = serde_json::from_str(&json).expect("parse json");
    assert_eq!(value["entries"].as_array().map(Vec::len), Some(73));

    let features = fs::read_to_string(dir.path().join("features.csv")).expect("features");
    let mut lines = features.lines();
    let header = lines.next().expect("header");
    assert!(header.starts_with("date,TARGET_energy,T1"));
    assert!(header.ends_with("is_day"));
    assert_eq!(lines.count(), 80);
}

#[test]
fn short_fixture_has_nothing_to_train_on() {
    let pipeline = ImportancePipeline::new(quick_config()).expect("pipeline");
    let err = pipeline
        .run_csv(fixture_path("energy_small.csv"))
        .expect_err("six rows cannot survive a 24-hour lag");
    assert!(matches!(
        err,
        PipelineError::Forest(ForestError::EmptyTrainingSet)
    ));
}

#[test]
fn invalid_configuration_is_rejected_up_front() {
    let mut config = PipelineConfig::default();
    config.split.test_fraction = 1.5;
    assert!(matches!(
        ImportancePipeline::new(config),
        Err(PipelineError::Config(_))
    ));
}
