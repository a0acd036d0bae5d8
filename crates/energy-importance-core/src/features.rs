use std::fs::File;
use std::path::Path;

use chrono::{Datelike, NaiveDateTime, Timelike};
use once_cell::sync::Lazy;
use polars::io::parquet::write::{ParquetCompression, ParquetWriter};
use polars::prelude::*;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

use energy_importance_parser::schema::{
    HUMIDITY_COLUMNS, TARGET_COLUMN, TEMPERATURE_COLUMNS, TIMESTAMP_COLUMN,
};
use energy_importance_parser::{RawObservation, CHANNELS};

pub const SHORT_LAG: usize = 1;
pub const LONG_LAG: usize = 24;
pub const ROLLING_WINDOW: usize = 3;
pub const DAY_START_HOUR: u32 = 6;
pub const DAY_END_HOUR: u32 = 18;

/// Predictors stored as integers when the engineered table is materialized.
const INTEGER_FEATURES: [&str; 4] = ["hour", "day_of_week", "month", "is_day"];

#[derive(Debug, Error)]
pub enum FeatureError {
    #[error("Polars operation failed: {0}")]
    Polars(#[from] PolarsError),
    #[error("failed to write {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("unsupported export format '{0}' (expected .csv or .parquet)")]
    UnsupportedExport(String),
}

static FEATURE_NAMES: Lazy<Vec<String>> = Lazy::new(|| {
    let mut names: Vec<String> = Vec::with_capacity(73);
    names.extend(TEMPERATURE_COLUMNS.iter().map(|name| name.to_string()));
    names.extend(HUMIDITY_COLUMNS.iter().map(|name| name.to_string()));
    names.extend(["hour", "day_of_week", "month"].map(String::from));
    names.push(format!("{TARGET_COLUMN}_lag{SHORT_LAG}"));
    names.push(format!("{TARGET_COLUMN}_lag{LONG_LAG}"));
    names.push(format!("{TARGET_COLUMN}_rolling_mean_{ROLLING_WINDOW}"));
    names.push(format!("{TARGET_COLUMN}_rolling_std_{ROLLING_WINDOW}"));
    names.push(format!("{}_rolling_mean_{ROLLING_WINDOW}", TEMPERATURE_COLUMNS[0]));
    names.push(format!("{}_rolling_std_{ROLLING_WINDOW}", TEMPERATURE_COLUMNS[0]));
    for (t, rh) in TEMPERATURE_COLUMNS.iter().zip(HUMIDITY_COLUMNS.iter()) {
        names.push(format!("{t}_x_{rh}"));
    }
    for name in TEMPERATURE_COLUMNS.iter().chain(HUMIDITY_COLUMNS.iter()) {
        names.push(format!("{name}_squared"));
        names.push(format!("{name}_cubed"));
    }
    names.push("is_day".to_string());
    names
});

/// Predictor names in the order used by [`EngineeredFeatures::values`] and
/// [`TrainingRow::features`]. The target is not a predictor.
pub fn feature_names() -> &'static [String] {
    &FEATURE_NAMES
}

/// Mean and sample standard deviation over a trailing window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct RollingStats {
    pub mean: Option<f64>,
    pub std: Option<f64>,
}

/// One observation with every derived column attached. Columns that depend on
/// earlier rows, or on a missing reading, are `None`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineeredFeatures {
    pub timestamp: NaiveDateTime,
    pub target: Option<f64>,
    pub temperature: [Option<f64>; CHANNELS],
    pub humidity: [Option<f64>; CHANNELS],
    pub hour: u32,
    pub day_of_week: u32,
    pub month: u32,
    pub target_lag_short: Option<f64>,
    pub target_lag_long: Option<f64>,
    pub target_rolling: RollingStats,
    pub t1_rolling: RollingStats,
    pub interactions: [Option<f64>; CHANNELS],
    pub temperature_squared: [Option<f64>; CHANNELS],
    pub temperature_cubed: [Option<f64>; CHANNELS],
    pub humidity_squared: [Option<f64>; CHANNELS],
    pub humidity_cubed: [Option<f64>; CHANNELS],
    pub is_day: u8,
}

impl EngineeredFeatures {
    /// Predictor values in [`feature_names`] order.
    pub fn values(&self) -> Vec<Option<f64>> {
        let mut values = Vec::with_capacity(feature_names().len());
        values.extend(self.temperature);
        values.extend(self.humidity);
        values.push(Some(f64::from(self.hour)));
        values.push(Some(f64::from(self.day_of_week)));
        values.push(Some(f64::from(self.month)));
        values.push(self.target_lag_short);
        values.push(self.target_lag_long);
        values.push(self.target_rolling.mean);
        values.push(self.target_rolling.std);
        values.push(self.t1_rolling.mean);
        values.push(self.t1_rolling.std);
        values.extend(self.interactions);
        for channel in 0..CHANNELS {
            values.push(self.temperature_squared[channel]);
            values.push(self.temperature_cubed[channel]);
        }
        for channel in 0..CHANNELS {
            values.push(self.humidity_squared[channel]);
            values.push(self.humidity_cubed[channel]);
        }
        values.push(Some(f64::from(self.is_day)));
        values
    }

    /// `None` when the target or any predictor is missing.
    pub fn to_training_row(&self) -> Option<TrainingRow> {
        let target = self.target?;
        let features = self.values().into_iter().collect::<Option<Vec<f64>>>()?;
        Some(TrainingRow {
            timestamp: self.timestamp,
            target,
            features,
        })
    }
}

/// A fully defined row, ready for splitting and fitting.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrainingRow {
    pub timestamp: NaiveDateTime,
    pub target: f64,
    pub features: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnMissing {
    pub column: String,
    pub missing: usize,
}

/// Per-column missing counts taken before incomplete rows are dropped.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MissingValueReport {
    pub total_rows: usize,
    pub columns: Vec<ColumnMissing>,
}

impl MissingValueReport {
    pub fn missing_for(&self, column: &str) -> Option<usize> {
        self.columns
            .iter()
            .find(|entry| entry.column == column)
            .map(|entry| entry.missing)
    }

    pub fn total_missing(&self) -> usize {
        self.columns.iter().map(|entry| entry.missing).sum()
    }
}

pub fn is_day(hour: u32) -> u8 {
    u8::from((DAY_START_HOUR..DAY_END_HOUR).contains(&hour))
}

/// Derive every feature for each observation, in input order.
pub fn engineer_features(observations: &[RawObservation]) -> Vec<EngineeredFeatures> {
    let targets: Vec<Option<f64>> = observations.iter().map(|obs| obs.target).collect();
    let t1: Vec<Option<f64>> = observations.iter().map(|obs| obs.temperature[0]).collect();

    let engineered: Vec<EngineeredFeatures> = observations
        .iter()
        .enumerate()
        .map(|(idx, obs)| {
            let hour = obs.timestamp.hour();
            EngineeredFeatures {
                timestamp: obs.timestamp,
                target: obs.target,
                temperature: obs.temperature,
                humidity: obs.humidity,
                hour,
                day_of_week: obs.timestamp.weekday().number_from_monday(),
                month: obs.timestamp.month(),
                target_lag_short: lag(&targets, idx, SHORT_LAG),
                target_lag_long: lag(&targets, idx, LONG_LAG),
                target_rolling: rolling(&targets, idx, ROLLING_WINDOW),
                t1_rolling: rolling(&t1, idx, ROLLING_WINDOW),
                interactions: std::array::from_fn(|channel| {
                    match (obs.temperature[channel], obs.humidity[channel]) {
                        (Some(t), Some(rh)) => Some(t * rh),
                        _ => None,
                    }
                }),
                temperature_squared: obs.temperature.map(|v| v.map(|x| x.powi(2))),
                temperature_cubed: obs.temperature.map(|v| v.map(|x| x.powi(3))),
                humidity_squared: obs.humidity.map(|v| v.map(|x| x.powi(2))),
                humidity_cubed: obs.humidity.map(|v| v.map(|x| x.powi(3))),
                is_day: is_day(hour),
            }
        })
        .collect();

    debug!(
        rows = engineered.len(),
        features = feature_names().len(),
        "derived feature columns"
    );
    engineered
}

fn lag(series: &[Option<f64>], idx: usize, periods: usize) -> Option<f64> {
    idx.checked_sub(periods).and_then(|source| series[source])
}

fn rolling(series: &[Option<f64>], idx: usize, window: usize) -> RollingStats {
    if idx + 1 < window {
        return RollingStats::default();
    }
    let values: Option<Vec<f64>> = series[idx + 1 - window..=idx].iter().copied().collect();
    let Some(values) = values else {
        return RollingStats::default();
    };

    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let std = if values.len() > 1 {
        let ss: f64 = values.iter().map(|v| (v - mean).powi(2)).sum();
        Some((ss / (n - 1.0)).sqrt())
    } else {
        None
    };

    RollingStats {
        mean: Some(mean),
        std,
    }
}

/// Materialize the engineered rows as a table: `date`, the target, then every
/// predictor in [`feature_names`] order.
pub fn features_frame(rows: &[EngineeredFeatures]) -> Result<DataFrame, FeatureError> {
    let names = feature_names();
    let mut predictor_columns: Vec<Vec<Option<f64>>> =
        vec![Vec::with_capacity(rows.len()); names.len()];
    for row in rows {
        for (column, value) in predictor_columns.iter_mut().zip(row.values()) {
            column.push(value);
        }
    }

    let micros: Vec<i64> = rows
        .iter()
        .map(|row| row.timestamp.and_utc().timestamp_micros())
        .collect();
    let date = Series::new(TIMESTAMP_COLUMN.into(), micros)
        .cast(&DataType::Datetime(TimeUnit::Microseconds, None))?;
    let target: Vec<Option<f64>> = rows.iter().map(|row| row.target).collect();

    let mut columns: Vec<Column> = Vec::with_capacity(names.len() + 2);
    columns.push(date.into());
    columns.push(Series::new(TARGET_COLUMN.into(), target).into());
    for (name, values) in names.iter().zip(predictor_columns) {
        let series = Series::new(name.as_str().into(), values);
        let series = if INTEGER_FEATURES.contains(&name.as_str()) {
            series.cast(&DataType::Int32)?
        } else {
            series
        };
        columns.push(series.into());
    }

    Ok(DataFrame::new(columns)?)
}

/// Count missing values per column of the engineered table.
pub fn missing_value_report(rows: &[EngineeredFeatures]) -> Result<MissingValueReport, FeatureError> {
    let df = features_frame(rows)?;
    let columns = df
        .get_columns()
        .iter()
        .map(|column| ColumnMissing {
            column: column.name().to_string(),
            missing: column.null_count(),
        })
        .collect();
    Ok(MissingValueReport {
        total_rows: df.height(),
        columns,
    })
}

/// Keep only rows where the target and every predictor are defined. Rows
/// lost to lag and rolling warm-up and rows with raw sensor gaps are dropped
/// alike; nothing is imputed.
pub fn drop_incomplete(rows: &[EngineeredFeatures]) -> Vec<TrainingRow> {
    let retained: Vec<TrainingRow> = rows
        .iter()
        .filter_map(EngineeredFeatures::to_training_row)
        .collect();
    info!(
        input_rows = rows.len(),
        retained_rows = retained.len(),
        dropped_rows = rows.len() - retained.len(),
        "dropped rows with missing values"
    );
    retained
}

/// Write the engineered table as CSV or Parquet, chosen by file extension.
pub fn export_features(rows: &[EngineeredFeatures], path: &Path) -> Result<(), FeatureError> {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    if extension != "csv" && extension != "parquet" {
        return Err(FeatureError::UnsupportedExport(extension));
    }

    let mut df = features_frame(rows)?;
    let mut file = File::create(path).map_err(|source| FeatureError::Io {
        path: path.display().to_string(),
        source,
    })?;

    if extension == "csv" {
        CsvWriter::new(&mut file).finish(&mut df)?;
    } else {
        ParquetWriter::new(&mut file)
            .with_compression(ParquetCompression::Zstd(None))
            .finish(&mut df)?;
    }

    info!(path = %path.display(), rows = df.height(), "exported engineered features");
    Ok(())
}
