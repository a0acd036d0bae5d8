use chrono::{DateTime, NaiveDateTime};
use polars::prelude::*;

use crate::errors::ParserError;
use crate::loader::{parse_timestamp, warn_if_unordered};
use crate::model::{RawObservation, CHANNELS};
use crate::schema::{HUMIDITY_COLUMNS, TARGET_COLUMN, TEMPERATURE_COLUMNS, TIMESTAMP_COLUMN};

/// Convert an already loaded table into observations.
///
/// `date` may be a string column (`YYYY-MM-DD HH:MM:SS`) or a datetime column;
/// numeric columns are strictly cast to `Float64`, so text that is not a number
/// is rejected rather than silently turned into a missing value.
pub fn observations_from_frame(df: &DataFrame) -> Result<Vec<RawObservation>, ParserError> {
    if df.height() == 0 {
        return Err(ParserError::EmptyData);
    }

    let timestamps = frame_timestamps(df)?;
    let target = float_column(df, TARGET_COLUMN)?;

    let mut temperature = Vec::with_capacity(CHANNELS);
    for name in TEMPERATURE_COLUMNS {
        temperature.push(float_column(df, name)?);
    }
    let mut humidity = Vec::with_capacity(CHANNELS);
    for name in HUMIDITY_COLUMNS {
        humidity.push(float_column(df, name)?);
    }

    let observations: Vec<RawObservation> = timestamps
        .into_iter()
        .enumerate()
        .map(|(row, timestamp)| {
            let mut observation = RawObservation::new(timestamp);
            observation.target = target[row];
            for channel in 0..CHANNELS {
                observation.temperature[channel] = temperature[channel][row];
                observation.humidity[channel] = humidity[channel][row];
            }
            observation
        })
        .collect();

    warn_if_unordered(&observations);
    Ok(observations)
}

fn column<'a>(df: &'a DataFrame, name: &str) -> Result<&'a Column, ParserError> {
    df.column(name).map_err(|_| ParserError::MissingColumn {
        column: name.to_string(),
    })
}

fn float_column(df: &DataFrame, name: &str) -> Result<Vec<Option<f64>>, ParserError> {
    let source = column(df, name)?;
    let casted = source
        .strict_cast(&DataType::Float64)
        .map_err(|_| ParserError::UnsupportedColumnType {
            column: name.to_string(),
            dtype: source.dtype().to_string(),
        })?;
    Ok(casted
        .f64()?
        .into_iter()
        .map(|value| value.filter(|v| v.is_finite()))
        .collect())
}

fn frame_timestamps(df: &DataFrame) -> Result<Vec<NaiveDateTime>, ParserError> {
    let source = column(df, TIMESTAMP_COLUMN)?;
    match source.dtype() {
        DataType::String => source
            .str()?
            .into_iter()
            .enumerate()
            .map(|(row, value)| {
                let value = value.ok_or_else(|| ParserError::FrameRow {
                    row,
                    message: "missing timestamp".to_string(),
                })?;
                parse_timestamp(value).map_err(|message| ParserError::FrameRow { row, message })
            })
            .collect(),
        DataType::Datetime(unit, _) => {
            let unit = *unit;
            let values = source.datetime()?;
            (0..values.len())
                .map(|row| {
                    values
                        .get(row)
                        .and_then(|raw| datetime_from_raw(raw, unit))
                        .ok_or_else(|| ParserError::FrameRow {
                            row,
                            message: "missing or out-of-range timestamp".to_string(),
                        })
                })
                .collect()
        }
        other => Err(ParserError::UnsupportedColumnType {
            column: TIMESTAMP_COLUMN.to_string(),
            dtype: other.to_string(),
        }),
    }
}

fn datetime_from_raw(raw: i64, unit: TimeUnit) -> Option<NaiveDateTime> {
    let utc = match unit {
        TimeUnit::Nanoseconds => Some(DateTime::from_timestamp_nanos(raw)),
        TimeUnit::Microseconds => DateTime::from_timestamp_micros(raw),
        TimeUnit::Milliseconds => DateTime::from_timestamp_millis(raw),
    };
    utc.map(|dt| dt.naive_utc())
}
