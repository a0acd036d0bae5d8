use std::fs;
use std::path::Path;

use chrono::NaiveDateTime;
use csv::{ReaderBuilder, StringRecord, Trim};
use tracing::{debug, warn};

use crate::errors::ParserError;
use crate::model::{RawObservation, CHANNELS};
use crate::schema::{HUMIDITY_COLUMNS, TARGET_COLUMN, TEMPERATURE_COLUMNS, TIMESTAMP_COLUMN};

static TIMESTAMP_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M:%S"];

/// Positions of the required columns within a header row.
#[derive(Debug, Clone)]
struct ColumnLayout {
    timestamp: usize,
    target: usize,
    temperature: [usize; CHANNELS],
    humidity: [usize; CHANNELS],
}

impl ColumnLayout {
    fn from_header(header: &StringRecord) -> Result<Self, ParserError> {
        let find = |name: &str| -> Result<usize, ParserError> {
            header
                .iter()
                .position(|field| field.trim() == name)
                .ok_or_else(|| ParserError::MissingColumn {
                    column: name.to_string(),
                })
        };

        let mut temperature = [0usize; CHANNELS];
        for (slot, name) in temperature.iter_mut().zip(TEMPERATURE_COLUMNS) {
            *slot = find(name)?;
        }
        let mut humidity = [0usize; CHANNELS];
        for (slot, name) in humidity.iter_mut().zip(HUMIDITY_COLUMNS) {
            *slot = find(name)?;
        }

        let layout = Self {
            timestamp: find(TIMESTAMP_COLUMN)?,
            target: find(TARGET_COLUMN)?,
            temperature,
            humidity,
        };

        let extra = header.len().saturating_sub(2 + 2 * CHANNELS);
        if extra > 0 {
            debug!(extra_columns = extra, "ignoring columns outside the energy schema");
        }

        Ok(layout)
    }

    fn parse_record(
        &self,
        record: &StringRecord,
        line_index: usize,
    ) -> Result<RawObservation, ParserError> {
        let timestamp = parse_timestamp(record.get(self.timestamp).unwrap_or_default())
            .map_err(|message| ParserError::DataRow {
                line_index,
                message,
            })?;

        let mut observation = RawObservation::new(timestamp);
        observation.target = parse_cell(record, self.target, TARGET_COLUMN, line_index)?;
        for (channel, (&column, name)) in self.temperature.iter().zip(TEMPERATURE_COLUMNS).enumerate()
        {
            observation.temperature[channel] = parse_cell(record, column, name, line_index)?;
        }
        for (channel, (&column, name)) in self.humidity.iter().zip(HUMIDITY_COLUMNS).enumerate() {
            observation.humidity[channel] = parse_cell(record, column, name, line_index)?;
        }

        Ok(observation)
    }
}

/// Parse CSV text with a header row into observations, in file order.
pub fn parse_energy_csv(content: &str) -> Result<Vec<RawObservation>, ParserError> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .trim(Trim::All)
        .from_reader(content.as_bytes());

    let header = reader.headers()?.clone();
    let layout = ColumnLayout::from_header(&header)?;

    let mut observations = Vec::new();
    for (idx, record) in reader.records().enumerate() {
        let record = record?;
        // line 1 is the header
        observations.push(layout.parse_record(&record, idx + 2)?);
    }

    if observations.is_empty() {
        return Err(ParserError::EmptyData);
    }

    warn_if_unordered(&observations);
    Ok(observations)
}

pub fn read_energy_csv(path: impl AsRef<Path>) -> Result<Vec<RawObservation>, ParserError> {
    let path = path.as_ref();
    let content = fs::read_to_string(path).map_err(|source| ParserError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_energy_csv(&content)
}

pub(crate) fn parse_timestamp(value: &str) -> Result<NaiveDateTime, String> {
    let trimmed = value.trim();
    for fmt in TIMESTAMP_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(trimmed, fmt) {
            return Ok(dt);
        }
    }
    Err(format!("invalid timestamp '{trimmed}'"))
}

pub(crate) fn parse_optional_f64(value: &str) -> Result<Option<f64>, String> {
    let trimmed = value.trim();
    if trimmed.is_empty()
        || trimmed.eq_ignore_ascii_case("na")
        || trimmed.eq_ignore_ascii_case("nan")
        || trimmed.eq_ignore_ascii_case("null")
    {
        return Ok(None);
    }

    match trimmed.parse::<f64>() {
        Ok(parsed) if parsed.is_finite() => Ok(Some(parsed)),
        Ok(_) => Ok(None),
        Err(err) => Err(format!("failed to parse '{trimmed}' as float: {err}")),
    }
}

fn parse_cell(
    record: &StringRecord,
    column: usize,
    name: &str,
    line_index: usize,
) -> Result<Option<f64>, ParserError> {
    parse_optional_f64(record.get(column).unwrap_or_default()).map_err(|message| {
        ParserError::DataRow {
            line_index,
            message: format!("column '{name}': {message}"),
        }
    })
}

pub(crate) fn warn_if_unordered(observations: &[RawObservation]) {
    let decreasing = observations
        .windows(2)
        .filter(|pair| pair[1].timestamp < pair[0].timestamp)
        .count();
    if decreasing > 0 {
        warn!(
            decreasing,
            "timestamps are not non-decreasing; lag and rolling features follow row order"
        );
    }
}
