use crate::model::CHANNELS;

pub const TIMESTAMP_COLUMN: &str = "date";
pub const TARGET_COLUMN: &str = "TARGET_energy";

pub const TEMPERATURE_COLUMNS: [&str; CHANNELS] =
    ["T1", "T2", "T3", "T4", "T5", "T6", "T7", "T8", "T9"];

pub const HUMIDITY_COLUMNS: [&str; CHANNELS] = [
    "RH_1", "RH_2", "RH_3", "RH_4", "RH_5", "RH_6", "RH_7", "RH_8", "RH_9",
];

/// Every column the loader requires, in canonical order.
pub fn required_columns() -> Vec<&'static str> {
    let mut columns = Vec::with_capacity(2 + 2 * CHANNELS);
    columns.push(TIMESTAMP_COLUMN);
    columns.push(TARGET_COLUMN);
    columns.extend(TEMPERATURE_COLUMNS);
    columns.extend(HUMIDITY_COLUMNS);
    columns
}
