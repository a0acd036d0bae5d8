use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Number of paired temperature/humidity channels (`T1..T9`, `RH_1..RH_9`).
pub const CHANNELS: usize = 9;

/// One input row. `None` marks a blank or `NA` cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawObservation {
    pub timestamp: NaiveDateTime,
    pub target: Option<f64>,
    pub temperature: [Option<f64>; CHANNELS],
    pub humidity: [Option<f64>; CHANNELS],
}

impl RawObservation {
    pub fn new(timestamp: NaiveDateTime) -> Self {
        Self {
            timestamp,
            target: None,
            temperature: [None; CHANNELS],
            humidity: [None; CHANNELS],
        }
    }

    pub fn is_complete(&self) -> bool {
        self.target.is_some()
            && self.temperature.iter().all(Option::is_some)
            && self.humidity.iter().all(Option::is_some)
    }
}
