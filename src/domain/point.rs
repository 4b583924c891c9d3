// Point domain model
use serde::{Deserialize, Serialize};

/// A sample as delivered by an external data source. No ordering or
/// alignment guarantees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RawPoint {
    pub timestamp: i64,
    pub value: Option<f64>,
}

impl RawPoint {
    pub fn new(timestamp: i64, value: Option<f64>) -> Self {
        Self { timestamp, value }
    }
}

/// A single chart window. `timestamp` (seconds) points to the beginning of
/// the window.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub timestamp: i64,
    pub value: Option<f64>,
    /// Generated on the fly, the data source did not mention this window.
    #[serde(default, skip_serializing_if = "is_false")]
    pub fake: bool,
    /// No meaningful points exist after this one.
    #[serde(default, skip_serializing_if = "is_false")]
    pub newest: bool,
    /// No meaningful points exist before this one.
    #[serde(default, skip_serializing_if = "is_false")]
    pub oldest: bool,
}

fn is_false(flag: &bool) -> bool {
    !*flag
}

impl Point {
    pub fn new(timestamp: i64, value: Option<f64>) -> Self {
        Self {
            timestamp,
            value,
            ..Self::default()
        }
    }

    pub fn fake(timestamp: i64) -> Self {
        Self {
            timestamp,
            value: None,
            fake: true,
            ..Self::default()
        }
    }

    pub fn with_newest(mut self, newest: bool) -> Self {
        self.newest = newest;
        self
    }

    pub fn with_oldest(mut self, oldest: bool) -> Self {
        self.oldest = oldest;
        self
    }
}

impl From<RawPoint> for Point {
    fn from(raw: RawPoint) -> Self {
        Point::new(raw.timestamp, raw.value)
    }
}
