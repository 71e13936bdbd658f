use chrono::{DateTime, Utc};
use geo_types::Point;
use serde::{Deserialize, Serialize};

/// A single timestamped position sample. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PositionFix {
    pub position: Point,
    pub accuracy_meters: f64,
    pub speed_mps: Option<f64>,
    pub heading_degrees: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

impl PositionFix {
    pub fn new(position: Point, accuracy_meters: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            position,
            accuracy_meters,
            speed_mps: None,
            heading_degrees: None,
            timestamp,
        }
    }

    pub fn with_motion(mut self, speed_mps: f64, heading_degrees: f64) -> Self {
        self.speed_mps = Some(speed_mps);
        self.heading_degrees = Some(heading_degrees);
        self
    }

    pub fn latitude(&self) -> f64 {
        self.position.y()
    }

    pub fn longitude(&self) -> f64 {
        self.position.x()
    }
}

impl TryFrom<&[u8]> for PositionFix {
    type Error = &'static str;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        bincode::deserialize_from(value).map_err(|_| "Failed to deserialize PositionFix")
    }
}
