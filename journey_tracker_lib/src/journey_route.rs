use geo_types::Point;
use serde::{Deserialize, Serialize};

/// The endpoints of a tracked journey. Created when a tracking session
/// starts and never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JourneyRoute {
    pub journey_id: i64,
    pub origin: Point,
    pub destination: Point,
    pub origin_label: Option<String>,
    pub destination_label: Option<String>,
}

impl JourneyRoute {
    pub fn new(journey_id: i64, origin: Point, destination: Point) -> Self {
        Self {
            journey_id,
            origin,
            destination,
            origin_label: None,
            destination_label: None,
        }
    }

    pub fn with_labels(mut self, origin_label: impl Into<String>, destination_label: impl Into<String>) -> Self {
        self.origin_label = Some(origin_label.into());
        self.destination_label = Some(destination_label.into());
        self
    }

    /// Both endpoints must be finite and inside valid lat/lon ranges.
    pub fn is_valid(&self) -> bool {
        valid_coordinate(&self.origin) && valid_coordinate(&self.destination)
    }
}

fn valid_coordinate(point: &Point) -> bool {
    point.y().is_finite()
        && point.x().is_finite()
        && (-90.0..=90.0).contains(&point.y())
        && (-180.0..=180.0).contains(&point.x())
}
