//! Outbound throttles. The time gate serves numeric progress updates; the
//! displacement gate serves the traveled-path polyline. They feed different
//! consumers and are never combined.

use std::time::Duration;

use chrono::{DateTime, Utc};
use journey_tracker_lib::position_fix::PositionFix;

use crate::geo;

/// Time-based gate: at most one propagation per interval.
#[derive(Debug, Clone)]
pub struct IntervalGate {
    min_interval: chrono::Duration,
}

impl IntervalGate {
    pub fn new(min_interval: Duration) -> Self {
        let min_interval = chrono::Duration::from_std(min_interval).unwrap_or(chrono::Duration::MAX);
        Self { min_interval }
    }

    /// The first propagation always passes.
    pub fn should_propagate(&self, last_sent_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        match last_sent_at {
            Some(last) => now.signed_duration_since(last) >= self.min_interval,
            None => true,
        }
    }
}

/// Distance-based gate: a fix joins the polyline only after moving far
/// enough from the previously recorded one.
#[derive(Debug, Clone)]
pub struct DisplacementGate {
    min_displacement_meters: f64,
}

impl DisplacementGate {
    pub fn new(min_displacement_meters: f64) -> Self {
        Self { min_displacement_meters }
    }

    /// The first fix is always recorded.
    pub fn should_record(&self, last_recorded: Option<&PositionFix>, candidate: &PositionFix) -> bool {
        match last_recorded {
            Some(last) => {
                geo::haversine_km(last.position, candidate.position) * 1000.0 >= self.min_displacement_meters
            }
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use geo_types::Point;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn interval_gate_blocks_within_window() {
        let gate = IntervalGate::new(Duration::from_secs(5));
        assert!(gate.should_propagate(None, at(0)));
        assert!(!gate.should_propagate(Some(at(0)), at(3)));
        assert!(gate.should_propagate(Some(at(0)), at(5)));
        assert!(gate.should_propagate(Some(at(0)), at(9)));
    }

    #[test]
    fn displacement_gate_blocks_small_moves() {
        let gate = DisplacementGate::new(25.0);
        let here = PositionFix::new(Point::new(10.0, 56.0), 5.0, at(0));
        // ~1.1 m per 1e-5 degrees of latitude.
        let nearby = PositionFix::new(Point::new(10.0, 56.00001), 5.0, at(10));
        let far = PositionFix::new(Point::new(10.0, 56.01), 5.0, at(20));

        assert!(gate.should_record(None, &here));
        assert!(!gate.should_record(Some(&here), &nearby));
        assert!(gate.should_record(Some(&here), &far));
    }

    #[test]
    fn gates_are_independent() {
        let interval = IntervalGate::new(Duration::from_secs(60));
        let displacement = DisplacementGate::new(1.0);
        let here = PositionFix::new(Point::new(10.0, 56.0), 5.0, at(0));
        let far = PositionFix::new(Point::new(10.0, 56.01), 5.0, at(1));

        // Time gate closed, distance gate open.
        assert!(!interval.should_propagate(Some(at(0)), at(1)));
        assert!(displacement.should_record(Some(&here), &far));
    }
}
