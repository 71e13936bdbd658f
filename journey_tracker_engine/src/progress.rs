//! Pure progress derivation. No I/O, no clock.

use journey_tracker_lib::journey_route::JourneyRoute;
use journey_tracker_lib::position_fix::PositionFix;
use journey_tracker_lib::progress::ProgressSnapshot;

use crate::geo;

const MPS_TO_KMH: f64 = 3.6;

/// Derives progress from the session's first fix and the latest one. Both
/// distance legs are measured against the destination independently, so
/// their sum drifts from the straight-line route length once off-route.
pub fn compute_progress(
    route: &JourneyRoute,
    start_fix: &PositionFix,
    current_fix: &PositionFix,
    default_speed_kmh: f64,
) -> ProgressSnapshot {
    let total_km = geo::haversine_km(start_fix.position, route.destination);
    let remaining_km = geo::haversine_km(current_fix.position, route.destination);

    if total_km == 0.0 {
        // Start equals destination: done before the first meter.
        return ProgressSnapshot {
            traveled_distance_km: 0.0,
            remaining_distance_km: remaining_km,
            progress_percentage: 100.0,
            estimated_hours_remaining: 0.0,
        };
    }

    let traveled_km = (total_km - remaining_km).max(0.0);
    let progress_percentage = (traveled_km / total_km * 100.0).clamp(0.0, 100.0);

    let speed_kmh = match current_fix.speed_mps {
        Some(speed) if speed > 0.0 => speed * MPS_TO_KMH,
        _ => default_speed_kmh,
    };
    let estimated_hours_remaining = if remaining_km > 0.0 && speed_kmh > 0.0 {
        remaining_km / speed_kmh
    } else {
        0.0
    };

    ProgressSnapshot {
        traveled_distance_km: traveled_km,
        remaining_distance_km: remaining_km,
        progress_percentage,
        estimated_hours_remaining,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use geo_types::Point;

    const NEW_YORK: (f64, f64) = (-74.0060, 40.7128);
    const BOSTON: (f64, f64) = (-71.0589, 42.3601);

    fn fix_at(lon: f64, lat: f64) -> PositionFix {
        PositionFix::new(Point::new(lon, lat), 5.0, Utc::now())
    }

    fn nyc_boston_route() -> JourneyRoute {
        JourneyRoute::new(
            7,
            Point::new(NEW_YORK.0, NEW_YORK.1),
            Point::new(BOSTON.0, BOSTON.1),
        )
    }

    #[test]
    fn zero_length_route_is_complete_immediately() {
        let route = JourneyRoute::new(1, Point::new(10.0, 56.0), Point::new(10.0, 56.0));
        let fix = fix_at(10.0, 56.0);
        let snapshot = compute_progress(&route, &fix, &fix, 60.0);
        assert_eq!(snapshot.progress_percentage, 100.0);
        assert_eq!(snapshot.estimated_hours_remaining, 0.0);
    }

    #[test]
    fn midpoint_fix_is_about_half_way() {
        let route = nyc_boston_route();
        let start = fix_at(NEW_YORK.0, NEW_YORK.1);
        let midpoint = fix_at(
            (NEW_YORK.0 + BOSTON.0) / 2.0,
            (NEW_YORK.1 + BOSTON.1) / 2.0,
        );
        let snapshot = compute_progress(&route, &start, &midpoint, 60.0);
        assert!((snapshot.progress_percentage - 50.0).abs() < 2.0, "got {}", snapshot.progress_percentage);
        assert!((snapshot.remaining_distance_km - 153.0).abs() < 3.0, "got {}", snapshot.remaining_distance_km);
    }

    #[test]
    fn percentage_never_regresses_below_zero() {
        // A fix farther from the destination than the start clamps to 0.
        let route = nyc_boston_route();
        let start = fix_at(NEW_YORK.0, NEW_YORK.1);
        let philadelphia = fix_at(-75.1652, 39.9526);
        let snapshot = compute_progress(&route, &start, &philadelphia, 60.0);
        assert_eq!(snapshot.progress_percentage, 0.0);
        assert_eq!(snapshot.traveled_distance_km, 0.0);
    }

    #[test]
    fn percentage_stays_within_bounds_past_destination() {
        let route = nyc_boston_route();
        let start = fix_at(NEW_YORK.0, NEW_YORK.1);
        let portland_me = fix_at(-70.2553, 43.6591);
        let snapshot = compute_progress(&route, &start, &portland_me, 60.0);
        assert!((0.0..=100.0).contains(&snapshot.progress_percentage));
    }

    #[test]
    fn at_destination_is_complete() {
        let route = nyc_boston_route();
        let start = fix_at(NEW_YORK.0, NEW_YORK.1);
        let arrival = fix_at(BOSTON.0, BOSTON.1);
        let snapshot = compute_progress(&route, &start, &arrival, 60.0);
        assert_eq!(snapshot.progress_percentage, 100.0);
        assert_eq!(snapshot.estimated_hours_remaining, 0.0);
    }

    #[test]
    fn eta_uses_reported_speed_when_present() {
        let route = nyc_boston_route();
        let start = fix_at(NEW_YORK.0, NEW_YORK.1);
        // 30 m/s = 108 km/h.
        let midpoint = fix_at(
            (NEW_YORK.0 + BOSTON.0) / 2.0,
            (NEW_YORK.1 + BOSTON.1) / 2.0,
        )
        .with_motion(30.0, 54.0);
        let snapshot = compute_progress(&route, &start, &midpoint, 60.0);
        let expected = snapshot.remaining_distance_km / 108.0;
        assert!((snapshot.estimated_hours_remaining - expected).abs() < 1e-9);
    }

    #[test]
    fn eta_falls_back_to_default_speed() {
        let route = nyc_boston_route();
        let start = fix_at(NEW_YORK.0, NEW_YORK.1);
        let midpoint = fix_at(
            (NEW_YORK.0 + BOSTON.0) / 2.0,
            (NEW_YORK.1 + BOSTON.1) / 2.0,
        );
        let snapshot = compute_progress(&route, &start, &midpoint, 60.0);
        let expected = snapshot.remaining_distance_km / 60.0;
        assert!((snapshot.estimated_hours_remaining - expected).abs() < 1e-9);
    }

    #[test]
    fn zero_reported_speed_does_not_divide_by_zero() {
        let route = nyc_boston_route();
        let start = fix_at(NEW_YORK.0, NEW_YORK.1);
        let stalled = fix_at(-72.5, 41.5).with_motion(0.0, 54.0);
        let snapshot = compute_progress(&route, &start, &stalled, 60.0);
        assert!(snapshot.estimated_hours_remaining.is_finite());
        assert!(snapshot.estimated_hours_remaining > 0.0);
    }
}
