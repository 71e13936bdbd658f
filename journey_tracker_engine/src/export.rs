//! GPX export of a session's traveled path, for map tooling and hand-off.

use std::io::Write;
use std::time::SystemTime;

use gpx::{Gpx, GpxVersion, Time, Track, TrackSegment, Waypoint};
use journey_tracker_lib::journey_route::JourneyRoute;
use journey_tracker_lib::position_fix::PositionFix;
use time::OffsetDateTime;

use crate::{Result, TrackerError};

pub fn traveled_path_to_gpx(route: &JourneyRoute, fixes: &[PositionFix]) -> Gpx {
    let mut gpx = Gpx::default();
    gpx.version = GpxVersion::Gpx11;
    gpx.creator = Some("journey_tracker".to_string());

    let name = match (&route.origin_label, &route.destination_label) {
        (Some(origin), Some(destination)) => format!("{} to {}", origin, destination),
        _ => format!("Journey {}", route.journey_id),
    };

    gpx.metadata = Some(gpx::Metadata {
        name: Some(name.clone()),
        ..Default::default()
    });

    let mut track = Track::new();
    track.name = Some(name);
    let mut segment = TrackSegment::new();

    for fix in fixes {
        let mut waypoint = Waypoint::new(fix.position);
        let timestamp: SystemTime = fix.timestamp.into();
        let timestamp: OffsetDateTime = timestamp.into();
        waypoint.time = Some(Time::from(timestamp));
        if let Some(speed) = fix.speed_mps {
            waypoint.speed = Some(speed);
        }
        segment.points.push(waypoint);
    }

    track.segments.push(segment);
    gpx.tracks.push(track);

    gpx
}

pub fn write_gpx(route: &JourneyRoute, fixes: &[PositionFix], writer: impl Write) -> Result<()> {
    let gpx = traveled_path_to_gpx(route, fixes);
    gpx::write(&gpx, writer).map_err(|err| TrackerError::Storage(format!("failed to write gpx: {}", err)))
}
