//! Spherical geometry used by the progress math. Stateless.

use geo_types::Point;

pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Great-circle distance between two points in km (haversine).
pub fn haversine_km(from: Point, to: Point) -> f64 {
    let d_lat = (to.y() - from.y()).to_radians();
    let d_lon = (to.x() - from.x()).to_radians();
    let lat1 = from.y().to_radians();
    let lat2 = to.y().to_radians();

    let a = f64::sin(d_lat / 2.).powi(2)
        + f64::cos(lat1) * f64::cos(lat2) * f64::sin(d_lon / 2.).powi(2);
    let c = 2. * f64::asin(f64::sqrt(a));

    EARTH_RADIUS_KM * c
}

/// Initial bearing from one point towards another, degrees in [0, 360).
pub fn initial_bearing_degrees(from: Point, to: Point) -> f64 {
    let lat1 = from.y().to_radians();
    let lat2 = to.y().to_radians();
    let d_lon = (to.x() - from.x()).to_radians();

    let y = d_lon.sin() * lat2.cos();
    let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * d_lon.cos();

    (y.atan2(x).to_degrees() + 360.0) % 360.0
}
