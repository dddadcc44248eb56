//! # Geographic Utilities
//!
//! Core geographic computations used by clustering and rendering.
//!
//! ## Overview
//!
//! | Function | Description |
//! |----------|-------------|
//! | [`haversine_distance`] | Great-circle distance between two GPS points |
//! | [`compute_bounds`] | Bounding box of a set of points |
//! | [`compute_center`] | Arithmetic centroid of a set of points |
//! | [`meters_to_degrees`] | Convert meters to approximate degrees at a latitude |
//!
//! ## Example
//!
//! ```rust
//! use visit_clusters::{GpsPoint, geo_utils};
//!
//! let visits = vec![
//!     GpsPoint::new(38.0336, -78.5080),
//!     GpsPoint::new(38.0340, -78.5085),
//! ];
//!
//! let center = geo_utils::compute_center(&visits);
//! let dist = geo_utils::haversine_distance(&visits[0], &visits[1]);
//! println!("Center {:.4},{:.4}, spread {:.0}m", center.latitude, center.longitude, dist);
//! ```
//!
//! ## Algorithm Notes
//!
//! ### Haversine Formula
//!
//! The haversine formula calculates the great-circle distance between two points on a
//! sphere (mean Earth radius 6,371 km). It is the metric DBSCAN uses here, so a
//! clustering radius is always expressed in meters rather than degrees or radians.
//!
//! ### Coordinate System
//!
//! All functions expect WGS84 coordinates (latitude/longitude in degrees).

use geo::{Distance, Haversine, Point};
use crate::{Bounds, GpsPoint};

// =============================================================================
// Distance Functions
// =============================================================================

/// Calculate the great-circle distance between two GPS points using the Haversine formula.
///
/// Returns the distance in meters.
///
/// # Example
///
/// ```rust
/// use visit_clusters::{GpsPoint, geo_utils};
///
/// let london = GpsPoint::new(51.5074, -0.1278);
/// let paris = GpsPoint::new(48.8566, 2.3522);
///
/// let distance = geo_utils::haversine_distance(&london, &paris);
/// assert!((distance - 343_560.0).abs() < 1000.0); // ~344 km
/// ```
#[inline]
pub fn haversine_distance(p1: &GpsPoint, p2: &GpsPoint) -> f64 {
    let point1 = Point::new(p1.longitude, p1.latitude);
    let point2 = Point::new(p2.longitude, p2.latitude);
    Haversine::distance(point1, point2)
}

/// Mean Earth radius used by [`haversine_distance`], meters.
pub const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// Meters per degree of latitude on the haversine sphere (~111,195 m).
const METERS_PER_DEGREE: f64 = EARTH_RADIUS_M * std::f64::consts::PI / 180.0;

/// Relative slack on box half-widths so float rounding never drops an edge point.
const BOX_SLACK: f64 = 1.01;

/// Convert meters to approximate degrees at a given latitude.
///
/// The value is sized for longitude at `latitude` (the wider of the two axes) on
/// the same sphere as [`haversine_distance`], so a square box of this half-width
/// always contains the circle of radius `meters`. Above ~84° the cosine is
/// clamped and the box may under-cover.
#[inline]
pub fn meters_to_degrees(meters: f64, latitude: f64) -> f64 {
    let lat_rad = latitude.to_radians();
    let meters_per_degree = METERS_PER_DEGREE * lat_rad.cos().max(0.1);
    meters * BOX_SLACK / meters_per_degree
}

// =============================================================================
// Bounding Box Functions
// =============================================================================

/// Compute the bounding box of a set of points.
///
/// Returns `None` for empty input.
///
/// # Example
///
/// ```rust
/// use visit_clusters::{GpsPoint, geo_utils};
///
/// let pts = vec![
///     GpsPoint::new(51.5000, -0.1300),
///     GpsPoint::new(51.5100, -0.1200),
/// ];
///
/// let bounds = geo_utils::compute_bounds(&pts).unwrap();
/// assert_eq!(bounds.min_lat, 51.5000);
/// assert_eq!(bounds.max_lng, -0.1200);
/// ```
pub fn compute_bounds(points: &[GpsPoint]) -> Option<Bounds> {
    if points.is_empty() {
        return None;
    }

    let mut min_lat = f64::MAX;
    let mut max_lat = f64::MIN;
    let mut min_lng = f64::MAX;
    let mut max_lng = f64::MIN;

    for p in points {
        min_lat = min_lat.min(p.latitude);
        max_lat = max_lat.max(p.latitude);
        min_lng = min_lng.min(p.longitude);
        max_lng = max_lng.max(p.longitude);
    }

    Some(Bounds { min_lat, max_lat, min_lng, max_lng })
}

// =============================================================================
// Center/Centroid Functions
// =============================================================================

/// Compute the arithmetic centroid of a set of points.
///
/// Returns the mean of all latitude and longitude values, which is how a
/// cluster's representative location is defined. Returns (0, 0) for empty input.
///
/// # Notes
///
/// Clusters crossing the antimeridian average to the wrong side of the globe.
/// Visit clusters are tens of meters wide, so this is not handled.
pub fn compute_center(points: &[GpsPoint]) -> GpsPoint {
    if points.is_empty() {
        return GpsPoint::new(0.0, 0.0);
    }

    let sum_lat: f64 = points.iter().map(|p| p.latitude).sum();
    let sum_lng: f64 = points.iter().map(|p| p.longitude).sum();
    let n = points.len() as f64;

    GpsPoint::new(sum_lat / n, sum_lng / n)
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn approx_eq(a: f64, b: f64, epsilon: f64) -> bool {
        (a - b).abs() < epsilon
    }

    #[test]
    fn test_haversine_distance_same_point() {
        let p = GpsPoint::new(51.5074, -0.1278);
        assert_eq!(haversine_distance(&p, &p), 0.0);
    }

    #[test]
    fn test_haversine_distance_known_value() {
        let london = GpsPoint::new(51.5074, -0.1278);
        let paris = GpsPoint::new(48.8566, 2.3522);
        let dist = haversine_distance(&london, &paris);
        assert!(approx_eq(dist, 343_560.0, 5000.0));
    }

    #[test]
    fn test_haversine_small_offset() {
        // 0.0005 degrees of latitude is ~55.6m everywhere
        let a = GpsPoint::new(38.0, -78.5);
        let b = GpsPoint::new(38.0005, -78.5);
        assert!(approx_eq(haversine_distance(&a, &b), 55.6, 0.5));
    }

    #[test]
    fn test_compute_bounds() {
        let pts = vec![
            GpsPoint::new(51.50, -0.13),
            GpsPoint::new(51.51, -0.12),
            GpsPoint::new(51.505, -0.125),
        ];
        let bounds = compute_bounds(&pts).unwrap();
        assert_eq!(bounds.min_lat, 51.50);
        assert_eq!(bounds.max_lat, 51.51);
        assert_eq!(bounds.min_lng, -0.13);
        assert_eq!(bounds.max_lng, -0.12);
    }

    #[test]
    fn test_compute_bounds_empty() {
        assert!(compute_bounds(&[]).is_none());
    }

    #[test]
    fn test_compute_center() {
        let pts = vec![
            GpsPoint::new(51.50, -0.10),
            GpsPoint::new(51.52, -0.12),
        ];
        let center = compute_center(&pts);
        assert!(approx_eq(center.latitude, 51.51, 0.001));
        assert!(approx_eq(center.longitude, -0.11, 0.001));
    }

    #[test]
    fn test_compute_center_empty() {
        let center = compute_center(&[]);
        assert_eq!(center.latitude, 0.0);
        assert_eq!(center.longitude, 0.0);
    }

    #[test]
    fn test_meters_to_degrees() {
        let deg = meters_to_degrees(111_195.0, 0.0);
        assert!(approx_eq(deg, 1.01, 0.001));

        // Higher latitude needs a wider longitude window
        let deg_45 = meters_to_degrees(111_195.0, 45.0);
        assert!(deg_45 > 1.4);
    }

    #[test]
    fn test_meters_to_degrees_covers_radius() {
        // A box of this half-width must contain every point within the radius
        for lat in [0.0, 38.0, 60.0, 80.0] {
            let center = GpsPoint::new(lat, 10.0);
            let half = meters_to_degrees(100.0, center.latitude);
            let east = GpsPoint::new(lat, 10.0 + half);
            let north = GpsPoint::new(lat + half, 10.0);
            assert!(haversine_distance(&center, &east) >= 100.0, "east edge short at {}", lat);
            assert!(haversine_distance(&center, &north) >= 100.0, "north edge short at {}", lat);
        }
    }
}
