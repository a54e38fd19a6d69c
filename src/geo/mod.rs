//! Pure geospatial computations: great-circle distance, ETA estimation and
//! geofence containment.
//!
//! Everything in this module is side-effect free; the only I/O the
//! geospatial engine performs lives in [`crate::providers::geocoding`].

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Mean Earth radius in kilometers, as used by the haversine formula.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Assumed average travel speed in km/h when no caller override is given.
/// A coarse urban-driving heuristic, not a measured value.
pub const DEFAULT_AVERAGE_SPEED_KMH: f64 = 40.0;

/// A WGS84 coordinate pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Point {
    /// Latitude in degrees
    pub lat: f64,
    /// Longitude in degrees
    pub lng: f64,
}

impl Point {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }
}

/// Great-circle distance between two points in kilometers (haversine).
///
/// Symmetric in its arguments and zero (within floating-point tolerance)
/// when both points coincide.
pub fn distance_km(a: Point, b: Point) -> f64 {
    let d_lat = (b.lat - a.lat).to_radians();
    let d_lng = (b.lng - a.lng).to_radians();

    let h = (d_lat / 2.0).sin().powi(2)
        + a.lat.to_radians().cos() * b.lat.to_radians().cos() * (d_lng / 2.0).sin().powi(2);

    2.0 * EARTH_RADIUS_KM * h.sqrt().asin()
}

/// An on-demand ETA derived from a distance and an assumed average speed.
/// Never persisted; always recomputed fresh from current positions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct EtaEstimate {
    /// Remaining great-circle distance in kilometers
    pub distance_km: f64,
    /// Estimated minutes until arrival, rounded to the nearest minute
    pub eta_minutes: i64,
    /// Wall-clock arrival estimate
    pub estimated_arrival_at: DateTime<Utc>,
}

/// Estimate time of arrival for `distance_km` at `avg_speed_kmh`.
///
/// Monotonically non-decreasing in distance for a fixed speed. The speed
/// must be positive; see [`DEFAULT_AVERAGE_SPEED_KMH`] for the usual caller
/// default.
pub fn estimate_eta(distance_km: f64, avg_speed_kmh: f64) -> EtaEstimate {
    let eta_minutes = (distance_km / avg_speed_kmh * 60.0).round() as i64;
    EtaEstimate {
        distance_km,
        eta_minutes,
        estimated_arrival_at: Utc::now() + Duration::minutes(eta_minutes),
    }
}

/// A named circular region used to derive arrival/departure facts.
/// Read-only to this pipeline; evaluated, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Geofence {
    pub id: Uuid,
    pub name: String,
    pub center: Point,
    pub radius_meters: f64,
    pub active: bool,
}

impl Geofence {
    /// An active circular fence around `center`.
    pub fn circle(name: impl Into<String>, center: Point, radius_meters: f64) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            center,
            radius_meters,
            active: true,
        }
    }

    /// Whether `point` lies within this fence. Inactive fences contain
    /// nothing.
    pub fn contains(&self, point: Point) -> bool {
        self.active && is_within_geofence(point, self)
    }
}

/// Geometric containment test: true iff the point is within the fence
/// radius. The boundary (distance == radius) counts as inside.
pub fn is_within_geofence(point: Point, fence: &Geofence) -> bool {
    distance_km(point, fence.center) * 1000.0 <= fence.radius_meters
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOLERANCE_KM: f64 = 1e-9;

    #[test]
    fn test_distance_is_symmetric() {
        let pairs = [
            (Point::new(40.0, -74.0), Point::new(40.1, -74.0)),
            (Point::new(48.37, 10.90), Point::new(-33.86, 151.21)),
            (Point::new(0.0, 0.0), Point::new(0.0, 179.9)),
            (Point::new(89.9, 13.0), Point::new(-89.9, -13.0)),
        ];
        for (a, b) in pairs {
            assert!((distance_km(a, b) - distance_km(b, a)).abs() < TOLERANCE_KM);
        }
    }

    #[test]
    fn test_distance_to_self_is_zero() {
        let p = Point::new(51.5074, -0.1278);
        assert!(distance_km(p, p).abs() < TOLERANCE_KM);
    }

    #[test]
    fn test_known_distance() {
        // 0.1 degrees of latitude is roughly 11.12 km
        let a = Point::new(40.0, -74.0);
        let b = Point::new(40.1, -74.0);
        let d = distance_km(a, b);
        assert!((d - 11.12).abs() < 0.01, "got {d}");
    }

    #[test]
    fn test_eta_example_scenario() {
        let a = Point::new(40.0, -74.0);
        let b = Point::new(40.1, -74.0);
        let eta = estimate_eta(distance_km(a, b), DEFAULT_AVERAGE_SPEED_KMH);
        assert_eq!(eta.eta_minutes, 17);
    }

    #[test]
    fn test_eta_monotonic_in_distance() {
        let mut last = i64::MIN;
        for d in [0.0, 0.5, 1.0, 5.0, 11.12, 42.0, 250.0] {
            let eta = estimate_eta(d, 40.0);
            assert!(eta.eta_minutes >= last);
            last = eta.eta_minutes;
        }
    }

    #[test]
    fn test_eta_arrival_time_matches_minutes() {
        let before = Utc::now();
        let eta = estimate_eta(20.0, 40.0);
        assert_eq!(eta.eta_minutes, 30);
        let expected = before + Duration::minutes(30);
        let drift = (eta.estimated_arrival_at - expected).num_seconds().abs();
        assert!(drift <= 1);
    }

    #[test]
    fn test_geofence_center_is_inside() {
        let center = Point::new(0.0, 0.0);
        let fence = Geofence::circle("depot", center, 1000.0);
        assert!(is_within_geofence(center, &fence));
        assert!(fence.contains(center));
    }

    #[test]
    fn test_geofence_boundary_cases() {
        let fence = Geofence::circle("depot", Point::new(0.0, 0.0), 1000.0);
        // ~990 m north of the center: inside
        assert!(is_within_geofence(Point::new(0.0089, 0.0), &fence));
        // ~1110 m north of the center: outside
        assert!(!is_within_geofence(Point::new(0.01, 0.0), &fence));
    }

    #[test]
    fn test_inactive_geofence_contains_nothing() {
        let mut fence = Geofence::circle("depot", Point::new(0.0, 0.0), 1000.0);
        fence.active = false;
        assert!(!fence.contains(fence.center));
        // The raw geometric test is unaffected by the flag
        assert!(is_within_geofence(fence.center, &fence));
    }
}
