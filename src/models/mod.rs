//! Shared domain types flowing between the ingestion agent, the transport
//! hub and the viewer-side components.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::geo::Point;

/// One normalized position fix produced by a crew member's device.
///
/// Immutable once created; a later sample for the same `entity_id`
/// supersedes it, nothing ever mutates it in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct LocationSample {
    /// The crew member this sample belongs to
    pub entity_id: String,
    /// Latitude in degrees
    pub lat: f64,
    /// Longitude in degrees
    pub lng: f64,
    /// Reported fix accuracy in meters
    pub accuracy_meters: f64,
    /// Ground speed in km/h, converted from the device's raw m/s reading
    pub speed_kmh: f64,
    /// Heading in degrees clockwise from north; absent when the device
    /// cannot determine one (stationary, no compass)
    pub heading_degrees: Option<f64>,
    /// Device battery percentage, attached best-effort when supported
    pub battery_pct: Option<f64>,
    /// Device-side capture time; the only field consumers may use to
    /// resolve staleness, since the transport does not order events
    pub captured_at: DateTime<Utc>,
}

impl LocationSample {
    pub fn position(&self) -> Point {
        Point::new(self.lat, self.lng)
    }

    /// Range-check the sample fields.
    pub fn validate(&self) -> Result<(), String> {
        if self.entity_id.is_empty() {
            return Err("entity_id must not be empty".to_string());
        }
        if !(-90.0..=90.0).contains(&self.lat) {
            return Err("latitude must be between -90 and 90".to_string());
        }
        if !(-180.0..=180.0).contains(&self.lng) {
            return Err("longitude must be between -180 and 180".to_string());
        }
        if self.accuracy_meters < 0.0 {
            return Err("accuracy must be non-negative".to_string());
        }
        if self.speed_kmh < 0.0 {
            return Err("speed must be non-negative".to_string());
        }
        if let Some(h) = self.heading_degrees {
            if !(0.0..=360.0).contains(&h) {
                return Err("heading must be between 0 and 360".to_string());
            }
        }
        if let Some(b) = self.battery_pct {
            if !(0.0..=100.0).contains(&b) {
                return Err("battery level must be between 0 and 100".to_string());
            }
        }
        Ok(())
    }
}

/// Coarse availability of a crew member, as reported by their device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "kebab-case")]
pub enum CrewStatus {
    Active,
    OnBreak,
    Inactive,
}

/// The tenant-scoped envelope an agent submits a sample in. The hub routes
/// on `business_id` (and `work_order_id` when present); the sample itself
/// carries no tenant information.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LocationSubmission {
    /// Tenant the submitting crew member belongs to
    pub business_id: String,
    /// Work order the crew member is currently assigned to, if any
    pub work_order_id: Option<String>,
    /// Human-readable name for map display; the previous value is kept
    /// when absent
    pub display_name: Option<String>,
    /// Current availability; the previous value is kept when absent
    pub status: Option<CrewStatus>,
    pub sample: LocationSample,
}

/// What a tracking context follows: a whole work order's crew or a single
/// employee.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum TrackingTarget {
    WorkOrder(String),
    Employee(String),
}

/// A destination point used as the ETA reference for a tracking context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ClientLocation {
    pub name: String,
    pub address: Option<String>,
    pub point: Point,
}

/// Binds a viewer session to a tracking target and an optional destination.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TrackingContext {
    pub id: Uuid,
    pub business_id: String,
    /// The viewer this context belongs to; approach/arrival alerts are
    /// published to this user's room
    pub user_id: String,
    pub target: TrackingTarget,
    pub destination: Option<ClientLocation>,
}

impl TrackingContext {
    /// Whether a submission from `entity_id` under `work_order_id` is
    /// followed by this context.
    pub fn matches(&self, entity_id: &str, work_order_id: Option<&str>) -> bool {
        match &self.target {
            TrackingTarget::Employee(id) => id == entity_id,
            TrackingTarget::WorkOrder(id) => work_order_id == Some(id.as_str()),
        }
    }
}

/// Severity class of a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Success,
    Error,
    Warning,
    Info,
}

/// A notification as delivered over the transport. Local inbox bookkeeping
/// (id, read flag) is assigned by the receiving notification center, not
/// carried on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct NotificationMessage {
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}
