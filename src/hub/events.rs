//! Wire events relayed through the transport hub.

use serde::{Deserialize, Serialize};

use crate::geo::EtaEstimate;
use crate::models::{LocationSample, NotificationMessage};

/// An event delivered from the hub to room members (or to a single
/// connection, for `connected`/`error`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    /// Initial connection acknowledgment
    #[serde(rename = "connected")]
    Connected { message: String },
    /// Live position push for one crew member
    #[serde(rename = "gps:location-update")]
    LocationUpdate { sample: LocationSample },
    /// A tracked crew member's ETA dropped below the approach threshold
    #[serde(rename = "client:crew-approaching")]
    CrewApproaching { entity_id: String, eta: EtaEstimate },
    /// A tracked crew member entered the destination's arrival geofence
    #[serde(rename = "client:crew-arrived")]
    CrewArrived { message: String },
    /// Generic alert delivery
    #[serde(rename = "notification")]
    Notification { notification: NotificationMessage },
    /// Error report for this connection
    #[serde(rename = "error")]
    Error { message: String },
}

impl ServerEvent {
    /// The wire name of this event, as used for viewer-local dispatch.
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::Connected { .. } => "connected",
            ServerEvent::LocationUpdate { .. } => "gps:location-update",
            ServerEvent::CrewApproaching { .. } => "client:crew-approaching",
            ServerEvent::CrewArrived { .. } => "client:crew-arrived",
            ServerEvent::Notification { .. } => "notification",
            ServerEvent::Error { .. } => "error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NotificationKind;
    use chrono::Utc;

    #[test]
    fn test_event_tag_names() {
        let event = ServerEvent::CrewArrived {
            message: "Alex has arrived".to_string(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"client:crew-arrived\""));

        let event = ServerEvent::Notification {
            notification: NotificationMessage {
                kind: NotificationKind::Info,
                title: "t".to_string(),
                message: "m".to_string(),
                timestamp: Utc::now(),
            },
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"notification\""));
    }

    #[test]
    fn test_event_name_matches_tag() {
        let event = ServerEvent::Connected {
            message: "hi".to_string(),
        };
        let value: serde_json::Value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], event.name());
    }
}
