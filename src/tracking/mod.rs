//! Server-side tracking orchestration.
//!
//! This module owns the shared current-state stores and drives the
//! pipeline: ingested samples are reconciled, fanned out to the rooms
//! that may see them, and evaluated against tracking contexts for
//! approach/arrival alerts. A recurring evaluation loop re-runs the same
//! checks on a fixed interval as a correctness backstop when push events
//! are missed.

use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::TrackingConfig;
use crate::geo::{distance_km, estimate_eta, EtaEstimate, Geofence};
use crate::hub::{Hub, RoomKey, ServerEvent};
use crate::live::{Applied, CrewLocation, Reconciler};
use crate::models::{
    ClientLocation, LocationSubmission, NotificationKind, NotificationMessage, TrackingContext,
};

/// Shared current-state store for crew positions.
pub type CrewStore = Arc<RwLock<Reconciler>>;

/// Shared registry of active tracking contexts.
pub type ContextStore = Arc<RwLock<HashMap<Uuid, TrackingContext>>>;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("invalid location submission: {0}")]
    InvalidSubmission(String),
}

#[derive(Debug, Error)]
pub enum TrackingError {
    #[error("unknown tracking context")]
    UnknownContext,
    #[error("tracking context has no destination")]
    NoDestination,
    #[error("no location sample received yet for the tracked crew")]
    NoSample,
}

/// Where a crew member stands relative to one context's destination.
/// Alerts fire on upward transitions only, so each approach produces one
/// `crew-approaching` and one `crew-arrived`, not a stream of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum AlertPhase {
    Clear,
    Approaching,
    Arrived,
}

pub struct TrackingManager {
    hub: Hub,
    config: TrackingConfig,
    crew: CrewStore,
    contexts: ContextStore,
    /// Last alert phase per (context, entity); reset when the crew moves
    /// back out of range
    alert_phases: RwLock<HashMap<(Uuid, String), AlertPhase>>,
}

impl TrackingManager {
    pub fn new(hub: Hub, config: TrackingConfig) -> Self {
        Self {
            hub,
            config,
            crew: Arc::new(RwLock::new(Reconciler::new())),
            contexts: Arc::new(RwLock::new(HashMap::new())),
            alert_phases: RwLock::new(HashMap::new()),
        }
    }

    pub fn hub(&self) -> &Hub {
        &self.hub
    }

    /// Get a reference to the crew store for API access
    pub fn crew_store(&self) -> CrewStore {
        self.crew.clone()
    }

    /// Get a reference to the context store for API access
    pub fn context_store(&self) -> ContextStore {
        self.contexts.clone()
    }

    pub async fn insert_context(&self, context: TrackingContext) {
        let mut contexts = self.contexts.write().await;
        debug!(context = %context.id, business = %context.business_id, "tracking context registered");
        contexts.insert(context.id, context);
    }

    pub async fn context(&self, id: &Uuid) -> Option<TrackingContext> {
        self.contexts.read().await.get(id).cloned()
    }

    pub async fn remove_context(&self, id: &Uuid) -> bool {
        let removed = self.contexts.write().await.remove(id).is_some();
        if removed {
            let mut phases = self.alert_phases.write().await;
            phases.retain(|(ctx_id, _), _| ctx_id != id);
        }
        removed
    }

    /// Apply one submitted sample: reconcile, fan out, evaluate alerts.
    ///
    /// A stale sample (older than the held one for that entity) is
    /// dropped after reconciliation and NOT fanned out, since relaying it
    /// would push viewers' maps backwards.
    pub async fn ingest(&self, submission: LocationSubmission) -> Result<Applied, IngestError> {
        submission
            .sample
            .validate()
            .map_err(IngestError::InvalidSubmission)?;
        if submission.business_id.is_empty() {
            return Err(IngestError::InvalidSubmission(
                "business_id must not be empty".to_string(),
            ));
        }

        let applied = {
            let mut crew = self.crew.write().await;
            crew.apply_update(
                submission.sample.clone(),
                &submission.business_id,
                submission.work_order_id.as_deref(),
                submission.display_name.as_deref(),
                submission.status,
            )
        };

        if applied == Applied::Stale {
            return Ok(applied);
        }

        let event = ServerEvent::LocationUpdate {
            sample: submission.sample.clone(),
        };
        self.hub
            .publish(&RoomKey::Business(submission.business_id.clone()), event.clone())
            .await;
        if let Some(work_order_id) = &submission.work_order_id {
            self.hub
                .publish(&RoomKey::WorkOrder(work_order_id.clone()), event)
                .await;
        }

        self.evaluate_contexts_for(
            &submission.sample.entity_id,
            submission.work_order_id.as_deref(),
        )
        .await;

        Ok(applied)
    }

    /// On-demand ETA for a context: the soonest arrival among the crew it
    /// follows, always derived fresh.
    pub async fn eta_for_context(&self, id: &Uuid) -> Result<EtaEstimate, TrackingError> {
        let context = self.context(id).await.ok_or(TrackingError::UnknownContext)?;
        let destination = context
            .destination
            .as_ref()
            .ok_or(TrackingError::NoDestination)?;

        let crew = self.crew.read().await;
        crew.crew()
            .filter(|c| context_follows(&context, c))
            .map(|c| {
                estimate_eta(
                    distance_km(c.sample.position(), destination.point),
                    self.config.average_speed_kmh,
                )
            })
            .min_by_key(|eta| eta.eta_minutes)
            .ok_or(TrackingError::NoSample)
    }

    /// Snapshot of the crew a context currently follows.
    pub async fn crew_for_context(&self, id: &Uuid) -> Result<Vec<CrewLocation>, TrackingError> {
        let context = self.context(id).await.ok_or(TrackingError::UnknownContext)?;
        let crew = self.crew.read().await;
        Ok(crew
            .crew()
            .filter(|c| context_follows(&context, c))
            .cloned()
            .collect())
    }

    /// Start the recurring evaluation loop. Runs until the task is
    /// aborted; the first tick fires after one full interval since every
    /// ingest already evaluates inline.
    pub async fn start(self: Arc<Self>) {
        let interval_secs = self.config.eta_refresh_secs;
        info!(interval_secs, "Starting tracking evaluation loop");
        let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(interval_secs));
        interval.tick().await;

        loop {
            interval.tick().await;
            self.evaluate_all_contexts().await;
        }
    }

    async fn evaluate_all_contexts(&self) {
        let contexts: Vec<TrackingContext> =
            self.contexts.read().await.values().cloned().collect();
        for context in contexts {
            self.evaluate_context(&context).await;
        }
    }

    async fn evaluate_contexts_for(&self, entity_id: &str, work_order_id: Option<&str>) {
        let contexts: Vec<TrackingContext> = self
            .contexts
            .read()
            .await
            .values()
            .filter(|c| c.matches(entity_id, work_order_id))
            .cloned()
            .collect();
        for context in contexts {
            self.evaluate_context(&context).await;
        }
    }

    /// Re-derive ETA annotations and alert phases for every crew member a
    /// context follows.
    async fn evaluate_context(&self, context: &TrackingContext) {
        let Some(destination) = &context.destination else {
            return;
        };

        let candidate_ids: Vec<String> = {
            let crew = self.crew.read().await;
            crew.crew()
                .filter(|c| context_follows(context, c))
                .map(|c| c.entity_id.clone())
                .collect()
        };

        let fence = Geofence::circle(
            destination.name.clone(),
            destination.point,
            self.config.arrival_radius_meters,
        );

        for entity_id in candidate_ids {
            let (eta, details) = {
                let mut crew = self.crew.write().await;
                let eta = crew
                    .annotate_with_eta(&entity_id, destination.point, self.config.average_speed_kmh)
                    .cloned();
                let details = crew
                    .get(&entity_id)
                    .map(|c| (c.sample.position(), c.display_name.clone()));
                (eta, details)
            };
            let (Some(eta), Some((position, display_name))) = (eta, details) else {
                continue;
            };

            let phase = if fence.contains(position) {
                AlertPhase::Arrived
            } else if eta.eta_minutes <= self.config.approach_threshold_minutes {
                AlertPhase::Approaching
            } else {
                AlertPhase::Clear
            };

            self.transition(context, &entity_id, &display_name, destination, phase, eta)
                .await;
        }
    }

    async fn transition(
        &self,
        context: &TrackingContext,
        entity_id: &str,
        display_name: &str,
        destination: &ClientLocation,
        phase: AlertPhase,
        eta: EtaEstimate,
    ) {
        let key = (context.id, entity_id.to_string());
        let previous = {
            let mut phases = self.alert_phases.write().await;
            let previous = phases.get(&key).copied().unwrap_or(AlertPhase::Clear);
            phases.insert(key, phase);
            previous
        };

        // Only upward transitions alert; moving away just resets the edge
        if phase <= previous {
            return;
        }

        let room = RoomKey::User(context.user_id.clone());
        match phase {
            AlertPhase::Approaching => {
                debug!(
                    context = %context.id,
                    entity_id,
                    eta_minutes = eta.eta_minutes,
                    "crew approaching destination"
                );
                self.hub
                    .publish(
                        &room,
                        ServerEvent::CrewApproaching {
                            entity_id: entity_id.to_string(),
                            eta,
                        },
                    )
                    .await;
            }
            AlertPhase::Arrived => {
                let message =
                    format!("{} has arrived at {}", display_name, destination.name);
                info!(context = %context.id, entity_id, "crew arrived at destination");
                self.hub
                    .publish(
                        &room,
                        ServerEvent::CrewArrived {
                            message: message.clone(),
                        },
                    )
                    .await;
                self.hub
                    .publish(
                        &room,
                        ServerEvent::Notification {
                            notification: NotificationMessage {
                                kind: NotificationKind::Success,
                                title: "Crew arrived".to_string(),
                                message,
                                timestamp: chrono::Utc::now(),
                            },
                        },
                    )
                    .await;
            }
            AlertPhase::Clear => {}
        }
    }
}

/// Whether a crew entry belongs to the tenant and target a context
/// follows.
fn context_follows(context: &TrackingContext, crew: &CrewLocation) -> bool {
    crew.business_id == context.business_id
        && context.matches(&crew.entity_id, crew.work_order_id.as_deref())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::Point;
    use crate::models::{LocationSample, TrackingTarget};
    use chrono::{Duration, Utc};
    use tokio::sync::mpsc;

    fn submission(entity_id: &str, lat: f64, lng: f64) -> LocationSubmission {
        LocationSubmission {
            business_id: "b1".to_string(),
            work_order_id: Some("wo-1".to_string()),
            display_name: Some("Alex".to_string()),
            status: None,
            sample: LocationSample {
                entity_id: entity_id.to_string(),
                lat,
                lng,
                accuracy_meters: 5.0,
                speed_kmh: 25.0,
                heading_degrees: None,
                battery_pct: None,
                captured_at: Utc::now(),
            },
        }
    }

    fn context_with_destination(dest: Point) -> TrackingContext {
        TrackingContext {
            id: Uuid::new_v4(),
            business_id: "b1".to_string(),
            user_id: "u1".to_string(),
            target: TrackingTarget::WorkOrder("wo-1".to_string()),
            destination: Some(ClientLocation {
                name: "Client HQ".to_string(),
                address: None,
                point: dest,
            }),
        }
    }

    async fn manager() -> (Arc<TrackingManager>, Hub) {
        let hub = Hub::new();
        let manager = Arc::new(TrackingManager::new(hub.clone(), TrackingConfig::default()));
        (manager, hub)
    }

    async fn room_member(
        hub: &Hub,
        room: RoomKey,
    ) -> mpsc::UnboundedReceiver<ServerEvent> {
        let (id, rx) = hub.connect().await;
        hub.join(id, room).await;
        rx
    }

    #[tokio::test]
    async fn test_ingest_fans_out_to_business_and_work_order_rooms() {
        let (manager, hub) = manager().await;
        let mut business_rx = room_member(&hub, RoomKey::Business("b1".to_string())).await;
        let mut wo_rx = room_member(&hub, RoomKey::WorkOrder("wo-1".to_string())).await;
        let mut other_rx = room_member(&hub, RoomKey::Business("b2".to_string())).await;

        manager.ingest(submission("e1", 40.0, -74.0)).await.unwrap();

        assert!(matches!(
            business_rx.try_recv().unwrap(),
            ServerEvent::LocationUpdate { .. }
        ));
        assert!(matches!(
            wo_rx.try_recv().unwrap(),
            ServerEvent::LocationUpdate { .. }
        ));
        assert!(other_rx.try_recv().is_err(), "tenant isolation violated");
    }

    #[tokio::test]
    async fn test_ingest_rejects_invalid_sample() {
        let (manager, _hub) = manager().await;
        let mut bad = submission("e1", 95.0, 0.0);
        assert!(manager.ingest(bad.clone()).await.is_err());
        bad.sample.lat = 40.0;
        bad.business_id = String::new();
        assert!(manager.ingest(bad).await.is_err());
    }

    #[tokio::test]
    async fn test_stale_sample_is_not_fanned_out() {
        let (manager, hub) = manager().await;
        let mut business_rx = room_member(&hub, RoomKey::Business("b1".to_string())).await;

        let mut newer = submission("e1", 40.2, -74.0);
        newer.sample.captured_at = Utc::now();
        let mut older = submission("e1", 40.0, -74.0);
        older.sample.captured_at = newer.sample.captured_at - Duration::seconds(30);

        assert_eq!(manager.ingest(newer).await.unwrap(), Applied::Inserted);
        assert_eq!(manager.ingest(older).await.unwrap(), Applied::Stale);

        assert!(business_rx.try_recv().is_ok());
        assert!(
            business_rx.try_recv().is_err(),
            "stale sample must not be relayed"
        );

        let crew = manager.crew_store();
        let crew = crew.read().await;
        assert_eq!(crew.get("e1").unwrap().sample.lat, 40.2);
    }

    #[tokio::test]
    async fn test_arrival_alert_fires_once() {
        let (manager, hub) = manager().await;
        let destination = Point::new(40.0, -74.0);
        let context = context_with_destination(destination);
        manager.insert_context(context).await;

        let mut user_rx = room_member(&hub, RoomKey::User("u1".to_string())).await;

        // Inside the default 75 m arrival fence
        manager.ingest(submission("e1", 40.0001, -74.0)).await.unwrap();

        assert!(matches!(
            user_rx.try_recv().unwrap(),
            ServerEvent::CrewArrived { .. }
        ));
        assert!(matches!(
            user_rx.try_recv().unwrap(),
            ServerEvent::Notification { .. }
        ));

        // Still inside: no duplicate alert
        manager.ingest(submission("e1", 40.0002, -74.0)).await.unwrap();
        assert!(user_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_approach_alert_below_threshold() {
        let (manager, hub) = manager().await;
        // ~5.6 km north of the destination: 8 minutes at 40 km/h
        let destination = Point::new(40.0, -74.0);
        manager.insert_context(context_with_destination(destination)).await;
        let mut user_rx = room_member(&hub, RoomKey::User("u1".to_string())).await;

        manager.ingest(submission("e1", 40.05, -74.0)).await.unwrap();

        match user_rx.try_recv().unwrap() {
            ServerEvent::CrewApproaching { entity_id, eta } => {
                assert_eq!(entity_id, "e1");
                assert!(eta.eta_minutes <= 10);
            }
            other => panic!("expected crew-approaching, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_departure_resets_alert_phase() {
        let (manager, hub) = manager().await;
        let destination = Point::new(40.0, -74.0);
        manager.insert_context(context_with_destination(destination)).await;
        let mut user_rx = room_member(&hub, RoomKey::User("u1".to_string())).await;

        manager.ingest(submission("e1", 40.0001, -74.0)).await.unwrap();
        assert!(matches!(
            user_rx.try_recv().unwrap(),
            ServerEvent::CrewArrived { .. }
        ));
        let _ = user_rx.try_recv(); // the paired notification

        // Crew leaves again (far outside fence and threshold)
        manager.ingest(submission("e1", 41.0, -74.0)).await.unwrap();
        assert!(user_rx.try_recv().is_err());

        // Second visit alerts again
        manager.ingest(submission("e1", 40.0001, -74.0)).await.unwrap();
        assert!(matches!(
            user_rx.try_recv().unwrap(),
            ServerEvent::CrewArrived { .. }
        ));
    }

    #[tokio::test]
    async fn test_eta_for_context() {
        let (manager, _hub) = manager().await;
        let destination = Point::new(40.1, -74.0);
        let context = context_with_destination(destination);
        let context_id = context.id;
        manager.insert_context(context).await;

        assert!(matches!(
            manager.eta_for_context(&context_id).await,
            Err(TrackingError::NoSample)
        ));

        manager.ingest(submission("e1", 40.0, -74.0)).await.unwrap();
        let eta = manager.eta_for_context(&context_id).await.unwrap();
        assert!((eta.distance_km - 11.12).abs() < 0.01);
        assert_eq!(eta.eta_minutes, 17);

        assert!(matches!(
            manager.eta_for_context(&Uuid::new_v4()).await,
            Err(TrackingError::UnknownContext)
        ));
    }

    #[tokio::test]
    async fn test_eta_requires_destination() {
        let (manager, _hub) = manager().await;
        let mut context = context_with_destination(Point::new(0.0, 0.0));
        context.destination = None;
        let id = context.id;
        manager.insert_context(context).await;
        assert!(matches!(
            manager.eta_for_context(&id).await,
            Err(TrackingError::NoDestination)
        ));
    }

    #[tokio::test]
    async fn test_crew_for_context_filters_by_target_and_tenant() {
        let (manager, _hub) = manager().await;
        let context = context_with_destination(Point::new(40.0, -74.0));
        let id = context.id;
        manager.insert_context(context).await;

        manager.ingest(submission("e1", 40.0, -74.0)).await.unwrap();

        let mut foreign = submission("e2", 40.0, -74.0);
        foreign.work_order_id = Some("wo-9".to_string());
        manager.ingest(foreign).await.unwrap();

        let crew = manager.crew_for_context(&id).await.unwrap();
        assert_eq!(crew.len(), 1);
        assert_eq!(crew[0].entity_id, "e1");

        assert!(manager.remove_context(&id).await);
        assert!(matches!(
            manager.crew_for_context(&id).await,
            Err(TrackingError::UnknownContext)
        ));
    }
}
