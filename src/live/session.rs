//! One viewer's consumption of the transport stream: events are fanned
//! out to local subscribers and folded into the session's reconciler and
//! notification inbox.

use chrono::Utc;
use tokio::sync::broadcast;
use tracing::debug;

use crate::hub::{EventBus, ServerEvent};
use crate::live::{NotificationCenter, Reconciler};
use crate::models::{NotificationKind, NotificationMessage};

/// Viewer-side session state for one dispatcher or client.
///
/// Feed it every event received on the session's transport connection;
/// it keeps the crew map current (latest wins per entity) and the
/// notification inbox filled, and re-dispatches each event to any local
/// subscribers registered through [`ViewerSession::subscribe`].
pub struct ViewerSession {
    /// Tenant the session's rooms are scoped to
    business_id: String,
    reconciler: Reconciler,
    notifications: NotificationCenter,
    bus: EventBus,
}

impl ViewerSession {
    pub fn new(business_id: impl Into<String>) -> Self {
        Self {
            business_id: business_id.into(),
            reconciler: Reconciler::new(),
            notifications: NotificationCenter::new(),
            bus: EventBus::new(),
        }
    }

    /// Session with a platform notification sink attached to the inbox.
    pub fn with_notification_center(
        business_id: impl Into<String>,
        notifications: NotificationCenter,
    ) -> Self {
        Self {
            business_id: business_id.into(),
            reconciler: Reconciler::new(),
            notifications,
            bus: EventBus::new(),
        }
    }

    /// Register a local listener for one wire event name. Every
    /// subscriber receives every matching event; dropping the receiver
    /// unsubscribes.
    pub async fn subscribe(&self, event_name: &str) -> broadcast::Receiver<ServerEvent> {
        self.bus.subscribe(event_name).await
    }

    /// Fold one transport event into the session state.
    pub async fn handle_event(&mut self, event: ServerEvent) {
        self.bus.dispatch(event.clone()).await;

        match event {
            ServerEvent::LocationUpdate { sample } => {
                // Room scoping already restricted this to our tenant
                let business_id = self.business_id.clone();
                self.reconciler
                    .apply_update(sample, &business_id, None, None, None);
            }
            ServerEvent::CrewApproaching { entity_id, eta } => {
                self.notifications.on_event(NotificationMessage {
                    kind: NotificationKind::Info,
                    title: "Crew approaching".to_string(),
                    message: format!(
                        "{} is about {} minutes away",
                        entity_id, eta.eta_minutes
                    ),
                    timestamp: Utc::now(),
                });
            }
            ServerEvent::CrewArrived { message } => {
                self.notifications.on_event(NotificationMessage {
                    kind: NotificationKind::Success,
                    title: "Crew arrived".to_string(),
                    message,
                    timestamp: Utc::now(),
                });
            }
            ServerEvent::Notification { notification } => {
                self.notifications.on_event(notification);
            }
            ServerEvent::Connected { message } => {
                debug!(%message, "transport connected");
            }
            ServerEvent::Error { message } => {
                debug!(%message, "transport error event");
            }
        }
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    pub fn reconciler_mut(&mut self) -> &mut Reconciler {
        &mut self.reconciler
    }

    pub fn notifications(&self) -> &NotificationCenter {
        &self.notifications
    }

    pub fn notifications_mut(&mut self) -> &mut NotificationCenter {
        &mut self.notifications
    }
}
