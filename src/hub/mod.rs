//! Multi-tenant real-time transport hub.
//!
//! Participants connect, join logical rooms and receive every event
//! published to those rooms, and only those rooms. Room membership is the
//! tenant-isolation boundary and is enforced here, server-side, never
//! trusted to clients.
//!
//! The hub gives no ordering guarantee across the wire; consumers resolve
//! staleness with the `captured_at` timestamp inside payloads, never with
//! arrival order.

mod events;
mod metrics;

pub use events::ServerEvent;
pub use metrics::{HubMetrics, HubMetricsSnapshot};

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, RwLock};
use tracing::debug;

/// A tenant- or entity-scoped channel on the transport. Delivery is
/// restricted to current members.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RoomKey {
    Business(String),
    User(String),
    WorkOrder(String),
}

impl fmt::Display for RoomKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoomKey::Business(id) => write!(f, "business:{}", id),
            RoomKey::User(id) => write!(f, "user:{}", id),
            RoomKey::WorkOrder(id) => write!(f, "workorder:{}", id),
        }
    }
}

/// Opaque identifier of one hub connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

struct ConnectionEntry {
    tx: mpsc::UnboundedSender<ServerEvent>,
    rooms: HashSet<RoomKey>,
}

#[derive(Default)]
struct HubInner {
    next_id: u64,
    connections: HashMap<ConnectionId, ConnectionEntry>,
    rooms: HashMap<RoomKey, HashSet<ConnectionId>>,
}

/// The fan-out hub. Cheap to clone; all clones share one membership table.
///
/// Every membership mutation (join, leave, disconnect cleanup) takes the
/// single write lock, so a connection can never observe a room it already
/// left or miss one it just joined.
#[derive(Clone, Default)]
pub struct Hub {
    inner: Arc<RwLock<HubInner>>,
    metrics: HubMetrics,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new connection, returning its id and the receiver its
    /// events arrive on. The receiver closing is the disconnect signal.
    /// Reconnection is a new connection: room memberships are NOT carried
    /// over, every reconnect must re-join.
    pub async fn connect(&self) -> (ConnectionId, mpsc::UnboundedReceiver<ServerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.write().await;
        inner.next_id += 1;
        let id = ConnectionId(inner.next_id);
        inner.connections.insert(
            id,
            ConnectionEntry {
                tx,
                rooms: HashSet::new(),
            },
        );
        self.metrics.record_connection();
        debug!(connection = %id, "hub connection registered");
        (id, rx)
    }

    /// Remove a connection and all of its room memberships.
    pub async fn disconnect(&self, id: ConnectionId) {
        let mut inner = self.inner.write().await;
        if let Some(entry) = inner.connections.remove(&id) {
            for room in entry.rooms {
                if let Some(members) = inner.rooms.get_mut(&room) {
                    members.remove(&id);
                    if members.is_empty() {
                        inner.rooms.remove(&room);
                    }
                }
            }
            debug!(connection = %id, "hub connection removed");
        }
    }

    /// Add a connection to a room. A connection may belong to any number
    /// of rooms at once. Returns false when the connection is unknown
    /// (already disconnected).
    pub async fn join(&self, id: ConnectionId, room: RoomKey) -> bool {
        let mut inner = self.inner.write().await;
        let Some(entry) = inner.connections.get_mut(&id) else {
            return false;
        };
        entry.rooms.insert(room.clone());
        inner.rooms.entry(room.clone()).or_default().insert(id);
        debug!(connection = %id, room = %room, "joined room");
        true
    }

    /// Remove a connection from a room it previously joined.
    pub async fn leave(&self, id: ConnectionId, room: &RoomKey) {
        let mut inner = self.inner.write().await;
        if let Some(entry) = inner.connections.get_mut(&id) {
            entry.rooms.remove(room);
        }
        if let Some(members) = inner.rooms.get_mut(room) {
            members.remove(&id);
            if members.is_empty() {
                inner.rooms.remove(room);
            }
        }
    }

    /// Deliver `event` to every current member of `room`, and only those.
    /// Returns the number of connections the event was handed to.
    ///
    /// Connections whose receiver has gone away are cleaned up on the
    /// spot rather than left to accumulate.
    pub async fn publish(&self, room: &RoomKey, event: ServerEvent) -> usize {
        let mut delivered = 0;
        let mut dead = Vec::new();
        {
            let inner = self.inner.read().await;
            if let Some(members) = inner.rooms.get(room) {
                for id in members {
                    match inner.connections.get(id) {
                        Some(entry) if entry.tx.send(event.clone()).is_ok() => delivered += 1,
                        _ => dead.push(*id),
                    }
                }
            }
        }
        for id in dead {
            debug!(connection = %id, room = %room, "dropping dead connection during publish");
            self.disconnect(id).await;
        }
        self.metrics.record_publish(delivered);
        delivered
    }

    /// Deliver an event to one specific connection, outside any room
    /// (connection-scoped errors, acknowledgments). Returns false when
    /// the connection is gone.
    pub async fn send_to(&self, id: ConnectionId, event: ServerEvent) -> bool {
        let inner = self.inner.read().await;
        inner
            .connections
            .get(&id)
            .is_some_and(|entry| entry.tx.send(event).is_ok())
    }

    pub fn metrics(&self) -> HubMetricsSnapshot {
        self.metrics.snapshot()
    }

    pub async fn connection_count(&self) -> usize {
        self.inner.read().await.connections.len()
    }

    pub async fn room_count(&self) -> usize {
        self.inner.read().await.rooms.len()
    }
}

/// Viewer-local event dispatch: one broadcast channel per event name, so
/// any number of subscribers can listen to the same event and all of them
/// fire. Dropping a receiver is the unsubscribe; there is no `off` call to
/// forget.
#[derive(Default)]
pub struct EventBus {
    channels: RwLock<HashMap<String, broadcast::Sender<ServerEvent>>>,
}

impl EventBus {
    /// Per-event channel capacity. A slow subscriber that lags simply
    /// skips ahead; only the latest state matters to map views.
    const CAPACITY: usize = 64;

    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to all events with the given wire name.
    pub async fn subscribe(&self, event_name: &str) -> broadcast::Receiver<ServerEvent> {
        let mut channels = self.channels.write().await;
        channels
            .entry(event_name.to_string())
            .or_insert_with(|| broadcast::channel(Self::CAPACITY).0)
            .subscribe()
    }

    /// Route an incoming event to its subscribers. Returns the number of
    /// live subscribers it reached.
    pub async fn dispatch(&self, event: ServerEvent) -> usize {
        let channels = self.channels.read().await;
        match channels.get(event.name()) {
            // A send error just means every receiver is gone
            Some(tx) => tx.send(event).unwrap_or(0),
            None => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LocationSample;
    use chrono::Utc;

    fn location_event(entity_id: &str) -> ServerEvent {
        ServerEvent::LocationUpdate {
            sample: LocationSample {
                entity_id: entity_id.to_string(),
                lat: 40.0,
                lng: -74.0,
                accuracy_meters: 5.0,
                speed_kmh: 20.0,
                heading_degrees: None,
                battery_pct: None,
                captured_at: Utc::now(),
            },
        }
    }

    #[tokio::test]
    async fn test_room_isolation() {
        let hub = Hub::new();
        let (a, mut rx_a) = hub.connect().await;
        let (b, mut rx_b) = hub.connect().await;
        hub.join(a, RoomKey::Business("A".to_string())).await;
        hub.join(b, RoomKey::Business("B".to_string())).await;

        let delivered = hub
            .publish(&RoomKey::Business("A".to_string()), location_event("e1"))
            .await;

        assert_eq!(delivered, 1);
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_connection_in_multiple_rooms() {
        let hub = Hub::new();
        let (a, mut rx_a) = hub.connect().await;
        hub.join(a, RoomKey::Business("A".to_string())).await;
        hub.join(a, RoomKey::WorkOrder("wo-1".to_string())).await;

        hub.publish(&RoomKey::Business("A".to_string()), location_event("e1"))
            .await;
        hub.publish(&RoomKey::WorkOrder("wo-1".to_string()), location_event("e2"))
            .await;

        assert!(rx_a.try_recv().is_ok());
        assert!(rx_a.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_leave_stops_delivery() {
        let hub = Hub::new();
        let room = RoomKey::Business("A".to_string());
        let (a, mut rx_a) = hub.connect().await;
        hub.join(a, room.clone()).await;
        hub.leave(a, &room).await;

        let delivered = hub.publish(&room, location_event("e1")).await;
        assert_eq!(delivered, 0);
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_disconnect_cleans_memberships() {
        let hub = Hub::new();
        let room = RoomKey::User("u1".to_string());
        let (a, _rx_a) = hub.connect().await;
        hub.join(a, room.clone()).await;
        assert_eq!(hub.room_count().await, 1);

        hub.disconnect(a).await;
        assert_eq!(hub.connection_count().await, 0);
        assert_eq!(hub.room_count().await, 0);
        assert_eq!(hub.publish(&room, location_event("e1")).await, 0);
    }

    #[tokio::test]
    async fn test_join_after_disconnect_is_rejected() {
        let hub = Hub::new();
        let (a, rx_a) = hub.connect().await;
        drop(rx_a);
        hub.disconnect(a).await;
        assert!(!hub.join(a, RoomKey::Business("A".to_string())).await);
    }

    #[tokio::test]
    async fn test_publish_reaps_dead_receivers() {
        let hub = Hub::new();
        let room = RoomKey::Business("A".to_string());
        let (a, rx_a) = hub.connect().await;
        hub.join(a, room.clone()).await;
        drop(rx_a);

        assert_eq!(hub.publish(&room, location_event("e1")).await, 0);
        assert_eq!(hub.connection_count().await, 0);
    }

    #[tokio::test]
    async fn test_send_to_single_connection() {
        let hub = Hub::new();
        let (a, mut rx_a) = hub.connect().await;
        let (_b, mut rx_b) = hub.connect().await;

        assert!(
            hub.send_to(
                a,
                ServerEvent::Error {
                    message: "bad input".to_string()
                }
            )
            .await
        );
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_err());

        hub.disconnect(a).await;
        assert!(
            !hub.send_to(
                a,
                ServerEvent::Error {
                    message: "gone".to_string()
                }
            )
            .await
        );
    }

    #[tokio::test]
    async fn test_metrics_count_deliveries() {
        let hub = Hub::new();
        let room = RoomKey::Business("A".to_string());
        let (a, _rx_a) = hub.connect().await;
        let (b, _rx_b) = hub.connect().await;
        hub.join(a, room.clone()).await;
        hub.join(b, room.clone()).await;

        hub.publish(&room, location_event("e1")).await;

        let snapshot = hub.metrics();
        assert_eq!(snapshot.connections_total, 2);
        assert_eq!(snapshot.events_published, 1);
        assert_eq!(snapshot.events_delivered, 2);
    }

    #[tokio::test]
    async fn test_event_bus_all_handlers_fire() {
        let bus = EventBus::new();
        let mut rx1 = bus.subscribe("gps:location-update").await;
        let mut rx2 = bus.subscribe("gps:location-update").await;
        let mut other = bus.subscribe("notification").await;

        let reached = bus.dispatch(location_event("e1")).await;
        assert_eq!(reached, 2);
        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_ok());
        assert!(other.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_event_bus_dropped_receiver_is_unsubscribed() {
        let bus = EventBus::new();
        let rx = bus.subscribe("connected").await;
        drop(rx);
        let reached = bus
            .dispatch(ServerEvent::Connected {
                message: "hi".to_string(),
            })
            .await;
        assert_eq!(reached, 0);
    }
}
