//! Hub activity counters.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Cheap atomic counters for hub activity, surfaced via the health
/// endpoint.
#[derive(Clone, Default)]
pub struct HubMetrics {
    connections_total: Arc<AtomicU64>,
    events_published: Arc<AtomicU64>,
    events_delivered: Arc<AtomicU64>,
}

#[derive(Debug, Clone, Copy)]
pub struct HubMetricsSnapshot {
    /// Connections accepted over the hub's lifetime
    pub connections_total: u64,
    /// Publish calls made
    pub events_published: u64,
    /// Per-member deliveries performed
    pub events_delivered: u64,
}

impl HubMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_connection(&self) {
        self.connections_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_publish(&self, delivered: usize) {
        self.events_published.fetch_add(1, Ordering::Relaxed);
        self.events_delivered
            .fetch_add(delivered as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> HubMetricsSnapshot {
        HubMetricsSnapshot {
            connections_total: self.connections_total.load(Ordering::Relaxed),
            events_published: self.events_published.load(Ordering::Relaxed),
            events_delivered: self.events_delivered.load(Ordering::Relaxed),
        }
    }
}
