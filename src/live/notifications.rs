//! Client-local notification inbox for events delivered over the
//! transport. Purely in-memory for the life of the viewer session.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::models::{NotificationKind, NotificationMessage};

/// The inbox never holds more than this many events; older ones fall off
/// the tail.
pub const INBOX_CAPACITY: usize = 50;

/// One inbox entry. `id` and `read` are local bookkeeping assigned on
/// receipt; only `read` is ever mutated afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationEvent {
    pub id: Uuid,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub read: bool,
}

/// Seam for surfacing an event outside the inbox (native OS notification).
/// Implementations must be best-effort and must never block receipt.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn deliver(&self, event: &NotificationEvent);
}

/// Sink that only logs; used where no platform notification support
/// exists or permission was not granted.
pub struct LogNotificationSink;

#[async_trait]
impl NotificationSink for LogNotificationSink {
    async fn deliver(&self, event: &NotificationEvent) {
        info!(title = %event.title, kind = ?event.kind, "notification received");
    }
}

/// Bounded, deduplicated inbox with unread bookkeeping.
#[derive(Default)]
pub struct NotificationCenter {
    events: VecDeque<NotificationEvent>,
    unread: usize,
    sink: Option<Arc<dyn NotificationSink>>,
}

impl NotificationCenter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inbox that also forwards each accepted event to `sink` on a
    /// detached task, so a slow platform never blocks receipt. Requires a
    /// tokio runtime.
    pub fn with_sink(sink: Arc<dyn NotificationSink>) -> Self {
        Self {
            sink: Some(sink),
            ..Self::default()
        }
    }

    /// Record an incoming event: newest first, capped at
    /// [`INBOX_CAPACITY`], unread count incremented. An event identical
    /// to the current newest (same kind, title and message) is treated as
    /// a transport duplicate and dropped. Returns the local id of the
    /// stored event, or `None` for duplicates.
    pub fn on_event(&mut self, message: NotificationMessage) -> Option<Uuid> {
        if let Some(newest) = self.events.front() {
            if newest.kind == message.kind
                && newest.title == message.title
                && newest.message == message.message
            {
                return None;
            }
        }

        let event = NotificationEvent {
            id: Uuid::new_v4(),
            kind: message.kind,
            title: message.title,
            message: message.message,
            timestamp: message.timestamp,
            read: false,
        };
        let id = event.id;

        if let Some(sink) = &self.sink {
            let sink = sink.clone();
            let event = event.clone();
            tokio::spawn(async move {
                sink.deliver(&event).await;
            });
        }

        self.events.push_front(event);
        self.unread += 1;
        while self.events.len() > INBOX_CAPACITY {
            if let Some(dropped) = self.events.pop_back() {
                if !dropped.read {
                    self.unread -= 1;
                }
            }
        }

        Some(id)
    }

    /// Flip one event to read. Returns false when the id is unknown.
    pub fn mark_read(&mut self, id: Uuid) -> bool {
        match self.events.iter_mut().find(|e| e.id == id) {
            Some(event) => {
                if !event.read {
                    event.read = true;
                    self.unread = self.unread.saturating_sub(1);
                }
                true
            }
            None => false,
        }
    }

    pub fn mark_all_read(&mut self) {
        for event in &mut self.events {
            event.read = true;
        }
        self.unread = 0;
    }

    pub fn clear_all(&mut self) {
        self.events.clear();
        self.unread = 0;
    }

    pub fn unread_count(&self) -> usize {
        self.unread
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Newest-first view of the inbox.
    pub fn events(&self) -> impl Iterator<Item = &NotificationEvent> {
        self.events.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn message(title: &str) -> NotificationMessage {
        NotificationMessage {
            kind: NotificationKind::Info,
            title: title.to_string(),
            message: "body".to_string(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_on_event_prepends_unread() {
        let mut center = NotificationCenter::new();
        center.on_event(message("first"));
        center.on_event(message("second"));

        assert_eq!(center.unread_count(), 2);
        let titles: Vec<&str> = center.events().map(|e| e.title.as_str()).collect();
        assert_eq!(titles, ["second", "first"]);
        assert!(center.events().all(|e| !e.read));
    }

    #[test]
    fn test_inbox_is_bounded() {
        let mut center = NotificationCenter::new();
        for i in 0..INBOX_CAPACITY + 5 {
            center.on_event(message(&format!("n{}", i)));
        }
        assert_eq!(center.len(), INBOX_CAPACITY);
        assert_eq!(center.unread_count(), INBOX_CAPACITY);
        // The oldest events fell off
        assert!(center.events().all(|e| e.title != "n0"));
    }

    #[test]
    fn test_mark_all_read_then_one_event_yields_one_unread() {
        let mut center = NotificationCenter::new();
        center.on_event(message("a"));
        center.on_event(message("b"));
        center.mark_all_read();
        assert_eq!(center.unread_count(), 0);

        center.on_event(message("c"));
        assert_eq!(center.unread_count(), 1);
    }

    #[test]
    fn test_mark_read_never_goes_negative() {
        let mut center = NotificationCenter::new();
        let id = center.on_event(message("a")).unwrap();
        assert!(center.mark_read(id));
        assert_eq!(center.unread_count(), 0);
        // Marking the same event again must not underflow
        assert!(center.mark_read(id));
        assert_eq!(center.unread_count(), 0);
        assert!(!center.mark_read(Uuid::new_v4()));
    }

    #[test]
    fn test_clear_all() {
        let mut center = NotificationCenter::new();
        center.on_event(message("a"));
        center.on_event(message("b"));
        center.clear_all();
        assert!(center.is_empty());
        assert_eq!(center.unread_count(), 0);
    }

    #[test]
    fn test_consecutive_duplicate_is_dropped() {
        let mut center = NotificationCenter::new();
        assert!(center.on_event(message("a")).is_some());
        assert!(center.on_event(message("a")).is_none());
        assert_eq!(center.len(), 1);
        assert_eq!(center.unread_count(), 1);
    }

    struct CountingSink(AtomicUsize);

    #[async_trait]
    impl NotificationSink for CountingSink {
        async fn deliver(&self, _event: &NotificationEvent) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_sink_is_best_effort_fanout() {
        let sink = Arc::new(CountingSink(AtomicUsize::new(0)));
        let mut center = NotificationCenter::with_sink(sink.clone());
        center.on_event(message("a"));
        // Delivery happens on a detached task
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert_eq!(sink.0.load(Ordering::SeqCst), 1);
    }
}
