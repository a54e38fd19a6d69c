//! Viewer-side live state: the reconciler that merges the transport's
//! event stream into a current map view, and the notification inbox that
//! rides the same transport.

pub mod notifications;
pub mod reconciler;
pub mod session;

pub use notifications::{NotificationCenter, NotificationEvent, NotificationSink};
pub use reconciler::{Applied, CrewLocation, Reconciler, Viewport};
pub use session::ViewerSession;
