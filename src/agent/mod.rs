//! Device-side location ingestion agent.
//!
//! Continuously samples the device position through a [`PositionSource`]
//! and pushes normalized [`LocationSample`]s to a [`SampleSink`] as
//! fire-and-forget writes. A failed submission is logged and NOT retried:
//! the next periodic fix supersedes it, and only the latest position
//! matters to consumers. The design accepts sample loss over a retry
//! queue.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::models::{LocationSample, LocationSubmission};

/// An unnormalized position fix as reported by the platform watch.
#[derive(Debug, Clone, PartialEq)]
pub struct RawFix {
    pub lat: f64,
    pub lng: f64,
    pub accuracy_meters: f64,
    /// Ground speed in m/s; absent when the device cannot derive one
    pub speed_mps: Option<f64>,
    /// Heading in degrees clockwise from north; absent when unknown
    pub heading_degrees: Option<f64>,
    pub captured_at: DateTime<Utc>,
}

/// Why a position fix could not be obtained. All of these are non-fatal:
/// the platform watch keeps retrying on its own, and the agent keeps
/// waiting for the next fix.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PositionError {
    #[error("position permission denied")]
    PermissionDenied,
    #[error("position unavailable")]
    PositionUnavailable,
    #[error("timed out waiting for a position fix")]
    Timeout,
}

/// Constraints applied to the platform position watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchOptions {
    /// Request the most precise positioning the device offers
    pub high_accuracy: bool,
    /// Maximum acceptable age of a cached fix; zero means never accept a
    /// cached position
    pub max_fix_age: Duration,
    /// How long to wait for a single fix before reporting a timeout
    pub fix_timeout: Duration,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            high_accuracy: true,
            max_fix_age: Duration::ZERO,
            fix_timeout: Duration::from_secs(10),
        }
    }
}

/// The platform seam for continuous position watching. `next_fix` resolves
/// with the next available fix or a typed failure; it may also never
/// resolve (e.g. a pending permission prompt), which is why the agent runs
/// it on its own task and never blocks callers on it.
#[async_trait]
pub trait PositionSource: Send + 'static {
    async fn next_fix(&mut self, options: &WatchOptions) -> Result<RawFix, PositionError>;

    /// Current battery percentage, when the platform exposes one.
    /// Best-effort; the default is unsupported.
    async fn battery_pct(&self) -> Option<f64> {
        None
    }
}

#[derive(Debug, Error)]
#[error("sample submission failed: {0}")]
pub struct SinkError(pub String);

/// Where submitted samples go: the transport hub, an HTTP endpoint, or a
/// test capture.
#[async_trait]
pub trait SampleSink: Send + Sync {
    async fn submit(&self, submission: &LocationSubmission) -> Result<(), SinkError>;
}

/// Submits samples to the tracking server over HTTP.
pub struct HttpSampleSink {
    client: reqwest::Client,
    base_url: String,
}

impl HttpSampleSink {
    pub fn new(base_url: impl Into<String>) -> Result<Self, SinkError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| SinkError(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl SampleSink for HttpSampleSink {
    async fn submit(&self, submission: &LocationSubmission) -> Result<(), SinkError> {
        let url = format!(
            "{}/api/locations/{}",
            self.base_url,
            urlencoding::encode(&submission.sample.entity_id)
        );
        let response = self
            .client
            .post(&url)
            .json(submission)
            .send()
            .await
            .map_err(|e| SinkError(e.to_string()))?;
        if !response.status().is_success() {
            return Err(SinkError(format!("server returned {}", response.status())));
        }
        Ok(())
    }
}

/// Observable state of the agent's watch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentStatus {
    /// No watch is active
    Idle,
    /// The watch is active and producing samples
    Watching,
    /// The watch is active but the last fix attempt failed; shown as a
    /// banner on the ingestion UI while it persists
    Degraded(PositionError),
}

/// Identity the agent stamps on every outgoing submission.
#[derive(Debug, Clone)]
pub struct AgentIdentity {
    pub entity_id: String,
    pub business_id: String,
    pub work_order_id: Option<String>,
    pub display_name: Option<String>,
}

/// The ingestion agent. Owns at most one watch task at a time; `stop` (or
/// drop) cancels it deterministically so no stale-context samples keep
/// flowing after the session ends.
pub struct LocationAgent {
    identity: AgentIdentity,
    options: WatchOptions,
    watch: Option<JoinHandle<()>>,
    status_tx: watch::Sender<AgentStatus>,
}

impl LocationAgent {
    pub fn new(identity: AgentIdentity) -> Self {
        let (status_tx, _) = watch::channel(AgentStatus::Idle);
        Self {
            identity,
            options: WatchOptions::default(),
            watch: None,
            status_tx,
        }
    }

    pub fn set_options(&mut self, options: WatchOptions) {
        self.options = options;
    }

    /// Subscribe to watch-state changes.
    pub fn status(&self) -> watch::Receiver<AgentStatus> {
        self.status_tx.subscribe()
    }

    pub fn is_watching(&self) -> bool {
        self.watch.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Begin continuous position watching. Idempotent: calling while
    /// already started replaces the watch, which re-applies the current
    /// [`WatchOptions`] and nothing else.
    pub fn start<S: PositionSource + Sync>(&mut self, mut source: S, sink: Arc<dyn SampleSink>) {
        if let Some(handle) = self.watch.take() {
            handle.abort();
            debug!(entity_id = %self.identity.entity_id, "restarting position watch");
        }

        let identity = self.identity.clone();
        let options = self.options;
        let status_tx = self.status_tx.clone();

        let handle = tokio::spawn(async move {
            loop {
                match source.next_fix(&options).await {
                    Ok(fix) => {
                        let _ = status_tx.send(AgentStatus::Watching);
                        let battery_pct = source.battery_pct().await;
                        let submission = build_submission(&identity, fix, battery_pct);
                        if let Err(e) = sink.submit(&submission).await {
                            // Fire-and-forget: the next fix supersedes
                            // this sample, so no retry queue
                            warn!(
                                entity_id = %identity.entity_id,
                                error = %e,
                                "sample submission failed, awaiting next fix"
                            );
                        }
                    }
                    Err(e) => {
                        warn!(entity_id = %identity.entity_id, error = %e, "position fix failed");
                        let _ = status_tx.send(AgentStatus::Degraded(e));
                    }
                }
            }
        });

        self.watch = Some(handle);
    }

    /// Cancel the active watch. No further samples are produced until
    /// `start` is called again.
    pub fn stop(&mut self) {
        if let Some(handle) = self.watch.take() {
            handle.abort();
            let _ = self.status_tx.send(AgentStatus::Idle);
            debug!(entity_id = %self.identity.entity_id, "position watch stopped");
        }
    }
}

impl Drop for LocationAgent {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Convert a raw device speed in m/s to km/h.
pub fn mps_to_kmh(speed_mps: f64) -> f64 {
    speed_mps * 3.6
}

fn build_submission(
    identity: &AgentIdentity,
    fix: RawFix,
    battery_pct: Option<f64>,
) -> LocationSubmission {
    LocationSubmission {
        business_id: identity.business_id.clone(),
        work_order_id: identity.work_order_id.clone(),
        display_name: identity.display_name.clone(),
        status: None,
        sample: LocationSample {
            entity_id: identity.entity_id.clone(),
            lat: fix.lat,
            lng: fix.lng,
            accuracy_meters: fix.accuracy_meters,
            speed_kmh: fix.speed_mps.map(mps_to_kmh).unwrap_or(0.0).max(0.0),
            heading_degrees: fix.heading_degrees,
            battery_pct,
            captured_at: fix.captured_at,
        },
    }
}
