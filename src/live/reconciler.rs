//! Merges per-crew location samples into a coherent current-state map.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use tracing::debug;
use utoipa::ToSchema;

use crate::geo::{distance_km, estimate_eta, EtaEstimate, Point};
use crate::models::{CrewStatus, LocationSample};

/// The most recent known state of one crew member. At most one entry per
/// `entity_id` ever exists; updates replace the sample wholesale, never
/// merging fields from an older one.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CrewLocation {
    pub entity_id: String,
    pub display_name: String,
    pub status: CrewStatus,
    /// Tenant this crew member reported under
    pub business_id: String,
    /// Work order the crew member reported under, if any
    pub work_order_id: Option<String>,
    pub sample: LocationSample,
    /// Distance/ETA annotation relative to a destination; refreshed on a
    /// fixed interval, not per sample
    pub eta: Option<EtaEstimate>,
    /// When this entry was last replaced. Stale crews stay visible with
    /// an old timestamp; they are never silently removed
    pub last_updated: DateTime<Utc>,
}

/// Outcome of applying one sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// First sample for this entity
    Inserted,
    /// Replaced an older sample
    Replaced,
    /// Discarded: the held sample has a newer `captured_at`. Expected
    /// with an unordered transport, logged but never surfaced as a fault
    Stale,
}

/// Center and bounding box for a map auto-fit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, ToSchema)]
pub struct Viewport {
    /// Arithmetic mean of all point coordinates
    pub center: Point,
    pub south_west: Point,
    pub north_east: Point,
}

/// Latest-wins view of "where is everyone". Starts empty; entries never
/// expire.
#[derive(Default)]
pub struct Reconciler {
    entries: HashMap<String, CrewLocation>,
}

impl Reconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one sample, replacing the entity's entry wholesale.
    ///
    /// The transport reorders freely, so a sample older than the held one
    /// (by `captured_at`) is discarded rather than allowed to roll the
    /// entity's position backwards.
    pub fn apply_update(
        &mut self,
        sample: LocationSample,
        business_id: &str,
        work_order_id: Option<&str>,
        display_name: Option<&str>,
        status: Option<CrewStatus>,
    ) -> Applied {
        match self.entries.get_mut(&sample.entity_id) {
            Some(held) if sample.captured_at < held.sample.captured_at => {
                debug!(
                    entity_id = %sample.entity_id,
                    held = %held.sample.captured_at,
                    incoming = %sample.captured_at,
                    "discarding stale location update"
                );
                Applied::Stale
            }
            Some(held) => {
                if let Some(name) = display_name {
                    held.display_name = name.to_string();
                }
                if let Some(status) = status {
                    held.status = status;
                }
                held.business_id = business_id.to_string();
                held.work_order_id = work_order_id.map(str::to_string);
                held.sample = sample;
                held.last_updated = Utc::now();
                Applied::Replaced
            }
            None => {
                let entity_id = sample.entity_id.clone();
                self.entries.insert(
                    entity_id.clone(),
                    CrewLocation {
                        display_name: display_name.unwrap_or(&entity_id).to_string(),
                        status: status.unwrap_or(CrewStatus::Active),
                        business_id: business_id.to_string(),
                        work_order_id: work_order_id.map(str::to_string),
                        entity_id,
                        sample,
                        eta: None,
                        last_updated: Utc::now(),
                    },
                );
                Applied::Inserted
            }
        }
    }

    pub fn get(&self, entity_id: &str) -> Option<&CrewLocation> {
        self.entries.get(entity_id)
    }

    pub fn crew(&self) -> impl Iterator<Item = &CrewLocation> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Attach a fresh distance/ETA annotation to one crew entry relative
    /// to `destination`. Callers drive this on a fixed interval to bound
    /// recomputation cost; it is deliberately not part of `apply_update`.
    pub fn annotate_with_eta(
        &mut self,
        entity_id: &str,
        destination: Point,
        avg_speed_kmh: f64,
    ) -> Option<&EtaEstimate> {
        let entry = self.entries.get_mut(entity_id)?;
        let distance = distance_km(entry.sample.position(), destination);
        entry.eta = Some(estimate_eta(distance, avg_speed_kmh));
        entry.eta.as_ref()
    }

    /// Center point and bounds over all known crew positions plus
    /// `extra_points` (destination, trail history). Recomputed wholesale
    /// on every call. `None` when there is nothing to fit.
    pub fn viewport(&self, extra_points: &[Point]) -> Option<Viewport> {
        let points: Vec<Point> = self
            .entries
            .values()
            .map(|c| c.sample.position())
            .chain(extra_points.iter().copied())
            .collect();
        if points.is_empty() {
            return None;
        }

        let count = points.len() as f64;
        let center = Point::new(
            points.iter().map(|p| p.lat).sum::<f64>() / count,
            points.iter().map(|p| p.lng).sum::<f64>() / count,
        );
        let south_west = Point::new(
            points.iter().map(|p| p.lat).fold(f64::INFINITY, f64::min),
            points.iter().map(|p| p.lng).fold(f64::INFINITY, f64::min),
        );
        let north_east = Point::new(
            points.iter().map(|p| p.lat).fold(f64::NEG_INFINITY, f64::max),
            points.iter().map(|p| p.lng).fold(f64::NEG_INFINITY, f64::max),
        );

        Some(Viewport {
            center,
            south_west,
            north_east,
        })
    }
}
