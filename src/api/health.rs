use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;
use std::sync::Arc;
use utoipa::ToSchema;

use crate::tracking::TrackingManager;

#[derive(Clone)]
pub struct HealthState {
    pub manager: Arc<TrackingManager>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// Whether the service is running
    pub healthy: bool,
    /// Currently open hub connections
    pub active_connections: usize,
    /// Rooms with at least one member
    pub active_rooms: usize,
    /// Crew members with a known location
    pub tracked_entities: usize,
    /// Registered tracking contexts
    pub tracking_contexts: usize,
    /// Connections accepted since startup
    pub connections_total: u64,
    /// Events published to rooms since startup
    pub events_published: u64,
    /// Per-member event deliveries since startup
    pub events_delivered: u64,
}

/// Health check endpoint
#[utoipa::path(
    get,
    path = "/api/health",
    responses(
        (status = 200, description = "Service health status", body = HealthResponse)
    ),
    tag = "health"
)]
pub async fn health_check(State(state): State<HealthState>) -> Json<HealthResponse> {
    let hub = state.manager.hub();
    let metrics = hub.metrics();
    let tracked_entities = state.manager.crew_store().read().await.len();
    let tracking_contexts = state.manager.context_store().read().await.len();

    Json(HealthResponse {
        healthy: true,
        active_connections: hub.connection_count().await,
        active_rooms: hub.room_count().await,
        tracked_entities,
        tracking_contexts,
        connections_total: metrics.connections_total,
        events_published: metrics.events_published,
        events_delivered: metrics.events_delivered,
    })
}

pub fn router(manager: Arc<TrackingManager>) -> Router {
    let state = HealthState { manager };
    Router::new().route("/", get(health_check)).with_state(state)
}
