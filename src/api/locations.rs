use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::post,
    Json, Router,
};
use std::sync::Arc;

use crate::api::{bad_request, ErrorResponse};
use crate::models::LocationSubmission;
use crate::tracking::TrackingManager;

#[derive(Clone)]
pub struct LocationsState {
    pub manager: Arc<TrackingManager>,
}

/// Submit one location sample for a crew member.
///
/// Accepted samples are fanned out to the submitter's business room (and
/// work-order room when scoped); a sample older than the currently-held
/// one for the entity is dropped silently, which still answers 202; the
/// agent fires and forgets either way.
#[utoipa::path(
    post,
    path = "/api/locations/{entity_id}",
    params(
        ("entity_id" = String, Path, description = "Crew member the sample belongs to")
    ),
    request_body = LocationSubmission,
    responses(
        (status = 202, description = "Sample accepted"),
        (status = 400, description = "Malformed sample", body = ErrorResponse)
    ),
    tag = "locations"
)]
pub async fn submit_location(
    State(state): State<LocationsState>,
    Path(entity_id): Path<String>,
    Json(submission): Json<LocationSubmission>,
) -> Result<StatusCode, (StatusCode, Json<ErrorResponse>)> {
    if submission.sample.entity_id != entity_id {
        return Err(bad_request(
            "entity_id in path does not match the submitted sample",
        ));
    }

    state
        .manager
        .ingest(submission)
        .await
        .map_err(|e| bad_request(e.to_string()))?;

    Ok(StatusCode::ACCEPTED)
}

pub fn router(manager: Arc<TrackingManager>) -> Router {
    let state = LocationsState { manager };
    Router::new()
        .route("/{entity_id}", post(submit_location))
        .with_state(state)
}
