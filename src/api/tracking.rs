use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::api::{bad_gateway, bad_request, not_found, ErrorResponse};
use crate::geo::{EtaEstimate, Point};
use crate::live::CrewLocation;
use crate::models::{ClientLocation, TrackingContext, TrackingTarget};
use crate::providers::geocoding::{GeocodeError, GeocodingClient};
use crate::tracking::{TrackingError, TrackingManager};

#[derive(Clone)]
pub struct TrackingState {
    pub manager: Arc<TrackingManager>,
    pub geocoder: Arc<GeocodingClient>,
}

/// Destination of a new tracking context. Either coordinates or an
/// address text must be present; whichever is missing is filled in via
/// the address-search service.
#[derive(Debug, Deserialize, ToSchema)]
pub struct DestinationRequest {
    pub name: String,
    pub address: Option<String>,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateTrackingContextRequest {
    pub business_id: String,
    /// Viewer the context belongs to; alerts go to this user's room
    pub user_id: String,
    /// Follow a whole work order's crew...
    pub work_order_id: Option<String>,
    /// ...or a single employee (exactly one must be set)
    pub employee_id: Option<String>,
    pub destination: Option<DestinationRequest>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TrackingContextResponse {
    #[serde(flatten)]
    pub context: TrackingContext,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CrewLocationsResponse {
    pub crew: Vec<CrewLocation>,
}

/// Create a tracking context binding a viewer to a target.
#[utoipa::path(
    post,
    path = "/api/tracking-contexts",
    request_body = CreateTrackingContextRequest,
    responses(
        (status = 201, description = "Context created", body = TrackingContextResponse),
        (status = 400, description = "Invalid request", body = ErrorResponse),
        (status = 404, description = "Destination address not found", body = ErrorResponse),
        (status = 502, description = "Address-search service failure", body = ErrorResponse)
    ),
    tag = "tracking"
)]
pub async fn create_tracking_context(
    State(state): State<TrackingState>,
    Json(request): Json<CreateTrackingContextRequest>,
) -> Result<(StatusCode, Json<TrackingContextResponse>), (StatusCode, Json<ErrorResponse>)> {
    if request.business_id.is_empty() || request.user_id.is_empty() {
        return Err(bad_request("business_id and user_id must not be empty"));
    }

    let target = match (request.work_order_id, request.employee_id) {
        (Some(id), None) => TrackingTarget::WorkOrder(id),
        (None, Some(id)) => TrackingTarget::Employee(id),
        _ => {
            return Err(bad_request(
                "exactly one of work_order_id or employee_id must be set",
            ))
        }
    };

    let destination = match request.destination {
        Some(dest) => Some(resolve_destination(&state.geocoder, dest).await?),
        None => None,
    };

    let context = TrackingContext {
        id: Uuid::new_v4(),
        business_id: request.business_id,
        user_id: request.user_id,
        target,
        destination,
    };
    state.manager.insert_context(context.clone()).await;

    Ok((
        StatusCode::CREATED,
        Json(TrackingContextResponse { context }),
    ))
}

/// Turn a destination request into a concrete point, geocoding forward
/// when only an address is given and reverse (best-effort) when only
/// coordinates are.
async fn resolve_destination(
    geocoder: &GeocodingClient,
    request: DestinationRequest,
) -> Result<ClientLocation, (StatusCode, Json<ErrorResponse>)> {
    match (request.lat, request.lng, request.address) {
        (Some(lat), Some(lng), address) => {
            if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lng) {
                return Err(bad_request("destination coordinates out of range"));
            }
            let point = Point::new(lat, lng);
            let address = match address {
                Some(address) => Some(address),
                // Fill the display address when we can; a failed reverse
                // lookup is not worth failing the whole context over
                None => match geocoder.reverse(lat, lng).await {
                    Ok(found) => Some(found.display_name),
                    Err(e) => {
                        debug!(error = %e, "reverse geocode for destination failed");
                        None
                    }
                },
            };
            Ok(ClientLocation {
                name: request.name,
                address,
                point,
            })
        }
        (None, None, Some(address)) => match geocoder.search(&address).await {
            Ok(found) => Ok(ClientLocation {
                name: request.name,
                address: Some(found.display_name),
                point: found.point,
            }),
            Err(GeocodeError::AddressNotFound) => Err(not_found("address not found")),
            Err(e) => Err(bad_gateway(format!("address lookup failed: {}", e))),
        },
        _ => Err(bad_request(
            "destination requires coordinates or an address",
        )),
    }
}

/// Fetch a tracking context.
#[utoipa::path(
    get,
    path = "/api/tracking-contexts/{context_id}",
    params(("context_id" = Uuid, Path, description = "Tracking context id")),
    responses(
        (status = 200, description = "The context", body = TrackingContextResponse),
        (status = 404, description = "Unknown context", body = ErrorResponse)
    ),
    tag = "tracking"
)]
pub async fn get_tracking_context(
    State(state): State<TrackingState>,
    Path(context_id): Path<Uuid>,
) -> Result<Json<TrackingContextResponse>, (StatusCode, Json<ErrorResponse>)> {
    state
        .manager
        .context(&context_id)
        .await
        .map(|context| Json(TrackingContextResponse { context }))
        .ok_or_else(|| not_found("tracking context not found"))
}

/// Remove a tracking context.
#[utoipa::path(
    delete,
    path = "/api/tracking-contexts/{context_id}",
    params(("context_id" = Uuid, Path, description = "Tracking context id")),
    responses(
        (status = 204, description = "Context removed"),
        (status = 404, description = "Unknown context", body = ErrorResponse)
    ),
    tag = "tracking"
)]
pub async fn delete_tracking_context(
    State(state): State<TrackingState>,
    Path(context_id): Path<Uuid>,
) -> Result<StatusCode, (StatusCode, Json<ErrorResponse>)> {
    if state.manager.remove_context(&context_id).await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(not_found("tracking context not found"))
    }
}

/// Snapshot of the crew a context currently follows.
#[utoipa::path(
    get,
    path = "/api/crew-location/{context_id}",
    params(("context_id" = Uuid, Path, description = "Tracking context id")),
    responses(
        (status = 200, description = "Current crew locations", body = CrewLocationsResponse),
        (status = 404, description = "Unknown context", body = ErrorResponse)
    ),
    tag = "tracking"
)]
pub async fn get_crew_location(
    State(state): State<TrackingState>,
    Path(context_id): Path<Uuid>,
) -> Result<Json<CrewLocationsResponse>, (StatusCode, Json<ErrorResponse>)> {
    let crew = state
        .manager
        .crew_for_context(&context_id)
        .await
        .map_err(tracking_error)?;
    Ok(Json(CrewLocationsResponse { crew }))
}

/// On-demand ETA for a context, always derived fresh.
#[utoipa::path(
    get,
    path = "/api/eta/{context_id}",
    params(("context_id" = Uuid, Path, description = "Tracking context id")),
    responses(
        (status = 200, description = "Estimated arrival", body = EtaEstimate),
        (status = 404, description = "Unknown context, no destination or no samples yet", body = ErrorResponse)
    ),
    tag = "tracking"
)]
pub async fn get_eta(
    State(state): State<TrackingState>,
    Path(context_id): Path<Uuid>,
) -> Result<Json<EtaEstimate>, (StatusCode, Json<ErrorResponse>)> {
    state
        .manager
        .eta_for_context(&context_id)
        .await
        .map(Json)
        .map_err(tracking_error)
}

fn tracking_error(err: TrackingError) -> (StatusCode, Json<ErrorResponse>) {
    match err {
        TrackingError::UnknownContext | TrackingError::NoDestination | TrackingError::NoSample => {
            not_found(err.to_string())
        }
    }
}

pub fn context_router(state: TrackingState) -> Router {
    Router::new()
        .route(
            "/",
            axum::routing::post(create_tracking_context),
        )
        .route(
            "/{context_id}",
            get(get_tracking_context).delete(delete_tracking_context),
        )
        .with_state(state)
}
