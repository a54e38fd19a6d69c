pub mod error;
pub mod health;
pub mod locations;
pub mod tracking;
pub mod ws;

pub use error::{bad_gateway, bad_request, internal_error, not_found, ErrorResponse};

use axum::{routing::get, Router};
use std::sync::Arc;

use crate::hub::Hub;
use crate::providers::geocoding::GeocodingClient;
use crate::tracking::TrackingManager;

pub fn router(
    hub: Hub,
    manager: Arc<TrackingManager>,
    geocoder: Arc<GeocodingClient>,
) -> Router {
    let ws_state = ws::WsState {
        hub,
        manager: manager.clone(),
    };
    let tracking_state = tracking::TrackingState {
        manager: manager.clone(),
        geocoder,
    };

    Router::new()
        .nest("/locations", locations::router(manager.clone()))
        .nest(
            "/tracking-contexts",
            tracking::context_router(tracking_state.clone()),
        )
        .route(
            "/crew-location/{context_id}",
            get(tracking::get_crew_location).with_state(tracking_state.clone()),
        )
        .route(
            "/eta/{context_id}",
            get(tracking::get_eta).with_state(tracking_state),
        )
        .nest("/health", health::router(manager))
        .route("/ws", get(ws::ws_tracking).with_state(ws_state))
}
