use std::sync::Arc;

use axum::{routing::get, Router};
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crewtrack::api;
use crewtrack::config::Config;
use crewtrack::hub::Hub;
use crewtrack::providers::geocoding::GeocodingClient;
use crewtrack::tracking::TrackingManager;

#[derive(OpenApi)]
#[openapi(
    info(title = "Crewtrack API", version = "0.1.0"),
    paths(
        api::locations::submit_location,
        api::tracking::create_tracking_context,
        api::tracking::get_tracking_context,
        api::tracking::delete_tracking_context,
        api::tracking::get_crew_location,
        api::tracking::get_eta,
        api::health::health_check,
    ),
    components(schemas(
        api::ErrorResponse,
        api::tracking::CreateTrackingContextRequest,
        api::tracking::DestinationRequest,
        api::tracking::TrackingContextResponse,
        api::tracking::CrewLocationsResponse,
        api::health::HealthResponse,
        crewtrack::geo::Point,
        crewtrack::geo::EtaEstimate,
        crewtrack::geo::Geofence,
        crewtrack::models::LocationSample,
        crewtrack::models::LocationSubmission,
        crewtrack::models::CrewStatus,
        crewtrack::models::TrackingTarget,
        crewtrack::models::ClientLocation,
        crewtrack::models::TrackingContext,
        crewtrack::models::NotificationKind,
        crewtrack::models::NotificationMessage,
        crewtrack::live::CrewLocation,
    )),
    tags(
        (name = "locations", description = "Location sample ingestion"),
        (name = "tracking", description = "Tracking contexts, crew snapshots and ETA"),
        (name = "health", description = "Service health check")
    )
)]
struct ApiDoc;

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=info".into()),
        )
        .init();

    // Load config
    let config = Config::load("config.yaml").expect("Failed to load config");
    config.tracking.validate();
    tracing::info!(listen_addr = %config.listen_addr, "Loaded configuration");

    // Build CORS layer based on config
    let cors_layer = if config.cors_permissive {
        tracing::warn!("CORS: Permissive mode explicitly enabled (all origins allowed) - DO NOT USE IN PRODUCTION");
        CorsLayer::permissive()
    } else if !config.cors_origins.is_empty() {
        tracing::info!(origins = ?config.cors_origins, "CORS: Restricting to configured origins");
        let origins: Vec<_> = config
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([
                axum::http::Method::GET,
                axum::http::Method::POST,
                axum::http::Method::DELETE,
                axum::http::Method::OPTIONS,
            ])
            .allow_headers([axum::http::header::CONTENT_TYPE])
    } else {
        panic!("CORS configuration error: Either set 'cors_origins' with allowed origins, or set 'cors_permissive: true' for development");
    };

    // Wire up the pipeline
    let hub = Hub::new();
    let geocoder = Arc::new(
        GeocodingClient::new(&config.geocoding).expect("Failed to build geocoding client"),
    );
    let manager = Arc::new(TrackingManager::new(hub.clone(), config.tracking.clone()));

    // Start the recurring alert/ETA evaluation loop in the background
    let manager_clone = manager.clone();
    tokio::spawn(async move {
        manager_clone.start().await;
    });

    // Build the app
    let app = Router::new()
        .route("/", get(root))
        .nest("/api", api::router(hub, manager, geocoder))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer);

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .unwrap_or_else(|e| panic!("Failed to bind to {}: {}", config.listen_addr, e));

    tracing::info!("Server running on http://{}", config.listen_addr);
    tracing::info!("Swagger UI: http://{}/swagger-ui", config.listen_addr);

    axum::serve(listener, app)
        .await
        .expect("Failed to start server");
}

async fn root() -> &'static str {
    "Crewtrack API"
}
