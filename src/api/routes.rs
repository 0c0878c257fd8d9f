//! API routing: registers every PEL/health/config handler, the
//! WebSocket events endpoint, and Swagger UI onto one `Router`.

use axum::{
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use super::{handlers, middleware, pel_handlers, ws};
use crate::service::PelService;

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::health,
        handlers::get_config,
        pel_handlers::list_entries,
        pel_handlers::get_entry,
        pel_handlers::ack_entry,
        pel_handlers::get_pel_by_pel_id,
        pel_handlers::get_pel_by_obmc_id,
        pel_handlers::get_pel_id_from_obmc_id,
        pel_handlers::get_obmc_id_from_pel_id,
        pel_handlers::get_pel_json,
        pel_handlers::host_ack,
        pel_handlers::host_reject,
        pel_handlers::create_pel,
        pel_handlers::hardware_present,
    ),
    components(
        schemas(
            crate::config::DaemonConfig,
            handlers::ErrorResponse,
            handlers::SuccessResponse,
            handlers::HealthResponse,
            crate::service::EntryProperties,
            pel_handlers::FfdcFileDto,
            pel_handlers::CreatePelRequest,
            pel_handlers::CreatePelResponse,
            pel_handlers::HostRejectRequest,
            pel_handlers::HardwarePresentRequest,
            pel_handlers::HardwarePresentResponse,
            pel_handlers::PelIdResponse,
            pel_handlers::ObmcIdResponse,
            pel_handlers::PelJsonResponse,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "config", description = "Configuration endpoints"),
        (name = "pel", description = "Platform Event Log bus object surface")
    ),
    info(
        title = "pel-logd",
        version = "0.1.0",
        description = "REST API for Platform Event Log construction, repository, and host notification",
    )
)]
struct ApiDoc;

/// Create the API router
pub fn create_router(service: PelService) -> Router {
    let openapi = ApiDoc::openapi();

    Router::new()
        .route("/health", get(handlers::health))
        .route("/api/v1/config", get(handlers::get_config))
        .route("/api/v1/pel/entries", get(pel_handlers::list_entries))
        .route("/api/v1/pel/entries/{obmc_id}", get(pel_handlers::get_entry))
        .route("/api/v1/pel/entries/{obmc_id}/ack", post(pel_handlers::ack_entry))
        .route("/api/v1/pel/by-pel-id/{pel_id}/raw", get(pel_handlers::get_pel_by_pel_id))
        .route("/api/v1/pel/by-pel-id/{pel_id}/obmc-id", get(pel_handlers::get_obmc_id_from_pel_id))
        .route("/api/v1/pel/by-obmc-id/{obmc_id}/raw", get(pel_handlers::get_pel_by_obmc_id))
        .route("/api/v1/pel/by-obmc-id/{obmc_id}/pel-id", get(pel_handlers::get_pel_id_from_obmc_id))
        .route("/api/v1/pel/by-obmc-id/{obmc_id}/json", get(pel_handlers::get_pel_json))
        .route("/api/v1/pel/host/ack/{pel_id}", post(pel_handlers::host_ack))
        .route("/api/v1/pel/host/reject/{pel_id}", post(pel_handlers::host_reject))
        .route("/api/v1/pel/create", post(pel_handlers::create_pel))
        .route("/api/v1/pel/hardware-present", post(pel_handlers::hardware_present))
        .route("/events", get(ws::events_handler))
        .with_state(service)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", openapi))
        .layer(axum_middleware::from_fn(middleware::request_id_middleware))
        .layer(CorsLayer::permissive())
}
