//! OpenAPI schema generator
//!
//! Generates the OpenAPI JSON spec without starting the daemon or touching external networks.
//! This allows us to freeze the API schema in the repository for CI and client generation.

use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        pel_logd::api::handlers::health,
        pel_logd::api::handlers::get_config,
        pel_logd::api::pel_handlers::list_entries,
        pel_logd::api::pel_handlers::get_entry,
        pel_logd::api::pel_handlers::ack_entry,
        pel_logd::api::pel_handlers::get_pel_by_pel_id,
        pel_logd::api::pel_handlers::get_pel_by_obmc_id,
        pel_logd::api::pel_handlers::get_pel_id_from_obmc_id,
        pel_logd::api::pel_handlers::get_obmc_id_from_pel_id,
        pel_logd::api::pel_handlers::get_pel_json,
        pel_logd::api::pel_handlers::host_ack,
        pel_logd::api::pel_handlers::host_reject,
        pel_logd::api::pel_handlers::create_pel,
        pel_logd::api::pel_handlers::hardware_present,
    ),
    components(
        schemas(
            pel_logd::config::DaemonConfig,
            pel_logd::api::handlers::ErrorResponse,
            pel_logd::api::handlers::SuccessResponse,
            pel_logd::api::handlers::HealthResponse,
            pel_logd::service::EntryProperties,
            pel_logd::api::pel_handlers::FfdcFileDto,
            pel_logd::api::pel_handlers::CreatePelRequest,
            pel_logd::api::pel_handlers::CreatePelResponse,
            pel_logd::api::pel_handlers::HostRejectRequest,
            pel_logd::api::pel_handlers::HardwarePresentRequest,
            pel_logd::api::pel_handlers::HardwarePresentResponse,
            pel_logd::api::pel_handlers::PelIdResponse,
            pel_logd::api::pel_handlers::ObmcIdResponse,
            pel_logd::api::pel_handlers::PelJsonResponse,
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

fn main() {
    let openapi = ApiDoc::openapi();

    let json = serde_json::to_string_pretty(&openapi).expect("Failed to serialize OpenAPI spec");

    let output_path = std::env::args().nth(1).unwrap_or_else(|| "openapi.json".to_string());

    std::fs::write(&output_path, &json)
        .unwrap_or_else(|e| panic!("Failed to write OpenAPI spec to {}: {}", output_path, e));

    eprintln!("OpenAPI spec written to {}", output_path);
}
