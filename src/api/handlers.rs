//! General-purpose handlers: health, error shape, and the read-only
//! configuration dump.

use axum::{http::StatusCode, Json};
use serde::Serialize;
use utoipa::ToSchema;

use crate::config::DaemonConfig;
use crate::data_interface::{DataInterface, LocalDataInterface};

/// API error response (RFC 7807 problem+json format), unchanged from
/// the teacher's shape.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub r#type: Option<String>,
    pub title: String,
    pub status: u16,
    pub detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "requestId")]
    pub request_id: Option<String>,
}

impl ErrorResponse {
    pub fn new(status: StatusCode, detail: String) -> Self {
        Self {
            r#type: None,
            title: status.canonical_reason().unwrap_or("Error").to_string(),
            status: status.as_u16(),
            detail,
            instance: None,
            request_id: None,
        }
    }

    pub fn with_request_id(mut self, request_id: Option<String>) -> Self {
        self.request_id = request_id;
        self
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SuccessResponse {
    pub message: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
}

#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Service is healthy", body = HealthResponse)),
    tag = "health"
)]
pub async fn health() -> Json<HealthResponse> {
    let uptime_secs = LocalDataInterface::default().system_info().uptime_secs;
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs,
    })
}

#[utoipa::path(
    get,
    path = "/api/v1/config",
    responses((status = 200, description = "Configuration retrieved", body = DaemonConfig)),
    tag = "config"
)]
pub async fn get_config() -> Json<DaemonConfig> {
    Json(DaemonConfig::from_env())
}
