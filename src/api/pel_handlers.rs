//! PEL bus-object surface, addressed over HTTP instead of D-Bus.
//! Every PEL operation gets one handler here, documented with
//! `#[utoipa::path(..)]` and returning `Response` built from
//! `Result<_, PelError>`.

use std::collections::HashMap;

use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::{PelError, Result};
use crate::host_notifier::RejectReason;
use crate::pel::{FfdcFile, FfdcFormat};
use crate::pel_values::Severity;
use crate::repository::LogId;
use crate::service::{EntryProperties, PelService};

use super::handlers::SuccessResponse;

#[derive(Debug, Deserialize, ToSchema)]
pub struct FfdcFileDto {
    /// One of `json`, `cbor`, `text`, `custom`.
    pub format: String,
    pub subtype: u8,
    pub version: u8,
    pub data: Vec<u8>,
    #[serde(default)]
    pub is_sbe_ffdc: bool,
    #[serde(default)]
    pub is_json_callout: bool,
}

impl FfdcFileDto {
    fn into_ffdc_file(self) -> Result<FfdcFile> {
        let format = match self.format.as_str() {
            "json" => FfdcFormat::Json,
            "cbor" => FfdcFormat::Cbor,
            "text" => FfdcFormat::Text,
            "custom" => FfdcFormat::Custom,
            other => return Err(PelError::InvalidRegistryValue(format!("unknown FFDC format: {other}"))),
        };
        Ok(FfdcFile {
            format,
            subtype: self.subtype,
            version: self.version,
            data: self.data,
            is_sbe_ffdc: self.is_sbe_ffdc,
            is_json_callout: self.is_json_callout,
        })
    }
}

/// Request body for `CreatePELWithFFDCFiles`.
#[derive(Debug, Deserialize, ToSchema)]
pub struct CreatePelRequest {
    /// The registry event name (`xyz.openbmc_project...` style).
    pub message: String,
    /// One of the severity names in `pel_values::Severity::from_name`.
    pub severity: String,
    #[serde(default)]
    pub additional_data: HashMap<String, String>,
    #[serde(default)]
    pub ffdc: Vec<FfdcFileDto>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CreatePelResponse {
    pub obmc_id: u32,
    pub pel_id: u32,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct HostRejectRequest {
    /// `bad_pel` or `host_full`.
    pub reason: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct HardwarePresentRequest {
    pub location_code: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct HardwarePresentResponse {
    pub cleared: usize,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PelIdResponse {
    pub pel_id: u32,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ObmcIdResponse {
    pub obmc_id: u32,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PelJsonResponse {
    pub json: String,
}

/// Lists every PEL currently in the repository, with derived bus
/// properties.
#[utoipa::path(
    get,
    path = "/api/v1/pel/entries",
    responses((status = 200, description = "All PEL entries", body = [EntryProperties])),
    tag = "pel"
)]
pub async fn list_entries(State(service): State<PelService>) -> Json<Vec<EntryProperties>> {
    Json(service.all_entries())
}

/// Per-PEL bus properties: `Hidden`, `Subsystem`, `ManagementSystemAck`,
/// `PlatformLogID`, `Deconfig`, `Guard`, `Timestamp`.
#[utoipa::path(
    get,
    path = "/api/v1/pel/entries/{obmc_id}",
    params(("obmc_id" = u32, Path, description = "OpenBMC log id")),
    responses(
        (status = 200, description = "PEL properties", body = EntryProperties),
        (status = 404, description = "No such PEL", body = super::handlers::ErrorResponse)
    ),
    tag = "pel"
)]
pub async fn get_entry(State(service): State<PelService>, Path(obmc_id): Path<u32>) -> Response {
    match service.entry_properties(obmc_id) {
        Ok(props) => Json(props).into_response(),
        Err(e) => e.into_response(),
    }
}

/// Sets the `ManagementSystemAck` bus property.
#[utoipa::path(
    post,
    path = "/api/v1/pel/entries/{obmc_id}/ack",
    params(("obmc_id" = u32, Path, description = "OpenBMC log id")),
    responses(
        (status = 200, description = "Acknowledged", body = SuccessResponse),
        (status = 404, description = "No such PEL", body = super::handlers::ErrorResponse)
    ),
    tag = "pel"
)]
pub async fn ack_entry(State(service): State<PelService>, Path(obmc_id): Path<u32>) -> Response {
    match service.management_system_ack(obmc_id) {
        Ok(()) => Json(SuccessResponse { message: "acknowledged".to_string() }).into_response(),
        Err(e) => e.into_response(),
    }
}

/// `GetPEL`: the flattened PEL bytes by PEL id.
#[utoipa::path(
    get,
    path = "/api/v1/pel/by-pel-id/{pel_id}/raw",
    params(("pel_id" = u32, Path, description = "PEL id, e.g. 0x50000001")),
    responses(
        (status = 200, description = "Flattened PEL bytes", content_type = "application/octet-stream"),
        (status = 404, description = "No such PEL", body = super::handlers::ErrorResponse)
    ),
    tag = "pel"
)]
pub async fn get_pel_by_pel_id(State(service): State<PelService>, Path(pel_id): Path<u32>) -> Response {
    match service.get_pel(pel_id) {
        Ok(bytes) => ([(axum::http::header::CONTENT_TYPE, "application/octet-stream")], bytes).into_response(),
        Err(e) => e.into_response(),
    }
}

/// `GetPELFromOBMCLogID`.
#[utoipa::path(
    get,
    path = "/api/v1/pel/by-obmc-id/{obmc_id}/raw",
    params(("obmc_id" = u32, Path, description = "OpenBMC log id")),
    responses(
        (status = 200, description = "Flattened PEL bytes", content_type = "application/octet-stream"),
        (status = 404, description = "No such PEL", body = super::handlers::ErrorResponse)
    ),
    tag = "pel"
)]
pub async fn get_pel_by_obmc_id(State(service): State<PelService>, Path(obmc_id): Path<u32>) -> Response {
    match service.get_pel_from_obmc_id(obmc_id) {
        Ok(bytes) => ([(axum::http::header::CONTENT_TYPE, "application/octet-stream")], bytes).into_response(),
        Err(e) => e.into_response(),
    }
}

/// `GetPELIdFromBMCLogId`.
#[utoipa::path(
    get,
    path = "/api/v1/pel/by-obmc-id/{obmc_id}/pel-id",
    params(("obmc_id" = u32, Path, description = "OpenBMC log id")),
    responses(
        (status = 200, description = "PEL id", body = PelIdResponse),
        (status = 404, description = "No such PEL", body = super::handlers::ErrorResponse)
    ),
    tag = "pel"
)]
pub async fn get_pel_id_from_obmc_id(State(service): State<PelService>, Path(obmc_id): Path<u32>) -> Response {
    match service.translate_id(LogId::from_obmc_id(obmc_id)) {
        Ok(entry) => Json(PelIdResponse { pel_id: entry.pel_id }).into_response(),
        Err(e) => e.into_response(),
    }
}

/// `GetBMCLogIdFromPELId`.
#[utoipa::path(
    get,
    path = "/api/v1/pel/by-pel-id/{pel_id}/obmc-id",
    params(("pel_id" = u32, Path, description = "PEL id")),
    responses(
        (status = 200, description = "OpenBMC log id", body = ObmcIdResponse),
        (status = 404, description = "No such PEL", body = super::handlers::ErrorResponse)
    ),
    tag = "pel"
)]
pub async fn get_obmc_id_from_pel_id(State(service): State<PelService>, Path(pel_id): Path<u32>) -> Response {
    match service.translate_id(LogId::from_pel_id(pel_id)) {
        Ok(entry) => Json(ObmcIdResponse { obmc_id: entry.obmc_id }).into_response(),
        Err(e) => e.into_response(),
    }
}

/// `GetPELJSON`: human-readable dump via the injected formatter.
#[utoipa::path(
    get,
    path = "/api/v1/pel/by-obmc-id/{obmc_id}/json",
    params(("obmc_id" = u32, Path, description = "OpenBMC log id")),
    responses(
        (status = 200, description = "Human-readable PEL dump", body = PelJsonResponse),
        (status = 404, description = "No such PEL", body = super::handlers::ErrorResponse)
    ),
    tag = "pel"
)]
pub async fn get_pel_json(State(service): State<PelService>, Path(obmc_id): Path<u32>) -> Response {
    match service.get_pel_json(obmc_id) {
        Ok(json) => Json(PelJsonResponse { json }).into_response(),
        Err(e) => e.into_response(),
    }
}

/// `HostAck`.
#[utoipa::path(
    post,
    path = "/api/v1/pel/host/ack/{pel_id}",
    params(("pel_id" = u32, Path, description = "PEL id")),
    responses(
        (status = 200, description = "Host ack recorded", body = SuccessResponse),
        (status = 404, description = "No such PEL", body = super::handlers::ErrorResponse)
    ),
    tag = "pel"
)]
pub async fn host_ack(State(service): State<PelService>, Path(pel_id): Path<u32>) -> Response {
    match service.host_ack(pel_id).await {
        Ok(()) => Json(SuccessResponse { message: "host ack recorded".to_string() }).into_response(),
        Err(e) => e.into_response(),
    }
}

/// `HostReject`.
#[utoipa::path(
    post,
    path = "/api/v1/pel/host/reject/{pel_id}",
    params(("pel_id" = u32, Path, description = "PEL id")),
    request_body = HostRejectRequest,
    responses(
        (status = 200, description = "Host rejection recorded", body = SuccessResponse),
        (status = 400, description = "Unknown reject reason", body = super::handlers::ErrorResponse),
        (status = 404, description = "No such PEL", body = super::handlers::ErrorResponse)
    ),
    tag = "pel"
)]
pub async fn host_reject(
    State(service): State<PelService>,
    Path(pel_id): Path<u32>,
    Json(body): Json<HostRejectRequest>,
) -> Response {
    let reason = match body.reason.as_str() {
        "bad_pel" => RejectReason::BadPel,
        "host_full" => RejectReason::HostFull,
        other => {
            return PelError::InvalidRegistryValue(format!("unknown reject reason: {other}")).into_response();
        }
    };
    match service.host_reject(pel_id, reason).await {
        Ok(()) => Json(SuccessResponse { message: "host rejection recorded".to_string() }).into_response(),
        Err(e) => e.into_response(),
    }
}

/// `CreatePELWithFFDCFiles`.
#[utoipa::path(
    post,
    path = "/api/v1/pel/create",
    request_body = CreatePelRequest,
    responses(
        (status = 200, description = "PEL created", body = CreatePelResponse),
        (status = 400, description = "Invalid severity or FFDC format", body = super::handlers::ErrorResponse)
    ),
    tag = "pel"
)]
pub async fn create_pel(State(service): State<PelService>, Json(body): Json<CreatePelRequest>) -> Response {
    let severity = match Severity::from_name(&body.severity) {
        Some(s) => s,
        None => {
            return PelError::InvalidRegistryValue(format!("unknown severity: {}", body.severity)).into_response();
        }
    };
    let mut ffdc = Vec::with_capacity(body.ffdc.len());
    for dto in body.ffdc {
        match dto.into_ffdc_file() {
            Ok(f) => ffdc.push(f),
            Err(e) => return e.into_response(),
        }
    }

    match service.create_pel_with_ffdc(body.message, severity, body.additional_data, ffdc).await {
        Ok((obmc_id, pel_id)) => Json(CreatePelResponse { obmc_id, pel_id }).into_response(),
        Err(e) => e.into_response(),
    }
}

/// `HardwarePresent`.
#[utoipa::path(
    post,
    path = "/api/v1/pel/hardware-present",
    request_body = HardwarePresentRequest,
    responses((status = 200, description = "Deconfig flags cleared", body = HardwarePresentResponse)),
    tag = "pel"
)]
pub async fn hardware_present(
    State(service): State<PelService>,
    Json(body): Json<HardwarePresentRequest>,
) -> Response {
    match service.hardware_present(&body.location_code) {
        Ok(cleared) => Json(HardwarePresentResponse { cleared }).into_response(),
        Err(e) => e.into_response(),
    }
}
