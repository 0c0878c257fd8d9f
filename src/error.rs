//! Error kinds shared across the PEL subsystem.
//!
//! Parsing failures never propagate out of a section constructor
//! (they degrade to an invalid section instead), but every
//! other failure mode gets a named variant here so callers - the
//! repository, the registry, the host notifier, and the HTTP handlers -
//! can make a single decision about how to react instead of matching on
//! string messages.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::api::handlers::ErrorResponse;

#[derive(Debug, thiserror::Error)]
pub enum PelError {
    #[error("malformed PEL bytes: {0}")]
    Parse(String),

    #[error("unknown registry value: {0}")]
    InvalidRegistryValue(String),

    #[error("no callouts resolved for entry")]
    NoCallouts,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("no such PEL or OBMC log id: {0}")]
    InvalidArgument(String),

    #[error("host notifier response timed out")]
    Timeout,

    #[error("host rejected PEL with completion code {0}")]
    Protocol(String),

    #[error("ESEL string too short to contain a PEL")]
    TruncatedEsel,

    #[error("{0}")]
    Internal(String),
}

impl Serialize for PelError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl PelError {
    pub fn status(&self) -> StatusCode {
        match self {
            PelError::InvalidArgument(_) => StatusCode::NOT_FOUND,
            PelError::Timeout => StatusCode::GATEWAY_TIMEOUT,
            PelError::InvalidRegistryValue(_) | PelError::NoCallouts | PelError::TruncatedEsel => {
                StatusCode::BAD_REQUEST
            }
            PelError::Io(_) | PelError::Internal(_) | PelError::Protocol(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            PelError::Parse(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for PelError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = ErrorResponse::new(status, self.to_string());
        (status, axum::Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, PelError>;
