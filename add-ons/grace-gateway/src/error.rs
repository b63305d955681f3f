//! Maps every crate's error type onto the gateway's stable `{kind, reason}` JSON error body
//! with an appropriate HTTP status code, so handlers can just use `?` and let this
//! `IntoResponse` impl do the translation.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use grace_core::GraceError;
use grace_handshake::HandshakeError;
use grace_logic_hub::HubError;
use grace_memory::MemoryError;
use grace_missions::MissionError;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub kind: String,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

#[derive(Debug)]
pub enum ApiError {
    Grace(GraceError),
    Hub(HubError),
    Memory(MemoryError),
    Mission(MissionError),
    Handshake(HandshakeError),
    NotFound(String),
    BadRequest(String),
}

impl From<GraceError> for ApiError {
    fn from(err: GraceError) -> Self {
        ApiError::Grace(err)
    }
}

impl From<HubError> for ApiError {
    fn from(err: HubError) -> Self {
        ApiError::Hub(err)
    }
}

impl From<MemoryError> for ApiError {
    fn from(err: MemoryError) -> Self {
        ApiError::Memory(err)
    }
}

impl From<MissionError> for ApiError {
    fn from(err: MissionError) -> Self {
        ApiError::Mission(err)
    }
}

impl From<HandshakeError> for ApiError {
    fn from(err: HandshakeError) -> Self {
        ApiError::Handshake(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind, reason, update_id): (StatusCode, &str, String, Option<String>) =
            match self {
                ApiError::Grace(GraceError::ComponentNotFound(id)) => (
                    StatusCode::NOT_FOUND,
                    "component_not_found",
                    format!("component not found: {id}"),
                    Some(id),
                ),
                ApiError::Grace(GraceError::NoPortAvailable) => (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "no_port_available",
                    "no port available in configured range".into(),
                    None,
                ),
                ApiError::Grace(GraceError::GovernanceDenied { policy_id, reason }) => (
                    StatusCode::FORBIDDEN,
                    "governance_denied",
                    format!("{policy_id}: {reason}"),
                    None,
                ),
                ApiError::Grace(GraceError::StateError {
                    component_id,
                    from,
                    to,
                }) => (
                    StatusCode::CONFLICT,
                    "state_error",
                    format!("{component_id}: {from} -> {to}"),
                    Some(component_id),
                ),
                ApiError::Grace(err) => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "grace_error", err.to_string(), None)
                }
                ApiError::Hub(HubError::NotFound(id)) => (
                    StatusCode::NOT_FOUND,
                    "update_not_found",
                    format!("update not found: {id}"),
                    Some(id),
                ),
                ApiError::Hub(HubError::GovernanceDenied { policy_id, reason }) => (
                    StatusCode::FORBIDDEN,
                    "governance_denied",
                    format!("{policy_id}: {reason}"),
                    None,
                ),
                ApiError::Hub(HubError::ValidationFailed(diag)) => (
                    StatusCode::UNPROCESSABLE_ENTITY,
                    "validation_failed",
                    diag.messages.join("; "),
                    None,
                ),
                ApiError::Hub(HubError::StateError { update_id, from, to }) => (
                    StatusCode::CONFLICT,
                    "state_error",
                    format!("{from} -> {to}"),
                    Some(update_id),
                ),
                ApiError::Hub(HubError::Timeout { stage, millis }) => (
                    StatusCode::GATEWAY_TIMEOUT,
                    "timeout",
                    format!("stage {stage} timed out after {millis}ms"),
                    None,
                ),
                ApiError::Hub(HubError::IngestionRejected) => (
                    StatusCode::PAYLOAD_TOO_LARGE,
                    "ingestion_rejected",
                    "payload malformed or oversized".into(),
                    None,
                ),
                ApiError::Hub(err) => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "hub_error", err.to_string(), None)
                }
                ApiError::Memory(MemoryError::MemoryAccessDenied { reason }) => {
                    (StatusCode::FORBIDDEN, "memory_access_denied", reason, None)
                }
                ApiError::Memory(MemoryError::MemoryBackendUnavailable) => (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "memory_backend_unavailable",
                    "no memory backend available".into(),
                    None,
                ),
                ApiError::Memory(err) => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "memory_error", err.to_string(), None)
                }
                ApiError::Mission(MissionError::NotFound(id)) => (
                    StatusCode::NOT_FOUND,
                    "mission_not_found",
                    format!("not found: {id}"),
                    Some(id),
                ),
                ApiError::Mission(MissionError::CapaStateError { capa_id, from, to }) => (
                    StatusCode::CONFLICT,
                    "capa_state_error",
                    format!("{from} -> {to}"),
                    Some(capa_id),
                ),
                ApiError::Mission(err) => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "mission_error", err.to_string(), None)
                }
                ApiError::Handshake(HandshakeError::Hub(hub_err)) => {
                    return ApiError::Hub(hub_err).into_response();
                }
                ApiError::NotFound(reason) => (StatusCode::NOT_FOUND, "not_found", reason, None),
                ApiError::BadRequest(reason) => {
                    (StatusCode::BAD_REQUEST, "bad_request", reason, None)
                }
            };

        let body = ErrorResponse {
            kind: kind.to_string(),
            reason,
            update_id,
            session_id: None,
        };
        (status, Json(body)).into_response()
    }
}
