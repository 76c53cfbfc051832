//! Error types for the HTTP API

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use ruleforge_core::RuleForgeError;
use serde::Serialize;
use std::fmt;

/// API error type, a thin HTTP-status wrapper around [`RuleForgeError`].
#[derive(Debug)]
pub enum ApiError {
    /// A core engine/façade error.
    Core(RuleForgeError),
    /// The request body did not match the expected shape.
    BadRequest(String),
    /// The service is not ready to serve traffic.
    ServiceUnavailable(String),
}

/// API result type.
pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::Core(e) => write!(f, "{e}"),
            ApiError::BadRequest(msg) => write!(f, "bad request: {msg}"),
            ApiError::ServiceUnavailable(msg) => write!(f, "service unavailable: {msg}"),
        }
    }
}

impl std::error::Error for ApiError {}

impl From<RuleForgeError> for ApiError {
    fn from(err: RuleForgeError) -> Self {
        ApiError::Core(err)
    }
}

/// Maps the closed `RuleForgeError` set onto HTTP status codes (§7).
fn status_for(err: &RuleForgeError) -> (StatusCode, &'static str) {
    match err {
        RuleForgeError::MissingParameters(_) => (StatusCode::BAD_REQUEST, "missing_parameters"),
        RuleForgeError::ParseError(_) => (StatusCode::BAD_REQUEST, "parse_error"),
        RuleForgeError::TypeError(_) => (StatusCode::BAD_REQUEST, "type_error"),
        RuleForgeError::UndefinedVariable(_) => (StatusCode::BAD_REQUEST, "undefined_variable"),
        RuleForgeError::Timeout(_) => (StatusCode::GATEWAY_TIMEOUT, "timeout"),
        RuleForgeError::RouteNotFound(_) => (StatusCode::NOT_FOUND, "route_not_found"),
        RuleForgeError::ConfigurationError(_) => (StatusCode::INTERNAL_SERVER_ERROR, "configuration_error"),
        RuleForgeError::DuplicateName(_) => (StatusCode::CONFLICT, "duplicate_name"),
        RuleForgeError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
        RuleForgeError::DependencyFailed(_) => (StatusCode::BAD_GATEWAY, "dependency_failed"),
        RuleForgeError::Terminated(_) => (StatusCode::INTERNAL_SERVER_ERROR, "terminated"),
        RuleForgeError::Shutdown => (StatusCode::SERVICE_UNAVAILABLE, "shutdown"),
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match self {
            ApiError::Core(e) => {
                let (status, error_type) = status_for(&e);
                (status, error_type, e.to_string())
            }
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            ApiError::ServiceUnavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, "service_unavailable", msg),
        };

        let body = Json(ErrorResponse { error: error_type.to_string(), message });
        (status, body).into_response()
    }
}
