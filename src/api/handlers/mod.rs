pub mod account;
pub mod auth;
pub mod health;
pub mod oauth;
pub mod passkeys;
pub mod root;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Upper bound applied before any password hashing work.
pub const MAX_PASSWORD_LENGTH: usize = 256;

/// Generic error body. Failure details go to the logs, not the client:
/// authentication endpoints must not reveal which check failed.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
}

pub fn error_response(status: StatusCode, error: &str) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
        }),
    )
        .into_response()
}

pub fn unauthorized() -> Response {
    error_response(StatusCode::UNAUTHORIZED, "unauthorized")
}

pub fn bad_request(error: &str) -> Response {
    error_response(StatusCode::BAD_REQUEST, error)
}

pub fn internal_error() -> Response {
    error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
}
