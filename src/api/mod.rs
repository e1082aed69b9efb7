// HTTP and WebSocket APIs

pub mod admin;
pub mod driver;
pub mod websocket;

pub use admin::{create_admin_router, AdminAppState};
pub use driver::{create_driver_router, DriverAppState};
pub use websocket::{create_ws_router, WsAppState};

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;

/// Error response body shared by every surface
#[derive(Serialize)]
pub(crate) struct ErrorResponse {
    pub error: String,
}

/// Application error types mapped onto HTTP statuses
pub(crate) enum ApiError {
    BadRequest(String),
    Unauthorized(String),
    NotFound(String),
    Conflict(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        let body = Json(ErrorResponse {
            error: error_message,
        });
        (status, body).into_response()
    }
}
