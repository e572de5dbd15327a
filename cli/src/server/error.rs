//! HTTP error responses and server start-up errors

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use thiserror::Error;

/// JSON body of every error response
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApiError {
    pub error: String,
    pub error_code: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    // Authentication errors (AUTH_xxx)
    AuthMissingToken,
    AuthInvalidToken,

    // Validation errors (VALID_xxx)
    ValidInvalidInput,
    ValidMissingRequiredField,

    // Resource errors (RESOURCE_xxx)
    ResourceNotFound,

    // System errors (SYSTEM_xxx)
    SystemInternalError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::AuthMissingToken => "AUTH_MISSING_TOKEN",
            ErrorCode::AuthInvalidToken => "AUTH_INVALID_TOKEN",
            ErrorCode::ValidInvalidInput => "VALID_INVALID_INPUT",
            ErrorCode::ValidMissingRequiredField => "VALID_MISSING_REQUIRED_FIELD",
            ErrorCode::ResourceNotFound => "RESOURCE_NOT_FOUND",
            ErrorCode::SystemInternalError => "SYSTEM_INTERNAL_ERROR",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorCode::ValidInvalidInput | ErrorCode::ValidMissingRequiredField => {
                StatusCode::BAD_REQUEST
            }
            ErrorCode::AuthMissingToken | ErrorCode::AuthInvalidToken => StatusCode::UNAUTHORIZED,
            ErrorCode::ResourceNotFound => StatusCode::NOT_FOUND,
            ErrorCode::SystemInternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error returned by handlers and middleware
#[derive(Debug)]
pub struct AppError {
    code: ErrorCode,
    message: String,
}

impl AppError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn missing_auth_header() -> Self {
        Self::new(
            ErrorCode::AuthMissingToken,
            "Missing or invalid authorization header",
        )
    }

    pub fn invalid_token() -> Self {
        Self::new(ErrorCode::AuthInvalidToken, "Invalid access token")
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ValidInvalidInput, message)
    }

    pub fn missing_field(field: &str) -> Self {
        Self::new(
            ErrorCode::ValidMissingRequiredField,
            format!("Missing required field: {field}"),
        )
    }

    pub fn not_found(resource: &str) -> Self {
        Self::new(ErrorCode::ResourceNotFound, format!("{resource} not found"))
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::SystemInternalError, message)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(ApiError {
            error: self.message,
            error_code: self.code.as_str().to_string(),
        });

        (self.code.status_code(), body).into_response()
    }
}

pub type ApiResult<T> = Result<T, AppError>;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind HTTP listener on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("HTTP server error: {0}")]
    Serve(#[from] std::io::Error),
}
