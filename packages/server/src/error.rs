use std::collections::BTreeMap;

use axum::{
    Json,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use common::storage::StorageError;
use sea_orm::DbErr;
use serde::Serialize;

use crate::dispatch::DispatchError;

/// Structured error response returned by all endpoints on failure.
#[derive(Serialize, utoipa::ToSchema)]
pub struct ErrorBody {
    /// Machine-readable error code. One of: `VALIDATION_ERROR`, `UNAUTHORIZED`,
    /// `PERMISSION_DENIED`, `NOT_FOUND`, `CONFLICT`, `PAYLOAD_TOO_LARGE`,
    /// `RATE_LIMITED`, `INTERNAL_ERROR`.
    #[schema(example = "VALIDATION_ERROR")]
    pub code: &'static str,
    /// Human-readable error description.
    #[schema(example = "testcase is not valid base64")]
    pub message: String,
    /// Per-field problems, when the request could be parsed far enough to
    /// attribute them.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<BTreeMap<String, String>>,
}

/// Application-level error type.
#[derive(Debug)]
pub enum AppError {
    Validation(String),
    /// Validation failure attributed to individual fields.
    InvalidFields(BTreeMap<String, String>),
    Unauthorized,
    PermissionDenied,
    NotFound(String),
    Conflict(String),
    PayloadTooLarge(String),
    /// Rate limit exceeded. Contains seconds until retry is allowed.
    RateLimited {
        retry_after: u64,
    },
    Internal(String),
}

impl AppError {
    pub fn field(name: impl Into<String>, problem: impl Into<String>) -> Self {
        AppError::InvalidFields(BTreeMap::from([(name.into(), problem.into())]))
    }

    fn status_and_body(self) -> (StatusCode, ErrorBody) {
        let body = |code, message: String| ErrorBody {
            code,
            message,
            fields: None,
        };
        match self {
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, body("VALIDATION_ERROR", msg)),
            AppError::InvalidFields(fields) => (
                StatusCode::BAD_REQUEST,
                ErrorBody {
                    code: "VALIDATION_ERROR",
                    message: "Request failed validation".into(),
                    fields: Some(fields),
                },
            ),
            AppError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                body("UNAUTHORIZED", "Invalid or missing credentials".into()),
            ),
            AppError::PermissionDenied => (
                StatusCode::FORBIDDEN,
                body("PERMISSION_DENIED", "Insufficient permissions".into()),
            ),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, body("NOT_FOUND", msg)),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, body("CONFLICT", msg)),
            AppError::PayloadTooLarge(msg) => (
                StatusCode::PAYLOAD_TOO_LARGE,
                body("PAYLOAD_TOO_LARGE", msg),
            ),
            AppError::RateLimited { retry_after } => (
                StatusCode::TOO_MANY_REQUESTS,
                body(
                    "RATE_LIMITED",
                    format!("Rate limit exceeded. Try again in {retry_after} seconds"),
                ),
            ),
            AppError::Internal(detail) => {
                tracing::error!("Internal error: {}", detail);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    body("INTERNAL_ERROR", "An unexpected error occurred".into()),
                )
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let extra_header = match &self {
            AppError::RateLimited { retry_after } => {
                Some((header::RETRY_AFTER, retry_after.to_string()))
            }
            AppError::Unauthorized => Some((
                header::WWW_AUTHENTICATE,
                "Basic realm=\"gauntlet\"".to_string(),
            )),
            _ => None,
        };

        let (status, body) = self.status_and_body();

        match extra_header {
            Some(h) => (status, [h], Json(body)).into_response(),
            None => (status, Json(body)).into_response(),
        }
    }
}

impl From<DbErr> for AppError {
    fn from(err: DbErr) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<DispatchError> for AppError {
    fn from(err: DispatchError) -> Self {
        AppError::Internal(err.to_string())
    }
}
