//! JSON error responses: `{ "error": <code>, "message": <text> }`.

use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::warn;

use crate::catalog::CatalogError;
use crate::download_queue::JobQueueError;

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Unauthorized,
    Forbidden(String),
    NotFound(String),
    Conflict(String),
    /// Carries the full length of the resource for the `Content-Range` header.
    RangeNotSatisfiable(u64),
    Unavailable(String),
    Internal(String),
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    message: String,
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::RangeNotSatisfiable(_) => StatusCode::RANGE_NOT_SATISFIABLE,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "bad_request",
            ApiError::Unauthorized => "unauthorized",
            ApiError::Forbidden(_) => "forbidden",
            ApiError::NotFound(_) => "not_found",
            ApiError::Conflict(_) => "conflict",
            ApiError::RangeNotSatisfiable(_) => "range_not_satisfiable",
            ApiError::Unavailable(_) => "unavailable",
            ApiError::Internal(_) => "internal",
        }
    }

    fn message(&self) -> String {
        match self {
            ApiError::BadRequest(m)
            | ApiError::Forbidden(m)
            | ApiError::NotFound(m)
            | ApiError::Conflict(m)
            | ApiError::Unavailable(m) => m.clone(),
            ApiError::Unauthorized => "Missing user identity".to_string(),
            ApiError::RangeNotSatisfiable(len) => {
                format!("Requested range is outside the {} byte resource", len)
            }
            // Storage details stay in the logs.
            ApiError::Internal(_) => "Internal server error".to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let ApiError::Internal(detail) = &self {
            warn!("Internal error while serving request: {}", detail);
        }
        let status = self.status();
        let body = Json(ErrorBody {
            error: self.code(),
            message: self.message(),
        });
        match self {
            ApiError::RangeNotSatisfiable(len) => (
                status,
                [(header::CONTENT_RANGE, format!("bytes */{}", len))],
                body,
            )
                .into_response(),
            _ => (status, body).into_response(),
        }
    }
}

impl From<JobQueueError> for ApiError {
    fn from(e: JobQueueError) -> Self {
        match e {
            JobQueueError::NotFound(_) => ApiError::NotFound(e.to_string()),
            JobQueueError::Forbidden(_) => ApiError::Forbidden(e.to_string()),
            JobQueueError::InvalidId(_) | JobQueueError::InvalidRequest(_) => {
                ApiError::BadRequest(e.to_string())
            }
            JobQueueError::IdConflict(_) | JobQueueError::NotCancellable(_) => {
                ApiError::Conflict(e.to_string())
            }
            JobQueueError::Storage(_) => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<CatalogError> for ApiError {
    fn from(e: CatalogError) -> Self {
        match e {
            CatalogError::NotFound(_) => ApiError::NotFound(e.to_string()),
            CatalogError::Busy(_) => ApiError::Unavailable(e.to_string()),
            _ => ApiError::Internal(e.to_string()),
        }
    }
}
