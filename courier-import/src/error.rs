//! Error types for courier-import
//!
//! Every handler error renders as `{"error": {"code", "message"}}`.

use crate::models::MappingError;
use crate::services::csv_parser::CsvError;
use crate::services::session_controller::ImportError;
use crate::services::submission::SubmissionError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid request (400)
    #[error("Invalid request: {message}")]
    BadRequest { code: &'static str, message: String },

    /// Request conflicts with the session's current state (409)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Upload over the size ceiling (413)
    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),

    /// Upstream order service failed (502)
    #[error("Upstream error: {0}")]
    BadGateway(String),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),

    /// courier-common error
    #[error("Common error: {0}")]
    Common(#[from] courier_common::Error),
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError::BadRequest {
            code: "BAD_REQUEST",
            message: message.into(),
        }
    }
}

impl From<CsvError> for ApiError {
    fn from(err: CsvError) -> Self {
        let code = match err {
            CsvError::EmptyFile => "EMPTY_FILE",
            CsvError::Malformed { .. } => "MALFORMED_CSV",
        };
        ApiError::BadRequest {
            code,
            message: err.to_string(),
        }
    }
}

impl From<MappingError> for ApiError {
    fn from(err: MappingError) -> Self {
        match err {
            MappingError::Frozen => ApiError::Conflict(err.to_string()),
            MappingError::Incomplete(_) => ApiError::BadRequest {
                code: "MAPPING_INCOMPLETE",
                message: err.to_string(),
            },
            _ => ApiError::BadRequest {
                code: "INVALID_MAPPING",
                message: err.to_string(),
            },
        }
    }
}

impl From<SubmissionError> for ApiError {
    fn from(err: SubmissionError) -> Self {
        match err {
            SubmissionError::NoGeocodedRows => ApiError::BadRequest {
                code: "NO_GEOCODED_ROWS",
                message: err.to_string(),
            },
            SubmissionError::Transport(_) | SubmissionError::Rejected { .. } => {
                ApiError::BadGateway(err.to_string())
            }
        }
    }
}

impl From<ImportError> for ApiError {
    fn from(err: ImportError) -> Self {
        match err {
            ImportError::Csv(e) => e.into(),
            ImportError::Mapping(e) => e.into(),
            ImportError::Submission(e) => e.into(),
            ImportError::TooLarge { .. } => ApiError::PayloadTooLarge(err.to_string()),
            ImportError::RowNotFound(_) => ApiError::NotFound(err.to_string()),
            ImportError::InvalidCoordinate(_) => ApiError::BadRequest {
                code: "INVALID_COORDINATE",
                message: err.to_string(),
            },
            ImportError::InvalidStep { .. }
            | ImportError::PickerClosed
            | ImportError::CoordinateLocked(_)
            | ImportError::SubmissionInProgress => ApiError::Conflict(err.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::BadRequest { code, message } => (StatusCode::BAD_REQUEST, code, message),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg),
            ApiError::PayloadTooLarge(msg) => {
                (StatusCode::PAYLOAD_TOO_LARGE, "PAYLOAD_TOO_LARGE", msg)
            }
            ApiError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, "UPSTREAM_ERROR", msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg),
            ApiError::Common(ref err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "COMMON_ERROR",
                err.to_string(),
            ),
        };

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
