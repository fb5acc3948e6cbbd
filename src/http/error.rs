use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::core::error::Error;

#[derive(Serialize)]
pub(crate) struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
pub(crate) struct ErrorDetail {
    /// Machine-readable error code (e.g. `DUPLICATE_PORT`).
    code: &'static str,
    /// Human-readable description of the error.
    message: String,
}

/// Standard API error type.
///
/// All variants produce a JSON response matching:
/// `{"error":{"code":"SCREAMING_SNAKE","message":"human-readable"}}`.
#[derive(Debug)]
pub enum ApiError {
    NotFound { code: &'static str, message: String },
    BadRequest { code: &'static str, message: String },
    Internal { code: &'static str, message: String },
}

impl ApiError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::BadRequest {
            code: "VALIDATION_ERROR",
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            Self::NotFound { code, message } => (StatusCode::NOT_FOUND, code, message),
            Self::BadRequest { code, message } => (StatusCode::BAD_REQUEST, code, message),
            Self::Internal { code, message } => (StatusCode::INTERNAL_SERVER_ERROR, code, message),
        };

        (
            status,
            Json(ErrorBody {
                error: ErrorDetail { code, message },
            }),
        )
            .into_response()
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        match &err {
            Error::DuplicatePort(_) => Self::BadRequest {
                code: "DUPLICATE_PORT",
                message: err.to_string(),
            },
            Error::Validation { .. } => Self::validation(err.to_string()),
            Error::ContainerNotFound(_) => Self::NotFound {
                code: "CONTAINER_NOT_FOUND",
                message: err.to_string(),
            },
            Error::Applier { .. } => Self::Internal {
                code: "APPLIER_ERROR",
                message: err.diagnostic().unwrap_or_default().to_string(),
            },
            Error::Io(_) | Error::Serialization(_) | Error::Internal(_) => Self::Internal {
                code: "INTERNAL_ERROR",
                message: err.to_string(),
            },
        }
    }
}
