//! Error types for web handlers.
//!
//! Domain errors reach HTTP through [`AppError::from_kind`], which applies the
//! shared taxonomy:
//!
//! | Kind | Status |
//! |------|--------|
//! | Validation | 400 |
//! | NotFound | 404 |
//! | Conflict | 409 |
//! | Transient | 503 |
//! | Permanent | 500 |
//! | Credential | 502 |

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use gym_core::ErrorKind;
use serde::Serialize;
use std::fmt;

/// Code for an enrolment refused because the activity is full.
pub const CAPACITY_EXCEEDED: &str = "CAPACITY_EXCEEDED";
/// Code for a capacity change below the current enrolment count.
pub const CAPACITY_CONFLICT: &str = "CAPACITY_CONFLICT";

/// Application error type for web handlers.
///
/// # Examples
///
/// ```ignore
/// async fn handler() -> Result<Json<Payment>, AppError> {
///     let payment = service.get(&id).await
///         .map_err(|e| AppError::from_kind(e.kind(), e.to_string()))?;
///     Ok(Json(payment))
/// }
/// ```
#[derive(Debug)]
pub struct AppError {
    /// HTTP status code
    status: StatusCode,
    /// Error message (user-facing)
    message: String,
    /// Error code (for client error handling)
    code: String,
    /// Internal error (for logging, not exposed to client)
    source: Option<anyhow::Error>,
}

impl AppError {
    /// Create a new application error.
    #[must_use]
    pub const fn new(status: StatusCode, message: String, code: String) -> Self {
        Self {
            status,
            message,
            code,
            source: None,
        }
    }

    /// Map an [`ErrorKind`] to its status and default code.
    #[must_use]
    pub fn from_kind(kind: ErrorKind, message: impl Into<String>) -> Self {
        let status = match kind {
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::Transient => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::Permanent => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorKind::Credential => StatusCode::BAD_GATEWAY,
        };
        Self::new(status, message.into(), kind.code().to_string())
    }

    /// Replace the error code, keeping the status.
    #[must_use]
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = code.into();
        self
    }

    /// Create a new error with a source error.
    #[must_use]
    pub fn with_source(mut self, source: anyhow::Error) -> Self {
        self.source = Some(source);
        self
    }

    /// Create a 400 Bad Request error.
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::from_kind(ErrorKind::Validation, message)
    }

    /// Create a 404 Not Found error.
    #[must_use]
    pub fn not_found(resource: impl fmt::Display, id: impl fmt::Display) -> Self {
        Self::from_kind(ErrorKind::NotFound, format!("{resource} with id {id} not found"))
    }

    /// Create a 500 Internal Server Error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::from_kind(ErrorKind::Permanent, message)
    }

    /// HTTP status.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// Machine-readable code.
    #[must_use]
    pub fn code(&self) -> &str {
        &self.code
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// Error response body (JSON).
#[derive(Debug, Serialize)]
struct ErrorResponse {
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            match &self.source {
                Some(source) => tracing::error!(
                    status = %self.status,
                    code = %self.code,
                    message = %self.message,
                    error = %source,
                    "Request failed"
                ),
                None => tracing::error!(
                    status = %self.status,
                    code = %self.code,
                    message = %self.message,
                    "Request failed"
                ),
            }
        } else {
            tracing::debug!(status = %self.status, code = %self.code, "Request rejected");
        }

        let body = ErrorResponse {
            code: self.code,
            message: self.message,
        };

        (self.status, Json(body)).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::internal("An internal error occurred").with_source(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_map_to_statuses() {
        let cases = [
            (ErrorKind::Validation, StatusCode::BAD_REQUEST),
            (ErrorKind::NotFound, StatusCode::NOT_FOUND),
            (ErrorKind::Conflict, StatusCode::CONFLICT),
            (ErrorKind::Transient, StatusCode::SERVICE_UNAVAILABLE),
            (ErrorKind::Permanent, StatusCode::INTERNAL_SERVER_ERROR),
            (ErrorKind::Credential, StatusCode::BAD_GATEWAY),
        ];
        for (kind, status) in cases {
            assert_eq!(AppError::from_kind(kind, "x").status(), status);
        }
    }

    #[test]
    fn capacity_code_overrides_conflict() {
        let err = AppError::from_kind(ErrorKind::Conflict, "activity 7 is full")
            .with_code(CAPACITY_EXCEEDED);
        assert_eq!(err.status(), StatusCode::CONFLICT);
        assert_eq!(err.to_string(), "[CAPACITY_EXCEEDED] activity 7 is full");
    }

    #[test]
    fn not_found_message() {
        let err = AppError::not_found("Payment", "p-1");
        assert_eq!(err.to_string(), "[NOT_FOUND] Payment with id p-1 not found");
    }
}
