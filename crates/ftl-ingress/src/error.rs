//! Server errors and HTTP error responses.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use ftl_core::ErrorKind;
use serde::{Deserialize, Serialize};

/// Result type for server setup.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors starting or running the server.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A configuration value is invalid.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// What is wrong.
        message: String,
    },

    /// The listener could not be bound or the server failed.
    #[error("server error: {message}")]
    Server {
        /// Description of the failure.
        message: String,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The startup schema could not be loaded.
    #[error(transparent)]
    Schema(#[from] ftl_schema::Error),

    /// A runtime component failed.
    #[error(transparent)]
    Runtime(#[from] ftl_runtime::Error),
}

impl Error {
    /// Creates an [`Error::InvalidConfig`].
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// The taxonomy code of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidConfig { .. } => ErrorKind::InvalidArgument,
            Self::Server { .. } => ErrorKind::Unavailable,
            Self::Schema(e) => e.kind(),
            Self::Runtime(e) => e.kind(),
        }
    }
}

/// HTTP handler result.
pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// JSON error body.
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiErrorBody {
    /// Stable machine-readable code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
}

/// An error written as an HTTP response.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl ApiError {
    /// 400.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
    }

    /// 403.
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, "FORBIDDEN", message)
    }

    /// 404.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", message)
    }

    /// 500.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL", message)
    }

    /// An error returned by the verb itself.
    pub fn verb_error(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "VERB_ERROR", message)
    }

    /// An error with the status and code of `kind`.
    pub fn from_kind(kind: ErrorKind, message: impl Into<String>) -> Self {
        let status =
            StatusCode::from_u16(kind.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        Self::new(status, kind_code(kind), message)
    }

    /// The HTTP status.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// The machine-readable code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        self.code
    }

    /// The message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }
}

pub(crate) fn kind_code(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::Canceled => "CANCELED",
        ErrorKind::DeadlineExceeded => "DEADLINE_EXCEEDED",
        ErrorKind::NotFound => "NOT_FOUND",
        ErrorKind::AlreadyExists => "ALREADY_EXISTS",
        ErrorKind::PermissionDenied => "PERMISSION_DENIED",
        ErrorKind::Unauthenticated => "UNAUTHENTICATED",
        ErrorKind::InvalidArgument => "INVALID_ARGUMENT",
        ErrorKind::OutOfRange => "OUT_OF_RANGE",
        ErrorKind::Aborted => "ABORTED",
        ErrorKind::FailedPrecondition => "FAILED_PRECONDITION",
        ErrorKind::ResourceExhausted => "RESOURCE_EXHAUSTED",
        ErrorKind::Unavailable => "UNAVAILABLE",
        ErrorKind::Unimplemented => "UNIMPLEMENTED",
        ErrorKind::Internal => "INTERNAL",
        ErrorKind::Unknown => "UNKNOWN",
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ApiErrorBody {
                code: self.code.to_string(),
                message: self.message,
            }),
        )
            .into_response()
    }
}

impl From<ftl_runtime::Error> for ApiError {
    fn from(value: ftl_runtime::Error) -> Self {
        Self::from_kind(value.kind(), value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_map_to_http_statuses() {
        let cases = [
            (ErrorKind::Canceled, 408),
            (ErrorKind::DeadlineExceeded, 408),
            (ErrorKind::NotFound, 404),
            (ErrorKind::PermissionDenied, 403),
            (ErrorKind::Unauthenticated, 401),
            (ErrorKind::Unavailable, 503),
            (ErrorKind::InvalidArgument, 400),
            (ErrorKind::OutOfRange, 400),
            (ErrorKind::AlreadyExists, 409),
            (ErrorKind::Aborted, 409),
            (ErrorKind::FailedPrecondition, 412),
            (ErrorKind::ResourceExhausted, 429),
            (ErrorKind::Unimplemented, 404),
            (ErrorKind::Internal, 500),
            (ErrorKind::Unknown, 500),
        ];
        for (kind, status) in cases {
            assert_eq!(ApiError::from_kind(kind, "x").status().as_u16(), status, "{kind:?}");
        }
    }

    #[test]
    fn runtime_errors_keep_their_kind() {
        let err = ApiError::from(ftl_runtime::Error::not_found("route for module \"echo\""));
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
        assert_eq!(err.code(), "NOT_FOUND");
        assert!(err.message().contains("echo"));
    }

    #[test]
    fn response_body_is_json() {
        let response = ApiError::bad_request("nope").into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            response.headers()["content-type"].to_str().unwrap(),
            "application/json"
        );
    }
}
