//! Error types and result aliases for FTL.
//!
//! This module defines the closed error taxonomy shared across all FTL
//! components. Every crate-level error exposes an [`ErrorKind`] so transports
//! can translate failures without inspecting messages.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The result type used throughout `ftl-core`.
pub type Result<T> = std::result::Result<T, Error>;

/// Transport-independent classification of a failure.
///
/// The set mirrors the RPC status code space so that any remote failure can be
/// carried through the control plane without loss.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The operation was canceled by the caller.
    Canceled,
    /// The caller's deadline expired.
    DeadlineExceeded,
    /// A ref, route, lease or key is missing.
    NotFound,
    /// A route collision or duplicate declaration.
    AlreadyExists,
    /// The caller lacks permission.
    PermissionDenied,
    /// The caller is not authenticated.
    Unauthenticated,
    /// Malformed ref, schema, pattern or JSON.
    InvalidArgument,
    /// A value is outside its permitted range.
    OutOfRange,
    /// The operation was aborted, typically by a concurrency conflict.
    Aborted,
    /// A schema invariant or other precondition is violated.
    FailedPrecondition,
    /// A lease is held by another client, or a quota is exhausted.
    ResourceExhausted,
    /// The downstream module is offline.
    Unavailable,
    /// The operation is not implemented.
    Unimplemented,
    /// Unexpected IO, decode or protocol failure.
    Internal,
    /// A failure with no more specific classification.
    Unknown,
}

impl ErrorKind {
    /// Returns the stable snake-case code for this kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Canceled => "canceled",
            Self::DeadlineExceeded => "deadline_exceeded",
            Self::NotFound => "not_found",
            Self::AlreadyExists => "already_exists",
            Self::PermissionDenied => "permission_denied",
            Self::Unauthenticated => "unauthenticated",
            Self::InvalidArgument => "invalid_argument",
            Self::OutOfRange => "out_of_range",
            Self::Aborted => "aborted",
            Self::FailedPrecondition => "failed_precondition",
            Self::ResourceExhausted => "resource_exhausted",
            Self::Unavailable => "unavailable",
            Self::Unimplemented => "unimplemented",
            Self::Internal => "internal",
            Self::Unknown => "unknown",
        }
    }

    /// Returns the HTTP status code used when this kind reaches an HTTP client.
    #[must_use]
    pub const fn http_status(self) -> u16 {
        match self {
            Self::Canceled | Self::DeadlineExceeded => 408,
            Self::NotFound | Self::Unimplemented => 404,
            Self::PermissionDenied => 403,
            Self::Unauthenticated => 401,
            Self::Unavailable => 503,
            Self::InvalidArgument | Self::OutOfRange => 400,
            Self::AlreadyExists | Self::Aborted => 409,
            Self::FailedPrecondition => 412,
            Self::ResourceExhausted => 429,
            Self::Internal | Self::Unknown => 500,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can occur in core operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A cron pattern could not be parsed or has no future firing.
    #[error("invalid cron pattern {pattern:?}: {message}")]
    InvalidCronPattern {
        /// The offending pattern text.
        pattern: String,
        /// Description of what is wrong.
        message: String,
    },

    /// A deployment key was malformed.
    #[error("invalid deployment key {key:?}: {message}")]
    InvalidDeploymentKey {
        /// The offending key text.
        key: String,
        /// Description of what is wrong.
        message: String,
    },

    /// Invalid input was provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// An internal error occurred that should not happen in normal operation.
    #[error("internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl Error {
    /// Creates a cron pattern error.
    #[must_use]
    pub fn cron(pattern: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidCronPattern {
            pattern: pattern.into(),
            message: message.into(),
        }
    }

    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns the taxonomy kind for this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidCronPattern { .. }
            | Self::InvalidDeploymentKey { .. }
            | Self::InvalidInput(_) => ErrorKind::InvalidArgument,
            Self::Internal { .. } => ErrorKind::Internal,
        }
    }
}
