//! Error types for the runtime control plane.

use std::sync::PoisonError;

use ftl_core::ErrorKind;

/// The result type used throughout `ftl-runtime`.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in runtime operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A route, ref, key or lease was not found.
    #[error("{what} not found")]
    NotFound {
        /// What was looked up.
        what: String,
    },

    /// Malformed input: a ref, an accessor key, a JSON value.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Description of what is wrong.
        message: String,
    },

    /// A precondition does not hold, such as a missing provider.
    #[error("failed precondition: {message}")]
    FailedPrecondition {
        /// Description of the violated precondition.
        message: String,
    },

    /// A lease is held by someone else.
    #[error("resource exhausted: {message}")]
    ResourceExhausted {
        /// Description of the contended resource.
        message: String,
    },

    /// The downstream module or service could not be reached.
    #[error("unavailable: {message}")]
    Unavailable {
        /// Description of the failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The caller waited too long.
    #[error("deadline exceeded: {message}")]
    DeadlineExceeded {
        /// What was being waited for.
        message: String,
    },

    /// A consumer or producer went away.
    #[error("channel closed: {message}")]
    Closed {
        /// Which channel.
        message: String,
    },

    /// Unexpected decode or protocol failure.
    #[error("internal error: {message}")]
    Internal {
        /// Description of the failure.
        message: String,
    },

    /// An error from the schema layer.
    #[error("schema error: {0}")]
    Schema(#[from] ftl_schema::Error),

    /// An error from ftl-core.
    #[error("core error: {0}")]
    Core(#[from] ftl_core::Error),
}

impl Error {
    /// Creates a not-found error.
    #[must_use]
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    /// Creates an invalid-argument error.
    #[must_use]
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates a failed-precondition error.
    #[must_use]
    pub fn precondition(message: impl Into<String>) -> Self {
        Self::FailedPrecondition {
            message: message.into(),
        }
    }

    /// Creates an unavailable error with a source.
    #[must_use]
    pub fn unavailable_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Unavailable {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns the error classification.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::InvalidArgument { .. } => ErrorKind::InvalidArgument,
            Self::FailedPrecondition { .. } => ErrorKind::FailedPrecondition,
            Self::ResourceExhausted { .. } => ErrorKind::ResourceExhausted,
            Self::Unavailable { .. } => ErrorKind::Unavailable,
            Self::DeadlineExceeded { .. } => ErrorKind::DeadlineExceeded,
            Self::Closed { .. } => ErrorKind::Canceled,
            Self::Internal { .. } => ErrorKind::Internal,
            Self::Schema(e) => e.kind(),
            Self::Core(e) => e.kind(),
        }
    }
}

/// Converts a lock poison error to an internal error.
pub(crate) fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::internal("lock poisoned")
}

#[cfg(test)]
mod tests {
    use std::error::Error as StdError;

    use super::*;

    #[test]
    fn kinds_map_to_taxonomy() {
        assert_eq!(Error::not_found("route for echo").kind(), ErrorKind::NotFound);
        assert_eq!(
            Error::ResourceExhausted {
                message: "lease x".into()
            }
            .kind(),
            ErrorKind::ResourceExhausted
        );
        assert_eq!(Error::invalid("bad").kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn unavailable_keeps_source() {
        let source = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = Error::unavailable_with_source("calling echo.echo", source);
        assert!(err.to_string().contains("calling echo.echo"));
        assert!(StdError::source(&err).is_some());
    }

    #[test]
    fn not_found_display() {
        assert_eq!(Error::not_found("route for time").to_string(), "route for time not found");
    }
}
