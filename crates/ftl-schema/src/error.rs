//! Error types for schema operations.

use std::fmt;
use std::path::PathBuf;

use ftl_core::ErrorKind;

/// The result type used throughout `ftl-schema`.
pub type Result<T> = std::result::Result<T, Error>;

/// One violated schema rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Classification of the violation.
    pub kind: ErrorKind,
    /// Human-readable description, prefixed with the offending location.
    pub message: String,
}

impl ValidationError {
    /// A malformed schema element.
    #[must_use]
    pub fn invalid(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::InvalidArgument,
            message: message.into(),
        }
    }

    /// A duplicate declaration or route.
    #[must_use]
    pub fn duplicate(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::AlreadyExists,
            message: message.into(),
        }
    }

    /// A violated cross-declaration rule.
    #[must_use]
    pub fn precondition(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::FailedPrecondition,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Errors that can occur in schema operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// One or more validation rules were violated.
    #[error("schema validation failed: {}", join(.errors))]
    Validation {
        /// Every violation found, in discovery order.
        errors: Vec<ValidationError>,
    },

    /// Schema JSON could not be decoded.
    #[error("failed to decode schema: {message}")]
    Decode {
        /// Decoder message.
        message: String,
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },

    /// Schema JSON could not be encoded.
    #[error("failed to encode schema: {0}")]
    Encode(#[source] serde_json::Error),

    /// A module configuration file is invalid.
    #[error("invalid module config {path}: {message}")]
    ModuleConfig {
        /// Path of the config file.
        path: PathBuf,
        /// What is wrong.
        message: String,
    },

    /// Reading a file failed.
    #[error("failed to read {path}: {source}")]
    Io {
        /// Path being read.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl Error {
    /// Wraps validation errors; returns `Ok(())` when there are none.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] when `errors` is non-empty.
    pub fn check(errors: Vec<ValidationError>) -> Result<()> {
        if errors.is_empty() {
            Ok(())
        } else {
            Err(Self::Validation { errors })
        }
    }

    /// Returns the error classification.
    ///
    /// A validation failure takes the kind of its first violation.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation { errors } => errors
                .first()
                .map_or(ErrorKind::FailedPrecondition, |e| e.kind),
            Self::Decode { .. } | Self::ModuleConfig { .. } => ErrorKind::InvalidArgument,
            Self::Encode(_) | Self::Io { .. } => ErrorKind::Internal,
        }
    }

    /// Returns the individual violations of a validation failure.
    #[must_use]
    pub fn violations(&self) -> &[ValidationError] {
        match self {
            Self::Validation { errors } => errors,
            _ => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_kind_follows_first_violation() {
        let err = Error::Validation {
            errors: vec![
                ValidationError::duplicate("duplicate verb \"a\""),
                ValidationError::invalid("bad name"),
            ],
        };
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
        assert_eq!(
            err.to_string(),
            "schema validation failed: duplicate verb \"a\"; bad name"
        );
    }

    #[test]
    fn check_passes_empty_lists() {
        assert!(Error::check(Vec::new()).is_ok());
        assert!(Error::check(vec![ValidationError::invalid("x")]).is_err());
    }
}
