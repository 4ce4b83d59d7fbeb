//! Observability infrastructure for FTL.
//!
//! Structured logging with consistent spans. Process-wide subscribers are
//! installed only through [`init_logging`]; nothing in the core installs one
//! implicitly.

use std::str::FromStr;
use std::sync::Once;

use tracing::Span;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::error::Error;

static INIT: Once = Once::new();

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// JSON structured logs (for production).
    Json,
    /// Pretty-printed logs (for development).
    #[default]
    Pretty,
}

impl FromStr for LogFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "pretty" | "text" => Ok(Self::Pretty),
            other => Err(Error::InvalidInput(format!(
                "log format must be json or pretty (got {other})"
            ))),
        }
    }
}

/// Initializes the logging subsystem.
///
/// Call once at application startup. Safe to call multiple times;
/// subsequent calls are no-ops.
///
/// # Environment Variables
///
/// - `RUST_LOG`: Controls log levels (e.g., `info`, `ftl_runtime=debug`)
///
/// # Example
///
/// ```rust
/// use ftl_core::observability::{init_logging, LogFormat};
///
/// init_logging(LogFormat::Pretty);
/// ```
pub fn init_logging(format: LogFormat) {
    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        match format {
            LogFormat::Json => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().json())
                    .init();
            }
            LogFormat::Pretty => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().pretty())
                    .init();
            }
        }
    });
}

/// Creates a span for a verb invocation.
///
/// # Example
///
/// ```rust
/// use ftl_core::observability::verb_span;
///
/// let span = verb_span("echo", "echo");
/// let _guard = span.enter();
/// ```
#[must_use]
pub fn verb_span(module: &str, verb: &str) -> Span {
    tracing::info_span!("verb", module = module, verb = verb)
}

/// Creates a span for schema operations on a module.
#[must_use]
pub fn schema_span(operation: &str, module: &str) -> Span {
    tracing::info_span!("schema", op = operation, module = module)
}
