//! Shared test utilities for FTL tests.
//!
//! This crate provides:
//! - [`RecordingVerbClient`]: a verb client that records every call
//! - [`EndpointEchoFactory`]: a client factory whose clients answer with their endpoint
//! - [`MemoryTimeline`]: a timeline sink that keeps events
//! - [`SchemaFactory`] and builders for the schemas the scenarios use
//! - Custom assertion helpers
//!
//! # Example
//!
//! ```rust,ignore
//! use ftl_test_utils::{RecordingVerbClient, SchemaFactory};
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let client = RecordingVerbClient::new();
//!     let module = SchemaFactory::cron_echo("*/2 * * * * * *");
//!     // ... run test ...
//! }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]
#![allow(clippy::must_use_candidate)]
// Test utilities use expect/unwrap for cleaner test code - panics are acceptable in tests
#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::missing_panics_doc)]

pub mod assertions;
pub mod fixtures;
pub mod timeline;
pub mod verbs;

pub use assertions::*;
pub use fixtures::*;
pub use timeline::*;
pub use verbs::*;

/// Initialize test logging (call once per test module).
pub fn init_test_logging() {
    use tracing_subscriber::{EnvFilter, fmt};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("ftl=debug".parse().expect("valid directive")),
        )
        .with_test_writer()
        .try_init();
}
