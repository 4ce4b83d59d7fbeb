//! # ftl-core
//!
//! Core primitives shared by every FTL control plane component.
//!
//! This crate provides:
//!
//! - **Error taxonomy**: [`ErrorKind`] codes and their HTTP mapping
//! - **Time**: the [`Clock`] collaborator with system and manual implementations
//! - **Cron patterns**: parsing and next-firing computation for extended cron syntax
//! - **Deployment keys**: strongly-typed keys identifying running module instances
//! - **Observability**: logging initialization and span helpers
//! - **Shutdown**: a cloneable cancellation signal for long-lived tasks
//!
//! ## Crate Boundary
//!
//! `ftl-core` has no knowledge of the schema or of any transport. Higher crates
//! build on these primitives.
//!
//! ## Example
//!
//! ```rust
//! use ftl_core::prelude::*;
//!
//! let pattern = Pattern::parse("*/5 * * * * * *").unwrap();
//! assert_eq!(pattern.to_string(), "*/5 * * * * * *");
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod clock;
pub mod cron;
pub mod deployment;
pub mod error;
pub mod observability;
pub mod shutdown;

/// Prelude module for convenient imports.
///
/// # Example
///
/// ```rust
/// use ftl_core::prelude::*;
/// ```
pub mod prelude {
    pub use crate::clock::{Clock, ManualClock, SystemClock};
    pub use crate::cron::Pattern;
    pub use crate::deployment::DeploymentKey;
    pub use crate::error::{Error, ErrorKind, Result};
    pub use crate::shutdown::Shutdown;
}

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use cron::Pattern;
pub use deployment::DeploymentKey;
pub use error::{Error, ErrorKind, Result};
pub use shutdown::Shutdown;
