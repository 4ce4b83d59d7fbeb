//! # ftl-runtime
//!
//! The runtime control plane of FTL: everything between a deployed module and
//! the outside world that is not HTTP.
//!
//! This crate provides:
//!
//! - **Schema fabric**: a pull-based stream of module deployments, folded into
//!   a coherent [`fabric::SchemaView`]
//! - **Verb routing**: module name to endpoint resolution and outbound calls
//! - **Cron**: a single-queue scheduler firing verbs on their cron patterns
//! - **Leases**: TTL-bound exclusive locks held by a client stream
//! - **Configuration and secrets**: routers, providers and a synced cache
//!
//! ## Example
//!
//! ```rust
//! use ftl_runtime::fabric::{self, Event, FabricConfig};
//! use ftl_schema::Module;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> ftl_runtime::Result<()> {
//! let (publisher, mut subscription) = fabric::in_process(FabricConfig::default());
//! publisher
//!     .publish(Event::Upsert {
//!         deployment_key: None,
//!         module: Module::new("echo"),
//!         more: false,
//!     })
//!     .await?;
//!
//! let event = subscription.recv().await.expect("event");
//! assert_eq!(event.module_name(), "echo");
//! assert!(subscription.view.schema().module("echo").is_some());
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod configuration;
pub mod cron;
pub mod error;
pub mod fabric;
pub mod lease;
pub mod metrics;
pub mod routing;
pub mod timeline;

pub use error::{Error, Result};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::configuration::{ConfigRef, Configuration, Manager, Secrets};
    pub use crate::cron::CronScheduler;
    pub use crate::error::{Error, Result};
    pub use crate::fabric::{Event, FabricConfig, SchemaView, Subscription};
    pub use crate::lease::LeaseCoordinator;
    pub use crate::metrics::RuntimeMetrics;
    pub use crate::routing::{CallRequest, CallResponse, VerbClient, VerbRouter};
    pub use crate::timeline::{SharedTimeline, TimelineEvent};
}
