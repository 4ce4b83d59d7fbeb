//! # ftl-ingress
//!
//! The HTTP front door of the FTL control plane.
//!
//! - **Ingress**: requests matching a verb's `+ingress http` route are
//!   transcoded into the verb's request type, called through the verb router,
//!   and the verb's response is written back as HTTP
//! - **Admin**: list, read, set and unset configuration and secrets
//! - **Observability**: `/healthz`, Prometheus `/metrics`, request tracing
//!
//! ## Endpoints
//!
//! ```text
//! GET    /healthz                 - 200 once the schema is synced
//! GET    /metrics                 - Prometheus exposition
//! GET    /schema                  - current schema as JSON
//! GET    /lease                   - lease stream (WebSocket)
//! GET    /admin/config            - list configuration
//! GET    /admin/config/{ref}      - read a value
//! PUT    /admin/config/{ref}      - set a value (JSON body)
//! DELETE /admin/config/{ref}      - unset a value
//!        /admin/secrets...        - same for secrets
//! *      anything else            - ingress dispatch
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use ftl_ingress::config::Config;
//! use ftl_ingress::server::Server;
//!
//! Server::new(Config::from_env()?).serve().await?;
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod admin;
pub mod config;
pub mod cors;
pub mod error;
pub mod ingress;
pub mod lease;
pub mod metrics;
pub mod server;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::error::{ApiError, ApiResult};
    pub use crate::server::{AppState, Server, router};
}
