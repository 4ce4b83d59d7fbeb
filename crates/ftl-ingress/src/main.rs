//! `ftl-ingress` binary entrypoint.
//!
//! Loads configuration from environment variables and starts the HTTP server.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]

use anyhow::{Context, Result};

use ftl_core::observability::init_logging;
use ftl_ingress::config::Config;
use ftl_ingress::server::Server;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env().context("load configuration")?;
    init_logging(config.log_format());

    if config.schema_path.is_none() && config.schema_url.is_none() {
        tracing::warn!("FTL_SCHEMA_URL not set; starting with an empty schema");
    }

    Server::new(config).serve().await.context("ftl ingress")?;
    Ok(())
}
