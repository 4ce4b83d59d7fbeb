//! Server wiring.
//!
//! One schema subscription drives the verb router and the ingress table, a
//! second drives the cron scheduler. Configuration and secret managers back
//! the admin routes. The lease coordinator is served on `/lease` and the
//! current schema on `/schema`, which another server can follow through an
//! [`HttpSchemaSource`].

use std::path::Path;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::http::header::CONTENT_TYPE;
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use ftl_core::{SharedClock, Shutdown, SystemClock};
use ftl_runtime::configuration::{
    CacheConfig, Configuration, EnvarProvider, InMemoryProvider, InMemoryRouter, Manager,
    Obfuscator, ProviderHandle, Role, Secrets,
};
use ftl_runtime::cron::CronScheduler;
use ftl_runtime::fabric::{
    self, FabricConfig, HttpSchemaSource, InMemorySchemaSource, SchemaSource, SchemaView,
};
use ftl_runtime::lease::LeaseCoordinator;
use ftl_runtime::routing::{HttpVerbClientFactory, VerbClient, VerbRouter};
use ftl_runtime::timeline::{LogTimeline, SharedTimeline};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::cors::{CorsPolicy, cors_middleware};
use crate::error::{ApiError, ApiResult, Error, Result};
use crate::ingress::{IngressRoutes, dispatch};

/// `GET /healthz` body.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// `ok` once the initial schema sync completed, `syncing` before.
    pub status: String,
}

/// Shared state of every handler.
pub struct AppState {
    /// Server configuration.
    pub config: Config,
    /// Ingress routes, following the schema view.
    pub routes: IngressRoutes,
    /// Executes verb calls.
    pub client: Arc<dyn VerbClient>,
    /// Receives ingress events.
    pub timeline: SharedTimeline,
    /// Configuration values.
    pub configuration: Arc<Manager<Configuration>>,
    /// Secret values.
    pub secrets: Arc<Manager<Secrets>>,
    /// Serves lease streams.
    pub leases: Arc<LeaseCoordinator>,
    /// Ends long-lived connections.
    pub shutdown: Shutdown,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &self.config)
            .field("synced", &self.routes.view().is_synced())
            .field("client", &self.client)
            .finish_non_exhaustive()
    }
}

/// A manager with the in-memory router and the `inline` and `envar` providers.
#[must_use]
pub fn default_manager<R: Role>() -> Manager<R> {
    Manager::new(
        Arc::new(InMemoryRouter::new()),
        [
            ProviderHandle::Sync(Arc::new(InMemoryProvider)),
            ProviderHandle::Sync(Arc::new(EnvarProvider::<R>::new())),
        ],
        CacheConfig::default(),
    )
}

impl AppState {
    /// State serving `view` through `client`, with default managers and a
    /// logging timeline.
    #[must_use]
    pub fn new(config: Config, view: SchemaView, client: Arc<dyn VerbClient>) -> Self {
        Self {
            config,
            routes: IngressRoutes::new(view),
            client,
            timeline: LogTimeline::shared(),
            configuration: Arc::new(default_manager()),
            secrets: Arc::new(default_manager()),
            leases: Arc::new(LeaseCoordinator::new(SystemClock::shared())),
            shutdown: Shutdown::new(),
        }
    }

    /// Serves lease streams from `leases`.
    #[must_use]
    pub fn with_leases(mut self, leases: Arc<LeaseCoordinator>) -> Self {
        self.leases = leases;
        self
    }

    /// Closes lease streams when `shutdown` fires.
    #[must_use]
    pub fn with_shutdown(mut self, shutdown: Shutdown) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Replaces the timeline sink.
    #[must_use]
    pub fn with_timeline(mut self, timeline: SharedTimeline) -> Self {
        self.timeline = timeline;
        self
    }

    /// Replaces the configuration manager.
    #[must_use]
    pub fn with_configuration(mut self, manager: Arc<Manager<Configuration>>) -> Self {
        self.configuration = manager;
        self
    }

    /// Replaces the secrets manager.
    #[must_use]
    pub fn with_secrets(mut self, manager: Arc<Manager<Secrets>>) -> Self {
        self.secrets = manager;
        self
    }
}

async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    if state.routes.view().is_synced() {
        (
            StatusCode::OK,
            Json(HealthResponse {
                status: "ok".to_string(),
            }),
        )
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthResponse {
                status: "syncing".to_string(),
            }),
        )
    }
}

async fn schema(State(state): State<Arc<AppState>>) -> ApiResult<Response> {
    let body = ftl_schema::encoding::encode(&state.routes.view().schema())
        .map_err(|e| ApiError::internal(format!("encode schema: {e}")))?;
    Ok(([(CONTENT_TYPE, "application/json")], body).into_response())
}

/// Builds the HTTP router: health, metrics, schema, leases, admin and the
/// ingress fallback.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = Arc::new(CorsPolicy::new(&state.config.cors));
    if cors.enabled() {
        tracing::info!(origins = ?state.config.cors.allow_origins, "CORS configured");
    }
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(crate::metrics::serve_metrics))
        .route("/schema", get(schema))
        .route("/lease", get(crate::lease::lease_stream))
        .nest("/admin", crate::admin::routes())
        .fallback(dispatch)
        // Metrics outermost for timing, then trace, then CORS.
        .layer(middleware::from_fn_with_state(cors, cors_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(crate::metrics::metrics_middleware))
        .with_state(state)
}

/// Loads a JSON schema snapshot into an in-memory source.
///
/// # Errors
///
/// Returns an error if the file cannot be read or decoded.
pub fn load_schema_source(path: &Path) -> Result<InMemorySchemaSource> {
    let bytes = std::fs::read(path).map_err(|source| Error::Server {
        message: format!("read schema {}", path.display()),
        source,
    })?;
    let schema = ftl_schema::encoding::decode(&bytes)?;
    let modules: Vec<_> = schema.modules.into_iter().filter(|m| !m.builtin).collect();
    tracing::info!(path = %path.display(), modules = modules.len(), "loaded schema snapshot");
    Ok(InMemorySchemaSource::from_modules(modules))
}

/// The ingress server process.
#[derive(Debug)]
pub struct Server {
    config: Config,
    source: Option<Arc<dyn SchemaSource>>,
    timeline: SharedTimeline,
    clock: SharedClock,
}

impl Server {
    /// Creates a server. The schema source defaults to the configured schema
    /// URL or snapshot file, or an empty in-memory source.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            config,
            source: None,
            timeline: LogTimeline::shared(),
            clock: SystemClock::shared(),
        }
    }

    /// Follows `source` instead of the configured snapshot.
    #[must_use]
    pub fn with_schema_source(mut self, source: Arc<dyn SchemaSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Sends timeline events to `timeline`.
    #[must_use]
    pub fn with_timeline(mut self, timeline: SharedTimeline) -> Self {
        self.timeline = timeline;
        self
    }

    /// Uses `clock` for the cron scheduler.
    #[must_use]
    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    /// The server configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    fn configured_source(&self) -> Result<Arc<dyn SchemaSource>> {
        if let Some(url) = &self.config.schema_url {
            tracing::info!(%url, "following remote schema");
            return Ok(Arc::new(HttpSchemaSource::new(
                reqwest::Client::new(),
                url.clone(),
            )));
        }
        match &self.config.schema_path {
            Some(path) => Ok(Arc::new(load_schema_source(path)?)),
            None => Ok(Arc::new(InMemorySchemaSource::new())),
        }
    }

    /// Serves until Ctrl-C.
    ///
    /// # Errors
    ///
    /// Returns an error if the schema cannot be loaded or the listener fails.
    pub async fn serve(self) -> Result<()> {
        let shutdown = Shutdown::new();
        let trigger = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("shutdown requested");
                trigger.trigger();
            }
        });
        self.serve_until(shutdown).await
    }

    /// Serves until `shutdown` fires.
    ///
    /// # Errors
    ///
    /// Returns an error if the schema cannot be loaded or the listener fails.
    pub async fn serve_until(self, shutdown: Shutdown) -> Result<()> {
        self.config.validate()?;
        if let Err(error) = crate::metrics::init_metrics() {
            tracing::warn!(%error, "metrics exporter unavailable");
        }

        let source: Arc<dyn SchemaSource> = match &self.source {
            Some(source) => Arc::clone(source),
            None => self.configured_source()?,
        };
        let fabric_config = FabricConfig {
            event_buffer: self.config.event_buffer,
            ..FabricConfig::default()
        };

        let verbs = Arc::new(VerbRouter::new(Arc::new(HttpVerbClientFactory::default())));
        let (router_events, view) =
            fabric::subscribe(Arc::clone(&source), fabric_config, shutdown.clone())
                .into_parts();
        let router_task = {
            let verbs = Arc::clone(&verbs);
            let view = view.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { verbs.run(router_events, view, shutdown).await })
        };

        let (cron_events, cron_view) =
            fabric::subscribe(source, fabric_config, shutdown.clone()).into_parts();
        let scheduler = CronScheduler::new(
            Arc::clone(&self.clock),
            Arc::clone(&verbs) as Arc<dyn VerbClient>,
            Arc::clone(&self.timeline),
        );
        let cron_task = tokio::spawn(scheduler.run(cron_events, cron_view, shutdown.clone()));

        let mut state = AppState::new(self.config.clone(), view, verbs)
            .with_timeline(Arc::clone(&self.timeline))
            .with_leases(Arc::new(LeaseCoordinator::new(Arc::clone(&self.clock))))
            .with_shutdown(shutdown.clone());
        if let Some(key) = &self.config.secret_key {
            let obfuscator = Obfuscator::new(key.as_bytes())?;
            state = state.with_secrets(Arc::new(
                default_manager::<Secrets>().with_obfuscator(obfuscator),
            ));
        }
        let config_sync = state.configuration.start(shutdown.clone());
        let secret_sync = state.secrets.start(shutdown.clone());
        let app = router(Arc::new(state));

        let listener = tokio::net::TcpListener::bind(self.config.bind)
            .await
            .map_err(|source| Error::Server {
                message: format!("bind {}", self.config.bind),
                source,
            })?;
        tracing::info!(bind = %self.config.bind, "ftl ingress listening");

        let graceful = shutdown.clone();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { graceful.cancelled().await })
            .await
            .map_err(|source| Error::Server {
                message: "serve".to_string(),
                source,
            })?;

        shutdown.trigger();
        for task in [config_sync, secret_sync, cron_task] {
            let _ = task.await;
        }
        match router_task.await {
            Ok(result) => result?,
            Err(error) => tracing::warn!(%error, "router task panicked"),
        }
        tracing::info!("ftl ingress stopped");
        Ok(())
    }
}
