//! The verb router: module name to live endpoint.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ftl_core::{DeploymentKey, Shutdown};
use ftl_schema::Schema;
use reqwest::Url;
use tokio::sync::mpsc;
use tracing::Instrument;

use super::{CallRequest, CallResponse, VerbClient, VerbClientFactory};
use crate::error::{Error, Result, poison_err};
use crate::fabric::{Event, SchemaView};
use crate::metrics::RuntimeMetrics;

/// Where a module is served.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    /// Module name.
    pub module: String,
    /// Parsed deployment endpoint.
    pub endpoint: Url,
    /// Deployment serving the module.
    pub deployment_key: Option<DeploymentKey>,
    /// Creation time of the routed module version.
    pub create_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct RouteTable {
    by_module: HashMap<String, Route>,
    by_deployment: HashMap<DeploymentKey, String>,
}

impl RouteTable {
    fn from_schema(schema: &Schema) -> Self {
        let mut by_module: HashMap<String, Route> = HashMap::new();
        for module in &schema.modules {
            let Some(endpoint) = module.endpoint() else {
                continue;
            };
            let endpoint = match Url::parse(endpoint) {
                Ok(url) => url,
                Err(err) => {
                    tracing::warn!(
                        module = %module.name,
                        endpoint,
                        error = %err,
                        "ignoring module with invalid endpoint"
                    );
                    continue;
                }
            };
            let route = Route {
                module: module.name.clone(),
                endpoint,
                deployment_key: module.deployment_key().cloned(),
                create_time: module.create_time(),
            };
            match by_module.get(&module.name) {
                Some(held) if held.create_time >= route.create_time => {}
                _ => {
                    by_module.insert(module.name.clone(), route);
                }
            }
        }
        let by_deployment = by_module
            .values()
            .filter_map(|r| r.deployment_key.clone().map(|k| (k, r.module.clone())))
            .collect();
        Self {
            by_module,
            by_deployment,
        }
    }
}

/// Routes verb calls to the current endpoint of their module.
///
/// The route table follows the schema. Clients are created on first use and
/// dropped for a module whenever an event for that module arrives, so the
/// next call builds a client against the new endpoint.
#[derive(Debug)]
pub struct VerbRouter {
    routes: RwLock<RouteTable>,
    clients: Mutex<HashMap<String, Arc<dyn VerbClient>>>,
    factory: Arc<dyn VerbClientFactory>,
    metrics: RuntimeMetrics,
}

impl VerbRouter {
    /// Creates a router with an empty table.
    #[must_use]
    pub fn new(factory: Arc<dyn VerbClientFactory>) -> Self {
        Self {
            routes: RwLock::new(RouteTable::default()),
            clients: Mutex::new(HashMap::new()),
            factory,
            metrics: RuntimeMetrics::new(),
        }
    }

    /// Replaces the route table with one derived from `schema`.
    ///
    /// # Errors
    ///
    /// Returns an error if a lock is poisoned.
    pub fn rebuild(&self, schema: &Schema) -> Result<()> {
        let table = RouteTable::from_schema(schema);
        self.metrics.set_route_table_size(table.by_module.len());
        *self.routes.write().map_err(poison_err)? = table;
        Ok(())
    }

    /// Handles one schema event observed against `schema`.
    ///
    /// # Errors
    ///
    /// Returns an error if a lock is poisoned.
    pub fn apply(&self, schema: &Schema, event: &Event) -> Result<()> {
        // Clients lock is taken before the route table, here and in `client_for`.
        let mut clients = self.clients.lock().map_err(poison_err)?;
        self.rebuild(schema)?;
        let module = event.module_name();
        if clients.remove(module).is_some() {
            tracing::debug!(module, "dropped cached verb client");
        }
        drop(clients);
        tracing::debug!(module, event = event.kind_name(), "route table updated");
        Ok(())
    }

    /// Follows schema events until the channel closes or `shutdown` fires.
    ///
    /// # Errors
    ///
    /// Returns an error if a lock is poisoned.
    pub async fn run(
        &self,
        mut events: mpsc::Receiver<Event>,
        view: SchemaView,
        shutdown: Shutdown,
    ) -> Result<()> {
        self.rebuild(&view.schema())?;
        loop {
            tokio::select! {
                () = shutdown.cancelled() => return Ok(()),
                event = events.recv() => match event {
                    Some(event) => self.apply(&view.schema(), &event)?,
                    None => return Ok(()),
                },
            }
        }
    }

    /// The endpoint serving `module`.
    #[must_use]
    pub fn route_for(&self, module: &str) -> Option<Url> {
        self.routes
            .read()
            .ok()
            .and_then(|t| t.by_module.get(module).map(|r| r.endpoint.clone()))
    }

    /// The endpoint serving the deployment `key`.
    #[must_use]
    pub fn route_for_deployment(&self, key: &DeploymentKey) -> Option<Url> {
        let table = self.routes.read().ok()?;
        let module = table.by_deployment.get(key)?;
        table.by_module.get(module).map(|r| r.endpoint.clone())
    }

    /// The full route for `module`.
    #[must_use]
    pub fn route(&self, module: &str) -> Option<Route> {
        self.routes
            .read()
            .ok()
            .and_then(|t| t.by_module.get(module).cloned())
    }

    /// The cached client for `module`, if one has been created.
    #[must_use]
    pub fn cached_client(&self, module: &str) -> Option<Arc<dyn VerbClient>> {
        self.clients.lock().ok()?.get(module).cloned()
    }

    fn client_for(&self, module: &str) -> Result<Arc<dyn VerbClient>> {
        let mut clients = self.clients.lock().map_err(poison_err)?;
        if let Some(client) = clients.get(module) {
            return Ok(Arc::clone(client));
        }
        let route = self
            .route(module)
            .ok_or_else(|| Error::not_found(format!("route for module {module:?}")))?;
        let client = self.factory.create(module, &route.endpoint)?;
        clients.insert(module.to_string(), Arc::clone(&client));
        drop(clients);
        Ok(client)
    }
}

#[async_trait]
impl VerbClient for VerbRouter {
    async fn call(&self, request: CallRequest) -> Result<CallResponse> {
        let module = request.verb.module.clone();
        let start = Instant::now();
        let client = match self.client_for(&module) {
            Ok(client) => client,
            Err(err) => {
                self.metrics
                    .record_verb_call(&module, "no_route", start.elapsed());
                return Err(err);
            }
        };
        let span = ftl_core::observability::verb_span(&module, &request.verb.name);
        let result = client.call(request).instrument(span).await;
        let outcome = match &result {
            Ok(CallResponse::Body(_)) => "ok",
            Ok(CallResponse::Error { .. }) => "verb_error",
            Err(_) => "failed",
        };
        self.metrics
            .record_verb_call(&module, outcome, start.elapsed());
        result
    }
}
