//! Schema fabric: a replicated, event-sourced view of every module schema.
//!
//! A [`Subscription`] pulls from a [`SchemaSource`], turns each message into an
//! [`Event`], applies it to the subscription's [`SchemaView`] and only then
//! delivers it on a bounded channel. A consumer that reads an event therefore
//! always sees a view that already contains the event's effect. A removal that
//! leaves the module in place (`deleted = false`) is applied but never
//! delivered.
//!
//! ## Initial sync
//!
//! A fresh stream starts with the full snapshot, `more = true` on every message
//! but the last. The view latches "synced" on the first `more = false`. After
//! that every delivered event carries `more = false`, so a reconnect's second
//! snapshot never looks like a new initial sync to the application.
//!
//! ## Reconnect
//!
//! Transport failures (a failed pull, an error item, an ended stream) are
//! logged and retried with exponential backoff capped at
//! [`FabricConfig::reconnect_max`]. A message that cannot be turned into an
//! event ends the subscription with an error.

mod http;
mod source;

use std::sync::{Arc, RwLock};
use std::time::Duration;

use futures::StreamExt;
use ftl_core::{DeploymentKey, Shutdown};
use ftl_schema::{Module, Schema};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

pub use http::{DEFAULT_POLL_INTERVAL, HttpSchemaSource};
pub use source::{
    ChangeType, InMemorySchemaSource, PullSchemaResponse, SchemaSource, SchemaStream,
};

use crate::error::{Error, Result, poison_err};
use crate::metrics::RuntimeMetrics;

/// Default bound of every event channel.
pub const DEFAULT_EVENT_BUFFER: usize = 64;

/// Tuning for a fabric subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FabricConfig {
    /// Capacity of the delivered event channel.
    pub event_buffer: usize,
    /// First reconnect delay.
    pub reconnect_min: Duration,
    /// Reconnect delay ceiling.
    pub reconnect_max: Duration,
}

impl Default for FabricConfig {
    fn default() -> Self {
        Self {
            event_buffer: DEFAULT_EVENT_BUFFER,
            reconnect_min: Duration::from_millis(100),
            reconnect_max: Duration::from_secs(2),
        }
    }
}

/// A schema change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A module was added or replaced.
    Upsert {
        /// Deployment that produced the module version.
        deployment_key: Option<DeploymentKey>,
        /// The new module schema.
        module: Module,
        /// More initial-snapshot events follow.
        more: bool,
    },
    /// A deployment or a whole module went away.
    Remove {
        /// Deployment that was removed.
        deployment_key: Option<DeploymentKey>,
        /// The removed module's last schema.
        module: Module,
        /// The module itself is gone, not only one deployment.
        deleted: bool,
        /// More initial-snapshot events follow.
        more: bool,
    },
}

impl Event {
    /// Name of the module this event concerns.
    #[must_use]
    pub fn module_name(&self) -> &str {
        match self {
            Self::Upsert { module, .. } | Self::Remove { module, .. } => &module.name,
        }
    }

    /// The event's module schema.
    #[must_use]
    pub fn module(&self) -> &Module {
        match self {
            Self::Upsert { module, .. } | Self::Remove { module, .. } => module,
        }
    }

    /// Whether more initial-snapshot events follow.
    #[must_use]
    pub fn more(&self) -> bool {
        match self {
            Self::Upsert { more, .. } | Self::Remove { more, .. } => *more,
        }
    }

    /// Short label used in logs and metrics.
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Upsert { .. } => "upsert",
            Self::Remove { .. } => "remove",
        }
    }

    /// Whether this event takes the module out of the schema.
    #[must_use]
    pub fn is_deletion(&self) -> bool {
        matches!(self, Self::Remove { deleted: true, .. })
    }

    fn clear_more(&mut self) {
        match self {
            Self::Upsert { more, .. } | Self::Remove { more, .. } => *more = false,
        }
    }
}

impl TryFrom<PullSchemaResponse> for Event {
    type Error = Error;

    fn try_from(response: PullSchemaResponse) -> Result<Self> {
        match response.change_type {
            ChangeType::Added | ChangeType::Changed => {
                let module = response.schema.ok_or_else(|| {
                    Error::internal(format!(
                        "schema change for {:?} carries no module",
                        response.module_name
                    ))
                })?;
                Ok(Self::Upsert {
                    deployment_key: response.deployment_key,
                    module,
                    more: response.more,
                })
            }
            ChangeType::Removed => {
                if response.module_name.is_empty() && response.schema.is_none() {
                    return Err(Error::internal("removal names no module"));
                }
                let module = response
                    .schema
                    .unwrap_or_else(|| Module::new(response.module_name));
                Ok(Self::Remove {
                    deployment_key: response.deployment_key,
                    module,
                    deleted: response.module_removed,
                    more: response.more,
                })
            }
        }
    }
}

#[derive(Debug)]
struct ViewState {
    schema: RwLock<Arc<Schema>>,
    synced: watch::Sender<bool>,
}

/// Shared accessor for a subscription's materialised schema.
///
/// Readers get an `Arc` snapshot; the fabric swaps in a new one per event.
#[derive(Debug, Clone)]
pub struct SchemaView {
    inner: Arc<ViewState>,
}

impl Default for SchemaView {
    fn default() -> Self {
        Self::new()
    }
}

impl SchemaView {
    /// Creates an empty, unsynced view.
    #[must_use]
    pub fn new() -> Self {
        Self::from_schema(Schema::new(), false)
    }

    /// Creates a view over a fixed schema.
    #[must_use]
    pub fn from_schema(schema: Schema, synced: bool) -> Self {
        let (synced, _) = watch::channel(synced);
        Self {
            inner: Arc::new(ViewState {
                schema: RwLock::new(Arc::new(schema)),
                synced,
            }),
        }
    }

    /// The current snapshot.
    ///
    /// Returns an empty schema if the lock was poisoned by a panicking writer.
    #[must_use]
    pub fn schema(&self) -> Arc<Schema> {
        self.inner
            .schema
            .read()
            .map(|s| Arc::clone(&s))
            .unwrap_or_default()
    }

    /// Whether the initial snapshot has been fully received.
    #[must_use]
    pub fn is_synced(&self) -> bool {
        *self.inner.synced.borrow()
    }

    /// Waits for the initial snapshot. Returns false if `timeout` passes first.
    pub async fn wait_for_initial_sync(&self, timeout: Duration) -> bool {
        let mut rx = self.inner.synced.subscribe();
        matches!(
            tokio::time::timeout(timeout, rx.wait_for(|synced| *synced)).await,
            Ok(Ok(_))
        )
    }

    fn mark_synced(&self) {
        self.inner.synced.send_if_modified(|synced| {
            let changed = !*synced;
            *synced = true;
            changed
        });
    }

    /// Applies an event to the snapshot.
    ///
    /// Upserts of an older module version than the one held are ignored.
    fn apply(&self, event: &Event) -> Result<()> {
        let mut guard = self.inner.schema.write().map_err(poison_err)?;
        let mut next = Schema::clone(&guard);
        match event {
            Event::Upsert { module, .. } => {
                let stale = next.module(&module.name).is_some_and(|existing| {
                    matches!(
                        (existing.create_time(), module.create_time()),
                        (Some(held), Some(incoming)) if held > incoming
                    )
                });
                if stale {
                    tracing::debug!(module = %module.name, "ignoring older module version");
                } else {
                    next.upsert(module.clone());
                }
            }
            Event::Remove {
                module,
                deleted: true,
                ..
            } => {
                next.remove(&module.name);
            }
            Event::Remove { .. } => {}
        }
        *guard = Arc::new(next);
        drop(guard);
        Ok(())
    }
}

/// Applies events to a view and forwards those consumers act on.
#[derive(Debug, Clone)]
struct Forwarder {
    view: SchemaView,
    tx: mpsc::Sender<Event>,
    metrics: RuntimeMetrics,
}

impl Forwarder {
    /// Returns false once the consumer has gone away.
    async fn deliver(&self, mut event: Event) -> Result<bool> {
        if self.view.is_synced() {
            event.clear_more();
        }
        {
            let _span =
                ftl_core::observability::schema_span(event.kind_name(), event.module_name())
                    .entered();
            self.view.apply(&event)?;
            self.metrics.record_schema_event(event.kind_name());
            if !event.more() {
                self.view.mark_synced();
            }
            tracing::debug!(more = event.more(), "schema event applied");
        }
        if matches!(event, Event::Remove { deleted: false, .. }) {
            // A deployment went away but the module is still served.
            return Ok(!self.tx.is_closed());
        }
        Ok(self.tx.send(event).await.is_ok())
    }
}

/// Handle for in-process producers.
///
/// Each published event updates the paired subscription's view before it is
/// delivered.
#[derive(Debug, Clone)]
pub struct Publisher {
    forwarder: Forwarder,
}

impl Publisher {
    /// Publishes one event. Waits while the event channel is full.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Closed`] if the subscription has been dropped.
    pub async fn publish(&self, event: Event) -> Result<()> {
        if self.forwarder.deliver(event).await? {
            Ok(())
        } else {
            Err(Error::Closed {
                message: "schema subscription".into(),
            })
        }
    }
}

/// One subscriber's event channel and view.
#[derive(Debug)]
pub struct Subscription {
    /// Events in the order the fabric observed them.
    pub events: mpsc::Receiver<Event>,
    /// The materialised schema.
    pub view: SchemaView,
    /// The pull task, if this subscription reads from a source.
    pub task: Option<JoinHandle<Result<()>>>,
}

impl Subscription {
    /// Receives the next event, or `None` once the fabric has stopped.
    pub async fn recv(&mut self) -> Option<Event> {
        self.events.recv().await
    }

    /// Splits off the event channel and the view.
    #[must_use]
    pub fn into_parts(self) -> (mpsc::Receiver<Event>, SchemaView) {
        (self.events, self.view)
    }
}

/// Creates a subscription fed by [`Publisher::publish`].
#[must_use]
pub fn in_process(config: FabricConfig) -> (Publisher, Subscription) {
    let (tx, events) = mpsc::channel(config.event_buffer.max(1));
    let view = SchemaView::new();
    let publisher = Publisher {
        forwarder: Forwarder {
            view: view.clone(),
            tx,
            metrics: RuntimeMetrics::new(),
        },
    };
    let subscription = Subscription {
        events,
        view,
        task: None,
    };
    (publisher, subscription)
}

/// Subscribes to `source`, reconnecting until `shutdown` fires.
#[must_use]
pub fn subscribe(
    source: Arc<dyn SchemaSource>,
    config: FabricConfig,
    shutdown: Shutdown,
) -> Subscription {
    let (tx, events) = mpsc::channel(config.event_buffer.max(1));
    let view = SchemaView::new();
    let forwarder = Forwarder {
        view: view.clone(),
        tx,
        metrics: RuntimeMetrics::new(),
    };
    let task = tokio::spawn(pull_loop(source, forwarder, config, shutdown));
    Subscription {
        events,
        view,
        task: Some(task),
    }
}

/// Sleeps for `delay`. Returns true if shutdown fired first.
async fn backoff_sleep(delay: Duration, shutdown: &Shutdown) -> bool {
    tokio::select! {
        () = shutdown.cancelled() => true,
        () = tokio::time::sleep(delay) => false,
    }
}

async fn pull_loop(
    source: Arc<dyn SchemaSource>,
    forwarder: Forwarder,
    config: FabricConfig,
    shutdown: Shutdown,
) -> Result<()> {
    let mut backoff = config.reconnect_min;
    loop {
        let pulled = tokio::select! {
            () = shutdown.cancelled() => return Ok(()),
            pulled = source.pull() => pulled,
        };
        match pulled {
            Ok(mut stream) => {
                backoff = config.reconnect_min;
                loop {
                    let item = tokio::select! {
                        () = shutdown.cancelled() => return Ok(()),
                        item = stream.next() => item,
                    };
                    let response = match item {
                        None => {
                            tracing::warn!("schema stream ended; reconnecting");
                            break;
                        }
                        Some(Err(err)) => {
                            tracing::warn!(error = %err, "schema stream failed; reconnecting");
                            break;
                        }
                        Some(Ok(response)) => response,
                    };
                    if response.is_sync_marker() {
                        forwarder.view.mark_synced();
                        continue;
                    }
                    let event = Event::try_from(response).inspect_err(|err| {
                        tracing::error!(error = %err, "undecodable schema event");
                    })?;
                    let delivered = tokio::select! {
                        () = shutdown.cancelled() => return Ok(()),
                        delivered = forwarder.deliver(event) => delivered?,
                    };
                    if !delivered {
                        tracing::debug!("schema consumer dropped; stopping");
                        return Ok(());
                    }
                }
            }
            Err(err) => {
                tracing::warn!(
                    error = %err,
                    retry_in_ms = u64::try_from(backoff.as_millis()).unwrap_or(u64::MAX),
                    "schema pull failed"
                );
            }
        }
        if backoff_sleep(backoff, &shutdown).await {
            return Ok(());
        }
        backoff = (backoff * 2).min(config.reconnect_max);
    }
}
