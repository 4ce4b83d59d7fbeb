//! Schema stream sources.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::{self, BoxStream};
use ftl_core::DeploymentKey;
use ftl_schema::Module;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, mpsc};

use crate::error::{Error, Result};

/// How a module changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeType {
    /// First time this module is seen.
    Added,
    /// A new version of a known module.
    Changed,
    /// The module went away.
    Removed,
}

/// One message of the schema pull stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullSchemaResponse {
    /// The module this message is about. Empty for the empty-snapshot marker.
    pub module_name: String,
    /// The deployment that produced the change.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment_key: Option<DeploymentKey>,
    /// The module schema. Required for additions and changes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<Module>,
    /// Kind of change.
    pub change_type: ChangeType,
    /// More initial-snapshot messages follow.
    pub more: bool,
    /// The module was removed, not just one of its deployments.
    #[serde(default)]
    pub module_removed: bool,
}

impl PullSchemaResponse {
    /// The message sent when the initial snapshot is empty.
    #[must_use]
    pub fn sync_marker() -> Self {
        Self {
            module_name: String::new(),
            deployment_key: None,
            schema: None,
            change_type: ChangeType::Changed,
            more: false,
            module_removed: false,
        }
    }

    /// Whether this is the empty-snapshot marker.
    #[must_use]
    pub fn is_sync_marker(&self) -> bool {
        self.module_name.is_empty() && self.schema.is_none()
    }
}

/// Stream of pull responses. An `Err` item is a transport failure.
pub type SchemaStream = BoxStream<'static, Result<PullSchemaResponse>>;

/// Something that can stream schema changes, usually a remote schema service.
#[async_trait]
pub trait SchemaSource: Send + Sync + fmt::Debug {
    /// Opens a new stream. It starts with the full current snapshot.
    async fn pull(&self) -> Result<SchemaStream>;
}

#[derive(Debug, Default)]
struct SourceState {
    modules: BTreeMap<String, (Module, Option<DeploymentKey>)>,
    subscribers: Vec<mpsc::Sender<Result<PullSchemaResponse>>>,
}

/// An in-process schema source.
///
/// Publishing waits for every live subscriber to accept the message, so a
/// slow consumer slows the publisher.
#[derive(Debug)]
pub struct InMemorySchemaSource {
    state: Mutex<SourceState>,
    capacity: usize,
}

impl Default for InMemorySchemaSource {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemorySchemaSource {
    /// Creates an empty source.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(super::DEFAULT_EVENT_BUFFER)
    }

    /// Creates an empty source whose per-subscriber buffers hold `capacity` messages.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            state: Mutex::new(SourceState::default()),
            capacity: capacity.max(1),
        }
    }

    /// Creates a source pre-populated with `modules`.
    #[must_use]
    pub fn from_modules(modules: impl IntoIterator<Item = Module>) -> Self {
        let mut state = SourceState::default();
        for module in modules {
            let key = module.deployment_key().cloned();
            state.modules.insert(module.name.clone(), (module, key));
        }
        Self {
            state: Mutex::new(state),
            capacity: super::DEFAULT_EVENT_BUFFER,
        }
    }

    /// Adds or replaces a module and notifies subscribers.
    pub async fn upsert(&self, module: Module) {
        let mut state = self.state.lock().await;
        let key = module.deployment_key().cloned();
        let change_type = if state.modules.contains_key(&module.name) {
            ChangeType::Changed
        } else {
            ChangeType::Added
        };
        state
            .modules
            .insert(module.name.clone(), (module.clone(), key.clone()));
        let response = PullSchemaResponse {
            module_name: module.name.clone(),
            deployment_key: key,
            schema: Some(module),
            change_type,
            more: false,
            module_removed: false,
        };
        broadcast(&mut state, response).await;
    }

    /// Removes a module and notifies subscribers. Returns false if unknown.
    pub async fn remove(&self, name: &str) -> bool {
        let mut state = self.state.lock().await;
        let Some((module, key)) = state.modules.remove(name) else {
            return false;
        };
        let response = PullSchemaResponse {
            module_name: module.name.clone(),
            deployment_key: key,
            schema: Some(module),
            change_type: ChangeType::Removed,
            more: false,
            module_removed: true,
        };
        broadcast(&mut state, response).await;
        true
    }

    /// Sends a transport error to every subscriber and drops their streams.
    pub async fn disconnect(&self) {
        let mut state = self.state.lock().await;
        for subscriber in state.subscribers.drain(..) {
            let _ = subscriber
                .send(Err(Error::Unavailable {
                    message: "schema source disconnected".into(),
                    source: None,
                }))
                .await;
        }
    }

    /// Sends a raw message to every subscriber without touching the snapshot.
    pub async fn send_raw(&self, response: PullSchemaResponse) {
        let mut state = self.state.lock().await;
        broadcast(&mut state, response).await;
    }

    /// Number of open subscriber streams.
    pub async fn subscriber_count(&self) -> usize {
        let mut state = self.state.lock().await;
        state.subscribers.retain(|s| !s.is_closed());
        state.subscribers.len()
    }
}

async fn broadcast(state: &mut SourceState, response: PullSchemaResponse) {
    let mut live = Vec::with_capacity(state.subscribers.len());
    for subscriber in state.subscribers.drain(..) {
        if subscriber.send(Ok(response.clone())).await.is_ok() {
            live.push(subscriber);
        }
    }
    state.subscribers = live;
}

#[async_trait]
impl SchemaSource for InMemorySchemaSource {
    async fn pull(&self) -> Result<SchemaStream> {
        let mut state = self.state.lock().await;
        let total = state.modules.len();
        let snapshot: Vec<Result<PullSchemaResponse>> = if total == 0 {
            vec![Ok(PullSchemaResponse::sync_marker())]
        } else {
            state
                .modules
                .values()
                .enumerate()
                .map(|(i, (module, key))| {
                    Ok(PullSchemaResponse {
                        module_name: module.name.clone(),
                        deployment_key: key.clone(),
                        schema: Some(module.clone()),
                        change_type: ChangeType::Added,
                        more: i + 1 < total,
                        module_removed: false,
                    })
                })
                .collect()
        };
        let (tx, rx) = mpsc::channel(self.capacity);
        state.subscribers.push(tx);
        drop(state);

        let live = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });
        Ok(stream::iter(snapshot).chain(live).boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_source_sends_sync_marker() {
        let source = InMemorySchemaSource::new();
        let mut stream = source.pull().await.unwrap();
        let first = stream.next().await.unwrap().unwrap();
        assert!(first.is_sync_marker());
        assert!(!first.more);
    }

    #[tokio::test]
    async fn snapshot_marks_only_last_as_complete() {
        let source = InMemorySchemaSource::from_modules([
            Module::new("a"),
            Module::new("b"),
            Module::new("c"),
        ]);
        let stream = source.pull().await.unwrap();
        let snapshot: Vec<_> = stream.take(3).collect().await;
        let more: Vec<bool> = snapshot.iter().map(|r| r.as_ref().unwrap().more).collect();
        assert_eq!(more, vec![true, true, false]);
    }

    #[tokio::test]
    async fn live_changes_follow_snapshot() {
        let source = InMemorySchemaSource::from_modules([Module::new("a")]);
        let mut stream = source.pull().await.unwrap();
        source.upsert(Module::new("a")).await;
        source.upsert(Module::new("b")).await;
        assert!(source.remove("a").await);
        assert!(!source.remove("zzz").await);

        let mut types = Vec::new();
        for _ in 0..4 {
            types.push(stream.next().await.unwrap().unwrap().change_type);
        }
        assert_eq!(
            types,
            vec![
                ChangeType::Added,
                ChangeType::Changed,
                ChangeType::Added,
                ChangeType::Removed
            ]
        );
    }

    #[tokio::test]
    async fn disconnect_ends_streams_with_error() {
        let source = InMemorySchemaSource::new();
        let mut stream = source.pull().await.unwrap();
        let _ = stream.next().await;
        assert_eq!(source.subscriber_count().await, 1);
        source.disconnect().await;
        assert!(stream.next().await.unwrap().is_err());
        assert!(stream.next().await.is_none());
        assert_eq!(source.subscriber_count().await, 0);
    }
}
