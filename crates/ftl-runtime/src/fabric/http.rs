//! A schema source that polls a JSON schema snapshot over HTTP.
//!
//! Every stream starts with the snapshot fetched by [`SchemaSource::pull`].
//! After that the snapshot is fetched again every interval and the difference
//! to the previous one is sent as `ADDED`, `CHANGED` and `REMOVED` messages.
//! A failed fetch ends the stream with an error item.

use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream;
use ftl_schema::Module;
use reqwest::Url;

use super::source::{ChangeType, PullSchemaResponse, SchemaSource, SchemaStream};
use crate::error::{Error, Result};

/// How often the snapshot is fetched again.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

type Snapshot = BTreeMap<String, Module>;

/// Follows the schema served at a URL.
#[derive(Debug, Clone)]
pub struct HttpSchemaSource {
    client: reqwest::Client,
    url: Url,
    interval: Duration,
}

impl HttpSchemaSource {
    /// Follows `url`, polling every [`DEFAULT_POLL_INTERVAL`].
    #[must_use]
    pub fn new(client: reqwest::Client, url: Url) -> Self {
        Self {
            client,
            url,
            interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Polls every `interval` instead.
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// The followed URL.
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }

    async fn fetch(&self) -> Result<Snapshot> {
        let url = self.url.as_str();
        let response = self
            .client
            .get(self.url.clone())
            .send()
            .await
            .map_err(|e| Error::unavailable_with_source(format!("fetching schema from {url}"), e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Unavailable {
                message: format!("{url} returned {status}"),
                source: None,
            });
        }
        let body = response
            .bytes()
            .await
            .map_err(|e| Error::unavailable_with_source(format!("reading schema from {url}"), e))?;
        let schema = ftl_schema::encoding::decode(&body)?;
        Ok(schema
            .modules
            .into_iter()
            .filter(|m| !m.builtin)
            .map(|m| (m.name.clone(), m))
            .collect())
    }
}

fn message(module: Module, change_type: ChangeType, more: bool) -> PullSchemaResponse {
    PullSchemaResponse {
        module_name: module.name.clone(),
        deployment_key: module.deployment_key().cloned(),
        module_removed: change_type == ChangeType::Removed,
        schema: Some(module),
        change_type,
        more,
    }
}

/// The messages of a fresh stream.
fn initial(snapshot: &Snapshot) -> Vec<PullSchemaResponse> {
    if snapshot.is_empty() {
        return vec![PullSchemaResponse::sync_marker()];
    }
    let total = snapshot.len();
    snapshot
        .values()
        .enumerate()
        .map(|(i, module)| message(module.clone(), ChangeType::Added, i + 1 < total))
        .collect()
}

/// The messages that turn `previous` into `next`.
fn diff(previous: &Snapshot, next: &Snapshot) -> Vec<PullSchemaResponse> {
    let mut out = Vec::new();
    for (name, module) in next {
        match previous.get(name) {
            None => out.push(message(module.clone(), ChangeType::Added, false)),
            Some(held) if held != module => {
                out.push(message(module.clone(), ChangeType::Changed, false));
            }
            Some(_) => {}
        }
    }
    for (name, module) in previous {
        if !next.contains_key(name) {
            out.push(message(module.clone(), ChangeType::Removed, false));
        }
    }
    out
}

struct Poll {
    source: HttpSchemaSource,
    held: Snapshot,
    pending: VecDeque<PullSchemaResponse>,
    failed: bool,
}

#[async_trait]
impl SchemaSource for HttpSchemaSource {
    async fn pull(&self) -> Result<SchemaStream> {
        let held = self.fetch().await?;
        tracing::debug!(url = %self.url, modules = held.len(), "schema snapshot fetched");
        let state = Poll {
            source: self.clone(),
            pending: initial(&held).into(),
            held,
            failed: false,
        };
        let polled = stream::unfold(state, |mut state| async move {
            if state.failed {
                return None;
            }
            loop {
                if let Some(next) = state.pending.pop_front() {
                    return Some((Ok(next), state));
                }
                tokio::time::sleep(state.source.interval).await;
                match state.source.fetch().await {
                    Ok(next) => {
                        state.pending = diff(&state.held, &next).into();
                        state.held = next;
                    }
                    Err(err) => {
                        state.failed = true;
                        return Some((Err(err), state));
                    }
                }
            }
        });
        Ok(polled.boxed())
    }
}
