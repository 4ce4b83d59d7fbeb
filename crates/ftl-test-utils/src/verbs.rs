//! Verb clients that record calls for test assertions.

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use ftl_runtime::Result;
use ftl_runtime::routing::{CallRequest, CallResponse, VerbClient, VerbClientFactory};
use ftl_schema::Ref;
use reqwest::Url;
use tokio::sync::Notify;

type Responder = dyn Fn(&CallRequest) -> Result<CallResponse> + Send + Sync;

/// Records every call and answers with a configurable responder.
pub struct RecordingVerbClient {
    calls: Mutex<Vec<CallRequest>>,
    notify: Notify,
    responder: Box<Responder>,
}

impl fmt::Debug for RecordingVerbClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordingVerbClient")
            .field("calls", &self.calls.lock().unwrap().len())
            .finish_non_exhaustive()
    }
}

impl Default for RecordingVerbClient {
    fn default() -> Self {
        Self::replying(b"{}".to_vec())
    }
}

impl RecordingVerbClient {
    /// A client answering every call with `{}`.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A client answering every call with `body`.
    pub fn replying(body: Vec<u8>) -> Self {
        Self::with_responder(move |_| Ok(CallResponse::Body(body.clone())))
    }

    /// A client answering through `responder`.
    pub fn with_responder(
        responder: impl Fn(&CallRequest) -> Result<CallResponse> + Send + Sync + 'static,
    ) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            notify: Notify::new(),
            responder: Box::new(responder),
        }
    }

    /// Every call so far, in order.
    pub fn calls(&self) -> Vec<CallRequest> {
        self.calls.lock().unwrap().clone()
    }

    /// Calls made to `verb`.
    pub fn calls_to(&self, verb: &Ref) -> Vec<CallRequest> {
        self.calls()
            .into_iter()
            .filter(|c| c.verb == *verb)
            .collect()
    }

    /// Waits until at least `count` calls were made. Returns false on timeout.
    pub async fn wait_for_calls(&self, count: usize, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, async {
            loop {
                let notified = self.notify.notified();
                if self.calls.lock().unwrap().len() >= count {
                    return;
                }
                notified.await;
            }
        })
        .await
        .is_ok()
    }
}

#[async_trait]
impl VerbClient for RecordingVerbClient {
    async fn call(&self, request: CallRequest) -> Result<CallResponse> {
        let response = (self.responder)(&request);
        self.calls.lock().unwrap().push(request);
        self.notify.notify_waiters();
        response
    }
}

/// Answers every call with the endpoint URL it was created for.
#[derive(Debug)]
pub struct EndpointEchoClient {
    endpoint: Url,
}

#[async_trait]
impl VerbClient for EndpointEchoClient {
    async fn call(&self, _request: CallRequest) -> Result<CallResponse> {
        Ok(CallResponse::Body(self.endpoint.as_str().as_bytes().to_vec()))
    }
}

/// Builds [`EndpointEchoClient`]s and records each creation.
#[derive(Debug, Default)]
pub struct EndpointEchoFactory {
    created: Mutex<Vec<(String, Url)>>,
}

impl EndpointEchoFactory {
    /// A shared factory.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// `(module, endpoint)` of every client built so far.
    pub fn created(&self) -> Vec<(String, Url)> {
        self.created.lock().unwrap().clone()
    }
}

impl VerbClientFactory for EndpointEchoFactory {
    fn create(&self, module: &str, endpoint: &Url) -> Result<Arc<dyn VerbClient>> {
        self.created
            .lock()
            .unwrap()
            .push((module.to_string(), endpoint.clone()));
        Ok(Arc::new(EndpointEchoClient {
            endpoint: endpoint.clone(),
        }))
    }
}
