//! Verb call routing.
//!
//! - [`VerbClient`]: anything that can execute a verb call
//! - [`HttpVerbClient`]: POSTs calls to a module endpoint
//! - [`VerbRouter`]: module-to-endpoint table with a lazy client cache

mod http;
mod router;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use ftl_schema::Ref;
use reqwest::Url;

pub use http::{HttpVerbClient, HttpVerbClientFactory};
pub use router::{Route, VerbRouter};

use crate::error::Result;

/// A request to run one verb.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRequest {
    /// Target verb.
    pub verb: Ref,
    /// JSON-encoded request.
    pub body: Vec<u8>,
    /// Caller-supplied metadata, passed through untouched.
    pub metadata: BTreeMap<String, String>,
}

impl CallRequest {
    /// Creates a call with no metadata.
    #[must_use]
    pub fn new(verb: Ref, body: impl Into<Vec<u8>>) -> Self {
        Self {
            verb,
            body: body.into(),
            metadata: BTreeMap::new(),
        }
    }
}

/// The outcome of a verb call that reached the verb.
///
/// A structured verb error is a normal response, not a transport failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallResponse {
    /// JSON-encoded response.
    Body(Vec<u8>),
    /// The verb reported an error.
    Error {
        /// Error text from the verb.
        message: String,
    },
}

/// Executes verb calls.
#[async_trait]
pub trait VerbClient: Send + Sync + fmt::Debug {
    /// Runs `request` and returns the verb's response.
    async fn call(&self, request: CallRequest) -> Result<CallResponse>;
}

/// Creates a client for one module endpoint.
pub trait VerbClientFactory: Send + Sync + fmt::Debug {
    /// Builds a client that talks to `module` at `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns an error if no client can be built for the endpoint.
    fn create(&self, module: &str, endpoint: &Url) -> Result<Arc<dyn VerbClient>>;
}
