//! HTTP transport for verb calls.

use std::sync::Arc;

use async_trait::async_trait;
use ftl_schema::Ref;
use reqwest::header::CONTENT_TYPE;
use reqwest::{StatusCode, Url};
use serde::Deserialize;

use super::{CallRequest, CallResponse, VerbClient, VerbClientFactory};
use crate::error::{Error, Result};

/// Header prefix for call metadata.
pub const METADATA_HEADER_PREFIX: &str = "ftl-metadata-";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

/// Calls verbs by POSTing to `<endpoint>/<module>.<verb>`.
#[derive(Debug, Clone)]
pub struct HttpVerbClient {
    client: reqwest::Client,
    endpoint: Url,
}

impl HttpVerbClient {
    /// Creates a client for `endpoint`.
    #[must_use]
    pub fn new(client: reqwest::Client, endpoint: Url) -> Self {
        Self { client, endpoint }
    }

    /// The URL a call to `module.verb` is sent to.
    #[must_use]
    pub fn call_url(&self, module: &str, verb: &str) -> String {
        format!(
            "{}/{module}.{verb}",
            self.endpoint.as_str().trim_end_matches('/')
        )
    }
}

fn verb_error(body: &[u8]) -> Option<String> {
    serde_json::from_slice::<ErrorEnvelope>(body)
        .ok()
        .map(|e| e.error.message)
}

#[async_trait]
impl VerbClient for HttpVerbClient {
    async fn call(&self, request: CallRequest) -> Result<CallResponse> {
        let url = self.call_url(&request.verb.module, &request.verb.name);
        let mut builder = self
            .client
            .post(&url)
            .header(CONTENT_TYPE, "application/json");
        for (key, value) in &request.metadata {
            builder = builder.header(format!("{METADATA_HEADER_PREFIX}{key}"), value);
        }
        let response = builder
            .body(request.body)
            .send()
            .await
            .map_err(|e| Error::unavailable_with_source(format!("calling {url}"), e))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| Error::unavailable_with_source(format!("reading response from {url}"), e))?;

        classify(status, &body, &request.verb, &url)
    }
}

/// A 2xx response carries the verb's body. Otherwise a structured error body
/// is a verb error and anything else a transport failure.
fn classify(status: StatusCode, body: &[u8], verb: &Ref, url: &str) -> Result<CallResponse> {
    if status.is_success() {
        return Ok(CallResponse::Body(body.to_vec()));
    }
    if let Some(message) = verb_error(body) {
        return Ok(CallResponse::Error { message });
    }
    let text = String::from_utf8_lossy(body);
    match status.as_u16() {
        404 => Err(Error::not_found(format!("verb {verb}"))),
        400 => Err(Error::invalid(text.into_owned())),
        _ => Err(Error::Unavailable {
            message: format!("{url} returned {status}: {text}"),
            source: None,
        }),
    }
}

/// Builds [`HttpVerbClient`]s sharing one connection pool.
#[derive(Debug, Clone, Default)]
pub struct HttpVerbClientFactory {
    client: reqwest::Client,
}

impl HttpVerbClientFactory {
    /// Creates a factory around `client`.
    #[must_use]
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl VerbClientFactory for HttpVerbClientFactory {
    fn create(&self, _module: &str, endpoint: &Url) -> Result<Arc<dyn VerbClient>> {
        Ok(Arc::new(HttpVerbClient::new(
            self.client.clone(),
            endpoint.clone(),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_url_joins_module_and_verb() {
        let client = HttpVerbClient::new(
            reqwest::Client::new(),
            Url::parse("http://localhost:8892/").unwrap(),
        );
        assert_eq!(
            client.call_url("echo", "echo"),
            "http://localhost:8892/echo.echo"
        );
    }

    #[test]
    fn structured_error_body_is_detected() {
        assert_eq!(
            verb_error(br#"{"error":{"message":"boom"}}"#).as_deref(),
            Some("boom")
        );
        assert_eq!(verb_error(br#"{"message":"hi"}"#), None);
        assert_eq!(verb_error(br#"{"error":{"message":"x"},"extra":1}"#), None);
        assert_eq!(verb_error(b"not json"), None);
    }

    #[test]
    fn status_decides_before_the_body() {
        let verb = Ref::new("echo", "echo");
        let envelope = br#"{"error":{"message":"boom"}}"#;
        assert_eq!(
            classify(StatusCode::OK, envelope, &verb, "u").unwrap(),
            CallResponse::Body(envelope.to_vec())
        );
        assert_eq!(
            classify(StatusCode::INTERNAL_SERVER_ERROR, envelope, &verb, "u").unwrap(),
            CallResponse::Error {
                message: "boom".to_string()
            }
        );
        let err = classify(StatusCode::NOT_FOUND, b"", &verb, "u").unwrap_err();
        assert_eq!(err.kind(), ftl_core::ErrorKind::NotFound);
        let err = classify(StatusCode::BAD_GATEWAY, b"down", &verb, "u").unwrap_err();
        assert_eq!(err.kind(), ftl_core::ErrorKind::Unavailable);
    }
}
