//! A schema pulled through the fabric drives HTTP ingress.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use serde_json::{Value, json};
use tower::ServiceExt as _;

use ftl_core::Shutdown;
use ftl_ingress::config::Config;
use ftl_ingress::server::{AppState, router};
use ftl_runtime::fabric::{self, FabricConfig, InMemorySchemaSource};
use ftl_schema::Ref;
use ftl_test_utils::{MemoryTimeline, RecordingVerbClient, SchemaFactory, at, deployed};

#[tokio::test]
async fn get_path_parameter_reaches_the_verb() -> Result<()> {
    let source = Arc::new(InMemorySchemaSource::from_modules([deployed(
        SchemaFactory::get_path(),
        "http://127.0.0.1:9100",
        at(0),
    )]));
    let shutdown = Shutdown::new();
    let subscription = fabric::subscribe(source, FabricConfig::default(), shutdown.clone());
    let (_events, view) = subscription.into_parts();
    assert!(view.wait_for_initial_sync(Duration::from_secs(5)).await);

    let client = Arc::new(RecordingVerbClient::replying(
        br#"{"status":200,"headers":{},"body":{}}"#.to_vec(),
    ));
    let timeline = MemoryTimeline::new();
    let state = AppState::new(Config::default(), view, client.clone()).with_timeline(timeline.clone());
    let app = router(Arc::new(state));

    let request = Request::builder()
        .method("GET")
        .uri("/getPath/alice")
        .body(Body::empty())
        .context("build request")?;
    let response = app.oneshot(request).await.context("oneshot")?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = to_bytes(response.into_body(), usize::MAX).await?;
    assert_eq!(serde_json::from_slice::<Value>(&body)?, json!({}));

    let calls = client.calls_to(&Ref::new("http", "getPath"));
    assert_eq!(calls.len(), 1);
    let request: Value = serde_json::from_slice(&calls[0].body)?;
    assert_eq!(request["method"], "GET");
    assert_eq!(request["path"], "/getPath/alice");
    assert_eq!(request["pathParameters"], json!({"username": "alice"}));

    let events = timeline.ingress();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].verb, Some(Ref::new("http", "getPath")));
    assert_eq!(events[0].status, 200);

    shutdown.trigger();
    Ok(())
}
