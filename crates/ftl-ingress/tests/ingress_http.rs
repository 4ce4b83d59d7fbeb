//! HTTP surface tests: ingress dispatch, admin, health and metrics.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Method, Request, StatusCode};
use serde_json::{Value, json};
use tower::ServiceExt;

use ftl_ingress::config::{Config, CorsConfig};
use ftl_core::Shutdown;
use ftl_ingress::server::{AppState, load_schema_source, router};
use ftl_runtime::fabric::{self, FabricConfig, SchemaView};
use ftl_runtime::routing::{CallRequest, CallResponse};
use ftl_schema::builtin::{http_request, http_response};
use ftl_schema::{Data, Decl, Field, Module, Ref, Schema, Type};
use ftl_test_utils::{MemoryTimeline, RecordingVerbClient, SchemaFactory, ingress_verb};

fn users_module() -> Module {
    Module::new("users")
        .with_decl(Decl::Data(Data::new(
            "NewUser",
            vec![Field::new("name", Type::String)],
        )))
        .with_decl(ingress_verb(
            "create",
            "POST",
            "/users",
            http_request(Type::reference("users", "NewUser"), Type::Unit, Type::Unit),
            http_response(Type::reference("users", "NewUser"), Type::String),
        ))
        .with_decl(ingress_verb(
            "fail",
            "GET",
            "/fail/{how}",
            http_request(Type::Unit, Type::map(Type::String, Type::String), Type::Unit),
            http_response(Type::String, Type::String),
        ))
}

fn responder(request: &CallRequest) -> ftl_runtime::Result<CallResponse> {
    let body: Value = serde_json::from_slice(&request.body).unwrap();
    match request.verb.name.as_str() {
        "getPath" => Ok(CallResponse::Body(
            br#"{"status":200,"headers":{},"body":{}}"#.to_vec(),
        )),
        "create" => Ok(CallResponse::Body(
            serde_json::to_vec(&json!({"status": 201, "body": body["body"]})).unwrap(),
        )),
        "fail" => match body["pathParameters"]["how"].as_str() {
            Some("verb") => Ok(CallResponse::Error {
                message: "verb blew up".to_string(),
            }),
            Some("missing") => Err(ftl_runtime::Error::not_found("deployment")),
            _ => Err(ftl_runtime::Error::internal("boom")),
        },
        other => panic!("unexpected verb {other}"),
    }
}

struct Harness {
    app: Router,
    client: Arc<RecordingVerbClient>,
    timeline: Arc<MemoryTimeline>,
}

fn harness_with(config: Config, synced: bool) -> Harness {
    let schema = Schema::from_modules([SchemaFactory::get_path(), users_module()]);
    let client = Arc::new(RecordingVerbClient::with_responder(responder));
    let timeline = MemoryTimeline::new();
    let state = AppState::new(
        config,
        SchemaView::from_schema(schema, synced),
        client.clone(),
    )
    .with_timeline(timeline.clone());
    Harness {
        app: router(Arc::new(state)),
        client,
        timeline,
    }
}

fn harness() -> Harness {
    harness_with(Config::default(), true)
}

async fn send(app: &Router, method: Method, uri: &str, body: &str) -> Result<(StatusCode, Value)> {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .context("build request")?;
    let response = app.clone().oneshot(request).await.context("oneshot")?;
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .context("read body")?;
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
    };
    Ok((status, value))
}

#[tokio::test]
async fn get_with_path_parameter_reaches_verb() -> Result<()> {
    let h = harness();
    let (status, _) = send(&h.app, Method::GET, "/getPath/alice", "").await?;
    assert_eq!(status, StatusCode::OK);

    let calls = h.client.calls_to(&Ref::new("http", "getPath"));
    assert_eq!(calls.len(), 1);
    let body: Value = serde_json::from_slice(&calls[0].body)?;
    assert_eq!(body["pathParameters"], json!({"username": "alice"}));
    assert_eq!(body["method"], "GET");
    assert_eq!(body["path"], "/getPath/alice");

    let events = h.timeline.ingress();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].verb, Some(Ref::new("http", "getPath")));
    assert_eq!(events[0].status, 200);
    assert_eq!(events[0].error, None);
    Ok(())
}

#[tokio::test]
async fn post_body_round_trips_through_http_response() -> Result<()> {
    let h = harness();
    let (status, body) = send(&h.app, Method::POST, "/users", r#"{"name":"ann"}"#).await?;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body, json!({"name": "ann"}));

    let (status, body) = send(&h.app, Method::POST, "/users", r#"{"name":"ann","admin":true}"#).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "BAD_REQUEST");
    assert_eq!(h.client.calls().len(), 1, "rejected body must not reach the verb");
    Ok(())
}

#[tokio::test]
async fn unmatched_requests_are_404_and_recorded() -> Result<()> {
    let h = harness();
    for (method, uri) in [
        (Method::GET, "/nowhere"),
        (Method::GET, "/getPath/alice/extra"),
        (Method::DELETE, "/users"),
    ] {
        let (status, body) = send(&h.app, method.clone(), uri, "").await?;
        assert_eq!(status, StatusCode::NOT_FOUND, "{method} {uri}");
        assert_eq!(body["code"], "NOT_FOUND");
    }
    let events = h.timeline.ingress();
    assert_eq!(events.len(), 3);
    assert!(events.iter().all(|e| e.verb.is_none() && e.status == 404 && e.error.is_some()));
    assert!(h.client.calls().is_empty());
    Ok(())
}

#[tokio::test]
async fn call_failures_map_to_http_statuses() -> Result<()> {
    let h = harness();
    let cases = [
        ("/fail/verb", StatusCode::INTERNAL_SERVER_ERROR, "VERB_ERROR"),
        ("/fail/missing", StatusCode::NOT_FOUND, "NOT_FOUND"),
        ("/fail/other", StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL"),
    ];
    for (uri, status, code) in cases {
        let (got, body) = send(&h.app, Method::GET, uri, "").await?;
        assert_eq!(got, status, "{uri}");
        assert_eq!(body["code"], code, "{uri}");
    }
    let events = h.timeline.ingress();
    assert_eq!(events[0].error.as_deref(), Some("verb blew up"));
    assert_eq!(events[0].verb, Some(Ref::new("users", "fail")));
    Ok(())
}

#[tokio::test]
async fn healthz_follows_initial_sync() -> Result<()> {
    let (status, body) = send(&harness().app, Method::GET, "/healthz", "").await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    let unsynced = harness_with(Config::default(), false);
    let (status, body) = send(&unsynced.app, Method::GET, "/healthz", "").await?;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["status"], "syncing");
    Ok(())
}

#[tokio::test]
async fn admin_secrets_prefer_module_scope() -> Result<()> {
    let h = harness();
    let (status, _) = send(&h.app, Method::PUT, "/admin/secrets/api_key", r#""g""#).await?;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = send(&h.app, Method::PUT, "/admin/secrets/echo.api_key", r#""e""#).await?;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, value) = send(&h.app, Method::GET, "/admin/secrets/echo.api_key", "").await?;
    assert_eq!(value, json!("e"));

    let (status, listed) = send(
        &h.app,
        Method::GET,
        "/admin/secrets?module=echo&include_values=true",
        "",
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        listed,
        json!([
            {"ref": "api_key", "provider": "inline", "value": "g"},
            {"ref": "echo.api_key", "provider": "inline", "value": "e"},
        ])
    );

    let (status, _) = send(&h.app, Method::DELETE, "/admin/secrets/echo.api_key", "").await?;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (_, value) = send(&h.app, Method::GET, "/admin/secrets/echo.api_key", "").await?;
    assert_eq!(value, json!("g"));

    let (status, _) = send(&h.app, Method::GET, "/admin/config/api_key", "").await?;
    assert_eq!(status, StatusCode::NOT_FOUND, "secrets and config are separate");
    Ok(())
}

#[tokio::test]
async fn admin_rejects_bad_input() -> Result<()> {
    let h = harness();
    let (status, _) = send(&h.app, Method::PUT, "/admin/config/a.b.c", "1").await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = send(&h.app, Method::PUT, "/admin/config/key", "{not json").await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = send(&h.app, Method::PUT, "/admin/config/key?provider=vault", "1").await?;
    assert_eq!(status, StatusCode::PRECONDITION_FAILED);
    let (status, _) = send(&h.app, Method::DELETE, "/admin/config/never_set", "").await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn cors_preflight_for_configured_origin() -> Result<()> {
    let config = Config {
        cors: CorsConfig {
            allow_origins: vec!["http://app.test".to_string()],
            allow_headers: vec!["content-type".to_string()],
        },
        ..Config::default()
    };
    let h = harness_with(config, true);
    let request = Request::builder()
        .method(Method::OPTIONS)
        .uri("/users")
        .header("origin", "http://app.test")
        .header("access-control-request-method", "POST")
        .header("access-control-request-headers", "content-type")
        .body(Body::empty())?;
    let response = h.app.clone().oneshot(request).await?;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(
        response.headers()["access-control-allow-origin"],
        "http://app.test"
    );
    assert!(h.client.calls().is_empty());
    Ok(())
}

#[tokio::test]
async fn metrics_endpoint_exposes_ingress_labels() -> Result<()> {
    ftl_ingress::metrics::init_metrics().map_err(anyhow::Error::msg)?;
    let h = harness();
    send(&h.app, Method::GET, "/getPath/bob", "").await?;
    let (status, body) = send(&h.app, Method::GET, "/metrics", "").await?;
    assert_eq!(status, StatusCode::OK);
    let text = body.as_str().context("metrics are text")?;
    assert!(text.contains("GET /getPath/{username}"), "{text}");
    assert!(!text.contains("bob"));
    Ok(())
}

#[tokio::test]
async fn schema_snapshot_file_feeds_the_fabric() -> Result<()> {
    let dir = tempfile::tempdir().context("tempdir")?;
    let path = dir.path().join("schema.json");
    let schema = Schema::from_modules([SchemaFactory::get_path(), users_module()]);
    std::fs::write(&path, ftl_schema::encoding::encode(&schema)?).context("write snapshot")?;

    let source = Arc::new(load_schema_source(&path)?);
    let shutdown = Shutdown::new();
    let (_events, view) =
        fabric::subscribe(source, FabricConfig::default(), shutdown.clone()).into_parts();
    assert!(view.wait_for_initial_sync(Duration::from_secs(5)).await);
    let loaded = view.schema();
    assert!(loaded.module("http").is_some());
    assert!(loaded.module("users").is_some());

    std::fs::write(&path, b"{not json").context("corrupt snapshot")?;
    assert!(load_schema_source(&path).is_err());
    shutdown.trigger();
    Ok(())
}
