//! Fabric-to-router wiring: a pulled schema drives verb routes.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use proptest::prelude::*;
use reqwest::Url;
use tokio_test::block_on;

use ftl_core::{DeploymentKey, Shutdown};
use ftl_runtime::fabric::{self, Event, FabricConfig, InMemorySchemaSource};
use ftl_runtime::routing::{
    CallRequest, CallResponse, VerbClient, VerbClientFactory, VerbRouter,
};
use ftl_schema::{Module, ModuleRuntime, Ref};

fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_767_225_600 + secs, 0).single().unwrap()
}

fn deployed(name: &str, endpoint: &str, created: DateTime<Utc>) -> Module {
    Module::new(name).with_runtime(ModuleRuntime::deployed(
        "go",
        created,
        endpoint,
        Some(DeploymentKey::generate(name)),
    ))
}

/// Answers every call with the endpoint it was created for.
#[derive(Debug)]
struct EndpointClient(Url);

#[async_trait]
impl VerbClient for EndpointClient {
    async fn call(&self, _request: CallRequest) -> ftl_runtime::Result<CallResponse> {
        Ok(CallResponse::Body(self.0.as_str().as_bytes().to_vec()))
    }
}

#[derive(Debug, Default)]
struct EndpointFactory {
    created: Mutex<Vec<String>>,
}

impl VerbClientFactory for EndpointFactory {
    fn create(&self, module: &str, endpoint: &Url) -> ftl_runtime::Result<Arc<dyn VerbClient>> {
        self.created.lock().unwrap().push(module.to_string());
        Ok(Arc::new(EndpointClient(endpoint.clone())))
    }
}

async fn call_body(router: &VerbRouter, module: &str) -> Result<String> {
    let response = router
        .call(CallRequest::new(Ref::new(module, "echo"), b"{}".to_vec()))
        .await
        .context("verb call")?;
    match response {
        CallResponse::Body(body) => String::from_utf8(body).context("utf-8 body"),
        CallResponse::Error { message } => anyhow::bail!("verb error: {message}"),
    }
}

async fn wait_for_port(router: &VerbRouter, port: Option<u16>) -> Result<()> {
    tokio::time::timeout(Duration::from_secs(5), async {
        while router.route_for("echo").and_then(|u| u.port()) != port {
            tokio::task::yield_now().await;
        }
    })
    .await
    .with_context(|| format!("echo never routed to port {port:?}"))
}

#[tokio::test]
async fn router_follows_pulled_deployments() -> Result<()> {
    let source = Arc::new(InMemorySchemaSource::from_modules([deployed(
        "echo",
        "http://127.0.0.1:9001",
        at(0),
    )]));
    let shutdown = Shutdown::new();
    let subscription = fabric::subscribe(source.clone(), FabricConfig::default(), shutdown.clone());
    let view = subscription.view.clone();
    assert!(view.wait_for_initial_sync(Duration::from_secs(5)).await);

    let factory = Arc::new(EndpointFactory::default());
    let router = Arc::new(VerbRouter::new(factory.clone()));
    let (events, view) = subscription.into_parts();
    let runner = {
        let router = Arc::clone(&router);
        let shutdown = shutdown.clone();
        tokio::spawn(async move { router.run(events, view, shutdown).await })
    };

    wait_for_port(&router, Some(9001)).await?;
    assert_eq!(call_body(&router, "echo").await?, "http://127.0.0.1:9001/");

    source
        .upsert(deployed("echo", "http://127.0.0.1:9002", at(10)))
        .await;
    wait_for_port(&router, Some(9002)).await?;
    assert_eq!(call_body(&router, "echo").await?, "http://127.0.0.1:9002/");
    assert_eq!(factory.created.lock().unwrap().len(), 2);

    source.remove("echo").await;
    wait_for_port(&router, None).await?;
    let err = call_body(&router, "echo").await.unwrap_err();
    assert!(err.to_string().contains("verb call"), "{err:#}");

    shutdown.trigger();
    runner.await.context("join router")??;
    Ok(())
}

#[derive(Debug, Clone)]
enum Op {
    Upsert { module: u8, created: i64 },
    Remove { module: u8, deleted: bool },
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0u8..4, 0i64..100).prop_map(|(module, created)| Op::Upsert { module, created }),
        (0u8..4, any::<bool>()).prop_map(|(module, deleted)| Op::Remove { module, deleted }),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// The view holds the newest schema of every module not deleted since.
    #[test]
    fn view_matches_model(ops in proptest::collection::vec(arb_op(), 1..40)) {
        let (publisher, subscription) = fabric::in_process(FabricConfig {
            event_buffer: 64,
            ..FabricConfig::default()
        });
        let (mut events, view) = subscription.into_parts();
        let mut model: BTreeMap<String, i64> = BTreeMap::new();

        for op in ops {
            let event = match op {
                Op::Upsert { module, created } => {
                    let name = format!("m{module}");
                    let newer = model.get(&name).is_none_or(|held| *held <= created);
                    if newer {
                        model.insert(name.clone(), created);
                    }
                    Event::Upsert {
                        deployment_key: None,
                        module: deployed(&name, "http://127.0.0.1:9000", at(created)),
                        more: false,
                    }
                }
                Op::Remove { module, deleted } => {
                    let name = format!("m{module}");
                    if deleted {
                        model.remove(&name);
                    }
                    Event::Remove {
                        deployment_key: None,
                        module: Module::new(name),
                        deleted,
                        more: false,
                    }
                }
            };
            let forwarded = !matches!(event, Event::Remove { deleted: false, .. });
            block_on(publisher.publish(event)).unwrap();
            if forwarded {
                let received = block_on(events.recv()).unwrap();
                prop_assert!(
                    !matches!(received, Event::Remove { deleted: false, .. }),
                    "non-deleting Remove was forwarded"
                );
            }
        }
        prop_assert!(events.try_recv().is_err());

        let schema = view.schema();
        let held: BTreeMap<String, i64> = schema
            .modules
            .iter()
            .filter(|m| !m.builtin)
            .map(|m| (m.name.clone(), m.create_time().unwrap().timestamp() - 1_767_225_600))
            .collect();
        prop_assert_eq!(held, model);
    }
}
