//! Surfaces other processes connect to: lease streams and the schema endpoint.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use futures::{SinkExt, StreamExt};
use reqwest::Url;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use ftl_core::{Shutdown, SystemClock};
use ftl_ingress::config::Config;
use ftl_ingress::lease::{LeaseFrame, LeaseReply};
use ftl_ingress::server::{AppState, router};
use ftl_runtime::fabric::{self, Event, FabricConfig, HttpSchemaSource, SchemaView};
use ftl_runtime::lease::LeaseCoordinator;
use ftl_schema::Module;
use ftl_test_utils::{RecordingVerbClient, SchemaFactory};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn spawn(state: AppState) -> Result<SocketAddr> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let app = router(Arc::new(state));
    tokio::spawn(async move { axum::serve(listener, app).await });
    Ok(addr)
}

async fn acquire(socket: &mut Socket, key: &str) -> Result<LeaseReply> {
    let frame = serde_json::to_string(&LeaseFrame {
        key: vec![key.to_string()],
        ttl_millis: 10_000,
    })?;
    socket.send(Message::text(frame)).await?;
    match socket.next().await.context("socket ended")?? {
        Message::Text(text) => Ok(serde_json::from_str(text.as_str())?),
        other => bail!("unexpected frame {other:?}"),
    }
}

async fn eventually(mut done: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if done() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    done()
}

#[tokio::test]
async fn lease_socket_holds_until_closed() -> Result<()> {
    let leases = Arc::new(LeaseCoordinator::new(SystemClock::shared()));
    let state = AppState::new(Config::default(), SchemaView::new(), RecordingVerbClient::new())
        .with_leases(leases.clone());
    let url = format!("ws://{}/lease", spawn(state).await?);

    let (mut a, _) = connect_async(url.as_str()).await?;
    let (mut b, _) = connect_async(url.as_str()).await?;
    assert_eq!(acquire(&mut a, "x").await?, LeaseReply::default());
    assert!(leases.expiry("x").is_some());

    let refused = acquire(&mut b, "x").await?.error.context("second holder refused")?;
    assert_eq!(refused.code, "RESOURCE_EXHAUSTED");
    assert!(!matches!(b.next().await, Some(Ok(Message::Text(_)))));

    assert_eq!(acquire(&mut a, "x").await?, LeaseReply::default());
    a.close(None).await?;
    assert!(eventually(|| leases.expiry("x").is_none()).await);

    let (mut c, _) = connect_async(url.as_str()).await?;
    assert_eq!(acquire(&mut c, "x").await?, LeaseReply::default());
    Ok(())
}

#[tokio::test]
async fn schema_endpoint_feeds_a_remote_follower() -> Result<()> {
    let (publisher, subscription) = fabric::in_process(FabricConfig::default());
    let (mut events, view) = subscription.into_parts();
    tokio::spawn(async move { while events.recv().await.is_some() {} });
    let upsert = |module: Module| Event::Upsert {
        deployment_key: None,
        module,
        more: false,
    };
    publisher.publish(upsert(Module::new("users"))).await?;

    let addr = spawn(AppState::new(Config::default(), view, RecordingVerbClient::new())).await?;
    let source = HttpSchemaSource::new(
        reqwest::Client::new(),
        Url::parse(&format!("http://{addr}/schema"))?,
    )
    .with_interval(Duration::from_millis(20));
    let shutdown = Shutdown::new();
    let follower = fabric::subscribe(Arc::new(source), FabricConfig::default(), shutdown.clone());
    assert!(follower.view.wait_for_initial_sync(Duration::from_secs(5)).await);
    assert!(follower.view.schema().module("users").is_some());

    let (mut remote, remote_view) = follower.into_parts();
    publisher.publish(upsert(SchemaFactory::time())).await?;
    let seen = tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(event) = remote.recv().await {
            if event.module_name() == "time" {
                return true;
            }
        }
        false
    })
    .await?;
    assert!(seen);
    assert!(remote_view.schema().module("time").is_some());
    shutdown.trigger();
    Ok(())
}
