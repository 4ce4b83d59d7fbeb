//! Module-scoped configuration shadows globals.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::sync::Arc;

use anyhow::Result;

use ftl_core::ErrorKind;
use ftl_runtime::configuration::{
    CacheConfig, ConfigRef, Configuration, EnvarProvider, InMemoryProvider, InMemoryRouter,
    Manager, ProviderHandle, Role, Secrets,
};

fn manager<R: Role>() -> Manager<R> {
    Manager::new(
        Arc::new(InMemoryRouter::new()),
        [
            ProviderHandle::Sync(Arc::new(InMemoryProvider)),
            ProviderHandle::Sync(Arc::new(EnvarProvider::<R>::with_lookup(|_| None))),
        ],
        CacheConfig::default(),
    )
}

#[tokio::test]
async fn module_secret_wins_until_unset() -> Result<()> {
    let secrets = manager::<Secrets>();
    let global = ConfigRef::global("api_key");
    let scoped = ConfigRef::module("echo", "api_key");
    secrets.set_json(InMemoryProvider::SCHEME, &global, br#""g""#).await?;
    secrets.set_json(InMemoryProvider::SCHEME, &scoped, br#""e""#).await?;

    assert_eq!(secrets.get_data(&scoped).await?, br#""e""#);
    assert_eq!(secrets.get::<String>(&ConfigRef::module("other", "api_key")).await?, "g");

    let visible = secrets.map_for_module("echo").await?;
    assert_eq!(visible.len(), 1);
    assert_eq!(visible["api_key"], br#""e""#);

    secrets.unset(InMemoryProvider::SCHEME, &scoped).await?;
    assert_eq!(secrets.get_data(&scoped).await?, br#""g""#);
    Ok(())
}

#[tokio::test]
async fn roles_do_not_share_values() -> Result<()> {
    let secrets = manager::<Secrets>();
    let config = manager::<Configuration>();
    let reference = ConfigRef::global("api_key");
    secrets.set(InMemoryProvider::SCHEME, &reference, "g").await?;

    let err = config.get_data(&reference).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let err = config
        .set_json("vault", &reference, b"1")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::FailedPrecondition);
    Ok(())
}
