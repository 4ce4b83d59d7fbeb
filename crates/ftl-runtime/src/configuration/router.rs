//! Ref to accessor-key routing.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::RwLock;

use async_trait::async_trait;

use super::{AccessorKey, ConfigRef, Entry};
use crate::error::{Error, Result, poison_err};

/// Persists the mapping from ref to accessor key.
#[async_trait]
pub trait Router: Send + Sync + fmt::Debug {
    /// The key stored for exactly `reference`; no scope fallback.
    async fn get(&self, reference: &ConfigRef) -> Result<AccessorKey>;

    /// All entries, ordered by ref.
    async fn list(&self) -> Result<Vec<Entry>>;

    /// Stores or replaces the key for `reference`.
    async fn set(&self, reference: &ConfigRef, key: AccessorKey) -> Result<()>;

    /// Removes `reference`. Removing an unknown ref is not an error.
    async fn unset(&self, reference: &ConfigRef) -> Result<()>;
}

/// A router kept in process memory.
#[derive(Debug, Default)]
pub struct InMemoryRouter {
    entries: RwLock<BTreeMap<ConfigRef, AccessorKey>>,
}

impl InMemoryRouter {
    /// Creates an empty router.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Router for InMemoryRouter {
    async fn get(&self, reference: &ConfigRef) -> Result<AccessorKey> {
        let entries = self.entries.read().map_err(poison_err)?;
        entries
            .get(reference)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("{reference}")))
    }

    async fn list(&self) -> Result<Vec<Entry>> {
        let entries = self.entries.read().map_err(poison_err)?;
        Ok(entries
            .iter()
            .map(|(reference, accessor)| Entry {
                reference: reference.clone(),
                accessor: accessor.clone(),
            })
            .collect())
    }

    async fn set(&self, reference: &ConfigRef, key: AccessorKey) -> Result<()> {
        self.entries
            .write()
            .map_err(poison_err)?
            .insert(reference.clone(), key);
        Ok(())
    }

    async fn unset(&self, reference: &ConfigRef) -> Result<()> {
        self.entries.write().map_err(poison_err)?.remove(reference);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_get_list_unset() {
        let router = InMemoryRouter::new();
        let global = ConfigRef::global("key");
        let scoped = ConfigRef::module("echo", "key");
        router.set(&scoped, AccessorKey::new("inline", "Ijki")).await.unwrap();
        router.set(&global, AccessorKey::new("inline", "ImciIg")).await.unwrap();

        assert_eq!(router.get(&scoped).await.unwrap().payload(), "Ijki");
        let listed: Vec<ConfigRef> = router.list().await.unwrap().into_iter().map(|e| e.reference).collect();
        assert_eq!(listed, vec![global.clone(), scoped.clone()]);

        router.unset(&scoped).await.unwrap();
        router.unset(&scoped).await.unwrap();
        assert!(router.get(&scoped).await.is_err());
        assert!(router.get(&global).await.is_ok());
    }
}
