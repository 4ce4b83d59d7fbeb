//! The configuration or secret manager.

use std::collections::{BTreeMap, HashMap};
use std::marker::PhantomData;
use std::sync::Arc;

use ftl_core::{ErrorKind, Shutdown};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::task::JoinHandle;

use super::{
    AccessorKey, Cache, CacheConfig, ConfigRef, Entry, Obfuscator, ProviderHandle, Role, Router,
};
use crate::error::{Error, Result};

/// Resolves and mutates values of one [`Role`].
#[derive(Debug)]
pub struct Manager<R: Role> {
    router: Arc<dyn Router>,
    providers: HashMap<&'static str, ProviderHandle>,
    cache: Arc<Cache>,
    obfuscator: Option<Obfuscator>,
    _role: PhantomData<R>,
}

impl<R: Role> Manager<R> {
    /// Creates a manager. Asynchronous providers get a cache; call
    /// [`Manager::start`] to begin syncing it. Sensitive roles seal values
    /// with the default [`Obfuscator`].
    #[must_use]
    pub fn new(
        router: Arc<dyn Router>,
        providers: impl IntoIterator<Item = ProviderHandle>,
        config: CacheConfig,
    ) -> Self {
        let providers: HashMap<_, _> = providers.into_iter().map(|p| (p.key(), p)).collect();
        let cache = Cache::new(
            providers.values().filter_map(|p| match p {
                ProviderHandle::Async(p) => Some(Arc::clone(p)),
                ProviderHandle::Sync(_) => None,
            }),
            config,
        );
        Self {
            router,
            providers,
            cache: Arc::new(cache),
            obfuscator: R::SENSITIVE.then(Obfuscator::default),
            _role: PhantomData,
        }
    }

    /// Seals stored values with `obfuscator`.
    #[must_use]
    pub fn with_obfuscator(mut self, obfuscator: Obfuscator) -> Self {
        self.obfuscator = Some(obfuscator);
        self
    }

    fn reveal(&self, stored: Vec<u8>) -> Result<Vec<u8>> {
        match &self.obfuscator {
            Some(obfuscator) => obfuscator.reveal(&stored),
            None => Ok(stored),
        }
    }

    /// Starts the cache sync loop.
    #[must_use]
    pub fn start(&self, shutdown: Shutdown) -> JoinHandle<()> {
        self.cache.spawn(Arc::clone(&self.router), shutdown)
    }

    /// The cache of asynchronous providers.
    #[must_use]
    pub fn cache(&self) -> &Arc<Cache> {
        &self.cache
    }

    /// Schemes of the configured providers, sorted.
    #[must_use]
    pub fn provider_keys(&self) -> Vec<&'static str> {
        let mut keys: Vec<_> = self.providers.keys().copied().collect();
        keys.sort_unstable();
        keys
    }

    fn provider(&self, key: &str) -> Result<&ProviderHandle> {
        self.providers.get(key).ok_or_else(|| {
            Error::precondition(format!("no {} provider {key:?}", R::NAME))
        })
    }

    /// Resolves `reference` to its accessor key, falling back from module
    /// scope to global scope. Returns the ref the key was found under.
    async fn resolve(&self, reference: &ConfigRef) -> Result<(ConfigRef, AccessorKey)> {
        match self.router.get(reference).await {
            Ok(key) => Ok((reference.clone(), key)),
            Err(err) if err.kind() == ErrorKind::NotFound && reference.module.is_some() => {
                let global = reference.to_global();
                let key = self.router.get(&global).await?;
                Ok((global, key))
            }
            Err(err) => Err(err),
        }
    }

    /// The raw JSON value of `reference`.
    ///
    /// # Errors
    ///
    /// - [`Error::NotFound`] if neither the ref nor its global fallback is set.
    /// - [`Error::FailedPrecondition`] if no provider handles the key's scheme.
    /// - Any provider or cache error.
    pub async fn get_data(&self, reference: &ConfigRef) -> Result<Vec<u8>> {
        let (resolved, key) = self.resolve(reference).await?;
        let stored = match self.provider(key.scheme())? {
            ProviderHandle::Sync(provider) => provider.load(&resolved, &key).await?,
            ProviderHandle::Async(provider) => self.cache.load(provider.key(), &resolved).await?,
        };
        self.reveal(stored)
    }

    /// The value of `reference`, decoded from JSON.
    ///
    /// # Errors
    ///
    /// As [`Manager::get_data`], plus [`Error::InvalidArgument`] if the value
    /// does not decode into `T`.
    pub async fn get<T: DeserializeOwned>(&self, reference: &ConfigRef) -> Result<T> {
        let data = self.get_data(reference).await?;
        serde_json::from_slice(&data)
            .map_err(|e| Error::invalid(format!("decoding {} {reference}: {e}", R::NAME)))
    }

    /// Stores raw JSON under `reference` using the provider `provider`.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] if `value` is not a single JSON value.
    /// - [`Error::FailedPrecondition`] for an unknown provider.
    /// - Any provider or router error.
    pub async fn set_json(&self, provider: &str, reference: &ConfigRef, value: &[u8]) -> Result<()> {
        serde_json::from_slice::<serde_json::Value>(value)
            .map_err(|e| Error::invalid(format!("{} {reference} is not valid JSON: {e}", R::NAME)))?;
        let handle = self.provider(provider)?;
        let stored = match &self.obfuscator {
            Some(obfuscator) => obfuscator.obfuscate(value)?,
            None => value.to_vec(),
        };
        let key = handle.store(reference, &stored).await?;
        if let ProviderHandle::Async(p) = handle {
            self.cache.updated_value(p.key(), reference, &stored)?;
        }
        self.router.set(reference, key).await?;
        tracing::debug!(%reference, provider, role = R::NAME, "value set");
        Ok(())
    }

    /// Encodes `value` as JSON and stores it.
    ///
    /// # Errors
    ///
    /// As [`Manager::set_json`].
    pub async fn set<T: Serialize + ?Sized>(
        &self,
        provider: &str,
        reference: &ConfigRef,
        value: &T,
    ) -> Result<()> {
        let data = serde_json::to_vec(value)
            .map_err(|e| Error::invalid(format!("encoding {} {reference}: {e}", R::NAME)))?;
        self.set_json(provider, reference, &data).await
    }

    /// Removes `reference`. A value the provider no longer has is not an error.
    ///
    /// # Errors
    ///
    /// [`Error::FailedPrecondition`] for an unknown provider, or any provider
    /// or router error.
    pub async fn unset(&self, provider: &str, reference: &ConfigRef) -> Result<()> {
        let handle = self.provider(provider)?;
        match handle.delete(reference).await {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(err),
        }
        if let ProviderHandle::Async(p) = handle {
            self.cache.deleted_value(p.key(), reference)?;
        }
        self.router.unset(reference).await?;
        tracing::debug!(%reference, provider, role = R::NAME, "value unset");
        Ok(())
    }

    /// All entries known to the router.
    ///
    /// # Errors
    ///
    /// Any router error.
    pub async fn list(&self) -> Result<Vec<Entry>> {
        self.router.list().await
    }

    /// Every value visible to `module`, keyed by name.
    ///
    /// Module-scoped entries shadow globals of the same name.
    ///
    /// # Errors
    ///
    /// Any router, provider or cache error.
    pub async fn map_for_module(&self, module: &str) -> Result<BTreeMap<String, Vec<u8>>> {
        let entries = self.router.list().await?;
        let (scoped, globals): (Vec<_>, Vec<_>) = entries
            .into_iter()
            .filter(|e| e.reference.module.as_deref().is_none_or(|m| m == module))
            .partition(|e| e.reference.module.is_some());

        let mut out = BTreeMap::new();
        for entry in globals.into_iter().chain(scoped) {
            let value = self.load_entry(&entry).await?;
            out.insert(entry.reference.name, value);
        }
        Ok(out)
    }

    async fn load_entry(&self, entry: &Entry) -> Result<Vec<u8>> {
        let stored = match self.provider(entry.accessor.scheme())? {
            ProviderHandle::Sync(provider) => {
                provider.load(&entry.reference, &entry.accessor).await?
            }
            ProviderHandle::Async(provider) => {
                self.cache.load(provider.key(), &entry.reference).await?
            }
        };
        self.reveal(stored)
    }
}
