//! Value providers.

use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;

use super::{AccessorKey, ConfigRef, Entry, Role};
use crate::error::{Error, Result, poison_err};

/// Loads values on demand.
#[async_trait]
pub trait Provider: Send + Sync + fmt::Debug {
    /// Accessor key scheme this provider owns.
    fn key(&self) -> &'static str;

    /// Resolves `key` to the value of `reference`.
    async fn load(&self, reference: &ConfigRef, key: &AccessorKey) -> Result<Vec<u8>>;

    /// Stores a value and returns the key that resolves it.
    async fn store(&self, reference: &ConfigRef, value: &[u8]) -> Result<AccessorKey>;

    /// Forgets the value of `reference`.
    async fn delete(&self, reference: &ConfigRef) -> Result<()>;
}

/// A value returned by an asynchronous provider's sync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncedValue {
    /// JSON-encoded value.
    pub value: Vec<u8>,
    /// Provider-specific version, if tracked.
    pub version: Option<String>,
}

/// A provider whose values are synced into a cache in the background.
#[async_trait]
pub trait AsyncProvider: Send + Sync + fmt::Debug {
    /// Accessor key scheme this provider owns.
    fn key(&self) -> &'static str;

    /// Time between successful syncs.
    fn sync_interval(&self) -> Duration;

    /// Fetches the current values of `entries`, all owned by this provider.
    async fn sync(&self, entries: &[Entry]) -> Result<HashMap<ConfigRef, SyncedValue>>;

    /// Stores a value and returns the key that resolves it.
    async fn store(&self, reference: &ConfigRef, value: &[u8]) -> Result<AccessorKey>;

    /// Forgets the value of `reference`.
    async fn delete(&self, reference: &ConfigRef) -> Result<()>;
}

/// Either kind of provider.
#[derive(Debug, Clone)]
pub enum ProviderHandle {
    /// Loads on every read.
    Sync(Arc<dyn Provider>),
    /// Served from the cache.
    Async(Arc<dyn AsyncProvider>),
}

impl ProviderHandle {
    /// Accessor key scheme.
    #[must_use]
    pub fn key(&self) -> &'static str {
        match self {
            Self::Sync(p) => p.key(),
            Self::Async(p) => p.key(),
        }
    }

    pub(crate) async fn store(&self, reference: &ConfigRef, value: &[u8]) -> Result<AccessorKey> {
        match self {
            Self::Sync(p) => p.store(reference, value).await,
            Self::Async(p) => p.store(reference, value).await,
        }
    }

    pub(crate) async fn delete(&self, reference: &ConfigRef) -> Result<()> {
        match self {
            Self::Sync(p) => p.delete(reference).await,
            Self::Async(p) => p.delete(reference).await,
        }
    }
}

fn decode_b64(what: &str, text: &str) -> Result<Vec<u8>> {
    URL_SAFE_NO_PAD
        .decode(text.trim_end_matches('='))
        .map_err(|e| Error::invalid(format!("{what} is not valid base64: {e}")))
}

/// Keeps the value inside the accessor key itself: `inline://<base64 JSON>`.
#[derive(Debug, Clone, Copy, Default)]
pub struct InMemoryProvider;

impl InMemoryProvider {
    /// Scheme of inline keys.
    pub const SCHEME: &'static str = "inline";
}

#[async_trait]
impl Provider for InMemoryProvider {
    fn key(&self) -> &'static str {
        Self::SCHEME
    }

    async fn load(&self, _reference: &ConfigRef, key: &AccessorKey) -> Result<Vec<u8>> {
        decode_b64(&format!("inline key {key}"), key.payload())
    }

    async fn store(&self, _reference: &ConfigRef, value: &[u8]) -> Result<AccessorKey> {
        Ok(AccessorKey::new(Self::SCHEME, &URL_SAFE_NO_PAD.encode(value)))
    }

    async fn delete(&self, _reference: &ConfigRef) -> Result<()> {
        Ok(())
    }
}

type Lookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Reads values from environment variables.
///
/// A ref maps to `<prefix><b64(module)>_<b64(name)>`, or `<prefix><b64(name)>`
/// for globals, where the prefix comes from the [`Role`]. The variable holds
/// the base64 of the JSON value. Both use URL-safe base64 without padding.
///
/// The process environment is not written; storing only returns the key
/// and logs the variable that has to be exported.
pub struct EnvarProvider<R: Role> {
    lookup: Lookup,
    _role: PhantomData<R>,
}

impl<R: Role> fmt::Debug for EnvarProvider<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnvarProvider").field("role", &R::NAME).finish()
    }
}

impl<R: Role> Default for EnvarProvider<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Role> EnvarProvider<R> {
    /// Scheme of environment keys.
    pub const SCHEME: &'static str = "envar";

    /// A provider reading the process environment.
    #[must_use]
    pub fn new() -> Self {
        Self::with_lookup(|name| std::env::var(name).ok())
    }

    /// A provider reading variables through `lookup`.
    #[must_use]
    pub fn with_lookup(lookup: impl Fn(&str) -> Option<String> + Send + Sync + 'static) -> Self {
        Self {
            lookup: Arc::new(lookup),
            _role: PhantomData,
        }
    }

    /// The environment variable holding `reference`.
    #[must_use]
    pub fn variable(reference: &ConfigRef) -> String {
        let mut name = R::ENV_PREFIX.to_string();
        if let Some(module) = &reference.module {
            name.push_str(&URL_SAFE_NO_PAD.encode(module));
            name.push('_');
        }
        name.push_str(&URL_SAFE_NO_PAD.encode(&reference.name));
        name
    }
}

#[async_trait]
impl<R: Role> Provider for EnvarProvider<R> {
    fn key(&self) -> &'static str {
        Self::SCHEME
    }

    async fn load(&self, reference: &ConfigRef, _key: &AccessorKey) -> Result<Vec<u8>> {
        let variable = Self::variable(reference);
        let encoded = (self.lookup)(&variable)
            .ok_or_else(|| Error::not_found(format!("environment variable {variable}")))?;
        decode_b64(&variable, &encoded)
    }

    async fn store(&self, reference: &ConfigRef, value: &[u8]) -> Result<AccessorKey> {
        let variable = Self::variable(reference);
        if R::SENSITIVE {
            tracing::info!(%reference, variable = %variable, "export the base64 value as this variable");
        } else {
            tracing::info!(
                %reference,
                variable = %variable,
                value = %URL_SAFE_NO_PAD.encode(value),
                "export this variable"
            );
        }
        Ok(AccessorKey::new(Self::SCHEME, &reference.to_string()))
    }

    async fn delete(&self, _reference: &ConfigRef) -> Result<()> {
        Ok(())
    }
}

/// An asynchronous provider backed by process memory.
///
/// Syncs can be made to fail to exercise cache backoff.
#[derive(Debug)]
pub struct InMemoryAsyncProvider {
    values: Mutex<HashMap<ConfigRef, Vec<u8>>>,
    interval: Duration,
    failing: AtomicBool,
    syncs: AtomicUsize,
}

impl Default for InMemoryAsyncProvider {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

impl InMemoryAsyncProvider {
    /// Scheme of keys stored here.
    pub const SCHEME: &'static str = "memory";

    /// Creates an empty provider syncing every `interval`.
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self {
            values: Mutex::new(HashMap::new()),
            interval,
            failing: AtomicBool::new(false),
            syncs: AtomicUsize::new(0),
        }
    }

    /// Makes subsequent syncs fail or succeed.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of sync attempts so far.
    #[must_use]
    pub fn sync_count(&self) -> usize {
        self.syncs.load(Ordering::SeqCst)
    }

    /// Changes a value behind the cache's back.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn put(&self, reference: &ConfigRef, value: &[u8]) -> Result<()> {
        self.values
            .lock()
            .map_err(poison_err)?
            .insert(reference.clone(), value.to_vec());
        Ok(())
    }
}

#[async_trait]
impl AsyncProvider for InMemoryAsyncProvider {
    fn key(&self) -> &'static str {
        Self::SCHEME
    }

    fn sync_interval(&self) -> Duration {
        self.interval
    }

    async fn sync(&self, entries: &[Entry]) -> Result<HashMap<ConfigRef, SyncedValue>> {
        self.syncs.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::Unavailable {
                message: "in-memory provider set to fail".into(),
                source: None,
            });
        }
        let values = self.values.lock().map_err(poison_err)?;
        Ok(entries
            .iter()
            .filter_map(|entry| {
                values.get(&entry.reference).map(|value| {
                    (
                        entry.reference.clone(),
                        SyncedValue {
                            value: value.clone(),
                            version: None,
                        },
                    )
                })
            })
            .collect())
    }

    async fn store(&self, reference: &ConfigRef, value: &[u8]) -> Result<AccessorKey> {
        self.put(reference, value)?;
        Ok(AccessorKey::new(Self::SCHEME, &reference.to_string()))
    }

    async fn delete(&self, reference: &ConfigRef) -> Result<()> {
        self.values.lock().map_err(poison_err)?.remove(reference);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::configuration::{Configuration, Secrets};

    #[tokio::test]
    async fn inline_keys_carry_the_value() {
        let provider = InMemoryProvider;
        let reference = ConfigRef::global("foo");
        let key = provider.store(&reference, b"\"bar\"").await.unwrap();
        assert_eq!(key.as_str(), "inline://ImJhciI");
        assert_eq!(provider.load(&reference, &key).await.unwrap(), b"\"bar\"");
    }

    #[test]
    fn envar_names_follow_convention() {
        assert_eq!(
            EnvarProvider::<Secrets>::variable(&ConfigRef::global("baz")),
            "FTL_SECRET_YmF6"
        );
        assert_eq!(
            EnvarProvider::<Configuration>::variable(&ConfigRef::module("echo", "baz")),
            "FTL_CONFIG_ZWNobw_YmF6"
        );
    }

    #[tokio::test]
    async fn envar_loads_through_lookup() {
        let env: HashMap<String, String> =
            [("FTL_SECRET_YmF6".to_string(), "eyJiYXoiOiJ3YXoifQ".to_string())].into();
        let provider = EnvarProvider::<Secrets>::with_lookup(move |name| env.get(name).cloned());
        let reference = ConfigRef::global("baz");
        let key = provider.store(&reference, br#"{"baz":"waz"}"#).await.unwrap();
        assert_eq!(key.as_str(), "envar://baz");
        assert_eq!(
            provider.load(&reference, &key).await.unwrap(),
            br#"{"baz":"waz"}"#
        );

        let missing = ConfigRef::global("nope");
        let err = provider.load(&missing, &key).await.unwrap_err();
        assert_eq!(err.kind(), ftl_core::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn async_provider_syncs_listed_entries() {
        let provider = InMemoryAsyncProvider::default();
        let a = ConfigRef::global("a");
        let key = provider.store(&a, b"1").await.unwrap();
        provider.put(&ConfigRef::global("unlisted"), b"2").unwrap();

        let entries = vec![Entry {
            reference: a.clone(),
            accessor: key,
        }];
        let synced = provider.sync(&entries).await.unwrap();
        assert_eq!(synced.len(), 1);
        assert_eq!(synced[&a].value, b"1");

        provider.set_failing(true);
        assert!(provider.sync(&entries).await.is_err());
        assert_eq!(provider.sync_count(), 2);
    }
}
