//! Background-synced cache for asynchronous providers.
//!
//! One sync loop drives every asynchronous provider. On each tick a provider
//! is synced if it has never been tried, if its sync interval has passed
//! since the last attempt, or, after a failure, if its backoff has passed.
//! A successful sync replaces the provider's whole value map; a failed one
//! leaves the previous map untouched and doubles the backoff, from
//! [`CacheConfig::min_backoff`] up to [`CacheConfig::max_backoff`].
//!
//! The first successful sync opens the provider's `loaded` latch. Reads
//! before that wait for it, up to [`CacheConfig::initial_wait`]. Writes made
//! through the manager before the latch opens are not applied to the cache;
//! the first sync picks them up.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use ftl_core::Shutdown;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use super::{AsyncProvider, ConfigRef, Router, SyncedValue};
use crate::error::{Error, Result, poison_err};
use crate::metrics::RuntimeMetrics;

/// Cache timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    /// Longest a read waits for a provider's first sync.
    pub initial_wait: Duration,
    /// Sync loop tick.
    pub tick: Duration,
    /// First delay after a failed sync.
    pub min_backoff: Duration,
    /// Failed sync delay ceiling.
    pub max_backoff: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            initial_wait: Duration::from_secs(5),
            tick: Duration::from_secs(1),
            min_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(120),
        }
    }
}

#[derive(Debug, Default)]
struct SyncState {
    last_attempt: Option<Instant>,
    backoff: Option<Duration>,
}

#[derive(Debug)]
struct ProviderCache {
    provider: Arc<dyn AsyncProvider>,
    values: RwLock<HashMap<ConfigRef, SyncedValue>>,
    loaded: watch::Sender<bool>,
    state: Mutex<SyncState>,
}

impl ProviderCache {
    fn needs_sync(&self, now: Instant) -> Result<bool> {
        let state = self.state.lock().map_err(poison_err)?;
        Ok(match (state.last_attempt, state.backoff) {
            (None, _) => true,
            (Some(last), Some(backoff)) => now >= last + backoff,
            (Some(last), None) => now >= last + self.provider.sync_interval(),
        })
    }

    fn is_loaded(&self) -> bool {
        *self.loaded.borrow()
    }
}

/// Values of every asynchronous provider, keyed by provider scheme.
#[derive(Debug)]
pub struct Cache {
    providers: HashMap<&'static str, ProviderCache>,
    config: CacheConfig,
    metrics: RuntimeMetrics,
}

impl Cache {
    /// Creates a cache for `providers`. Nothing syncs until [`Cache::spawn`]
    /// or [`Cache::sync_due`] runs.
    #[must_use]
    pub fn new(providers: impl IntoIterator<Item = Arc<dyn AsyncProvider>>, config: CacheConfig) -> Self {
        let providers = providers
            .into_iter()
            .map(|provider| {
                let (loaded, _) = watch::channel(false);
                (
                    provider.key(),
                    ProviderCache {
                        provider,
                        values: RwLock::new(HashMap::new()),
                        loaded,
                        state: Mutex::new(SyncState::default()),
                    },
                )
            })
            .collect();
        Self {
            providers,
            config,
            metrics: RuntimeMetrics::new(),
        }
    }

    /// Whether `provider` has completed its first sync.
    #[must_use]
    pub fn is_loaded(&self, provider: &str) -> bool {
        self.providers.get(provider).is_some_and(ProviderCache::is_loaded)
    }

    /// Starts the sync loop.
    #[must_use]
    pub fn spawn(self: &Arc<Self>, router: Arc<dyn Router>, shutdown: Shutdown) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            if cache.providers.is_empty() {
                return;
            }
            let mut ticker = tokio::time::interval(cache.config.tick);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => return,
                    _ = ticker.tick() => cache.sync_due(router.as_ref()).await,
                }
            }
        })
    }

    /// Syncs every provider that is due.
    pub async fn sync_due(&self, router: &dyn Router) {
        let now = Instant::now();
        let mut due = Vec::new();
        for (key, cache) in &self.providers {
            match cache.needs_sync(now) {
                Ok(true) => due.push((*key, cache)),
                Ok(false) => {}
                Err(err) => tracing::error!(provider = key, error = %err, "cannot check sync state"),
            }
        }
        if due.is_empty() {
            return;
        }
        let entries = match router.list().await {
            Ok(entries) => entries,
            Err(err) => {
                tracing::warn!(error = %err, "cannot list entries for cache sync");
                return;
            }
        };
        for (key, cache) in due {
            let owned: Vec<_> = entries
                .iter()
                .filter(|e| e.accessor.scheme() == key)
                .cloned()
                .collect();
            if let Err(err) = self.sync_one(key, cache, &owned, now).await {
                tracing::error!(provider = key, error = %err, "cache sync bookkeeping failed");
            }
        }
    }

    async fn sync_one(
        &self,
        key: &str,
        cache: &ProviderCache,
        entries: &[super::Entry],
        now: Instant,
    ) -> Result<()> {
        cache.state.lock().map_err(poison_err)?.last_attempt = Some(now);
        match cache.provider.sync(entries).await {
            Ok(values) => {
                *cache.values.write().map_err(poison_err)? = values;
                cache.state.lock().map_err(poison_err)?.backoff = None;
                if cache.loaded.send_if_modified(|loaded| !std::mem::replace(loaded, true)) {
                    tracing::debug!(provider = key, "initial config sync complete");
                }
                self.metrics.record_config_sync(key, true);
            }
            Err(err) => {
                let mut state = cache.state.lock().map_err(poison_err)?;
                let backoff = state.backoff.map_or(self.config.min_backoff, |b| {
                    (b * 2).min(self.config.max_backoff)
                });
                state.backoff = Some(backoff);
                drop(state);
                tracing::warn!(
                    provider = key,
                    error = %err,
                    retry_in_ms = u64::try_from(backoff.as_millis()).unwrap_or(u64::MAX),
                    "config sync failed"
                );
                self.metrics.record_config_sync(key, false);
            }
        }
        Ok(())
    }

    /// Reads the cached value of `reference` from `provider`.
    ///
    /// # Errors
    ///
    /// - [`Error::FailedPrecondition`] for an unknown provider.
    /// - [`Error::DeadlineExceeded`] if the first sync does not finish in time.
    /// - [`Error::NotFound`] if the provider has no value for the ref.
    pub async fn load(&self, provider: &str, reference: &ConfigRef) -> Result<Vec<u8>> {
        let cache = self
            .providers
            .get(provider)
            .ok_or_else(|| Error::precondition(format!("no cached provider {provider:?}")))?;
        let mut loaded = cache.loaded.subscribe();
        let synced = tokio::time::timeout(self.config.initial_wait, loaded.wait_for(|l| *l)).await;
        if !matches!(synced, Ok(Ok(_))) {
            return Err(Error::DeadlineExceeded {
                message: format!("initial sync of provider {provider:?}"),
            });
        }
        let values = cache.values.read().map_err(poison_err)?;
        values
            .get(reference)
            .map(|v| v.value.clone())
            .ok_or_else(|| Error::not_found(format!("{reference} in provider {provider:?}")))
    }

    /// Records a value written through the manager.
    ///
    /// # Errors
    ///
    /// Returns an error if a lock is poisoned.
    pub fn updated_value(&self, provider: &str, reference: &ConfigRef, value: &[u8]) -> Result<()> {
        if let Some(cache) = self.providers.get(provider).filter(|c| c.is_loaded()) {
            cache.values.write().map_err(poison_err)?.insert(
                reference.clone(),
                SyncedValue {
                    value: value.to_vec(),
                    version: None,
                },
            );
        }
        Ok(())
    }

    /// Records a value deleted through the manager.
    ///
    /// # Errors
    ///
    /// Returns an error if a lock is poisoned.
    pub fn deleted_value(&self, provider: &str, reference: &ConfigRef) -> Result<()> {
        if let Some(cache) = self.providers.get(provider).filter(|c| c.is_loaded()) {
            cache.values.write().map_err(poison_err)?.remove(reference);
        }
        Ok(())
    }
}
