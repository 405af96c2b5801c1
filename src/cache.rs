//! Balance Cache
//!
//! Read-through cache of account balances in front of the Account Store.
//! Never the system of record: every backend error degrades to a direct
//! store read, and the Journal Engine invalidates touched accounts right
//! after each committed posting.
//!
//! Keys are `balance:{account_id}`, values are the JSON of
//! [`AccountBalance`]. The default backend is a process-local
//! `cached::TimedCache` with a fixed lifespan.
//!
//! Each account carries an invalidation generation. A load that started
//! before an invalidation never leaves its value behind in the cache.

use async_trait::async_trait;
use cached::{Cached, TimedCache};
use dashmap::DashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::ledger::error::LedgerError;
use crate::ledger::store::LedgerStore;
use crate::ledger::types::AccountBalance;

/// Default entry lifespan (5 minutes)
pub const DEFAULT_TTL_SECS: u64 = 300;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache backend unavailable: {0}")]
    Backend(String),

    #[error("cache value could not be decoded: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CacheError {
    pub fn code(&self) -> &'static str {
        match self {
            CacheError::Backend(_) => "CACHE_UNAVAILABLE",
            CacheError::Serialization(_) => "CACHE_CORRUPT",
        }
    }
}

/// Key/value store holding serialized balances
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    async fn set(&self, key: &str, value: String) -> Result<(), CacheError>;

    /// Removing an absent key is not an error
    async fn delete(&self, key: &str) -> Result<(), CacheError>;
}

/// Process-local TTL backend
pub struct TimedCacheBackend {
    inner: Mutex<TimedCache<String, String>>,
}

impl TimedCacheBackend {
    pub fn new(ttl_secs: u64) -> Self {
        Self {
            inner: Mutex::new(TimedCache::with_lifespan(ttl_secs)),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, TimedCache<String, String>>, CacheError> {
        self.inner
            .lock()
            .map_err(|_| CacheError::Backend("cache mutex poisoned".into()))
    }
}

impl Default for TimedCacheBackend {
    fn default() -> Self {
        Self::new(DEFAULT_TTL_SECS)
    }
}

#[async_trait]
impl CacheBackend for TimedCacheBackend {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        Ok(self.lock()?.cache_get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<(), CacheError> {
        self.lock()?.cache_set(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.lock()?.cache_remove(key);
        Ok(())
    }
}

/// Where cache misses are served from
#[async_trait]
pub trait BalanceSource: Send + Sync {
    async fn load_balance(&self, account_id: Uuid) -> Result<Option<AccountBalance>, LedgerError>;
}

/// Reads balances straight from the Account Store
pub struct StoreBalanceSource {
    store: Arc<dyn LedgerStore>,
}

impl StoreBalanceSource {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl BalanceSource for StoreBalanceSource {
    async fn load_balance(&self, account_id: Uuid) -> Result<Option<AccountBalance>, LedgerError> {
        Ok(self
            .store
            .get_account(account_id)
            .await?
            .as_ref()
            .map(AccountBalance::from))
    }
}

pub struct BalanceCache {
    backend: Arc<dyn CacheBackend>,
    source: Arc<dyn BalanceSource>,
    generations: DashMap<Uuid, u64>,
}

impl BalanceCache {
    pub fn new(backend: Arc<dyn CacheBackend>, source: Arc<dyn BalanceSource>) -> Self {
        Self {
            backend,
            source,
            generations: DashMap::new(),
        }
    }

    fn generation(&self, account_id: Uuid) -> u64 {
        self.generations.get(&account_id).map(|g| *g).unwrap_or(0)
    }

    pub fn cache_key(account_id: Uuid) -> String {
        format!("balance:{}", account_id)
    }

    /// Read-through lookup. Only source errors are returned; cache errors
    /// are logged and fall through to the source.
    pub async fn get(&self, account_id: Uuid) -> Result<Option<AccountBalance>, LedgerError> {
        let key = Self::cache_key(account_id);

        match self.backend.get(&key).await {
            Ok(Some(raw)) => match serde_json::from_str::<AccountBalance>(&raw) {
                Ok(balance) => {
                    debug!(account_id = %account_id, "balance cache hit");
                    return Ok(Some(balance));
                }
                Err(e) => {
                    warn!(account_id = %account_id, error = %e, "Discarding undecodable cache entry");
                    self.invalidate(account_id).await;
                }
            },
            Ok(None) => debug!(account_id = %account_id, "balance cache miss"),
            Err(e) => {
                warn!(account_id = %account_id, error = %e, "Balance cache read failed, using store")
            }
        }

        let generation = self.generation(account_id);
        let balance = self.source.load_balance(account_id).await?;
        if let Some(ref b) = balance {
            self.populate(b, generation).await;
        }
        Ok(balance)
    }

    /// Store a loaded balance unless an invalidation ran since `generation`
    /// was read.
    async fn populate(&self, balance: &AccountBalance, generation: u64) {
        if self.generation(balance.id) != generation {
            debug!(account_id = %balance.id, "Invalidated during load, not caching");
            return;
        }
        let key = Self::cache_key(balance.id);
        let raw = match serde_json::to_string(balance) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(account_id = %balance.id, error = %e, "Balance not cacheable");
                return;
            }
        };
        if let Err(e) = self.backend.set(&key, raw).await {
            warn!(account_id = %balance.id, error = %e, "Balance cache write failed");
            return;
        }
        // an invalidation that deleted before our write landed
        if self.generation(balance.id) != generation
            && let Err(e) = self.backend.delete(&key).await
        {
            warn!(account_id = %balance.id, error = %e, "Balance cache invalidation failed");
        }
    }

    /// Drop the cached balance. Idempotent and infallible.
    pub async fn invalidate(&self, account_id: Uuid) {
        *self.generations.entry(account_id).or_insert(0) += 1;
        if let Err(e) = self.backend.delete(&Self::cache_key(account_id)).await {
            warn!(account_id = %account_id, error = %e, "Balance cache invalidation failed");
        }
    }
}
