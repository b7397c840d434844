use std::{fmt, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::Result;

use super::key::CacheKey;

/// Last validator response stored for a key.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(key: CacheKey, payload: Value) -> Self {
        Self {
            key,
            payload,
            created_at: Utc::now(),
        }
    }
}

/// Storage backend for cache entries. Writes overwrite; last writer wins.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>>;

    async fn upsert(&self, key: &CacheKey, payload: Value) -> Result<()>;
}

/// Read-through facade shared by every validator workflow.
#[derive(Clone)]
pub struct CacheManager {
    store: Arc<dyn CacheStore>,
}

impl fmt::Debug for CacheManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheManager")
            .field("store", &"CacheStore")
            .finish()
    }
}

impl CacheManager {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self { store }
    }

    /// Returns the cached payload for `key`, or `None` on a miss.
    ///
    /// Store failures and undecodable payloads are reported as misses so a
    /// cache outage never blocks validation.
    pub async fn lookup<T: DeserializeOwned>(
        &self,
        key: &CacheKey,
        ignore_cache: bool,
    ) -> Option<T> {
        if ignore_cache {
            debug!(cache_key = %key, "cache read bypassed");
            return None;
        }

        match self.store.get(key).await {
            Ok(Some(entry)) => match serde_json::from_value(entry.payload) {
                Ok(value) => {
                    debug!(cache_key = %key, "cache hit");
                    Some(value)
                }
                Err(err) => {
                    warn!(cache_key = %key, error = %err, "discarding undecodable cache entry");
                    None
                }
            },
            Ok(None) => {
                debug!(cache_key = %key, "cache miss");
                None
            }
            Err(err) => {
                warn!(cache_key = %key, error = %err, "cache read failed; treating as miss");
                None
            }
        }
    }

    pub async fn upsert<T: Serialize>(
        &self,
        key: &CacheKey,
        value: &T,
    ) -> Result<()> {
        let payload = serde_json::to_value(value)?;
        self.store.upsert(key, payload).await
    }

    /// Upsert that logs instead of failing the caller.
    pub async fn upsert_best_effort<T: Serialize>(
        &self,
        key: &CacheKey,
        value: &T,
    ) {
        if let Err(err) = self.upsert(key, value).await {
            warn!(cache_key = %key, error = %err, "failed to write cache entry");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::memory::InMemoryCacheStore;
    use crate::error::LeadError;
    use leadcheck_model::CompanyVerdict;

    struct BrokenStore;

    #[async_trait]
    impl CacheStore for BrokenStore {
        async fn get(&self, _key: &CacheKey) -> Result<Option<CacheEntry>> {
            Err(LeadError::Cache("disk full".into()))
        }

        async fn upsert(&self, _key: &CacheKey, _payload: Value) -> Result<()> {
            Err(LeadError::Cache("disk full".into()))
        }
    }

    #[tokio::test]
    async fn ignore_cache_skips_reads_but_upsert_refreshes() {
        let manager = CacheManager::new(Arc::new(InMemoryCacheStore::new()));
        let key = CacheKey::company_validation("acme.io", "SaaS");

        manager
            .upsert(&key, &CompanyVerdict::rejected("stale"))
            .await
            .expect("upsert");
        assert!(
            manager
                .lookup::<CompanyVerdict>(&key, true)
                .await
                .is_none()
        );

        let mut fresh = CompanyVerdict::rejected("fresh");
        fresh.valid = true;
        manager.upsert(&key, &fresh).await.expect("upsert");

        let cached: CompanyVerdict =
            manager.lookup(&key, false).await.expect("hit");
        assert_eq!(cached, fresh);
    }

    #[tokio::test]
    async fn store_errors_read_as_misses() {
        let manager = CacheManager::new(Arc::new(BrokenStore));
        let key = CacheKey::email_validation("jane@acme.io");
        assert!(manager.lookup::<Value>(&key, false).await.is_none());
        manager.upsert_best_effort(&key, &"ignored").await;
    }
}
