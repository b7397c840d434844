use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::error::Result;

use super::{
    key::CacheKey,
    manager::{CacheEntry, CacheStore},
};

/// Process-local cache store for tests and single-node development.
#[derive(Debug, Default)]
pub struct InMemoryCacheStore {
    entries: Mutex<HashMap<CacheKey, CacheEntry>>,
}

impl InMemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

#[async_trait]
impl CacheStore for InMemoryCacheStore {
    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn upsert(&self, key: &CacheKey, payload: Value) -> Result<()> {
        let mut guard = self.entries.lock().await;
        guard.insert(key.clone(), CacheEntry::new(key.clone(), payload));
        Ok(())
    }
}
