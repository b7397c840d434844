use std::{
    fmt,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{LeadError, Result};

use super::{
    key::CacheKey,
    manager::{CacheEntry, CacheStore},
};

/// On-disk cache store backed by `cacache`.
///
/// Entries live in the content-addressed blob store; the index maps the
/// fingerprint key to the newest blob, which gives upsert semantics.
#[derive(Clone, PartialEq, Eq)]
pub struct DiskCacheStore {
    root: PathBuf,
}

impl fmt::Debug for DiskCacheStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("DiskCacheStore").field(&self.root).finish()
    }
}

impl DiskCacheStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl CacheStore for DiskCacheStore {
    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>> {
        match cacache::read(self.root.as_path(), key.storage_key()).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(cacache::Error::EntryNotFound(_, _)) => Ok(None),
            Err(cacache::Error::IntegrityError(err)) => Err(LeadError::Cache(
                format!("cache entry failed integrity check: {key} ({err})"),
            )),
            Err(err) => Err(LeadError::Cache(format!(
                "cacache read failed for {key}: {err}"
            ))),
        }
    }

    async fn upsert(&self, key: &CacheKey, payload: Value) -> Result<()> {
        let entry = CacheEntry::new(key.clone(), payload);
        let bytes = serde_json::to_vec(&entry)?;
        cacache::write(self.root.as_path(), key.storage_key(), bytes)
            .await
            .map_err(|err| {
                LeadError::Cache(format!("cacache write failed for {key}: {err}"))
            })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn last_write_wins_on_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = DiskCacheStore::new(dir.path().to_path_buf());
        let key = CacheKey::email_validation("jane@acme.io");

        assert!(store.get(&key).await.expect("read").is_none());

        store
            .upsert(&key, json!({"status": "invalid"}))
            .await
            .expect("first write");
        store
            .upsert(&key, json!({"status": "valid"}))
            .await
            .expect("second write");

        let entry = store.get(&key).await.expect("read").expect("entry");
        assert_eq!(entry.payload, json!({"status": "valid"}));
        assert_eq!(entry.key, key);
    }
}
