use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{PgPool, Row, types::Json};

use crate::error::Result;

use super::{
    key::CacheKey,
    manager::{CacheEntry, CacheStore},
};

/// Cache store backed by the three `*_cache` tables.
#[derive(Clone)]
pub struct PostgresCacheStore {
    pool: PgPool,
}

impl fmt::Debug for PostgresCacheStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresCacheStore")
            .field("pool_size", &self.pool.size())
            .field("idle_connections", &self.pool.num_idle())
            .finish()
    }
}

impl PostgresCacheStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CacheStore for PostgresCacheStore {
    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>> {
        let sql = format!(
            "SELECT response_data, created_at FROM {} WHERE cache_key = $1",
            key.namespace.table()
        );
        let row = sqlx::query(&sql)
            .bind(&key.fingerprint)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let payload: Json<Value> = row.try_get("response_data")?;
        let created_at: DateTime<Utc> = row.try_get("created_at")?;
        Ok(Some(CacheEntry {
            key: key.clone(),
            payload: payload.0,
            created_at,
        }))
    }

    async fn upsert(&self, key: &CacheKey, payload: Value) -> Result<()> {
        let sql = format!(
            r#"
            INSERT INTO {} (cache_key, response_data, created_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (cache_key) DO UPDATE
            SET response_data = EXCLUDED.response_data,
                created_at = EXCLUDED.created_at
            "#,
            key.namespace.table()
        );
        sqlx::query(&sql)
            .bind(&key.fingerprint)
            .bind(Json(payload))
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
