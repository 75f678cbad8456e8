use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Pool, Row, Sqlite,
};
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};
use tracing::debug;

#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

/// Opaque text value stored under a key, e.g. the JSON policy draft.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlob {
    pub value: String,
    pub updated_at: DateTime<Utc>,
}

/// One response held in an offline cache bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedAsset {
    pub url: String,
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
    pub cached_at: DateTime<Utc>,
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        // Every in-memory connection is its own database.
        let max_connections = if is_memory_url(database_url) { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(connect_options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    pub async fn save_blob(&self, key: &str, value: &str, updated_at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            "INSERT INTO kv_blobs (key, value, updated_at) VALUES (?, ?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        )
        .bind(key)
        .bind(value)
        .bind(updated_at)
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to save blob '{key}'"))?;
        Ok(())
    }

    pub async fn load_blob(&self, key: &str) -> Result<Option<StoredBlob>> {
        let row = sqlx::query("SELECT value, updated_at FROM kv_blobs WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("failed to load blob '{key}'"))?;
        row.map(|row| -> Result<StoredBlob> {
            Ok(StoredBlob {
                value: row.try_get("value")?,
                updated_at: row.try_get("updated_at")?,
            })
        })
        .transpose()
    }

    pub async fn delete_blob(&self, key: &str) -> Result<bool> {
        let affected = sqlx::query("DELETE FROM kv_blobs WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await
            .with_context(|| format!("failed to delete blob '{key}'"))?
            .rows_affected();
        Ok(affected > 0)
    }

    pub async fn put_cached_asset(&self, bucket: &str, asset: &CachedAsset) -> Result<()> {
        self.put_cached_assets(bucket, std::slice::from_ref(asset))
            .await
    }

    /// Stores all assets in one transaction; either every entry lands or none does.
    pub async fn put_cached_assets(&self, bucket: &str, assets: &[CachedAsset]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for asset in assets {
            sqlx::query(
                "INSERT INTO asset_cache (bucket, url, status, content_type, body, cached_at)
                 VALUES (?, ?, ?, ?, ?, ?)
                 ON CONFLICT(bucket, url) DO UPDATE SET
                    status = excluded.status,
                    content_type = excluded.content_type,
                    body = excluded.body,
                    cached_at = excluded.cached_at",
            )
            .bind(bucket)
            .bind(&asset.url)
            .bind(i64::from(asset.status))
            .bind(asset.content_type.as_deref())
            .bind(asset.body.as_slice())
            .bind(asset.cached_at)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("failed to cache '{}' in bucket '{bucket}'", asset.url))?;
        }
        tx.commit().await?;
        debug!(bucket, count = assets.len(), "storage: cached assets");
        Ok(())
    }

    pub async fn match_cached_asset(&self, bucket: &str, url: &str) -> Result<Option<CachedAsset>> {
        let row = sqlx::query(
            "SELECT url, status, content_type, body, cached_at FROM asset_cache WHERE bucket = ? AND url = ?",
        )
        .bind(bucket)
        .bind(url)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("failed to look up '{url}' in bucket '{bucket}'"))?;

        row.map(|row| -> Result<CachedAsset> {
            let status: i64 = row.try_get("status")?;
            Ok(CachedAsset {
                url: row.try_get("url")?,
                status: u16::try_from(status).context("cached status out of range")?,
                content_type: row.try_get("content_type")?,
                body: row.try_get("body")?,
                cached_at: row.try_get("cached_at")?,
            })
        })
        .transpose()
    }

    pub async fn list_cache_buckets(&self) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT DISTINCT bucket FROM asset_cache ORDER BY bucket")
            .fetch_all(&self.pool)
            .await
            .context("failed to list cache buckets")?;
        rows.into_iter()
            .map(|row| row.try_get::<String, _>("bucket").map_err(anyhow::Error::from))
            .collect()
    }

    pub async fn delete_cache_bucket(&self, bucket: &str) -> Result<u64> {
        let affected = sqlx::query("DELETE FROM asset_cache WHERE bucket = ?")
            .bind(bucket)
            .execute(&self.pool)
            .await
            .with_context(|| format!("failed to delete cache bucket '{bucket}'"))?
            .rows_affected();
        Ok(affected)
    }
}

fn is_memory_url(database_url: &str) -> bool {
    database_url.starts_with("sqlite::memory:") || database_url.contains("mode=memory")
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if is_memory_url(database_url) || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
