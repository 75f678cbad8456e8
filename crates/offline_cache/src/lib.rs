//! Offline copy of the client's static assets, kept in named SQLite buckets.
//!
//! Lifecycle: `install` pre-caches the manifest, `activate` drops stale buckets,
//! `fetch` answers requests cache-first and falls back to the cached shell page
//! for documents when the network is gone.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{header::CONTENT_TYPE, Client};
use storage::{CachedAsset, Storage};
use thiserror::Error;
use tracing::{debug, error, info, warn};
use url::Url;

pub const DEFAULT_CACHE_NAME: &str = "insurance-dapp-v1.0.0";
pub const DEFAULT_ASSET_URLS: [&str; 5] = [
    "/",
    "/index.html",
    "/app.js",
    "/Insurance.json",
    "/manifest.json",
];
/// Resolves site-relative request paths for inspection.
const RELATIVE_BASE: &str = "http://localhost/";
/// Served for document requests when both the cache and the network miss.
pub const OFFLINE_FALLBACK_URL: &str = "/index.html";

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("invalid asset url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("network request for '{url}' failed: {message}")]
    Network { url: String, message: String },
    #[error("'{url}' answered with HTTP status {status}")]
    BadStatus { url: String, status: u16 },
    #[error("cache storage error: {0:#}")]
    Storage(#[from] anyhow::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheManifest {
    pub name: String,
    pub urls: Vec<String>,
}

impl CacheManifest {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            urls: DEFAULT_ASSET_URLS.iter().map(|url| url.to_string()).collect(),
        }
    }
}

impl Default for CacheManifest {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_NAME)
    }
}

/// What kind of resource a request loads; only documents get the offline fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestDestination {
    Document,
    Script,
    Json,
    Other,
}

impl RequestDestination {
    /// Guesses the destination from the extension of the last path segment.
    pub fn infer(url: &str) -> Self {
        let parsed = Url::parse(url)
            .or_else(|_| Url::parse(RELATIVE_BASE).and_then(|base| base.join(url)));
        let Ok(parsed) = parsed else {
            return Self::Other;
        };
        let last = parsed
            .path_segments()
            .and_then(|segments| segments.last())
            .unwrap_or_default();
        match last.rsplit_once('.') {
            None => Self::Document,
            Some((_, extension)) => match extension.to_ascii_lowercase().as_str() {
                "html" | "htm" => Self::Document,
                "js" | "mjs" => Self::Script,
                "json" | "webmanifest" => Self::Json,
                _ => Self::Other,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetRequest {
    pub url: String,
    pub destination: RequestDestination,
}

impl AssetRequest {
    pub fn new(url: impl Into<String>) -> Self {
        let url = url.into();
        Self {
            destination: RequestDestination::infer(&url),
            url,
        }
    }

    pub fn document(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            destination: RequestDestination::Document,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
    /// Whether the final response came from the asset origin.
    pub same_origin: bool,
    pub from_cache: bool,
}

impl AssetResponse {
    fn from_cached(asset: CachedAsset) -> Self {
        Self {
            status: asset.status,
            content_type: asset.content_type,
            body: asset.body,
            same_origin: true,
            from_cache: true,
        }
    }

    fn to_cached(&self, url: &str) -> CachedAsset {
        CachedAsset {
            url: url.to_string(),
            status: self.status,
            content_type: self.content_type.clone(),
            body: self.body.clone(),
            cached_at: Utc::now(),
        }
    }
}

#[async_trait]
pub trait AssetFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<AssetResponse, CacheError>;
}

/// Fetches assets over HTTP relative to one base origin.
pub struct HttpAssetFetcher {
    http: Client,
    base: Url,
}

impl HttpAssetFetcher {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, CacheError> {
        let base = Url::parse(base_url).map_err(|err| CacheError::InvalidUrl {
            url: base_url.to_string(),
            reason: err.to_string(),
        })?;
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| CacheError::Network {
                url: base_url.to_string(),
                message: err.to_string(),
            })?;
        Ok(Self { http, base })
    }
}

#[async_trait]
impl AssetFetcher for HttpAssetFetcher {
    async fn fetch(&self, url: &str) -> Result<AssetResponse, CacheError> {
        let target = self.base.join(url).map_err(|err| CacheError::InvalidUrl {
            url: url.to_string(),
            reason: err.to_string(),
        })?;
        let network = |err: reqwest::Error| CacheError::Network {
            url: url.to_string(),
            message: err.to_string(),
        };
        let response = self.http.get(target).send().await.map_err(network)?;
        let same_origin = response.url().origin() == self.base.origin();
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let body = response.bytes().await.map_err(network)?.to_vec();
        Ok(AssetResponse {
            status,
            content_type,
            body,
            same_origin,
            from_cache: false,
        })
    }
}

pub struct OfflineCache {
    storage: Storage,
    fetcher: Arc<dyn AssetFetcher>,
    manifest: CacheManifest,
}

impl OfflineCache {
    pub fn new(storage: Storage, fetcher: Arc<dyn AssetFetcher>, manifest: CacheManifest) -> Self {
        Self {
            storage,
            fetcher,
            manifest,
        }
    }

    pub fn manifest(&self) -> &CacheManifest {
        &self.manifest
    }

    /// Pre-caches every manifest URL. All of them land in the bucket or none do.
    pub async fn install(&self) -> Result<usize, CacheError> {
        match self.download_manifest().await {
            Ok(assets) => {
                self.storage
                    .put_cached_assets(&self.manifest.name, &assets)
                    .await?;
                info!(
                    cache = %self.manifest.name,
                    count = assets.len(),
                    "offline cache: installed"
                );
                Ok(assets.len())
            }
            Err(err) => {
                error!(cache = %self.manifest.name, "offline cache: install failed: {err}");
                Err(err)
            }
        }
    }

    async fn download_manifest(&self) -> Result<Vec<CachedAsset>, CacheError> {
        let mut assets = Vec::with_capacity(self.manifest.urls.len());
        for url in &self.manifest.urls {
            let response = self.fetcher.fetch(url).await?;
            if !(200..300).contains(&response.status) {
                return Err(CacheError::BadStatus {
                    url: url.clone(),
                    status: response.status,
                });
            }
            assets.push(response.to_cached(url));
        }
        Ok(assets)
    }

    /// Deletes every bucket other than the current one and returns their names.
    pub async fn activate(&self) -> Result<Vec<String>, CacheError> {
        let mut deleted = Vec::new();
        for bucket in self.storage.list_cache_buckets().await? {
            if bucket == self.manifest.name {
                continue;
            }
            let removed = self.storage.delete_cache_bucket(&bucket).await?;
            info!(cache = %bucket, entries = removed, "offline cache: deleted old cache");
            deleted.push(bucket);
        }
        Ok(deleted)
    }

    pub async fn fetch(&self, request: &AssetRequest) -> Result<AssetResponse, CacheError> {
        let bucket = &self.manifest.name;
        if let Some(hit) = self.storage.match_cached_asset(bucket, &request.url).await? {
            debug!(url = %request.url, "offline cache: hit");
            return Ok(AssetResponse::from_cached(hit));
        }

        match self.fetcher.fetch(&request.url).await {
            Ok(response) => {
                if response.status == 200 && response.same_origin {
                    if let Err(err) = self
                        .storage
                        .put_cached_asset(bucket, &response.to_cached(&request.url))
                        .await
                    {
                        warn!(url = %request.url, "offline cache: failed to store response: {err:#}");
                    }
                }
                Ok(response)
            }
            Err(err) if request.destination == RequestDestination::Document => {
                warn!(url = %request.url, "offline cache: network unavailable, serving offline page: {err}");
                match self
                    .storage
                    .match_cached_asset(bucket, OFFLINE_FALLBACK_URL)
                    .await?
                {
                    Some(fallback) => Ok(AssetResponse::from_cached(fallback)),
                    None => Err(err),
                }
            }
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
