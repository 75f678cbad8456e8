use std::path::PathBuf;

use async_trait::async_trait;
use reqwest::Client;
use url::Url;
use shared::{
    error::{RemoteError, RemoteErrorKind},
    protocol::ContractDescriptor,
};
use tracing::debug;

/// Where the compiled contract artifact is read from at bootstrap.
#[async_trait]
pub trait DescriptorSource: Send + Sync {
    async fn load(&self) -> Result<ContractDescriptor, RemoteError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DescriptorLocation {
    File(PathBuf),
    Url(Url),
}

impl DescriptorLocation {
    /// `http(s)://` values are fetched, anything else is a local path.
    pub fn parse(raw: &str) -> Self {
        match Url::parse(raw) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => Self::Url(url),
            _ => Self::File(PathBuf::from(raw)),
        }
    }
}

impl std::fmt::Display for DescriptorLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::File(path) => write!(f, "{}", path.display()),
            Self::Url(url) => write!(f, "{url}"),
        }
    }
}

#[async_trait]
impl DescriptorSource for DescriptorLocation {
    async fn load(&self) -> Result<ContractDescriptor, RemoteError> {
        debug!(location = %self, "descriptor: loading contract artifact");
        let raw = match self {
            Self::File(path) => tokio::fs::read(path).await.map_err(|err| load_error(self, err))?,
            Self::Url(url) => Client::new()
                .get(url.clone())
                .send()
                .await
                .and_then(|res| res.error_for_status())
                .map_err(|err| load_error(self, err))?
                .bytes()
                .await
                .map_err(|err| load_error(self, err))?
                .to_vec(),
        };
        serde_json::from_slice(&raw).map_err(|err| {
            RemoteError::new(
                RemoteErrorKind::Unclassified,
                format!("invalid contract descriptor at {self}: {err}"),
            )
        })
    }
}

fn load_error(location: &DescriptorLocation, err: impl std::fmt::Display) -> RemoteError {
    RemoteError::new(
        RemoteErrorKind::Transport,
        format!("failed to load contract descriptor from {location}: {err}"),
    )
}
