use std::{collections::HashMap, path::Path, time::Duration};

use anyhow::Context;
use client_core::ControllerConfig;
use config::{Config, Environment, File};
use serde::Deserialize;

pub const DEFAULT_CONFIG_FILE: &str = "policy_cli.toml";
const ENV_PREFIX: &str = "APP";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub rpc_url: String,
    /// Contract artifact: a file path or an http(s) URL.
    pub descriptor: String,
    pub database_url: String,
    pub call_timeout_secs: u64,
    pub confirmation_timeout_secs: u64,
    pub poll_interval_ms: u64,
    pub gas_margin_percent: u64,
    pub draft_max_age_secs: u64,
    pub asset_base_url: String,
    pub cache_name: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            rpc_url: "http://127.0.0.1:7545".into(),
            descriptor: "build/contracts/Insurance.json".into(),
            database_url: "sqlite://./data/policy_cli.db".into(),
            call_timeout_secs: 30,
            confirmation_timeout_secs: 300,
            poll_interval_ms: 1000,
            gas_margin_percent: 20,
            draft_max_age_secs: 3600,
            asset_base_url: "http://127.0.0.1:8080/".into(),
            cache_name: offline_cache::DEFAULT_CACHE_NAME.into(),
        }
    }
}

impl Settings {
    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            call_timeout: Duration::from_secs(self.call_timeout_secs),
            confirmation_timeout: Duration::from_secs(self.confirmation_timeout_secs),
            gas_margin_percent: self.gas_margin_percent,
            draft_max_age: Duration::from_secs(self.draft_max_age_secs),
        }
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

/// Defaults, then `policy_cli.toml` (or an explicit file, which must exist), then `APP__*` variables.
pub fn load_settings(explicit_file: Option<&Path>) -> anyhow::Result<Settings> {
    layered_settings(explicit_file, None)
}

fn layered_settings(
    explicit_file: Option<&Path>,
    env_overrides: Option<HashMap<String, String>>,
) -> anyhow::Result<Settings> {
    let file = match explicit_file {
        Some(path) => File::from(path).required(true),
        None => File::from(Path::new(DEFAULT_CONFIG_FILE)).required(false),
    };
    let environment = Environment::with_prefix(ENV_PREFIX)
        .separator("__")
        .try_parsing(true)
        .source(env_overrides);

    Config::builder()
        .add_source(file)
        .add_source(environment)
        .build()
        .context("failed to load configuration")?
        .try_deserialize()
        .context("invalid configuration")
}

/// Accepts bare paths and `sqlite:` shorthands; the store creates missing parent directories.
pub fn normalize_database_url(raw_database_url: &str) -> String {
    let raw_database_url = raw_database_url.trim();

    if raw_database_url.is_empty() {
        return Settings::default().database_url;
    }

    if raw_database_url.starts_with("sqlite::memory:")
        || raw_database_url.starts_with("sqlite://")
        || raw_database_url.contains("://")
    {
        return raw_database_url.to_string();
    }

    if let Some(path) = raw_database_url.strip_prefix("sqlite:") {
        let path = path.replace('\\', "/");
        return format!("sqlite://{path}");
    }

    format!("sqlite://{}", raw_database_url.replace('\\', "/"))
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
