use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use serde::Deserialize;

use crate::aggregator::{
    AggregatorOptions, Category, DEFAULT_BROADCAST_CAPACITY, DEFAULT_REQUEST_TIMEOUT,
    DEFAULT_UPDATE_INTERVAL,
};
use crate::fetch_client::{Endpoint, HttpMethod};

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    #[serde(default)]
    pub aggregator: AggregatorConfig,
    pub categories: Vec<CategoryConfig>,
    #[serde(default)]
    pub publishing: PublishingConfig,
    #[serde(default)]
    pub mock_backend: MockBackendConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AggregatorConfig {
    #[serde(default = "default_auto_update")]
    pub auto_update: bool,
    #[serde(default = "default_update_interval_ms")]
    pub update_interval_ms: u64,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Prefix for category endpoints that are not absolute URLs.
    #[serde(default)]
    pub base_url: Option<String>,
    /// Categories to activate; all declared categories when omitted.
    #[serde(default)]
    pub enabled_categories: Option<Vec<String>>,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            auto_update: default_auto_update(),
            update_interval_ms: default_update_interval_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            base_url: None,
            enabled_categories: None,
        }
    }
}

fn default_auto_update() -> bool {
    true
}

fn default_update_interval_ms() -> u64 {
    DEFAULT_UPDATE_INTERVAL.as_millis() as u64
}

fn default_request_timeout_ms() -> u64 {
    DEFAULT_REQUEST_TIMEOUT.as_millis() as u64
}

#[derive(Debug, Clone, Deserialize)]
pub struct CategoryConfig {
    pub name: String,
    /// Absolute URL, or a path joined onto `aggregator.base_url`.
    pub endpoint: String,
    #[serde(default)]
    pub method: HttpMethod,
    #[serde(default)]
    pub query: BTreeMap<String, String>,
    /// JSON body for POST categories.
    #[serde(default)]
    pub body: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PublishingConfig {
    /// Max snapshots buffered per observer for /ws/snapshot (slow clients may lag).
    #[serde(default = "default_broadcast_capacity")]
    pub broadcast_capacity: usize,
}

impl Default for PublishingConfig {
    fn default() -> Self {
        Self {
            broadcast_capacity: default_broadcast_capacity(),
        }
    }
}

fn default_broadcast_capacity() -> usize {
    DEFAULT_BROADCAST_CAPACITY
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MockBackendConfig {
    /// Serve the deterministic /api/mock/* endpoints from this process.
    #[serde(default)]
    pub enabled: bool,
}

fn is_absolute(endpoint: &str) -> bool {
    endpoint.starts_with("http://") || endpoint.starts_with("https://")
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        let path = std::env::var("CONFIG_FILE").unwrap_or_else(|_| "config.toml".into());
        let s = std::fs::read_to_string(&path)?;
        Self::load_from_str(&s)
    }

    /// Parse and validate config from a string (e.g. for tests).
    pub fn load_from_str(s: &str) -> anyhow::Result<Self> {
        let config: AppConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Explicit `base_url`, else this process when it serves the mock backend.
    pub fn resolved_base_url(&self) -> Option<String> {
        self.aggregator.base_url.clone().or_else(|| {
            self.mock_backend
                .enabled
                .then(|| format!("http://127.0.0.1:{}", self.server.port))
        })
    }

    pub fn aggregator_options(&self) -> AggregatorOptions {
        AggregatorOptions {
            request_timeout: Duration::from_millis(self.aggregator.request_timeout_ms),
            update_interval: self.update_interval(),
            broadcast_capacity: self.publishing.broadcast_capacity,
        }
    }

    pub fn update_interval(&self) -> Duration {
        Duration::from_millis(self.aggregator.update_interval_ms)
    }

    /// Enabled categories in declaration order with fully resolved endpoints.
    pub fn categories(&self) -> Vec<Category> {
        let base = self.resolved_base_url();
        self.categories
            .iter()
            .filter(|c| {
                self.aggregator
                    .enabled_categories
                    .as_ref()
                    .is_none_or(|enabled| enabled.contains(&c.name))
            })
            .map(|c| {
                let url = match &base {
                    Some(base) if !is_absolute(&c.endpoint) => format!(
                        "{}/{}",
                        base.trim_end_matches('/'),
                        c.endpoint.trim_start_matches('/')
                    ),
                    _ => c.endpoint.clone(),
                };
                Category::new(
                    c.name.clone(),
                    Endpoint {
                        url,
                        method: c.method,
                        query: c.query.clone().into_iter().collect(),
                        body: c.body.clone(),
                    },
                )
            })
            .collect()
    }

    fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.server.port > 0,
            "server.port must be between 1 and 65535, got {}",
            self.server.port
        );
        anyhow::ensure!(
            self.aggregator.update_interval_ms > 0,
            "aggregator.update_interval_ms must be > 0, got {}",
            self.aggregator.update_interval_ms
        );
        anyhow::ensure!(
            self.aggregator.request_timeout_ms > 0,
            "aggregator.request_timeout_ms must be > 0, got {}",
            self.aggregator.request_timeout_ms
        );
        anyhow::ensure!(
            self.publishing.broadcast_capacity > 0,
            "publishing.broadcast_capacity must be > 0, got {}",
            self.publishing.broadcast_capacity
        );
        anyhow::ensure!(
            !self.categories.is_empty(),
            "categories must declare at least one category"
        );

        let base = self.resolved_base_url();
        let mut names = HashSet::with_capacity(self.categories.len());
        for c in &self.categories {
            anyhow::ensure!(!c.name.is_empty(), "categories.name must be non-empty");
            anyhow::ensure!(
                names.insert(c.name.as_str()),
                "categories.name '{}' is declared more than once",
                c.name
            );
            anyhow::ensure!(
                !c.endpoint.is_empty(),
                "categories.endpoint for '{}' must be non-empty",
                c.name
            );
            anyhow::ensure!(
                is_absolute(&c.endpoint) || base.is_some(),
                "categories.endpoint '{}' is relative but aggregator.base_url is not set",
                c.endpoint
            );
            anyhow::ensure!(
                c.body.is_none() || c.method == HttpMethod::Post,
                "categories.body for '{}' requires method = \"POST\"",
                c.name
            );
        }

        if let Some(enabled) = &self.aggregator.enabled_categories {
            anyhow::ensure!(
                !enabled.is_empty(),
                "aggregator.enabled_categories must not be empty"
            );
            for name in enabled {
                anyhow::ensure!(
                    names.contains(name.as_str()),
                    "aggregator.enabled_categories references undeclared category '{}'",
                    name
                );
            }
        }
        Ok(())
    }
}
