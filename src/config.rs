use crate::search::{ElasticSettings, EmbeddedSettings, SearchSettings};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use validator::Validate;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,

    /// Deployment configuration
    #[serde(default)]
    pub deployment: DeploymentConfig,

    /// Search backend configuration
    pub backend: BackendConfig,

    /// Search engine settings
    #[serde(default)]
    #[validate(nested)]
    pub search: SearchSettings,

    /// Bulk reindex configuration
    #[validate(nested)]
    pub indexing: IndexingConfig,

    /// Observability configuration
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Load configuration from `$CONFIG_PATH` and environment
    pub fn load() -> Result<Self, config::ConfigError> {
        let config_path = std::env::var("CONFIG_PATH")
            .unwrap_or_else(|_| "config/site-search.toml".to_string());
        Self::load_from(&config_path)
    }

    /// Load configuration from an optional file at `config_path` and environment
    pub fn load_from(config_path: &str) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            // Start with default values
            .add_source(config::File::from_str(
                include_str!("../config/default.toml"),
                config::FileFormat::Toml,
            ))
            // Override with config file if it exists
            .add_source(config::File::with_name(config_path).required(false))
            // Override with environment variables (prefix: SITE_SEARCH_)
            .add_source(
                config::Environment::with_prefix("SITE_SEARCH")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    /// Validate, filling backend credentials from `ELASTIC_*` variables.
    ///
    /// When records fan out to locales, searches are scoped to
    /// `search.locale`, which defaults to the first indexed locale.
    pub fn validated(mut self) -> crate::error::Result<Self> {
        self.backend.elastic = self.backend.elastic.with_env_fallback();
        self.validate()?;
        self.backend.check()?;

        if self.search.locale.is_none() {
            self.search.locale = self.indexing.locales.first().cloned();
        }
        if let Some(locale) = &self.search.locale {
            if !self.indexing.locales.is_empty() && !self.indexing.locales.contains(locale) {
                return Err(crate::error::AppError::Configuration(format!(
                    "search locale {} is not one of the indexed locales",
                    locale
                )));
            }
        }
        Ok(self)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP server host
    #[serde(default = "default_host")]
    pub host: String,

    /// HTTP server port
    #[serde(default = "default_http_port")]
    pub http_port: u16,

    /// Allowed CORS origins; empty allows any origin
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeploymentConfig {
    /// Deployment environment
    #[serde(default)]
    pub environment: Environment,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    #[default]
    Live,
    Test,
    Dev,
}

impl Environment {
    /// Whether raw backend errors may be shown to clients
    pub fn exposes_error_detail(&self) -> bool {
        !matches!(self, Environment::Live)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Elasticsearch over HTTP
    #[default]
    Elastic,
    /// Local Tantivy index
    Embedded,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Backend type
    #[serde(default)]
    pub kind: BackendKind,

    #[serde(default)]
    pub elastic: ElasticSettings,

    #[serde(default)]
    pub embedded: EmbeddedSettings,
}

impl BackendConfig {
    /// Index name of the selected backend
    pub fn index_name(&self) -> &str {
        match self.kind {
            BackendKind::Elastic => self.elastic.index.as_deref().unwrap_or_default(),
            BackendKind::Embedded => self.embedded.index.as_str(),
        }
    }

    /// The selected backend must name an index
    pub fn check(&self) -> crate::error::Result<()> {
        if self.index_name().trim().is_empty() {
            return Err(crate::error::AppError::Configuration(format!(
                "{:?} backend has no index name",
                self.kind
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct IndexingConfig {
    /// Run the reindex job on a schedule while serving
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Records fetched per batch
    #[serde(default = "default_batch_limit")]
    #[validate(range(min = 1))]
    pub batch_limit: usize,

    /// Delay before a completed job's successor starts (seconds)
    #[serde(default = "default_requeue_delay")]
    pub requeue_delay_secs: u64,

    /// Cron expression (with seconds) for reindex ticks
    #[serde(default = "default_tick_schedule")]
    pub schedule: String,

    /// sled database holding job state; in-memory when unset
    pub state_path: Option<PathBuf>,

    /// JSON file of content records
    pub records_path: Option<PathBuf>,

    /// Locales to fan records out to; empty disables localization
    #[serde(default)]
    pub locales: Vec<String>,

    /// Content classes never indexed
    #[serde(default)]
    pub disabled_classes: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default)]
    pub json_logs: bool,

    /// Expose Prometheus metrics at /metrics
    #[serde(default = "default_true")]
    pub metrics_enabled: bool,
}

// Default value functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_http_port() -> u16 {
    8080
}

fn default_batch_limit() -> usize {
    500
}

fn default_requeue_delay() -> u64 {
    300
}

fn default_tick_schedule() -> String {
    "*/10 * * * * *".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}
