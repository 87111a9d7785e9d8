//! Event Bridge Configuration
//!
//! Loads the bridge configuration from a TOML file:
//! - Registry settings (default event source, duplicate policy)
//! - Backend endpoint and timeouts
//! - Notification sink selection
//! - Ingestion API and SQS consumer settings
//! - Dispatch rules
//!
//! Selected values can be overridden from the environment (`EB_*`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use eb_common::{DispatchRule, DuplicatePolicy, HttpMethod, ParamValue, RegistryConfig};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Top-level bridge configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    pub event_source: String,
    #[serde(default)]
    pub duplicate_policy: DuplicatePolicy,
    pub backend: BackendConfig,
    pub notification: NotificationConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub sqs: Option<SqsConfig>,
    #[serde(default)]
    pub rules: Vec<RuleConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    pub base_url: String,
    /// Total time allowed for one backend call; required
    pub timeout_ms: u64,
    #[serde(default)]
    pub connect_timeout_ms: Option<u64>,
    #[serde(default)]
    pub api_key_header: Option<String>,
    /// Environment variable holding the API key sent in `api_key_header`
    #[serde(default)]
    pub api_key_env: Option<String>,
}

impl BackendConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_ms.map(Duration::from_millis)
    }

    /// Resolve the API key header and value, if configured
    pub fn api_key(&self) -> Option<(String, String)> {
        let header = self.api_key_header.clone()?;
        let var = self.api_key_env.as_deref()?;
        std::env::var(var).ok().map(|value| (header, value))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    Log,
    Http,
    Sqs,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationConfig {
    pub sink: SinkKind,
    /// Target URL for the `http` sink
    #[serde(default)]
    pub url: Option<String>,
    /// Target queue for the `sqs` sink
    #[serde(default)]
    pub queue_url: Option<String>,
    /// Time allowed for one publish; required
    pub timeout_ms: u64,
}

impl NotificationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqsConfig {
    pub queue_url: String,
    #[serde(default = "default_wait_time")]
    pub wait_time_seconds: i32,
    #[serde(default = "default_max_messages")]
    pub max_messages: i32,
    #[serde(default)]
    pub visibility_timeout: Option<i32>,
}

fn default_wait_time() -> i32 {
    20
}

fn default_max_messages() -> i32 {
    10
}

/// One dispatch rule as written in the config file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleConfig {
    pub name: String,
    /// Overrides the top-level `event_source`
    #[serde(default)]
    pub source: Option<String>,
    pub event_type: String,
    pub method: HttpMethod,
    pub path: String,
    #[serde(default)]
    pub query: IndexMap<String, ParamValue>,
    #[serde(default)]
    pub path_params: Vec<ParamValue>,
    #[serde(default)]
    pub notify: bool,
}

impl RuleConfig {
    pub fn to_rule(&self, default_source: &str) -> DispatchRule {
        DispatchRule {
            name: self.name.clone(),
            event_source: self.source.clone().unwrap_or_else(|| default_source.to_string()),
            event_type: self.event_type.clone(),
            method: self.method,
            path_template: self.path.clone(),
            query_mapping: self.query.clone(),
            path_param_values: self.path_params.clone(),
            notify: self.notify,
        }
    }
}

impl BridgeConfig {
    /// Load from a TOML file and apply environment overrides
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let mut config = Self::from_toml_str(&raw)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;

        info!(
            path = %path.display(),
            rules = config.rules.len(),
            "Loaded bridge configuration"
        );
        Ok(config)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Apply `EB_*` overrides using the given variable lookup
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("EB_BACKEND_URL") {
            debug!(url = %url, "Overriding backend URL from environment");
            self.backend.base_url = url;
        }
        if let Some(source) = lookup("EB_EVENT_SOURCE") {
            self.event_source = source;
        }
        if let Some(port) = lookup("EB_API_PORT").and_then(|v| v.parse().ok()) {
            self.api.port = port;
        }
        if let Some(url) = lookup("EB_NOTIFICATION_URL") {
            self.notification.url = Some(url);
        }
        if let Some(queue_url) = lookup("EB_SQS_QUEUE_URL") {
            match self.sqs.as_mut() {
                Some(sqs) => sqs.queue_url = queue_url,
                None => {
                    self.sqs = Some(SqsConfig {
                        queue_url,
                        wait_time_seconds: default_wait_time(),
                        max_messages: default_max_messages(),
                        visibility_timeout: None,
                    })
                }
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.event_source.trim().is_empty() {
            return Err(ConfigError::Invalid("event_source must not be empty".to_string()));
        }
        if self.backend.base_url.trim().is_empty() {
            return Err(ConfigError::Invalid("backend.base_url must not be empty".to_string()));
        }
        if self.backend.timeout_ms == 0 {
            return Err(ConfigError::Invalid("backend.timeout_ms must be positive".to_string()));
        }
        if self.notification.timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "notification.timeout_ms must be positive".to_string(),
            ));
        }
        match self.notification.sink {
            SinkKind::Http if self.notification.url.is_none() => {
                return Err(ConfigError::Invalid(
                    "notification.url is required for the http sink".to_string(),
                ));
            }
            SinkKind::Sqs if self.notification.queue_url.is_none() => {
                return Err(ConfigError::Invalid(
                    "notification.queue_url is required for the sqs sink".to_string(),
                ));
            }
            _ => {}
        }
        if self.backend.api_key_header.is_some() != self.backend.api_key_env.is_some() {
            return Err(ConfigError::Invalid(
                "backend.api_key_header and backend.api_key_env must be set together".to_string(),
            ));
        }
        Ok(())
    }

    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig::new(&self.event_source).with_duplicate_policy(self.duplicate_policy)
    }

    /// Rules with the default event source applied
    pub fn dispatch_rules(&self) -> Vec<DispatchRule> {
        self.rules.iter().map(|r| r.to_rule(&self.event_source)).collect()
    }
}
