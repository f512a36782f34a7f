//! Configuration management for vault-unseal
//!
//! Configuration is loaded from an optional TOML file, overlaid with
//! environment variables, then normalised and validated. The result is an
//! immutable snapshot: running loops hold an `Arc<Config>` for the duration of
//! one iteration and pick up reloaded snapshots on their next one.

mod reload;

pub use reload::{ConfigReloader, CONFIG_REFRESH_INTERVAL};

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::notifications::channels::webhook::WebhookConfig;

/// Minimum number of nodes without discovery
pub const MINIMUM_NODES: usize = 3;

const MIN_CHECK_INTERVAL_SECS: u64 = 5;
const MAX_INTERVAL_SECS: u64 = 7 * 24 * 60 * 60;
const MIN_QUEUE_DELAY_SECS: u64 = 10;
const MAX_QUEUE_DELAY_SECS: u64 = 600;
const ENV_PREFIX: &str = "UNSEAL_";

/// Receiving side of the configuration snapshot channel
pub type ConfigRx = watch::Receiver<Arc<Config>>;

/// Create the snapshot channel seeded with `config`
pub fn channel(config: Config) -> (watch::Sender<Arc<Config>>, ConfigRx) {
    watch::channel(Arc::new(config))
}

/// Main configuration structure
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Environment this cluster belongs to (used in logs and alerts)
    pub environment: String,

    /// Seconds between seal checks against a healthy node
    pub check_interval_secs: u64,

    /// Upper bound for the error backoff in seconds
    pub max_check_interval_secs: u64,

    /// Per-request timeout against Vault in seconds
    pub request_timeout_secs: u64,

    /// Allow running with fewer than [`MINIMUM_NODES`] nodes
    pub allow_single_node: bool,

    /// Accept invalid TLS certificates from Vault
    pub tls_skip_verify: bool,

    /// Statically configured node addresses
    pub nodes: Vec<String>,

    /// Unseal shares, submitted in this order
    pub tokens: Vec<String>,

    /// Dynamic member discovery
    pub discovery: Option<DiscoveryConfig>,

    /// Batched failure notifications
    pub notifications: NotificationConfig,
}

/// DNS discovery configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Host name resolving to every cluster member (e.g. a headless service)
    pub service: String,

    /// Port the members listen on
    #[serde(default = "default_discovery_port")]
    pub port: u16,

    /// Scheme used to build member addresses
    #[serde(default = "default_discovery_scheme")]
    pub scheme: String,

    /// Milliseconds between reconciliation ticks
    #[serde(default = "default_discovery_interval_ms")]
    pub interval_ms: u64,
}

fn default_discovery_port() -> u16 {
    8200
}

fn default_discovery_scheme() -> String {
    "http".to_string()
}

fn default_discovery_interval_ms() -> u64 {
    CONFIG_REFRESH_INTERVAL.as_millis() as u64 / 2
}

impl DiscoveryConfig {
    /// Create a discovery config for `service` with defaults
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            port: default_discovery_port(),
            scheme: default_discovery_scheme(),
            interval_ms: default_discovery_interval_ms(),
        }
    }

    /// Reconciliation tick
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Notification configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Queue and deliver failure reports
    pub enabled: bool,

    /// Quiet period after the last event before a batch is sent
    pub queue_delay_secs: u64,

    /// Maximum age of the oldest queued event, checked on arrival
    pub max_elapsed_secs: u64,

    /// Webhook delivery target
    pub webhook: Option<WebhookConfig>,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            queue_delay_secs: 30,
            max_elapsed_secs: 600,
            webhook: None,
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("permissions of {path} are insecure: {mode:o}, please use 0600, 0440, or 0400")]
    InsecurePermissions { path: PathBuf, mode: u32 },

    #[error("invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("missing required field: {field}")]
    MissingField { field: String },
}

impl ConfigError {
    fn invalid(field: &str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            environment: String::new(),
            check_interval_secs: 30,
            max_check_interval_secs: 0,
            request_timeout_secs: crate::vault::DEFAULT_REQUEST_TIMEOUT.as_secs(),
            allow_single_node: false,
            tls_skip_verify: false,
            nodes: Vec::new(),
            tokens: Vec::new(),
            discovery: None,
            notifications: NotificationConfig::default(),
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("environment", &self.environment)
            .field("check_interval_secs", &self.check_interval_secs)
            .field("max_check_interval_secs", &self.max_check_interval_secs)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("allow_single_node", &self.allow_single_node)
            .field("tls_skip_verify", &self.tls_skip_verify)
            .field("nodes", &self.nodes)
            .field("tokens", &format_args!("<{} redacted>", self.tokens.len()))
            .field("discovery", &self.discovery)
            .field("notifications", &self.notifications)
            .finish()
    }
}

/// Load, overlay and validate configuration
///
/// `path` is optional: without a file the configuration comes from the
/// environment alone.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    config.apply_env()?;
    config.validate()?;
    Ok(config)
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        check_permissions(path)?;

        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Overlay `UNSEAL_*` environment variables
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Some(v) = env_var("ENVIRONMENT") {
            self.environment = v;
        }
        if let Some(v) = env_var("CHECK_INTERVAL") {
            self.check_interval_secs = parse_env("CHECK_INTERVAL", &v)?;
        }
        if let Some(v) = env_var("MAX_CHECK_INTERVAL") {
            self.max_check_interval_secs = parse_env("MAX_CHECK_INTERVAL", &v)?;
        }
        if let Some(v) = env_var("NODES") {
            self.nodes = split_list(&v);
        }
        if let Some(v) = env_var("TOKENS") {
            self.tokens = split_list(&v);
        }
        if let Some(v) = env_var("TLS_SKIP_VERIFY") {
            self.tls_skip_verify = parse_env("TLS_SKIP_VERIFY", &v)?;
        }
        if let Some(v) = env_var("ALLOW_SINGLE_NODE") {
            self.allow_single_node = parse_env("ALLOW_SINGLE_NODE", &v)?;
        }
        if let Some(v) = env_var("DISCOVERY_SERVICE") {
            match self.discovery.as_mut() {
                Some(discovery) => discovery.service = v,
                None => self.discovery = Some(DiscoveryConfig::new(v)),
            }
        }
        if let Some(v) = env_var("NOTIFY_ENABLED") {
            self.notifications.enabled = parse_env("NOTIFY_ENABLED", &v)?;
        }
        if let Some(v) = env_var("NOTIFY_QUEUE_DELAY") {
            self.notifications.queue_delay_secs = parse_env("NOTIFY_QUEUE_DELAY", &v)?;
        }
        if let Some(v) = env_var("NOTIFY_MAX_ELAPSED") {
            self.notifications.max_elapsed_secs = parse_env("NOTIFY_MAX_ELAPSED", &v)?;
        }
        if let Some(v) = env_var("WEBHOOK_URL") {
            match self.notifications.webhook.as_mut() {
                Some(webhook) => webhook.url = v,
                None => self.notifications.webhook = Some(WebhookConfig::new(v)),
            }
        }
        Ok(())
    }

    /// Normalise bounds and validate the configuration
    pub fn validate(&mut self) -> Result<(), ConfigError> {
        self.check_interval_secs = self
            .check_interval_secs
            .clamp(MIN_CHECK_INTERVAL_SECS, MAX_INTERVAL_SECS);
        if self.max_check_interval_secs < self.check_interval_secs {
            self.max_check_interval_secs = self.check_interval_secs.saturating_mul(2);
        }
        self.max_check_interval_secs = self.max_check_interval_secs.min(MAX_INTERVAL_SECS);
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::invalid(
                "request_timeout_secs",
                "must be greater than 0",
            ));
        }

        self.nodes.retain(|n| !n.trim().is_empty());
        let mut seen = HashSet::new();
        self.nodes.retain(|n| seen.insert(n.clone()));

        if let Some(discovery) = &self.discovery {
            if discovery.service.trim().is_empty() {
                return Err(ConfigError::invalid("discovery.service", "cannot be empty"));
            }
            if discovery.interval_ms == 0 {
                return Err(ConfigError::invalid(
                    "discovery.interval_ms",
                    "must be greater than 0",
                ));
            }
        } else if self.nodes.len() < MINIMUM_NODES {
            if !self.allow_single_node {
                return Err(ConfigError::invalid(
                    "nodes",
                    format!("not enough nodes in node list (must have at least {MINIMUM_NODES})"),
                ));
            }
            tracing::warn!(
                nodes = self.nodes.len(),
                "running with less than {} nodes, this is not recommended",
                MINIMUM_NODES
            );
        }

        if self.tokens.is_empty() {
            return Err(ConfigError::MissingField {
                field: "tokens".to_string(),
            });
        }
        if self.tokens.len() >= 3 {
            tracing::warn!(
                tokens = self.tokens.len(),
                "found many tokens in the config, make sure this is not a security risk"
            );
        }

        let notifications = &mut self.notifications;
        notifications.queue_delay_secs = notifications
            .queue_delay_secs
            .clamp(MIN_QUEUE_DELAY_SECS, MAX_QUEUE_DELAY_SECS);
        if notifications.max_elapsed_secs == 0 {
            notifications.max_elapsed_secs = NotificationConfig::default().max_elapsed_secs;
        }
        if notifications.enabled {
            let webhook = notifications
                .webhook
                .as_ref()
                .ok_or_else(|| ConfigError::MissingField {
                    field: "notifications.webhook".to_string(),
                })?;
            webhook
                .validate()
                .map_err(|reason| ConfigError::invalid("notifications.webhook", reason))?;
        }

        Ok(())
    }

    /// Check interval as Duration
    #[must_use]
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    /// Maximum backoff as Duration
    #[must_use]
    pub fn max_check_interval(&self) -> Duration {
        Duration::from_secs(self.max_check_interval_secs)
    }

    /// Vault request timeout as Duration
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Notification quiet period as Duration
    #[must_use]
    pub fn queue_delay(&self) -> Duration {
        Duration::from_secs(self.notifications.queue_delay_secs)
    }

    /// Maximum notification age as Duration
    #[must_use]
    pub fn max_elapsed(&self) -> Duration {
        Duration::from_secs(self.notifications.max_elapsed_secs)
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(format!("{ENV_PREFIX}{name}"))
        .ok()
        .filter(|v| !v.is_empty())
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse::<T>().map_err(|_| ConfigError::InvalidValue {
        field: format!("{ENV_PREFIX}{name}"),
        reason: format!("cannot parse {value:?}"),
    })
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

#[cfg(unix)]
fn check_permissions(path: &Path) -> Result<(), ConfigError> {
    use std::os::unix::fs::PermissionsExt;

    let metadata = std::fs::metadata(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mode = metadata.permissions().mode() & 0o777;
    if !matches!(mode, 0o600 | 0o400 | 0o440) {
        return Err(ConfigError::InsecurePermissions {
            path: path.to_path_buf(),
            mode,
        });
    }
    Ok(())
}

#[cfg(not(unix))]
fn check_permissions(_path: &Path) -> Result<(), ConfigError> {
    Ok(())
}
