use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::monitor::{ArgumentMapping, PullMonitorConfig, PushMonitorConfig, RetryPolicy};
use crate::observer::exchange::MAX_DESTINATION_DECIMALS;
use crate::observer::{ExchangeConfig, ObserverConfig, DEFAULT_CHANNEL, DEFAULT_MONITOR_KEY};
use crate::types::TransactionLocation;
use crate::webhooks::{ExplorerLinks, WebhookConfig, WebhookEndpoint};

pub const CONFIG_FILE_NAME: &str = "bridge-relay.toml";
pub const STATE_FILE_NAME: &str = "state.json";

/// Which monitor strategy feeds the observer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MonitorKind {
    /// Poll the source chain, gated on confirmations
    #[default]
    Pull,
    /// Receive events from an indexer's webhook
    Push,
}

impl fmt::Display for MonitorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MonitorKind::Pull => write!(f, "pull"),
            MonitorKind::Push => write!(f, "push"),
        }
    }
}

impl FromStr for MonitorKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pull" => Ok(MonitorKind::Pull),
            "push" => Ok(MonitorKind::Push),
            _ => Err(anyhow::anyhow!("Invalid monitor kind: {s}")),
        }
    }
}

/// Configuration structure
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Config {
    /// HTTP server bind IP address
    #[serde(rename = "http-bind-ip", default = "default_bind_ip")]
    pub http_bind_ip: String,

    /// HTTP server bind port
    #[serde(rename = "http-bind-port", default = "default_bind_port")]
    pub http_bind_port: u16,

    /// Data directory (contains config, state and logs)
    #[serde(rename = "data-dir")]
    pub data_dir: Option<PathBuf>,

    #[serde(default)]
    pub monitor: MonitorSection,

    #[serde(default)]
    pub source: SourceSection,

    #[serde(default)]
    pub exchange: ExchangeConfig,

    #[serde(default)]
    pub executor: ExecutorSection,

    #[serde(default)]
    pub notifications: NotificationsSection,

    #[serde(default)]
    pub state: StateSection,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct MonitorSection {
    #[serde(default)]
    pub kind: MonitorKind,

    /// Key the cursor is stored under
    #[serde(default = "default_monitor_key")]
    pub key: String,

    /// Address whose incoming transfers are exchanged
    #[serde(default)]
    pub watched_address: String,

    #[serde(default = "default_confirmations")]
    pub confirmations: u64,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_drain_interval_ms")]
    pub drain_interval_ms: u64,

    #[serde(default)]
    pub retry: RetryPolicy,

    /// Starting point used when the state store has no cursor yet
    pub initial_cursor: Option<TransactionLocation>,
}

impl Default for MonitorSection {
    fn default() -> Self {
        Self {
            kind: MonitorKind::default(),
            key: default_monitor_key(),
            watched_address: String::new(),
            confirmations: default_confirmations(),
            poll_interval_ms: default_poll_interval_ms(),
            drain_interval_ms: default_drain_interval_ms(),
            retry: RetryPolicy::default(),
            initial_cursor: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct SourceSection {
    /// GraphQL endpoint of a source chain node (pull mode)
    pub graphql_endpoint: Option<String>,

    /// Catch-up query of the webhook indexer (push mode)
    pub catch_up_endpoint: Option<String>,

    /// Path the indexer posts events to (push mode)
    #[serde(default = "default_webhook_path")]
    pub webhook_path: String,

    /// Shared secret for `X-Signature-SHA256` verification of incoming
    /// webhooks; unsigned deliveries are accepted when unset
    pub webhook_secret: Option<String>,

    #[serde(default)]
    pub arguments: ArgumentMapping,
}

impl Default for SourceSection {
    fn default() -> Self {
        Self {
            graphql_endpoint: None,
            catch_up_endpoint: None,
            webhook_path: default_webhook_path(),
            webhook_secret: None,
            arguments: ArgumentMapping::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ExecutorSection {
    /// Base URL of the signing service
    pub endpoint: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct NotificationsSection {
    #[serde(default = "default_channel")]
    pub channel: String,

    #[serde(default)]
    pub explorer_url: String,

    #[serde(default)]
    pub destination_explorer_url: String,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default)]
    pub endpoints: Vec<WebhookEndpoint>,
}

impl Default for NotificationsSection {
    fn default() -> Self {
        Self {
            channel: default_channel(),
            explorer_url: String::new(),
            destination_explorer_url: String::new(),
            enabled: default_enabled(),
            endpoints: Vec::new(),
        }
    }
}

impl NotificationsSection {
    pub fn links(&self) -> ExplorerLinks {
        ExplorerLinks {
            explorer_url: self.explorer_url.clone(),
            destination_explorer_url: self.destination_explorer_url.clone(),
        }
    }

    pub fn webhook_config(&self) -> WebhookConfig {
        WebhookConfig {
            endpoints: self.endpoints.clone(),
            enabled: self.enabled,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct StateSection {
    /// Consecutive failed cursor writes after which the relay stops
    #[serde(default = "default_max_write_failures")]
    pub max_write_failures: u32,

    /// Cursor file; defaults to `state.json` in the data directory
    pub path: Option<PathBuf>,
}

impl Default for StateSection {
    fn default() -> Self {
        Self {
            max_write_failures: default_max_write_failures(),
            path: None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_bind_ip: default_bind_ip(),
            http_bind_port: default_bind_port(),
            data_dir: None,
            monitor: MonitorSection::default(),
            source: SourceSection::default(),
            exchange: ExchangeConfig::default(),
            executor: ExecutorSection::default(),
            notifications: NotificationsSection::default(),
            state: StateSection::default(),
        }
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to TOML file atomically
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        // Ensure parent directory exists (important for Docker volumes)
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;

        // Write to temporary file first
        let temp_path = path.with_extension("tmp");
        std::fs::write(&temp_path, contents)?;

        // Atomically rename temp file to actual config file
        match std::fs::rename(&temp_path, path) {
            Ok(_) => Ok(()),
            Err(e) => {
                let _ = std::fs::remove_file(&temp_path);
                Err(e.into())
            }
        }
    }

    /// Load the configuration file, writing the defaults first if it does not
    /// exist yet. Returns whether the file was created.
    ///
    /// Unlike a missing file, a file that fails to parse is an error: a
    /// relay moving funds must never silently fall back to defaults.
    pub fn load_or_create<P: AsRef<Path>>(path: P) -> Result<(Self, bool)> {
        let path = path.as_ref();

        if path.exists() {
            let config = Self::load_from_file(path)
                .map_err(|e| anyhow::anyhow!("invalid config {}: {e:#}", path.display()))?;
            return Ok((config, false));
        }

        let config = Self::default();
        config.save_to_file(path)?;
        Ok((config, true))
    }

    /// Get the complete HTTP server address
    pub fn http_address(&self) -> String {
        format!("{}:{}", self.http_bind_ip, self.http_bind_port)
    }

    pub fn state_path(&self) -> PathBuf {
        self.state.path.clone().unwrap_or_else(|| {
            self.data_dir
                .clone()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(STATE_FILE_NAME)
        })
    }

    /// Check every setting the relay cannot run without
    pub fn validate(&self) -> Result<()> {
        let exchange = &self.exchange;
        if exchange.fee_ratio < Decimal::ZERO || exchange.fee_ratio >= Decimal::ONE {
            bail!("fee-ratio must be in [0, 1), got {}", exchange.fee_ratio);
        }
        if exchange.minimum < Decimal::ZERO {
            bail!("minimum must not be negative, got {}", exchange.minimum);
        }
        if exchange.minimum > exchange.maximum {
            bail!(
                "minimum {} is greater than maximum {}",
                exchange.minimum,
                exchange.maximum
            );
        }
        if exchange.destination_decimals > MAX_DESTINATION_DECIMALS {
            bail!(
                "destination-decimals must be at most {MAX_DESTINATION_DECIMALS}, got {}",
                exchange.destination_decimals
            );
        }

        if self.monitor.watched_address.trim().is_empty() {
            bail!("monitor.watched-address is required");
        }
        if self.monitor.key.trim().is_empty() {
            bail!("monitor.key must not be empty");
        }
        if self.monitor.poll_interval_ms == 0 {
            bail!("monitor.poll-interval-ms must be greater than 0");
        }
        if self.monitor.drain_interval_ms == 0 {
            bail!("monitor.drain-interval-ms must be greater than 0");
        }
        let retry = &self.monitor.retry;
        if retry.initial_delay_ms == 0 {
            bail!("monitor.retry.initial-delay-ms must be greater than 0");
        }
        if retry.max_delay_ms < retry.initial_delay_ms {
            bail!(
                "monitor.retry.max-delay-ms {} is below initial-delay-ms {}",
                retry.max_delay_ms,
                retry.initial_delay_ms
            );
        }
        if retry.backoff_multiplier.is_nan() || retry.backoff_multiplier < 1.0 {
            bail!(
                "monitor.retry.backoff-multiplier must be at least 1, got {}",
                retry.backoff_multiplier
            );
        }
        if self.state.max_write_failures == 0 {
            bail!("state.max-write-failures must be at least 1");
        }

        match self.monitor.kind {
            MonitorKind::Pull => {
                require_url("source.graphql-endpoint", &self.source.graphql_endpoint)?;
            }
            MonitorKind::Push => {
                require_url("source.catch-up-endpoint", &self.source.catch_up_endpoint)?;
                let path = &self.source.webhook_path;
                if !path.starts_with('/') {
                    bail!("source.webhook-path must start with '/', got {path}");
                }
                if path == "/health" || path == "/metrics" {
                    bail!("source.webhook-path {path} collides with a built-in route");
                }
            }
        }
        if let Some(secret) = &self.source.webhook_secret {
            if secret.is_empty() {
                bail!("source.webhook-secret must not be empty when set");
            }
        }

        require_url("executor.endpoint", &self.executor.endpoint)?;

        for endpoint in &self.notifications.endpoints {
            WebhookEndpoint::validate_webhook_url(&endpoint.url)
                .map_err(|e| anyhow::anyhow!("notification endpoint {}: {e}", endpoint.id))?;
        }

        Ok(())
    }

    pub fn pull_config(&self) -> PullMonitorConfig {
        PullMonitorConfig {
            confirmations: self.monitor.confirmations,
            poll_interval: Duration::from_millis(self.monitor.poll_interval_ms),
            retry: self.monitor.retry.clone(),
        }
    }

    pub fn push_config(&self) -> PushMonitorConfig {
        PushMonitorConfig {
            drain_interval: Duration::from_millis(self.monitor.drain_interval_ms),
            arguments: self.source.arguments.clone(),
        }
    }

    pub fn observer_config(&self) -> ObserverConfig {
        ObserverConfig {
            monitor_key: self.monitor.key.clone(),
            channel: self.notifications.channel.clone(),
            exchange: self.exchange.clone(),
            links: self.notifications.links(),
            max_cursor_failures: self.state.max_write_failures,
        }
    }
}

fn require_url(name: &str, value: &Option<String>) -> Result<()> {
    let Some(value) = value else {
        bail!("{name} is required");
    };
    url::Url::parse(value).map_err(|e| anyhow::anyhow!("{name} is not a valid URL: {e}"))?;
    Ok(())
}

// Default value functions
fn default_bind_ip() -> String {
    // Use 0.0.0.0 in containerized environments to allow external connections
    if std::env::var("DOCKER_CONTAINER").is_ok()
        || std::path::Path::new("/.dockerenv").exists()
        || std::env::var("KUBERNETES_SERVICE_HOST").is_ok()
    {
        "0.0.0.0".to_string()
    } else {
        "127.0.0.1".to_string()
    }
}

fn default_bind_port() -> u16 {
    4000
}

fn default_monitor_key() -> String {
    DEFAULT_MONITOR_KEY.to_string()
}

fn default_confirmations() -> u64 {
    10
}

fn default_poll_interval_ms() -> u64 {
    5000
}

fn default_drain_interval_ms() -> u64 {
    2000
}

fn default_webhook_path() -> String {
    "/".to_string()
}

fn default_channel() -> String {
    DEFAULT_CHANNEL.to_string()
}

fn default_enabled() -> bool {
    true
}

fn default_max_write_failures() -> u32 {
    3
}
