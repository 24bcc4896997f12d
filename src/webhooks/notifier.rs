use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::Sha256;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::NotificationSink;
use crate::metrics::collectors as relay_metrics;

/// Configuration for notification retry behavior
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RetryConfig {
    /// Maximum number of retry attempts
    pub max_attempts: u32,
    /// Initial delay between retries in milliseconds
    pub initial_delay_ms: u64,
    /// Maximum delay between retries in milliseconds
    pub max_delay_ms: u64,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
    /// Timeout for each request in seconds
    pub timeout_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 1000, // 1 second
            max_delay_ms: 30000,    // 30 seconds
            backoff_multiplier: 2.0,
            timeout_secs: 30,
        }
    }
}

/// A single notification endpoint, e.g. a Slack incoming webhook
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct WebhookEndpoint {
    /// Unique identifier for the endpoint
    pub id: String,
    /// The URL notifications are posted to
    pub url: String,
    /// Optional secret for HMAC-SHA256 signature generation
    #[serde(default)]
    pub secret: Option<String>,
    /// Channels this endpoint receives; empty means every channel
    #[serde(default)]
    pub channels: Vec<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub retry_config: RetryConfig,
}

fn default_enabled() -> bool {
    true
}

impl fmt::Debug for WebhookEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebhookEndpoint")
            .field("id", &self.id)
            .field("url", &self.url)
            .field("secret", &self.secret.as_ref().map(|_| "[REDACTED]"))
            .field("channels", &self.channels)
            .field("retry_config", &self.retry_config)
            .field("enabled", &self.enabled)
            .field("description", &self.description)
            .finish()
    }
}

impl WebhookEndpoint {
    pub fn new(id: String, url: String) -> anyhow::Result<Self> {
        Self::validate_webhook_url(&url)?;

        Ok(Self {
            id,
            url,
            secret: None,
            channels: Vec::new(),
            retry_config: RetryConfig::default(),
            enabled: true,
            description: None,
        })
    }

    /// Reject URLs that would make the relay call into its own network
    pub fn validate_webhook_url(url: &str) -> anyhow::Result<()> {
        let parsed_url =
            reqwest::Url::parse(url).map_err(|e| anyhow::anyhow!("Invalid URL format: {}", e))?;

        match parsed_url.scheme() {
            "http" | "https" => {}
            scheme => return Err(anyhow::anyhow!("Unsupported URL scheme: {}", scheme)),
        }

        // In production, enforce HTTPS
        #[cfg(not(debug_assertions))]
        if parsed_url.scheme() != "https" {
            return Err(anyhow::anyhow!(
                "HTTPS required for webhook URLs in production"
            ));
        }

        let host = parsed_url
            .host_str()
            .ok_or_else(|| anyhow::anyhow!("URL must have a host"))?;

        if let Ok(ip) = IpAddr::from_str(host.trim_start_matches('[').trim_end_matches(']')) {
            if Self::is_private_ip(ip) {
                return Err(anyhow::anyhow!(
                    "Webhook URLs cannot target private IP addresses"
                ));
            }
        } else {
            let host_lower = host.to_lowercase();
            if host_lower == "localhost" || host_lower.ends_with(".localhost") {
                return Err(anyhow::anyhow!("Webhook URLs cannot target localhost"));
            }
        }

        Ok(())
    }

    fn is_private_ip(ip: IpAddr) -> bool {
        match ip {
            IpAddr::V4(ipv4) => {
                ipv4.is_private()
                    || ipv4.is_loopback()
                    || ipv4.is_link_local()
                    || ipv4.is_broadcast()
                    || ipv4.is_documentation()
                    || ipv4.is_unspecified()
                    || ipv4.is_multicast()
            }
            IpAddr::V6(ipv6) => {
                ipv6.is_loopback()
                    || ipv6.is_unspecified()
                    || ipv6.is_multicast()
                    || (ipv6.segments()[0] & 0xfe00) == 0xfc00 // fc00::/7 (Unique local)
                    || (ipv6.segments()[0] & 0xffc0) == 0xfe80 // fe80::/10 (Link-local)
            }
        }
    }

    pub fn with_secret(mut self, secret: String) -> anyhow::Result<Self> {
        const MIN_SECRET_LENGTH: usize = 16;

        if secret.len() < MIN_SECRET_LENGTH {
            return Err(anyhow::anyhow!(
                "HMAC secret must be at least {} characters long",
                MIN_SECRET_LENGTH
            ));
        }
        self.secret = Some(secret);
        Ok(self)
    }

    pub fn with_channels(mut self, channels: Vec<String>) -> Self {
        self.channels = channels;
        self
    }

    pub fn with_retry_config(mut self, retry_config: RetryConfig) -> Self {
        self.retry_config = retry_config;
        self
    }

    pub fn with_description(mut self, description: String) -> Self {
        self.description = Some(description);
        self
    }

    /// Check if this endpoint should receive messages for `channel`
    pub fn should_receive(&self, channel: &str) -> bool {
        self.enabled && (self.channels.is_empty() || self.channels.iter().any(|c| c == channel))
    }
}

/// Configuration for the notification system
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct WebhookConfig {
    #[serde(default)]
    pub endpoints: Vec<WebhookEndpoint>,
    /// Whether delivery is enabled globally
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            endpoints: Vec::new(),
            enabled: true,
        }
    }
}

/// Posts rendered notifications to every matching endpoint
#[derive(Clone)]
pub struct WebhookNotifier {
    client: Client,
    config: WebhookConfig,
}

impl WebhookNotifier {
    pub fn new(config: WebhookConfig) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &WebhookConfig {
        &self.config
    }

    /// Build the request body for `channel`: the rendered message with the
    /// channel added, in the shape of a Slack `chat.postMessage` call
    pub fn create_payload(channel: &str, message: Value) -> Value {
        match message {
            Value::Object(mut fields) => {
                fields.insert("channel".to_string(), Value::String(channel.to_string()));
                Value::Object(fields)
            }
            other => serde_json::json!({ "channel": channel, "text": other }),
        }
    }

    /// Deliver to all matching endpoints and wait for every attempt to finish
    pub async fn deliver(&self, channel: &str, message: Value) -> anyhow::Result<()> {
        if !self.config.enabled {
            debug!("Notifications disabled, skipping message");
            return Ok(());
        }

        let notification_id = Uuid::new_v4().to_string();
        let payload_str = serde_json::to_string(&Self::create_payload(channel, message))?;

        let mut tasks = Vec::new();
        for endpoint in &self.config.endpoints {
            if endpoint.should_receive(channel) {
                let client = self.client.clone();
                let endpoint = endpoint.clone();
                let payload_str = payload_str.clone();
                let notification_id = notification_id.clone();

                tasks.push(tokio::spawn(async move {
                    Self::deliver_webhook(client, endpoint, payload_str, &notification_id).await
                }));
            }
        }

        let mut success_count = 0;
        let mut error_count = 0;

        for task in tasks {
            match task.await {
                Ok(Ok(())) => success_count += 1,
                Ok(Err(e)) => {
                    error_count += 1;
                    error!("Notification delivery failed: {}", e);
                }
                Err(e) => {
                    error_count += 1;
                    error!("Notification task panicked: {}", e);
                }
            }
        }

        info!(
            notification_id = %notification_id,
            channel = %channel,
            success_count = success_count,
            error_count = error_count,
            "Notification processing completed"
        );

        Ok(())
    }

    /// Deliver to a single endpoint with retry logic
    async fn deliver_webhook(
        client: Client,
        endpoint: WebhookEndpoint,
        payload: String,
        notification_id: &str,
    ) -> anyhow::Result<()> {
        let mut attempt = 0;
        let mut delay_ms = endpoint.retry_config.initial_delay_ms;

        while attempt < endpoint.retry_config.max_attempts {
            attempt += 1;

            match Self::send_webhook_request(&client, &endpoint, &payload, notification_id).await {
                Ok(()) => {
                    relay_metrics::record_notification_delivery(true);
                    debug!(
                        endpoint_id = %endpoint.id,
                        notification_id = %notification_id,
                        attempt = attempt,
                        "Notification delivered"
                    );
                    return Ok(());
                }
                Err(e) => {
                    warn!(
                        endpoint_id = %endpoint.id,
                        notification_id = %notification_id,
                        attempt = attempt,
                        max_attempts = endpoint.retry_config.max_attempts,
                        error = %e,
                        "Notification delivery attempt failed"
                    );

                    if attempt < endpoint.retry_config.max_attempts {
                        sleep(Duration::from_millis(delay_ms)).await;

                        // Exponential backoff with cap
                        delay_ms = ((delay_ms as f64 * endpoint.retry_config.backoff_multiplier)
                            as u64)
                            .min(endpoint.retry_config.max_delay_ms);
                    }
                }
            }
        }

        relay_metrics::record_notification_delivery(false);
        Err(anyhow::anyhow!(
            "Notification to {} failed after {} attempts",
            endpoint.id,
            endpoint.retry_config.max_attempts
        ))
    }

    async fn send_webhook_request(
        client: &Client,
        endpoint: &WebhookEndpoint,
        payload: &str,
        notification_id: &str,
    ) -> anyhow::Result<()> {
        let mut request_builder = client
            .post(&endpoint.url)
            .header("Content-Type", "application/json")
            .header("User-Agent", "bridge-relay/1.0")
            .header("X-Event-Id", notification_id)
            .timeout(Duration::from_secs(endpoint.retry_config.timeout_secs))
            .body(payload.to_string());

        if let Some(secret) = &endpoint.secret {
            let signature = calculate_hmac_signature(payload.as_bytes(), secret)?;
            request_builder = request_builder.header(super::SIGNATURE_HEADER, signature);
        }

        let response = request_builder.send().await?;

        if response.status().is_success() {
            Ok(())
        } else {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());

            Err(anyhow::anyhow!(
                "Notification request failed with status {}: {}",
                status,
                body
            ))
        }
    }
}

#[async_trait]
impl NotificationSink for WebhookNotifier {
    async fn notify(&self, channel: &str, message: Value) -> anyhow::Result<()> {
        // Delivery retries can take a while; never hold up event processing
        let notifier = self.clone();
        let channel = channel.to_string();

        tokio::spawn(async move {
            if let Err(e) = notifier.deliver(&channel, message).await {
                error!(channel = %channel, error = %e, "Failed to send notification");
            }
        });

        Ok(())
    }
}

/// Calculate an HMAC-SHA256 signature, rendered as `sha256=<hex>`
pub fn calculate_hmac_signature(payload: &[u8], secret: &str) -> anyhow::Result<String> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .map_err(|e| anyhow::anyhow!("Invalid HMAC key: {}", e))?;

    mac.update(payload);
    Ok(format!("sha256={}", hex::encode(mac.finalize().into_bytes())))
}

/// Verify a `sha256=<hex>` signature in constant time
pub fn verify_hmac_signature(payload: &[u8], signature: &str, secret: &str) -> bool {
    let Some(hex_signature) = signature.strip_prefix("sha256=") else {
        return false;
    };
    let Ok(expected) = hex::decode(hex_signature) else {
        return false;
    };
    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(secret.as_bytes()) else {
        return false;
    };

    mac.update(payload);
    mac.verify_slice(&expected).is_ok()
}
