//! Webhook notification channel
//!
//! Sends batch reports as JSON via HTTP POST.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use super::{Channel, ChannelError, ChannelResult, DeliveryStatus};
use crate::notifications::Report;

/// Webhook channel configuration
#[derive(Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// Webhook URL endpoint
    pub url: String,
    /// Optional authentication token (sent as Bearer token)
    pub auth_token: Option<String>,
    /// Custom headers to include in requests
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_timeout() -> u64 {
    10
}

impl std::fmt::Debug for WebhookConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookConfig")
            .field("url", &self.url)
            .field("has_auth", &self.auth_token.is_some())
            .field("headers", &self.headers.keys().collect::<Vec<_>>())
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl WebhookConfig {
    /// Create a new webhook configuration
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            auth_token: None,
            headers: HashMap::new(),
            timeout_secs: default_timeout(),
        }
    }

    /// Set authentication token
    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    /// Add a custom header
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Set request timeout
    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.url.is_empty() {
            return Err("Webhook URL cannot be empty".to_string());
        }

        if !self.url.starts_with("http://") && !self.url.starts_with("https://") {
            return Err("Webhook URL must start with http:// or https://".to_string());
        }

        if self.timeout_secs == 0 {
            return Err("Timeout must be greater than 0".to_string());
        }

        Ok(())
    }
}

/// Webhook notification channel
///
/// # Payload Format
///
/// ```json
/// {
///   "subject": "vault-unseal: prod: 2 errors occurred",
///   "text": "vault-unseal ran into errors ...",
///   "environment": "prod",
///   "event_count": 2,
///   "sent_at": "2024-01-01T12:05:00Z"
/// }
/// ```
pub struct WebhookChannel {
    config: WebhookConfig,
    client: Client,
}

impl WebhookChannel {
    /// Create a new webhook channel
    pub fn new(config: WebhookConfig) -> ChannelResult<Self> {
        config.validate().map_err(ChannelError::InvalidConfig)?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ChannelError::Other(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self { config, client })
    }

    /// Get the webhook URL
    pub fn url(&self) -> &str {
        &self.config.url
    }

    fn build_payload(&self, report: &Report) -> serde_json::Value {
        serde_json::json!({
            "subject": report.subject,
            "text": report.body,
            "environment": report.environment,
            "event_count": report.event_count,
            "sent_at": chrono::Utc::now().to_rfc3339(),
        })
    }

    /// POST the payload once
    ///
    /// Reports are delivered at most once: a failed or timed out request is
    /// not repeated, the receiver may already have stored the batch.
    async fn deliver(&self, payload: &serde_json::Value) -> ChannelResult<()> {
        let mut request = self.client.post(&self.config.url);

        if let Some(token) = &self.config.auth_token {
            request = request.bearer_auth(token);
        }

        for (key, value) in &self.config.headers {
            request = request.header(key, value);
        }

        let response = request.json(payload).send().await?;
        let status = response.status();
        if status.is_success() {
            tracing::debug!(url = %self.config.url, %status, "Webhook delivered");
            return Ok(());
        }

        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unable to read response body".to_string());
        Err(ChannelError::Other(format!("HTTP {status}: {body}")))
    }
}

#[async_trait]
impl Channel for WebhookChannel {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn send(&self, report: &Report) -> ChannelResult<DeliveryStatus> {
        let payload = self.build_payload(report);

        match self.deliver(&payload).await {
            Ok(()) => Ok(DeliveryStatus::success_with_message(
                "webhook",
                format!("Delivered to {}", self.config.url),
            )),
            Err(e) => Ok(DeliveryStatus::failure("webhook", e.to_string())),
        }
    }

    fn config(&self) -> serde_json::Value {
        serde_json::json!({
            "name": self.name(),
            "url": self.config.url,
            "timeout_secs": self.config.timeout_secs,
            "has_auth": self.config.auth_token.is_some(),
            "custom_headers": self.config.headers.keys().collect::<Vec<_>>(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn report() -> Report {
        Report {
            subject: "vault-unseal: test: 1 errors occurred".to_string(),
            body: "body".to_string(),
            environment: "test".to_string(),
            event_count: 1,
        }
    }

    #[test]
    fn test_webhook_config_validation() {
        assert!(WebhookConfig::new("https://example.com/webhook").validate().is_ok());
        assert!(WebhookConfig::new("").validate().is_err());
        assert!(WebhookConfig::new("example.com/webhook").validate().is_err());
        assert!(WebhookConfig::new("https://example.com")
            .with_timeout(0)
            .validate()
            .is_err());
    }

    #[test]
    fn test_webhook_channel_creation() {
        let channel = WebhookChannel::new(WebhookConfig::new("https://example.com/alerts")).unwrap();
        assert_eq!(channel.name(), "webhook");
        assert_eq!(channel.url(), "https://example.com/alerts");

        assert!(WebhookChannel::new(WebhookConfig::new("not-a-url")).is_err());
    }

    #[test]
    fn test_config_hides_token() {
        let config = WebhookConfig::new("https://example.com").with_auth_token("secret-token");
        assert!(!format!("{config:?}").contains("secret-token"));

        let channel = WebhookChannel::new(config).unwrap();
        let json = channel.config();
        assert_eq!(json["has_auth"], true);
        assert!(!json.to_string().contains("secret-token"));
    }

    #[test]
    fn test_payload_building() {
        let channel = WebhookChannel::new(WebhookConfig::new("https://example.com/webhook")).unwrap();
        let payload = channel.build_payload(&report());

        assert_eq!(payload["subject"], "vault-unseal: test: 1 errors occurred");
        assert_eq!(payload["event_count"], 1);
        assert!(payload["sent_at"].is_string());
    }

    #[tokio::test]
    async fn test_delivery_with_auth() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(header("authorization", "Bearer secret"))
            .and(header("x-team", "ops"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let config = WebhookConfig::new(format!("{}/hook", server.uri()))
            .with_auth_token("secret")
            .with_header("x-team", "ops");
        let channel = WebhookChannel::new(config).unwrap();

        let status = channel.send(&report()).await.unwrap();
        assert!(status.success);
    }

    #[tokio::test]
    async fn test_client_error_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad payload"))
            .expect(1)
            .mount(&server)
            .await;

        let channel = WebhookChannel::new(WebhookConfig::new(server.uri())).unwrap();

        let status = channel.send(&report()).await.unwrap();
        assert!(!status.success);
        assert!(status.message.unwrap().contains("400"));
    }

    #[tokio::test]
    async fn test_server_error_sent_once() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .expect(1)
            .mount(&server)
            .await;

        let channel = WebhookChannel::new(WebhookConfig::new(server.uri())).unwrap();

        let started = std::time::Instant::now();
        let status = channel.send(&report()).await.unwrap();
        assert!(!status.success);
        assert!(status.message.unwrap().contains("503"));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_timed_out_delivery_not_repeated() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
            .expect(1)
            .mount(&server)
            .await;

        let config = WebhookConfig::new(server.uri()).with_timeout(1);
        let channel = WebhookChannel::new(config).unwrap();

        let status = channel.send(&report()).await.unwrap();
        assert!(!status.success);
    }
}
