//! Webhook notifications.
//!
//! Posts each notification as JSON. Supports custom headers, HMAC signing,
//! a minimum severity below which notifications are dropped, and retries with
//! exponential backoff for network errors and 5xx/429 answers.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use ring::hmac;
use serde::Serialize;
use tracing::warn;

use super::error::{NotifyError, NotifyResult};
use super::{Notification, Notifier, Severity};
use crate::security::SecureString;

/// Configuration for webhook delivery.
#[derive(Debug, Clone)]
pub struct WebhookConfig {
    url: String,
    headers: HashMap<String, String>,
    source: Option<String>,
    min_severity: Severity,
    secret: Option<SecureString>,
    timeout: Duration,
    max_retries: u32,
    retry_backoff: Duration,
}

impl WebhookConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: HashMap::new(),
            source: None,
            min_severity: Severity::Info,
            secret: None,
            timeout: Duration::from_secs(10),
            max_retries: 2,
            retry_backoff: Duration::from_millis(500),
        }
    }

    /// Read `OPSWATCH_WEBHOOK_*` variables. Returns `Ok(None)` when no URL is set.
    pub fn from_env() -> NotifyResult<Option<Self>> {
        Self::from_lookup(|key| std::env::var(key).ok().filter(|v| !v.is_empty()))
    }

    pub fn from_lookup<F>(lookup: F) -> NotifyResult<Option<Self>>
    where
        F: Fn(&str) -> Option<String>,
    {
        let Some(url) = lookup("OPSWATCH_WEBHOOK_URL").filter(|u| !u.trim().is_empty()) else {
            return Ok(None);
        };
        let mut config = Self::new(url.trim());
        if let Some(secret) = lookup("OPSWATCH_WEBHOOK_SECRET").filter(|s| !s.is_empty()) {
            config = config.with_secret(secret);
        }
        if let Some(severity) = lookup("OPSWATCH_WEBHOOK_MIN_SEVERITY") {
            config = config.with_min_severity(severity.parse()?);
        }
        if let Some(secs) = lookup("OPSWATCH_WEBHOOK_TIMEOUT_SECS") {
            let secs: u64 = secs.trim().parse().map_err(|_| NotifyError::Configuration {
                message: format!("OPSWATCH_WEBHOOK_TIMEOUT_SECS must be a number, got '{secs}'"),
            })?;
            config = config.with_timeout(Duration::from_secs(secs));
        }
        if let Some(retries) = lookup("OPSWATCH_WEBHOOK_MAX_RETRIES") {
            let retries: u32 = retries.trim().parse().map_err(|_| NotifyError::Configuration {
                message: format!("OPSWATCH_WEBHOOK_MAX_RETRIES must be a number, got '{retries}'"),
            })?;
            config = config.with_max_retries(retries);
        }
        config.validate()?;
        Ok(Some(config))
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// Add a custom header to be sent with webhook requests.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Name of the sending job, included in the payload.
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_min_severity(mut self, severity: Severity) -> Self {
        self.min_severity = severity;
        self
    }

    /// Set a secret for HMAC-SHA256 signing of payloads.
    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = Some(SecureString::new(secret.into()));
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Extra attempts after a retryable failure. Zero disables retries.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Delay before the first retry; doubles on each further attempt.
    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub fn validate(&self) -> NotifyResult<()> {
        if self.url.is_empty() {
            return Err(NotifyError::Configuration {
                message: "Webhook URL cannot be empty".to_string(),
            });
        }

        let url_lower = self.url.to_lowercase();
        if !url_lower.starts_with("http://") && !url_lower.starts_with("https://") {
            return Err(NotifyError::Configuration {
                message: "Webhook URL must start with http:// or https://".to_string(),
            });
        }

        if reqwest::Url::parse(&self.url).is_err() {
            return Err(NotifyError::Configuration {
                message: format!("Invalid webhook URL: {}", self.url),
            });
        }

        Ok(())
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    pub fn min_severity(&self) -> Severity {
        self.min_severity
    }

    pub fn secret(&self) -> Option<&SecureString> {
        self.secret.as_ref()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }
}

#[derive(Serialize)]
struct WebhookPayload<'a> {
    #[serde(flatten)]
    notification: &'a Notification,
    #[serde(skip_serializing_if = "Option::is_none")]
    source: Option<&'a str>,
}

/// Posts notifications to an HTTP endpoint.
pub struct WebhookNotifier {
    client: reqwest::Client,
    config: WebhookConfig,
}

impl WebhookNotifier {
    pub fn new(config: WebhookConfig) -> NotifyResult<Self> {
        config.validate()?;

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| NotifyError::Configuration {
                message: format!("Failed to build HTTP client: {e}"),
            })?;

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &WebhookConfig {
        &self.config
    }

    /// Hex HMAC-SHA256 of `body` under `secret`.
    pub fn sign_payload(body: &str, secret: &str) -> String {
        let key = hmac::Key::new(hmac::HMAC_SHA256, secret.as_bytes());
        let signature = hmac::sign(&key, body.as_bytes());
        hex::encode(signature.as_ref())
    }

    async fn post(&self, body: &str) -> NotifyResult<()> {
        let mut request = self
            .client
            .post(&self.config.url)
            .header("Content-Type", "application/json");

        for (key, value) in &self.config.headers {
            request = request.header(key, value);
        }

        if let Some(secret) = &self.config.secret {
            let signature = Self::sign_payload(body, secret.expose());
            request = request.header("X-Signature-256", format!("sha256={signature}"));
        }

        let response = request
            .body(body.to_string())
            .send()
            .await
            .map_err(|e| NotifyError::Network {
                message: e.to_string(),
            })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(NotifyError::ServerError { status, message });
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, notification: &Notification) -> NotifyResult<()> {
        if notification.severity < self.config.min_severity {
            tracing::debug!(
                severity = %notification.severity,
                min_severity = %self.config.min_severity,
                "Notification severity below threshold, skipping"
            );
            return Ok(());
        }

        let payload = WebhookPayload {
            notification,
            source: self.config.source.as_deref(),
        };
        let body = serde_json::to_string(&payload).map_err(|e| NotifyError::Serialization {
            message: e.to_string(),
        })?;

        let mut attempt = 0;
        loop {
            match self.post(&body).await {
                Ok(()) => break,
                Err(e) if e.is_retryable() && attempt < self.config.max_retries => {
                    let backoff = self.config.retry_backoff * 2u32.saturating_pow(attempt);
                    attempt += 1;
                    warn!(
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "Retryable webhook error, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => return Err(e),
            }
        }

        tracing::info!(
            subject = %notification.subject,
            severity = %notification.severity,
            "Notification delivered to webhook"
        );

        Ok(())
    }
}
