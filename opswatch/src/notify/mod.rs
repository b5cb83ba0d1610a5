//! Notification channel.
//!
//! Jobs that detect a problem hand a [`Notification`] to a [`Notifier`].
//! [`LogNotifier`] only writes an error-level log event; `WebhookNotifier`
//! (feature `webhook`) posts JSON to an HTTP endpoint.

mod error;
#[cfg(feature = "webhook")]
mod webhook;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

pub use error::{NotifyError, NotifyResult};
#[cfg(feature = "webhook")]
pub use webhook::{WebhookConfig, WebhookNotifier};

/// How urgent a notification is. Ordered, so it can be used as a filter.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    #[default]
    Warning,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Warning => write!(f, "warning"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

impl std::str::FromStr for Severity {
    type Err = NotifyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "info" => Ok(Self::Info),
            "warning" | "warn" => Ok(Self::Warning),
            "critical" => Ok(Self::Critical),
            other => Err(NotifyError::Configuration {
                message: format!("unknown severity '{other}'"),
            }),
        }
    }
}

/// A human-readable message for an operator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub subject: String,
    pub message: String,
    pub severity: Severity,
    pub timestamp: DateTime<Utc>,
}

impl Notification {
    pub fn new(subject: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            message: message.into(),
            severity: Severity::default(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }
}

/// Delivers notifications somewhere an operator will see them.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &Notification) -> NotifyResult<()>;
}

/// Writes notifications to the log at error level and delivers nothing else.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: &Notification) -> NotifyResult<()> {
        error!(
            subject = %notification.subject,
            severity = %notification.severity,
            "{}",
            notification.message
        );
        Ok(())
    }
}

/// Sends to every inner notifier, in order.
///
/// Delivery continues past a failing notifier; the first error is returned
/// once all of them have been tried.
#[derive(Default)]
pub struct FanoutNotifier {
    notifiers: Vec<Box<dyn Notifier>>,
}

impl FanoutNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, notifier: impl Notifier + 'static) -> Self {
        self.notifiers.push(Box::new(notifier));
        self
    }

    pub fn len(&self) -> usize {
        self.notifiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notifiers.is_empty()
    }
}

#[async_trait]
impl Notifier for FanoutNotifier {
    async fn notify(&self, notification: &Notification) -> NotifyResult<()> {
        let mut first_error = None;
        for notifier in &self.notifiers {
            if let Err(e) = notifier.notify(notification).await {
                warn!(error = %e, subject = %notification.subject, "Notifier failed");
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => {
                info!(delivered_to = self.notifiers.len(), "Notification dispatched");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Recorder {
        seen: Arc<Mutex<Vec<String>>>,
        fail: bool,
    }

    #[async_trait]
    impl Notifier for Recorder {
        async fn notify(&self, notification: &Notification) -> NotifyResult<()> {
            self.seen.lock().unwrap().push(notification.message.clone());
            if self.fail {
                return Err(NotifyError::Network {
                    message: "down".to_string(),
                });
            }
            Ok(())
        }
    }

    #[test]
    fn test_severity_ordering_and_parsing() {
        assert!(Severity::Info < Severity::Warning);
        assert!(Severity::Warning < Severity::Critical);
        assert_eq!(Severity::default(), Severity::Warning);
        assert_eq!("CRITICAL".parse::<Severity>().unwrap(), Severity::Critical);
        assert_eq!("warn".parse::<Severity>().unwrap(), Severity::Warning);
        assert!("loud".parse::<Severity>().is_err());
        assert_eq!(Severity::Info.to_string(), "info");
    }

    #[test]
    fn test_notification_serializes_lowercase_severity() {
        let n = Notification::new("Bucket freshness", "Bucket [logs] not found")
            .with_severity(Severity::Critical);
        let value = serde_json::to_value(&n).unwrap();
        assert_eq!(value["severity"], "critical");
        assert_eq!(value["message"], "Bucket [logs] not found");
    }

    #[tokio::test]
    async fn test_log_notifier_always_succeeds() {
        assert!(LogNotifier
            .notify(&Notification::new("s", "m"))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_fanout_tries_every_notifier() {
        let failing = Recorder {
            fail: true,
            ..Recorder::default()
        };
        let healthy = Recorder::default();
        let fanout = FanoutNotifier::new()
            .with(failing.clone())
            .with(healthy.clone());

        let result = fanout.notify(&Notification::new("s", "hello")).await;

        assert!(matches!(result, Err(NotifyError::Network { .. })));
        assert_eq!(failing.seen.lock().unwrap().as_slice(), ["hello"]);
        assert_eq!(healthy.seen.lock().unwrap().as_slice(), ["hello"]);
        assert_eq!(fanout.len(), 2);
    }
}
