//! Bucket freshness checker.
//!
//! Object keys written by the log shippers start with the UTC date
//! (`YYYYMMDD`). A bucket is fresh when at least one key carries today's
//! prefix; every other outcome produces one notification for that bucket.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use futures::{StreamExt, TryStreamExt};
use object_store::memory::InMemory;
use object_store::path::Path as ObjectPath;
use object_store::ObjectStore;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::config::FreshnessConfig;
use crate::notify::{Notification, Notifier, Severity};

/// Subject line used for freshness notifications.
pub const NOTIFICATION_SUBJECT: &str = "Bucket freshness check";

/// Failure to list a bucket.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ListError {
    #[error("bucket not found")]
    NotFound,

    #[error("{0}")]
    Other(String),
}

/// Lists keys in a named bucket.
#[async_trait]
pub trait BucketLister: Send + Sync {
    /// At most `max_keys` keys starting with `prefix`, in key order.
    async fn list_prefix(
        &self,
        bucket: &str,
        prefix: &str,
        max_keys: usize,
    ) -> Result<Vec<String>, ListError>;
}

/// Date prefix for `date`.
pub fn date_prefix(date: NaiveDate) -> String {
    date.format("%Y%m%d").to_string()
}

/// Date prefix for the current UTC day.
pub fn today_prefix() -> String {
    date_prefix(Utc::now().date_naive())
}

/// [`BucketLister`] backed by `object_store`.
///
/// Buckets registered with [`with_store`](Self::with_store) are served from
/// that store. With S3 enabled, any other bucket gets an S3 store built from
/// the standard `AWS_*` environment; without it an unknown bucket is
/// reported as not found.
#[derive(Default)]
pub struct ObjectStoreLister {
    stores: HashMap<String, Arc<dyn ObjectStore>>,
    s3: Option<S3Settings>,
}

#[derive(Debug, Clone, Default)]
struct S3Settings {
    region: Option<String>,
    endpoint: Option<String>,
}

impl ObjectStoreLister {
    /// A lister that only knows registered stores.
    pub fn new() -> Self {
        Self::default()
    }

    /// A lister that falls back to S3 for unregistered buckets.
    #[cfg(feature = "s3")]
    pub fn s3(config: &FreshnessConfig) -> Self {
        Self {
            stores: HashMap::new(),
            s3: Some(S3Settings {
                region: config.region().map(str::to_string),
                endpoint: config.endpoint().map(str::to_string),
            }),
        }
    }

    pub fn with_store(mut self, bucket: impl Into<String>, store: Arc<dyn ObjectStore>) -> Self {
        self.stores.insert(bucket.into(), store);
        self
    }

    /// Register an empty in-memory bucket and return its store for seeding.
    pub fn with_memory_bucket(self, bucket: impl Into<String>) -> (Self, Arc<InMemory>) {
        let store = Arc::new(InMemory::new());
        (self.with_store(bucket, store.clone()), store)
    }

    fn store_for(&self, bucket: &str) -> Result<Arc<dyn ObjectStore>, ListError> {
        if let Some(store) = self.stores.get(bucket) {
            return Ok(store.clone());
        }
        match &self.s3 {
            Some(settings) => build_s3_store(bucket, settings),
            None => Err(ListError::NotFound),
        }
    }
}

#[cfg(feature = "s3")]
fn build_s3_store(bucket: &str, settings: &S3Settings) -> Result<Arc<dyn ObjectStore>, ListError> {
    use object_store::aws::AmazonS3Builder;
    use object_store::RetryConfig;

    let mut builder = AmazonS3Builder::from_env()
        .with_bucket_name(bucket)
        .with_retry(RetryConfig {
            max_retries: 3,
            retry_timeout: std::time::Duration::from_secs(30),
            ..Default::default()
        });
    if let Some(region) = &settings.region {
        builder = builder.with_region(region);
    }
    if let Some(endpoint) = &settings.endpoint {
        builder = builder
            .with_endpoint(endpoint)
            .with_allow_http(endpoint.starts_with("http://"));
    }

    let store = builder
        .build()
        .map_err(|e| ListError::Other(format!("Failed to create S3 client: {e}")))?;
    Ok(Arc::new(store))
}

#[cfg(not(feature = "s3"))]
fn build_s3_store(_bucket: &str, _settings: &S3Settings) -> Result<Arc<dyn ObjectStore>, ListError> {
    Err(ListError::Other("S3 support is not compiled in".to_string()))
}

/// True when any error in the chain reports a missing bucket.
///
/// S3 list failures surface as `Error::Generic`, with the HTTP status and the
/// `NoSuchBucket` code only present in the wrapped errors' messages.
fn is_missing_bucket(err: &(dyn std::error::Error + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(e) = current {
        let message = e.to_string();
        if message.contains("NoSuchBucket") || message.contains("404 Not Found") {
            return true;
        }
        current = e.source();
    }
    false
}

fn map_store_error(err: object_store::Error) -> ListError {
    match err {
        object_store::Error::NotFound { .. } => ListError::NotFound,
        other if is_missing_bucket(&other) => ListError::NotFound,
        other => ListError::Other(other.to_string()),
    }
}

#[async_trait]
impl BucketLister for ObjectStoreLister {
    async fn list_prefix(
        &self,
        bucket: &str,
        prefix: &str,
        max_keys: usize,
    ) -> Result<Vec<String>, ListError> {
        let store = self.store_for(bucket)?;

        // Store prefixes are whole path segments, so the listing starts after
        // the raw prefix and stops at the first key that no longer matches.
        // On S3 this goes out as `start-after` with the service's own page
        // size; the stream is dropped once `max_keys` keys are in hand, so at
        // most one page is fetched.
        let start = prefix.strip_suffix('/').unwrap_or(prefix);
        let stream = if start.is_empty() {
            store.list(None)
        } else {
            store.list_with_offset(None, &ObjectPath::from(start))
        };

        let owned_prefix = prefix.to_string();
        let keys: Vec<String> = stream
            .map_err(map_store_error)
            .map_ok(|meta| meta.location.to_string())
            .take_while(move |item| {
                futures::future::ready(match item {
                    Ok(key) => key.starts_with(&owned_prefix),
                    Err(_) => true,
                })
            })
            .take(max_keys)
            .try_collect()
            .await?;

        // The offset is exclusive, so a key equal to the prefix itself is
        // never listed.
        if keys.is_empty() && !start.is_empty() && start == prefix {
            match store.head(&ObjectPath::from(start)).await {
                Ok(meta) => return Ok(vec![meta.location.to_string()]),
                Err(object_store::Error::NotFound { .. }) => {}
                Err(e) => return Err(map_store_error(e)),
            }
        }
        Ok(keys)
    }
}

/// Outcome of checking one bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BucketStatus {
    /// At least one key matched. `matched` is capped by the listing limit.
    Fresh { matched: usize },
    /// The listing succeeded but nothing matched.
    Empty,
    NotFound,
    Failed { message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BucketCheckResult {
    pub bucket: String,
    pub prefix: String,
    #[serde(flatten)]
    pub status: BucketStatus,
    /// True when the prefix was supplied rather than derived from today.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub custom_prefix: bool,
}

impl BucketCheckResult {
    pub fn is_fresh(&self) -> bool {
        matches!(self.status, BucketStatus::Fresh { .. })
    }

    pub fn needs_notification(&self) -> bool {
        !self.is_fresh()
    }

    /// Text of the notification for this bucket, if one is due.
    pub fn notification_message(&self) -> Option<String> {
        match &self.status {
            BucketStatus::Fresh { .. } => None,
            BucketStatus::Empty if self.custom_prefix => Some(format!(
                "Bucket [{}] has no files for specified filter",
                self.bucket
            )),
            BucketStatus::Empty => Some(format!("Bucket [{}] has no files for today", self.bucket)),
            BucketStatus::NotFound => Some(format!("Bucket [{}] not found", self.bucket)),
            BucketStatus::Failed { message } => Some(format!("API [{message}]")),
        }
    }

    pub fn severity(&self) -> Severity {
        match self.status {
            BucketStatus::Fresh { .. } => Severity::Info,
            BucketStatus::Empty => Severity::Warning,
            BucketStatus::NotFound | BucketStatus::Failed { .. } => Severity::Critical,
        }
    }

    pub fn notification(&self) -> Option<Notification> {
        self.notification_message().map(|message| {
            Notification::new(NOTIFICATION_SUBJECT, message).with_severity(self.severity())
        })
    }
}

/// Results of one scan.
#[derive(Debug, Clone, Serialize)]
pub struct FreshnessReport {
    pub prefix: String,
    pub results: Vec<BucketCheckResult>,
    pub notifications_sent: usize,
    pub notifications_failed: usize,
}

impl FreshnessReport {
    pub fn all_fresh(&self) -> bool {
        self.results.iter().all(BucketCheckResult::is_fresh)
    }

    pub fn stale(&self) -> impl Iterator<Item = &BucketCheckResult> {
        self.results.iter().filter(|r| r.needs_notification())
    }
}

/// Checks buckets and notifies about the ones that are not fresh.
pub struct FreshnessChecker {
    lister: Arc<dyn BucketLister>,
    notifier: Arc<dyn Notifier>,
    max_keys: usize,
    prefix: Option<String>,
}

impl FreshnessChecker {
    pub fn new(lister: Arc<dyn BucketLister>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            lister,
            notifier,
            max_keys: FreshnessConfig::default().max_keys(),
            prefix: None,
        }
    }

    pub fn with_max_keys(mut self, max_keys: usize) -> Self {
        self.max_keys = max_keys.max(1);
        self
    }

    /// Use a fixed key prefix instead of today's date.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    /// Classify one bucket against the configured prefix, or today's.
    /// Never sends anything.
    pub async fn check(&self, bucket: &str) -> BucketCheckResult {
        let prefix = self.prefix.clone().unwrap_or_else(today_prefix);
        self.check_with_prefix(bucket, &prefix).await
    }

    #[instrument(skip(self))]
    pub async fn check_with_prefix(&self, bucket: &str, prefix: &str) -> BucketCheckResult {
        let status = match self.lister.list_prefix(bucket, prefix, self.max_keys).await {
            Ok(keys) if keys.is_empty() => BucketStatus::Empty,
            Ok(keys) => BucketStatus::Fresh {
                matched: keys.len(),
            },
            Err(ListError::NotFound) => BucketStatus::NotFound,
            Err(ListError::Other(message)) => BucketStatus::Failed { message },
        };

        BucketCheckResult {
            bucket: bucket.to_string(),
            prefix: prefix.to_string(),
            status,
            custom_prefix: self.prefix.is_some(),
        }
    }

    /// Check every bucket in order, notifying as it goes.
    ///
    /// The prefix is fixed before the first bucket, so a scan that crosses
    /// midnight still checks a single day.
    #[instrument(skip(self, buckets), fields(buckets = buckets.len()))]
    pub async fn run(&self, buckets: &[String]) -> FreshnessReport {
        let prefix = self.prefix.clone().unwrap_or_else(today_prefix);
        let mut report = FreshnessReport {
            prefix: prefix.clone(),
            results: Vec::with_capacity(buckets.len()),
            notifications_sent: 0,
            notifications_failed: 0,
        };

        for bucket in buckets {
            let result = self.check_with_prefix(bucket, &prefix).await;
            match result.notification() {
                None => info!(%bucket, %prefix, "Bucket has files for today, system normal"),
                Some(notification) => {
                    warn!(%bucket, %prefix, message = %notification.message, "Bucket is not fresh");
                    match self.notifier.notify(&notification).await {
                        Ok(()) => report.notifications_sent += 1,
                        Err(e) => {
                            warn!(%bucket, error = %e, "Failed to send notification");
                            report.notifications_failed += 1;
                        }
                    }
                }
            }
            report.results.push(result);
        }

        info!(
            checked = report.results.len(),
            stale = report.stale().count(),
            "Bucket freshness scan finished"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::NotifyResult;
    use object_store::PutPayload;
    use std::sync::Mutex;

    #[derive(Default)]
    struct CapturingNotifier {
        sent: Mutex<Vec<Notification>>,
    }

    impl CapturingNotifier {
        fn messages(&self) -> Vec<String> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .map(|n| n.message.clone())
                .collect()
        }
    }

    #[async_trait]
    impl Notifier for CapturingNotifier {
        async fn notify(&self, notification: &Notification) -> NotifyResult<()> {
            self.sent.lock().unwrap().push(notification.clone());
            Ok(())
        }
    }

    struct FailingLister;

    #[async_trait]
    impl BucketLister for FailingLister {
        async fn list_prefix(&self, _: &str, _: &str, _: usize) -> Result<Vec<String>, ListError> {
            Err(ListError::Other("AccessDenied".to_string()))
        }
    }

    async fn seed(store: &InMemory, keys: &[&str]) {
        for key in keys {
            store
                .put(&ObjectPath::from(*key), PutPayload::from_static(b"log"))
                .await
                .unwrap();
        }
    }

    #[test]
    fn test_date_prefix() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 7).unwrap();
        assert_eq!(date_prefix(date), "20240307");
        assert_eq!(today_prefix().len(), 8);
    }

    #[tokio::test]
    async fn test_list_prefix_matches_raw_prefix() {
        let (lister, store) = ObjectStoreLister::new().with_memory_bucket("logs");
        seed(
            &store,
            &[
                "20240306-host.log",
                "20240307-a.log",
                "20240307-b.log",
                "20240307/nested.log",
                "20240308-c.log",
            ],
        )
        .await;

        let keys = lister.list_prefix("logs", "20240307", 5).await.unwrap();
        assert_eq!(
            keys,
            vec!["20240307-a.log", "20240307-b.log", "20240307/nested.log"]
        );

        let capped = lister.list_prefix("logs", "20240307", 2).await.unwrap();
        assert_eq!(capped.len(), 2);
    }

    #[tokio::test]
    async fn test_list_prefix_finds_key_equal_to_prefix() {
        let (lister, store) = ObjectStoreLister::new().with_memory_bucket("logs");
        seed(&store, &["20240306-host.log", "20240307"]).await;

        let keys = lister.list_prefix("logs", "20240307", 5).await.unwrap();
        assert_eq!(keys, vec!["20240307"]);
        assert!(lister.list_prefix("logs", "20240308", 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_bucket_is_not_found() {
        let lister = ObjectStoreLister::new();
        let err = lister.list_prefix("nope", "20240307", 5).await.unwrap_err();
        assert_eq!(err, ListError::NotFound);
    }

    #[tokio::test]
    async fn test_check_classifies_buckets() {
        let (lister, store) = ObjectStoreLister::new().with_memory_bucket("fresh");
        let (lister, _) = lister.with_memory_bucket("empty");
        seed(&store, &["20240307-1.log", "20240307-2.log", "20240307-3.log"]).await;
        let checker = FreshnessChecker::new(Arc::new(lister), Arc::new(CapturingNotifier::default()));

        let fresh = checker.check_with_prefix("fresh", "20240307").await;
        assert_eq!(fresh.status, BucketStatus::Fresh { matched: 3 });
        assert!(!fresh.needs_notification());
        assert_eq!(fresh.notification_message(), None);

        let empty = checker.check_with_prefix("empty", "20240307").await;
        assert_eq!(empty.status, BucketStatus::Empty);
        assert_eq!(
            empty.notification_message().as_deref(),
            Some("Bucket [empty] has no files for today")
        );

        let missing = checker.check_with_prefix("gone", "20240307").await;
        assert_eq!(missing.status, BucketStatus::NotFound);
        assert_eq!(
            missing.notification_message().as_deref(),
            Some("Bucket [gone] not found")
        );
        assert_eq!(missing.severity(), Severity::Critical);
    }

    #[tokio::test]
    async fn test_other_errors_become_api_messages() {
        let checker = FreshnessChecker::new(
            Arc::new(FailingLister),
            Arc::new(CapturingNotifier::default()),
        );
        let result = checker.check_with_prefix("logs", "20240307").await;
        assert_eq!(
            result.notification_message().as_deref(),
            Some("API [AccessDenied]")
        );
    }

    #[tokio::test]
    async fn test_run_continues_past_missing_bucket() {
        let (lister, store) = ObjectStoreLister::new().with_memory_bucket("b");
        let (lister, _) = lister.with_memory_bucket("c");
        seed(&store, &["20240307-x.log"]).await;
        let notifier = Arc::new(CapturingNotifier::default());
        let checker = FreshnessChecker::new(Arc::new(lister), notifier.clone())
            .with_prefix("20240307");

        let buckets: Vec<String> = ["a", "b", "c"].iter().map(|s| s.to_string()).collect();
        let report = checker.run(&buckets).await;

        assert_eq!(report.prefix, "20240307");
        assert_eq!(report.results.len(), 3);
        assert_eq!(report.results[0].status, BucketStatus::NotFound);
        assert!(report.results[1].is_fresh());
        assert_eq!(report.results[2].status, BucketStatus::Empty);
        assert_eq!(report.notifications_sent, 2);
        assert!(!report.all_fresh());
        assert_eq!(
            notifier.messages(),
            vec![
                "Bucket [a] not found".to_string(),
                "Bucket [c] has no files for specified filter".to_string(),
            ]
        );
    }

    #[test]
    fn test_result_serializes_with_status_tag() {
        let result = BucketCheckResult {
            bucket: "logs".to_string(),
            prefix: "20240307".to_string(),
            status: BucketStatus::Fresh { matched: 2 },
            custom_prefix: false,
        };
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["status"], "fresh");
        assert_eq!(value["matched"], 2);
        assert!(value.get("custom_prefix").is_none());
    }
}
