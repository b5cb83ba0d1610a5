//! Prelude for commonly used types and traits in opswatch.

pub use crate::config::{CollectorConfig, FreshnessConfig, MetadataConfig};
pub use crate::error::{ErrorContext, OpsError, Result};
pub use crate::freshness::{BucketCheckResult, BucketLister, BucketStatus, FreshnessChecker};
pub use crate::host::metadata::{GroupResolver, InstanceIdentity, InstanceMetadata};
pub use crate::host::sink::MetricsSink;
pub use crate::host::{DimensionTarget, HostCollector, MetricSet, Unit};
pub use crate::logging::LogConfig;
pub use crate::logs::{decode_records, DeliveryEvent, LogRecord};
pub use crate::notify::{Notification, Notifier, Severity};
