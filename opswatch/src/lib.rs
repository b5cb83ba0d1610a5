//! # opswatch - small host and storage health jobs
//!
//! Three independent jobs share this crate:
//!
//! - [`host`]: samples CPU, memory, swap, filesystem and daemon liveness on a
//!   Linux host and publishes every reading under the instance dimension
//!   and, when the host belongs to one, its autoscaling group.
//! - [`logs`]: decodes a log subscription delivery (base64, gzip, JSON) into
//!   the records it carries.
//! - [`freshness`]: checks that each configured bucket received objects
//!   today and raises a [`notify::Notification`] for every bucket that did not.
//!
//! ## Quick Start
//!
//! ```rust
//! use opswatch::logs::{decode_records, DeliveryEvent};
//!
//! let event = DeliveryEvent::new("not base64!");
//! assert!(decode_records(&event).is_err());
//! ```
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use opswatch::prelude::*;
//! use opswatch::freshness::ObjectStoreLister;
//! use opswatch::notify::LogNotifier;
//!
//! # async fn example() -> opswatch::Result<()> {
//! let config = FreshnessConfig::from_env()?;
//! let checker = FreshnessChecker::new(
//!     Arc::new(ObjectStoreLister::s3(&config)),
//!     Arc::new(LogNotifier),
//! );
//! let report = checker.run(config.buckets()).await;
//! println!("all fresh: {}", report.all_fresh());
//! # Ok(())
//! # }
//! ```
//!
//! ## Logging
//!
//! Everything logs through `tracing`. Binaries call
//! [`logging::setup::init_logging`]; libraries embedding opswatch bring their
//! own subscriber.
//!
//! ## Feature Flags
//!
//! - `s3` (default): S3 listing through `object_store`
//! - `webhook` (default): signed webhook notifications

pub mod config;
pub mod error;
pub mod freshness;
pub mod host;
pub mod logging;
pub mod logs;
pub mod notify;
pub mod prelude;
pub mod security;

pub use error::{OpsError, Result};
