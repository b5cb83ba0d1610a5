//! Host metrics collector.
//!
//! A run resolves where the host lives, samples a fixed census of local
//! signals into a [`MetricSet`], then publishes every reading once per
//! [`DimensionTarget`] (the instance, and the autoscaling group when the
//! host belongs to one).
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use opswatch::config::{CollectorConfig, MetadataConfig};
//! use opswatch::host::{HostCollector, metadata::ImdsClient, sink::EmfSink};
//!
//! # async fn example() -> opswatch::error::Result<()> {
//! let imds = Arc::new(ImdsClient::new(MetadataConfig::default())?);
//! let collector = HostCollector::new(
//!     CollectorConfig::default(),
//!     imds.clone(),
//!     imds,
//!     Arc::new(EmfSink::stdout()),
//! );
//! let summary = collector.run().await?;
//! println!("{} of {} metric calls sent", summary.report.sent, summary.report.attempted);
//! # Ok(())
//! # }
//! ```

pub mod metadata;
pub mod probe;
pub mod sink;
mod types;

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::config::CollectorConfig;
use crate::error::Result;
use crate::logging::LogConfig;
use crate::{log_probe, perf_debug};

use metadata::{GroupResolver, InstanceIdentity, InstanceMetadata};
use probe::{DiskUsage, MemoryInfo, ProbeError};
use sink::MetricsSink;

pub use types::{DimensionTarget, MetricDatum, Unit};

/// Readings accumulated during one run, keyed by unit then name.
///
/// Recording the same (unit, name) twice keeps the last value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricSet {
    readings: BTreeMap<Unit, BTreeMap<String, f64>>,
}

impl MetricSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite a reading. Values are not range-checked.
    pub fn record(&mut self, name: impl Into<String>, value: f64, unit: Unit) {
        self.readings
            .entry(unit)
            .or_default()
            .insert(name.into(), value);
    }

    /// `record` with the default unit.
    pub fn record_percent(&mut self, name: impl Into<String>, value: f64) {
        self.record(name, value, Unit::Percent);
    }

    pub fn get(&self, unit: Unit, name: &str) -> Option<f64> {
        self.readings.get(&unit)?.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.readings.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every reading as (unit, name, value).
    pub fn iter(&self) -> impl Iterator<Item = (Unit, &str, f64)> + '_ {
        self.readings.iter().flat_map(|(unit, metrics)| {
            metrics
                .iter()
                .map(move |(name, value)| (*unit, name.as_str(), *value))
        })
    }

    /// Send every reading to `sink` once per target.
    ///
    /// Each call is independent: a failure is logged and counted, and the
    /// remaining calls still go out.
    #[instrument(skip(self, sink, targets), fields(metrics = self.len(), target_count = targets.len()))]
    pub async fn publish(
        &self,
        sink: &dyn MetricsSink,
        namespace: &str,
        targets: &[DimensionTarget],
    ) -> PublishReport {
        let mut report = PublishReport::default();
        let timestamp = Utc::now();

        for (unit, name, value) in self.iter() {
            for target in targets {
                let datum = MetricDatum {
                    namespace: namespace.to_string(),
                    name: name.to_string(),
                    value,
                    unit,
                    dimension: target.clone(),
                    timestamp,
                };
                report.attempted += 1;
                match sink.put(&datum).await {
                    Ok(()) => report.sent += 1,
                    Err(e) => {
                        warn!(metric = %name, dimension = %target, error = %e, "Failed to publish metric");
                        report.failures.push(PublishFailure {
                            metric: name.to_string(),
                            dimension: target.clone(),
                            error: e.to_string(),
                        });
                    }
                }
            }
        }

        report
    }
}

/// A sink call that did not succeed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PublishFailure {
    pub metric: String,
    pub dimension: DimensionTarget,
    pub error: String,
}

/// Outcome of [`MetricSet::publish`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PublishReport {
    pub attempted: usize,
    pub sent: usize,
    pub failures: Vec<PublishFailure>,
}

impl PublishReport {
    pub fn failed(&self) -> usize {
        self.failures.len()
    }

    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Metric name for a mount point's utilisation.
pub fn mount_metric_name(mount: &Path) -> String {
    format!("Mount_{}", mount.display())
}

/// Metric name for a partition discovered in the mount table.
pub fn partition_metric_name(mountpoint: &str) -> String {
    format!("DiskUsage_{mountpoint}")
}

/// Metric name for a daemon's liveness.
pub fn process_metric_name(daemon: &str) -> String {
    format!("Process_{daemon}")
}

fn skip_on_error<T>(what: &str, result: std::result::Result<T, ProbeError>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(probe = what, error = %e, "Probe failed, metric skipped");
            None
        }
    }
}

fn record_memory(metrics: &mut MetricSet, mem: &MemoryInfo, log: &LogConfig) {
    metrics.record("Memory_total", mem.total_mib() as f64, Unit::Megabytes);
    metrics.record("Memory_used", mem.used_mib() as f64, Unit::Megabytes);
    metrics.record("Memory_available", mem.available_mib() as f64, Unit::Megabytes);
    metrics.record_percent("Memory_utilized", mem.percent());
    metrics.record("Swap_total", mem.swap_total_mib() as f64, Unit::Megabytes);
    metrics.record("Swap_used", mem.swap_used_mib() as f64, Unit::Megabytes);
    metrics.record_percent("Swap_utilized", mem.swap_percent());
    log_probe!(
        log,
        memory_total_mb = mem.total_mib(),
        memory_used_mb = mem.used_mib(),
        memory_available_mb = mem.available_mib(),
        memory_utilized = mem.percent(),
        swap_total_mb = mem.swap_total_mib(),
        swap_used_mb = mem.swap_used_mib(),
        swap_utilized = mem.swap_percent(),
        "Memory"
    );
}

fn record_root(metrics: &mut MetricSet, root: &DiskUsage, log: &LogConfig) {
    metrics.record("Mount_root_total", root.total as f64, Unit::Bytes);
    metrics.record("Mount_root_available", root.free as f64, Unit::Bytes);
    metrics.record("Mount_root_used", root.used as f64, Unit::Bytes);
    metrics.record_percent("Mount_root_utilized", root.percent);
    if let Some(inodes) = root.inode_percent {
        metrics.record_percent("Mount_root_inodes_utilized", inodes);
    }
    log_probe!(log, total = root.total, used = root.used, free = root.free, percent = root.percent, inodes = ?root.inode_percent, "Root filesystem");
}

/// Sample the full census into a fresh [`MetricSet`].
///
/// The two CPU windows run back to back, short first, so the call blocks for
/// their sum. A failing probe is logged and its metrics are left out.
pub async fn collect_census(config: &CollectorConfig, log: &LogConfig) -> MetricSet {
    let mut metrics = MetricSet::new();
    let proc_root = config.proc_root();

    for (name, window) in [
        ("CPU_1s", config.cpu_short_window()),
        ("CPU_5s", config.cpu_long_window()),
    ] {
        if let Some(pct) = skip_on_error(name, probe::sample_cpu_percent(proc_root, window).await) {
            log_probe!(log, metric = name, window_ms = window.as_millis() as u64, percent = pct, "CPU");
            metrics.record_percent(name, pct);
        }
    }

    if let Some(mem) = skip_on_error("memory", MemoryInfo::read_from(proc_root)) {
        record_memory(&mut metrics, &mem, log);
    }

    if let Some(root) = skip_on_error("root filesystem", probe::disk_usage(Path::new("/"))) {
        record_root(&mut metrics, &root, log);
    }

    for mount in config.mount_points() {
        match skip_on_error("mount", probe::mount_usage(mount)) {
            Some(Some(pct)) => {
                log_probe!(log, mount = %mount.display(), percent = pct, "Mount");
                metrics.record_percent(mount_metric_name(mount), pct);
            }
            Some(None) => warn!(mount = %mount.display(), "Mount point missing, metric omitted"),
            None => {}
        }
    }

    let table = skip_on_error("process table", probe::read_process_table(proc_root)).unwrap_or_default();
    perf_debug!(log, processes = table.len(), "Process table read");
    for daemon in config.daemons() {
        let state = probe::process_state(&table, daemon);
        if state.is_present() {
            log_probe!(log, process = %daemon, state = %state, "Process");
        } else {
            warn!(process = %daemon, state = %state, "Expected daemon is not running");
        }
        let alive = if state.is_present() { 1.0 } else { 0.0 };
        metrics.record(process_metric_name(daemon), alive, Unit::Count);
    }

    let partitions = skip_on_error(
        "partitions",
        probe::disk_partitions(proc_root, config.mount_table(), config.all_partitions()),
    )
    .unwrap_or_default();
    for part in partitions {
        let mountpoint = Path::new(&part.mountpoint);
        if let Some(usage) = skip_on_error("partition", probe::disk_usage(mountpoint)) {
            perf_debug!(log, device = %part.device, mountpoint = %part.mountpoint, fstype = %part.fstype, percent = usage.percent, "Partition");
            metrics.record_percent(partition_metric_name(&part.mountpoint), usage.percent);
        }
    }

    metrics
}

/// What a collector run did.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub identity: InstanceIdentity,
    pub group: Option<String>,
    pub metrics: usize,
    pub report: PublishReport,
}

/// Drives one collector invocation.
pub struct HostCollector {
    config: CollectorConfig,
    metadata: Arc<dyn InstanceMetadata>,
    groups: Arc<dyn GroupResolver>,
    sink: Arc<dyn MetricsSink>,
    log_config: LogConfig,
}

impl HostCollector {
    pub fn new(
        config: CollectorConfig,
        metadata: Arc<dyn InstanceMetadata>,
        groups: Arc<dyn GroupResolver>,
        sink: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            config,
            metadata,
            groups,
            sink,
            log_config: LogConfig::default(),
        }
    }

    pub fn with_log_config(mut self, log_config: LogConfig) -> Self {
        self.log_config = log_config;
        self
    }

    /// Work out which dimension targets this host publishes to.
    ///
    /// Metadata and group lookups are fatal: without them there is nothing to
    /// tag metrics with.
    pub async fn resolve_targets(&self) -> Result<(InstanceIdentity, Option<String>, Vec<DimensionTarget>)> {
        let identity = self.metadata.identity().await?;
        let group = self
            .groups
            .resolve_group_membership(&identity.instance_id, identity.region())
            .await?;
        let targets = DimensionTarget::for_host(&identity.instance_id, group.as_deref());
        Ok((identity, group, targets))
    }

    /// Resolve targets, collect the census, publish it.
    #[instrument(skip(self), fields(namespace = %self.config.namespace()))]
    pub async fn run(&self) -> Result<RunSummary> {
        self.config.validate()?;
        let (identity, group, targets) = self.resolve_targets().await?;
        info!(
            instance_id = %identity.instance_id,
            region = %identity.region(),
            group = group.as_deref().unwrap_or("-"),
            "Collecting host metrics"
        );

        let metrics = collect_census(&self.config, &self.log_config).await;
        let report = metrics
            .publish(self.sink.as_ref(), self.config.namespace(), &targets)
            .await;

        info!(
            metrics = metrics.len(),
            attempted = report.attempted,
            sent = report.sent,
            failed = report.failed(),
            "Host metrics published"
        );

        Ok(RunSummary {
            identity,
            group,
            metrics: metrics.len(),
            report,
        })
    }
}
