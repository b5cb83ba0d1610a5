//! End-to-end collector runs against a fake `/proc` tree.

use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use opswatch::config::CollectorConfig;
use opswatch::host::metadata::{
    GroupResolver, InstanceIdentity, InstanceMetadata, MetadataError, StaticMetadata,
};
use opswatch::host::sink::{MetricsSink, SinkError};
use opswatch::host::{collect_census, DimensionTarget, HostCollector, MetricDatum, Unit};
use opswatch::logging::LogConfig;
use opswatch::OpsError;

const MEMINFO: &str = "MemTotal:        2048000 kB
MemFree:          512000 kB
MemAvailable:    1024000 kB
Buffers:           10240 kB
Cached:           204800 kB
SwapTotal:       1048576 kB
SwapFree:         524288 kB
";

#[derive(Default)]
struct RecordingSink {
    calls: Mutex<Vec<MetricDatum>>,
}

#[async_trait]
impl MetricsSink for RecordingSink {
    async fn put(&self, datum: &MetricDatum) -> Result<(), SinkError> {
        self.calls.lock().unwrap().push(datum.clone());
        Ok(())
    }
}

struct UnreachableMetadata;

#[async_trait]
impl InstanceMetadata for UnreachableMetadata {
    async fn identity(&self) -> Result<InstanceIdentity, MetadataError> {
        Err(MetadataError::Network {
            path: "/latest/api/token".to_string(),
            message: "connection refused".to_string(),
        })
    }
}

#[async_trait]
impl GroupResolver for UnreachableMetadata {
    async fn resolve_group_membership(
        &self,
        _instance_id: &str,
        _region: &str,
    ) -> Result<Option<String>, MetadataError> {
        Ok(None)
    }
}

/// Knows the instance but cannot answer the group query.
struct GrouplessMetadata;

#[async_trait]
impl InstanceMetadata for GrouplessMetadata {
    async fn identity(&self) -> Result<InstanceIdentity, MetadataError> {
        Ok(InstanceIdentity::new("i-0abc", "us-east-1a"))
    }
}

#[async_trait]
impl GroupResolver for GrouplessMetadata {
    async fn resolve_group_membership(
        &self,
        _instance_id: &str,
        _region: &str,
    ) -> Result<Option<String>, MetadataError> {
        Err(MetadataError::TagsUnavailable)
    }
}

fn write_process(proc_root: &Path, pid: u32, name: &str, state: char) {
    let dir = proc_root.join(pid.to_string());
    fs::create_dir_all(&dir).unwrap();
    fs::write(
        dir.join("stat"),
        format!("{pid} ({name}) {state} 1 {pid} {pid} 0 -1 4194560 0 0"),
    )
    .unwrap();
}

/// Lays out a minimal `/proc` plus a mount table pointing at `data_dir`.
fn fake_host(root: &Path, data_dir: &Path) -> CollectorConfig {
    let proc_root = root.join("proc");
    fs::create_dir_all(&proc_root).unwrap();
    fs::write(proc_root.join("stat"), "cpu  100 0 50 850 0 0 0 0 0 0\n").unwrap();
    fs::write(proc_root.join("meminfo"), MEMINFO).unwrap();
    fs::write(proc_root.join("filesystems"), "nodev\tproc\nnodev\ttmpfs\n\text4\n").unwrap();
    write_process(&proc_root, 1, "systemd", 'S');
    write_process(&proc_root, 412, "sshd", 'S');
    write_process(&proc_root, 977, "crond", 'Z');

    let mtab = root.join("mtab");
    fs::write(
        &mtab,
        format!(
            "proc /proc proc rw 0 0\n/dev/xvda1 {} ext4 rw 0 0\nnone /run tmpfs rw 0 0\n",
            data_dir.display()
        ),
    )
    .unwrap();

    CollectorConfig::default()
        .with_cpu_windows(Duration::from_millis(5), Duration::from_millis(5))
        .with_proc_root(&proc_root)
        .with_mount_table(&mtab)
        .with_mount_points([data_dir.to_path_buf(), root.join("not-mounted")])
        .with_daemons(["sshd", "ntpd", "crond"])
}

#[tokio::test]
async fn test_census_from_fake_host() {
    let root = tempfile::tempdir().unwrap();
    let data = tempfile::tempdir().unwrap();
    let config = fake_host(root.path(), data.path());

    let metrics = collect_census(&config, &LogConfig::production()).await;

    // Static /proc/stat: no jiffies elapsed, so both windows read idle.
    assert_eq!(metrics.get(Unit::Percent, "CPU_1s"), Some(0.0));
    assert_eq!(metrics.get(Unit::Percent, "CPU_5s"), Some(0.0));

    assert_eq!(metrics.get(Unit::Megabytes, "Memory_total"), Some(2000.0));
    assert_eq!(metrics.get(Unit::Percent, "Memory_utilized"), Some(50.0));
    assert_eq!(metrics.get(Unit::Megabytes, "Memory_available"), Some(1000.0));
    assert_eq!(metrics.get(Unit::Megabytes, "Swap_total"), Some(1024.0));
    assert_eq!(metrics.get(Unit::Percent, "Swap_utilized"), Some(50.0));

    assert_eq!(metrics.get(Unit::Count, "Process_sshd"), Some(1.0));
    assert_eq!(metrics.get(Unit::Count, "Process_ntpd"), Some(0.0));
    // A zombie is still a process table entry.
    assert_eq!(metrics.get(Unit::Count, "Process_crond"), Some(1.0));

    let mount = format!("Mount_{}", data.path().display());
    let utilised = metrics.get(Unit::Percent, &mount).unwrap();
    assert!((0.0..=100.0).contains(&utilised));
    let missing = format!("Mount_{}", root.path().join("not-mounted").display());
    assert_eq!(metrics.get(Unit::Percent, &missing), None);

    let partition = format!("DiskUsage_{}", data.path().display());
    assert!(metrics.get(Unit::Percent, &partition).is_some());
    assert_eq!(metrics.get(Unit::Percent, "DiskUsage_/proc"), None);
    assert_eq!(metrics.get(Unit::Percent, "DiskUsage_/run"), None);

    assert!(metrics.get(Unit::Bytes, "Mount_root_total").unwrap() > 0.0);
}

#[tokio::test]
async fn test_missing_proc_files_skip_metrics() {
    let root = tempfile::tempdir().unwrap();
    let config = CollectorConfig::default()
        .with_cpu_windows(Duration::from_millis(1), Duration::from_millis(1))
        .with_proc_root(root.path())
        .with_mount_table(root.path().join("mtab"))
        .with_mount_points(Vec::<std::path::PathBuf>::new())
        .with_daemons(["sshd"]);

    let metrics = collect_census(&config, &LogConfig::production()).await;

    assert_eq!(metrics.get(Unit::Percent, "CPU_1s"), None);
    assert_eq!(metrics.get(Unit::Megabytes, "Memory_total"), None);
    assert_eq!(metrics.get(Unit::Count, "Process_sshd"), Some(0.0));
}

#[tokio::test]
async fn test_run_publishes_every_metric_per_target() {
    let root = tempfile::tempdir().unwrap();
    let data = tempfile::tempdir().unwrap();
    let config = fake_host(root.path(), data.path()).with_namespace("Fleet");
    let metadata = Arc::new(StaticMetadata::new(
        InstanceIdentity::new("i-0abc", "us-east-1a"),
        Some("web-asg".to_string()),
    ));
    let sink = Arc::new(RecordingSink::default());

    let summary = HostCollector::new(config, metadata.clone(), metadata, sink.clone())
        .with_log_config(LogConfig::production())
        .run()
        .await
        .unwrap();

    assert_eq!(summary.group.as_deref(), Some("web-asg"));
    assert_eq!(summary.report.attempted, summary.metrics * 2);
    assert_eq!(summary.report.sent, summary.report.attempted);

    let calls = sink.calls.lock().unwrap();
    assert!(calls.iter().all(|c| c.namespace == "Fleet"));
    let per_target = |name: &str| calls.iter().filter(|c| c.dimension.name == name).count();
    assert_eq!(per_target(DimensionTarget::INSTANCE), summary.metrics);
    assert_eq!(per_target(DimensionTarget::GROUP), summary.metrics);
    assert!(calls
        .iter()
        .any(|c| c.name == "Process_ntpd" && c.value == 0.0 && c.unit == Unit::Count));
}

#[tokio::test]
async fn test_metadata_failure_aborts_before_publishing() {
    let root = tempfile::tempdir().unwrap();
    let data = tempfile::tempdir().unwrap();
    let metadata = Arc::new(UnreachableMetadata);
    let sink = Arc::new(RecordingSink::default());

    let err = HostCollector::new(
        fake_host(root.path(), data.path()),
        metadata.clone(),
        metadata,
        sink.clone(),
    )
    .run()
    .await
    .unwrap_err();

    assert!(matches!(err, OpsError::Metadata(_)));
    assert!(sink.calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_group_query_failure_aborts_before_publishing() {
    let root = tempfile::tempdir().unwrap();
    let data = tempfile::tempdir().unwrap();
    let metadata = Arc::new(GrouplessMetadata);
    let sink = Arc::new(RecordingSink::default());

    let err = HostCollector::new(
        fake_host(root.path(), data.path()),
        metadata.clone(),
        metadata,
        sink.clone(),
    )
    .run()
    .await
    .unwrap_err();

    assert!(matches!(
        err,
        OpsError::Metadata(MetadataError::TagsUnavailable)
    ));
    assert!(sink.calls.lock().unwrap().is_empty());
}
