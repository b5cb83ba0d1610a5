//! Job configuration.
//!
//! Each job has a config struct with defaults matching the original cron
//! deployment, `with_*` builders, and a `from_env` constructor that applies
//! `OPSWATCH_*` overrides. Binaries layer their CLI flags on top.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{OpsError, Result};

/// Metric namespace for the host collector.
pub const DEFAULT_NAMESPACE: &str = "EC2";

/// Mount points whose utilisation is always reported.
pub const DEFAULT_MOUNT_POINTS: &[&str] = &[
    "/boot",
    "/home",
    "/opt",
    "/usr/gems",
    "/usr/openv",
    "/var",
    "/dev",
    "/net",
];

/// Daemons whose liveness is always reported.
pub const DEFAULT_DAEMONS: &[&str] = &["ntpd", "sshd", "crond", "syslogd", "xinetd"];

/// Buckets checked by the freshness job.
pub const DEFAULT_BUCKETS: &[&str] = &["dev-ds-syslogs", "dev-spark-syslogs"];

/// Keys requested per bucket; one is enough to prove freshness.
pub const DEFAULT_MAX_KEYS: usize = 5;

/// Where the CloudWatch agent listens for EMF documents.
pub const DEFAULT_EMF_ENDPOINT: &str = "tcp://127.0.0.1:25888";

/// Link-local address of the instance metadata service.
pub const DEFAULT_METADATA_ENDPOINT: &str = "http://169.254.169.254";

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(OpsError::configuration(format!(
            "{name} must be a boolean, got '{other}'"
        ))),
    }
}

fn parse_secs(name: &str, value: &str) -> Result<Duration> {
    value
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map(Duration::from_secs_f64)
        .ok_or_else(|| {
            OpsError::configuration(format!("{name} must be a number of seconds, got '{value}'"))
        })
}

fn env_lookup(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

/// Configuration for the host metrics collector.
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    namespace: String,
    cpu_short_window: Duration,
    cpu_long_window: Duration,
    mount_points: Vec<PathBuf>,
    daemons: Vec<String>,
    all_partitions: bool,
    proc_root: PathBuf,
    mount_table: PathBuf,
    emf_endpoint: String,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            cpu_short_window: Duration::from_secs(1),
            cpu_long_window: Duration::from_secs(5),
            mount_points: DEFAULT_MOUNT_POINTS.iter().map(PathBuf::from).collect(),
            daemons: DEFAULT_DAEMONS.iter().map(|d| d.to_string()).collect(),
            all_partitions: false,
            proc_root: PathBuf::from("/proc"),
            mount_table: PathBuf::from("/etc/mtab"),
            emf_endpoint: DEFAULT_EMF_ENDPOINT.to_string(),
        }
    }
}

impl CollectorConfig {
    /// Defaults with `OPSWATCH_*` environment overrides applied.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(env_lookup)
    }

    /// Defaults with overrides from an arbitrary lookup function.
    ///
    /// Recognised keys: `OPSWATCH_NAMESPACE`, `OPSWATCH_CPU_SHORT_SECS`,
    /// `OPSWATCH_CPU_LONG_SECS`, `OPSWATCH_MOUNT_POINTS`, `OPSWATCH_DAEMONS`,
    /// `OPSWATCH_ALL_PARTITIONS`, `OPSWATCH_PROC_ROOT`, `OPSWATCH_MOUNT_TABLE`,
    /// `OPSWATCH_EMF_ENDPOINT` (falling back to the agent's own
    /// `AWS_EMF_AGENT_ENDPOINT`).
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(v) = lookup("OPSWATCH_NAMESPACE") {
            config.namespace = v;
        }
        if let Some(v) = lookup("OPSWATCH_CPU_SHORT_SECS") {
            config.cpu_short_window = parse_secs("OPSWATCH_CPU_SHORT_SECS", &v)?;
        }
        if let Some(v) = lookup("OPSWATCH_CPU_LONG_SECS") {
            config.cpu_long_window = parse_secs("OPSWATCH_CPU_LONG_SECS", &v)?;
        }
        if let Some(v) = lookup("OPSWATCH_MOUNT_POINTS") {
            config.mount_points = split_list(&v).into_iter().map(PathBuf::from).collect();
        }
        if let Some(v) = lookup("OPSWATCH_DAEMONS") {
            config.daemons = split_list(&v);
        }
        if let Some(v) = lookup("OPSWATCH_ALL_PARTITIONS") {
            config.all_partitions = parse_bool("OPSWATCH_ALL_PARTITIONS", &v)?;
        }
        if let Some(v) = lookup("OPSWATCH_PROC_ROOT") {
            config.proc_root = PathBuf::from(v);
        }
        if let Some(v) = lookup("OPSWATCH_MOUNT_TABLE") {
            config.mount_table = PathBuf::from(v);
        }
        if let Some(v) = lookup("OPSWATCH_EMF_ENDPOINT").or_else(|| lookup("AWS_EMF_AGENT_ENDPOINT")) {
            config.emf_endpoint = v.trim().to_string();
        }
        config.validate()?;
        Ok(config)
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Set both CPU sampling windows. The short one is always sampled first.
    pub fn with_cpu_windows(mut self, short: Duration, long: Duration) -> Self {
        self.cpu_short_window = short;
        self.cpu_long_window = long;
        self
    }

    pub fn with_mount_points<I, P>(mut self, mount_points: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.mount_points = mount_points.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_daemons<I, S>(mut self, daemons: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.daemons = daemons.into_iter().map(Into::into).collect();
        self
    }

    /// Include virtual filesystems in the partition scan.
    pub fn with_all_partitions(mut self, all: bool) -> Self {
        self.all_partitions = all;
        self
    }

    pub fn with_proc_root(mut self, root: impl AsRef<Path>) -> Self {
        self.proc_root = root.as_ref().to_path_buf();
        self
    }

    pub fn with_mount_table(mut self, path: impl AsRef<Path>) -> Self {
        self.mount_table = path.as_ref().to_path_buf();
        self
    }

    /// Agent listener for EMF documents, as `tcp://host:port`.
    pub fn with_emf_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.emf_endpoint = endpoint.into();
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.namespace.trim().is_empty() {
            return Err(OpsError::configuration("metric namespace cannot be empty"));
        }
        if self.cpu_short_window.is_zero() || self.cpu_long_window.is_zero() {
            return Err(OpsError::configuration(
                "CPU sampling windows must be longer than zero",
            ));
        }
        if !self.emf_endpoint.starts_with("tcp://") {
            return Err(OpsError::configuration(format!(
                "EMF endpoint must be tcp://host:port, got '{}'",
                self.emf_endpoint
            )));
        }
        Ok(())
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn cpu_short_window(&self) -> Duration {
        self.cpu_short_window
    }

    pub fn cpu_long_window(&self) -> Duration {
        self.cpu_long_window
    }

    pub fn mount_points(&self) -> &[PathBuf] {
        &self.mount_points
    }

    pub fn daemons(&self) -> &[String] {
        &self.daemons
    }

    pub fn all_partitions(&self) -> bool {
        self.all_partitions
    }

    pub fn proc_root(&self) -> &Path {
        &self.proc_root
    }

    pub fn mount_table(&self) -> &Path {
        &self.mount_table
    }

    pub fn emf_endpoint(&self) -> &str {
        &self.emf_endpoint
    }
}

/// Configuration for the instance metadata client.
#[derive(Debug, Clone)]
pub struct MetadataConfig {
    endpoint: String,
    timeout: Duration,
    token_ttl: Duration,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_METADATA_ENDPOINT.to_string(),
            timeout: Duration::from_secs(2),
            token_ttl: Duration::from_secs(21_600),
        }
    }
}

impl MetadataConfig {
    /// Defaults with `OPSWATCH_METADATA_ENDPOINT` / `OPSWATCH_METADATA_TIMEOUT_SECS` applied.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(env_lookup)
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(v) = lookup("OPSWATCH_METADATA_ENDPOINT") {
            config.endpoint = v;
        }
        if let Some(v) = lookup("OPSWATCH_METADATA_TIMEOUT_SECS") {
            config.timeout = parse_secs("OPSWATCH_METADATA_TIMEOUT_SECS", &v)?;
        }
        Ok(config)
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Endpoint without a trailing slash.
    pub fn endpoint(&self) -> &str {
        self.endpoint.trim_end_matches('/')
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn token_ttl(&self) -> Duration {
        self.token_ttl
    }
}

/// Configuration for the bucket freshness check.
#[derive(Debug, Clone)]
pub struct FreshnessConfig {
    buckets: Vec<String>,
    max_keys: usize,
    region: Option<String>,
    endpoint: Option<String>,
}

impl Default for FreshnessConfig {
    fn default() -> Self {
        Self {
            buckets: DEFAULT_BUCKETS.iter().map(|b| b.to_string()).collect(),
            max_keys: DEFAULT_MAX_KEYS,
            region: None,
            endpoint: None,
        }
    }
}

impl FreshnessConfig {
    /// Defaults with `OPSWATCH_BUCKETS`, `OPSWATCH_MAX_KEYS`,
    /// `OPSWATCH_S3_REGION` and `OPSWATCH_S3_ENDPOINT` applied.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(env_lookup)
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(v) = lookup("OPSWATCH_BUCKETS") {
            config.buckets = split_list(&v);
        }
        if let Some(v) = lookup("OPSWATCH_MAX_KEYS") {
            config.max_keys = v.trim().parse().map_err(|_| {
                OpsError::configuration(format!("OPSWATCH_MAX_KEYS must be an integer, got '{v}'"))
            })?;
        }
        config.region = lookup("OPSWATCH_S3_REGION");
        config.endpoint = lookup("OPSWATCH_S3_ENDPOINT");
        config.validate()?;
        Ok(config)
    }

    pub fn with_buckets<I, S>(mut self, buckets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.buckets = buckets.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_max_keys(mut self, max_keys: usize) -> Self {
        self.max_keys = max_keys;
        self
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    /// Custom endpoint for S3-compatible services.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.buckets.is_empty() {
            return Err(OpsError::configuration("at least one bucket is required"));
        }
        if self.max_keys == 0 {
            return Err(OpsError::configuration("max keys must be at least 1"));
        }
        Ok(())
    }

    pub fn buckets(&self) -> &[String] {
        &self.buckets
    }

    pub fn max_keys(&self) -> usize {
        self.max_keys
    }

    pub fn region(&self) -> Option<&str> {
        self.region.as_deref()
    }

    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }
}
