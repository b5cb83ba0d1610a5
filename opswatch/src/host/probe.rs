//! Local host probes backed by `/proc`, the mount table and `statvfs(2)`.
//!
//! Every reader comes in two halves: a pure `parse` over file contents, which
//! is what the tests exercise, and a thin `read_*` wrapper that fetches the
//! contents from the live system.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

/// Errors that can occur while probing the local host.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {what}: {message}")]
    Parse { what: &'static str, message: String },

    #[error("statvfs({path}) failed: {source}")]
    Statvfs {
        path: PathBuf,
        #[source]
        source: nix::errno::Errno,
    },
}

impl ProbeError {
    fn parse(what: &'static str, message: impl Into<String>) -> Self {
        Self::Parse {
            what,
            message: message.into(),
        }
    }
}

fn read_file(path: &Path) -> Result<String, ProbeError> {
    std::fs::read_to_string(path).map_err(|source| ProbeError::Read {
        path: path.to_path_buf(),
        source,
    })
}

/// Rounds to one decimal place.
pub fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Percentage of `used` over `total`, rounded to one decimal place.
///
/// A zero total yields exactly 0 rather than a division fault.
pub fn usage_percent(used: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    round1(used as f64 / total as f64 * 100.0)
}

// ---------------------------------------------------------------------------
// CPU
// ---------------------------------------------------------------------------

/// Aggregate CPU jiffies from the first line of /proc/stat.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuTimes {
    pub user: u64,
    pub nice: u64,
    pub system: u64,
    pub idle: u64,
    pub iowait: u64,
    pub irq: u64,
    pub softirq: u64,
    pub steal: u64,
}

impl CpuTimes {
    /// Read the aggregate CPU line from `<proc_root>/stat`.
    pub fn read_from(proc_root: &Path) -> Result<Self, ProbeError> {
        Self::parse(&read_file(&proc_root.join("stat"))?)
    }

    /// Parse /proc/stat content.
    ///
    /// Format: `cpu  user nice system idle iowait irq softirq steal guest guest_nice`.
    /// Guest time is already folded into user/nice by the kernel and is ignored.
    pub fn parse(content: &str) -> Result<Self, ProbeError> {
        let line = content
            .lines()
            .find(|l| l.starts_with("cpu "))
            .ok_or_else(|| ProbeError::parse("/proc/stat", "no aggregate cpu line"))?;

        let fields: Vec<u64> = line
            .split_whitespace()
            .skip(1)
            .map(|f| f.parse::<u64>())
            .collect::<Result<_, _>>()
            .map_err(|e| ProbeError::parse("/proc/stat", e.to_string()))?;

        if fields.len() < 4 {
            return Err(ProbeError::parse(
                "/proc/stat",
                format!("expected at least 4 cpu fields, found {}", fields.len()),
            ));
        }

        let field = |i: usize| fields.get(i).copied().unwrap_or(0);
        Ok(Self {
            user: field(0),
            nice: field(1),
            system: field(2),
            idle: field(3),
            iowait: field(4),
            irq: field(5),
            softirq: field(6),
            steal: field(7),
        })
    }

    pub fn total(&self) -> u64 {
        self.user
            + self.nice
            + self.system
            + self.idle
            + self.iowait
            + self.irq
            + self.softirq
            + self.steal
    }

    pub fn idle_total(&self) -> u64 {
        self.idle + self.iowait
    }

    /// Busy percentage between two snapshots, rounded to one decimal place.
    pub fn busy_percent_since(&self, earlier: &CpuTimes) -> f64 {
        let total = self.total().saturating_sub(earlier.total());
        if total == 0 {
            return 0.0;
        }
        let idle = self.idle_total().saturating_sub(earlier.idle_total());
        let busy = total.saturating_sub(idle);
        round1(busy as f64 / total as f64 * 100.0)
    }
}

/// Samples CPU utilisation over `window`, blocking the task for its duration.
pub async fn sample_cpu_percent(proc_root: &Path, window: Duration) -> Result<f64, ProbeError> {
    let before = CpuTimes::read_from(proc_root)?;
    tokio::time::sleep(window).await;
    let after = CpuTimes::read_from(proc_root)?;
    Ok(after.busy_percent_since(&before))
}

// ---------------------------------------------------------------------------
// Memory and swap
// ---------------------------------------------------------------------------

const MIB: u64 = 1024 * 1024;

/// Memory and swap figures from /proc/meminfo, in bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryInfo {
    pub total: u64,
    pub free: u64,
    pub available: u64,
    pub buffers: u64,
    pub cached: u64,
    pub swap_total: u64,
    pub swap_free: u64,
}

impl MemoryInfo {
    /// Read `<proc_root>/meminfo`.
    pub fn read_from(proc_root: &Path) -> Result<Self, ProbeError> {
        Self::parse(&read_file(&proc_root.join("meminfo"))?)
    }

    /// Parse /proc/meminfo content (`Key:   value kB` lines).
    pub fn parse(content: &str) -> Result<Self, ProbeError> {
        let mut info = Self::default();
        let mut available = None;
        let mut reclaimable = 0;
        let mut saw_total = false;

        for line in content.lines() {
            let Some((key, rest)) = line.split_once(':') else {
                continue;
            };
            let Some(kb) = rest
                .split_whitespace()
                .next()
                .and_then(|v| v.parse::<u64>().ok())
            else {
                continue;
            };
            let bytes = kb * 1024;
            match key.trim() {
                "MemTotal" => {
                    info.total = bytes;
                    saw_total = true;
                }
                "MemFree" => info.free = bytes,
                "MemAvailable" => available = Some(bytes),
                "Buffers" => info.buffers = bytes,
                "Cached" => info.cached = bytes,
                "SReclaimable" => reclaimable = bytes,
                "SwapTotal" => info.swap_total = bytes,
                "SwapFree" => info.swap_free = bytes,
                _ => {}
            }
        }

        if !saw_total {
            return Err(ProbeError::parse("/proc/meminfo", "MemTotal missing"));
        }

        info.cached += reclaimable;
        // Kernels before 3.14 do not report MemAvailable
        info.available = available.unwrap_or(info.free + info.buffers + info.cached);
        Ok(info)
    }

    pub fn used(&self) -> u64 {
        let used = self
            .total
            .saturating_sub(self.free + self.buffers + self.cached);
        if used == 0 {
            self.total.saturating_sub(self.free)
        } else {
            used
        }
    }

    pub fn percent(&self) -> f64 {
        usage_percent(self.total.saturating_sub(self.available), self.total)
    }

    pub fn total_mib(&self) -> u64 {
        self.total / MIB
    }

    pub fn used_mib(&self) -> u64 {
        self.used() / MIB
    }

    pub fn available_mib(&self) -> u64 {
        self.available / MIB
    }

    pub fn swap_used(&self) -> u64 {
        self.swap_total.saturating_sub(self.swap_free)
    }

    pub fn swap_percent(&self) -> f64 {
        usage_percent(self.swap_used(), self.swap_total)
    }

    pub fn swap_total_mib(&self) -> u64 {
        self.swap_total / MIB
    }

    pub fn swap_used_mib(&self) -> u64 {
        self.swap_used() / MIB
    }
}

// ---------------------------------------------------------------------------
// Filesystems
// ---------------------------------------------------------------------------

/// Block-level usage of the filesystem containing a path.
///
/// `free` is what an unprivileged user can still allocate (`f_bavail`) while
/// `used` counts blocks actually in use (`f_blocks - f_bfree`). Blocks reserved
/// for root are in neither, so `percent` reads a few points lower than `df`,
/// which computes `used / (used + avail)`.
///
/// `inode_percent` is `None` for filesystems that report no inode table.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DiskUsage {
    pub total: u64,
    pub used: u64,
    pub free: u64,
    pub percent: f64,
    pub inode_percent: Option<f64>,
}

impl DiskUsage {
    /// Build usage from raw `statvfs` block counts.
    pub fn from_blocks(blocks: u64, blocks_free: u64, blocks_available: u64, frsize: u64) -> Self {
        let total = blocks * frsize;
        let used = blocks.saturating_sub(blocks_free) * frsize;
        let free = blocks_available * frsize;
        Self {
            total,
            used,
            free,
            percent: usage_percent(used, total),
            inode_percent: None,
        }
    }

    /// Add inode utilisation from `statvfs` file counts.
    pub fn with_inodes(mut self, files: u64, files_free: u64) -> Self {
        self.inode_percent =
            (files > 0).then(|| usage_percent(files.saturating_sub(files_free), files));
        self
    }
}

/// Usage for the filesystem containing `path`.
#[allow(clippy::unnecessary_cast)]
pub fn disk_usage(path: &Path) -> Result<DiskUsage, ProbeError> {
    let stats = nix::sys::statvfs::statvfs(path).map_err(|source| ProbeError::Statvfs {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(DiskUsage::from_blocks(
        stats.blocks() as u64,
        stats.blocks_free() as u64,
        stats.blocks_available() as u64,
        stats.fragment_size() as u64,
    )
    .with_inodes(stats.files() as u64, stats.files_free() as u64))
}

/// Utilisation of a configured mount point, or `None` if the path does not exist.
pub fn mount_usage(path: &Path) -> Result<Option<f64>, ProbeError> {
    if !path.exists() {
        return Ok(None);
    }
    disk_usage(path).map(|usage| Some(usage.percent))
}

/// One row of the mount table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partition {
    pub device: String,
    pub mountpoint: String,
    pub fstype: String,
}

/// Filesystem types backed by a block device, from /proc/filesystems.
///
/// Virtual filesystems are the lines flagged `nodev`.
pub fn physical_fstypes(content: &str) -> HashSet<String> {
    content
        .lines()
        .filter(|line| !line.starts_with("nodev"))
        .map(str::trim)
        .filter(|fstype| !fstype.is_empty())
        .map(str::to_string)
        .collect()
}

/// Decodes the octal escapes (`\040` for space and friends) used in mount tables.
fn unescape_mount_field(field: &str) -> String {
    if !field.contains('\\') {
        return field.to_string();
    }
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' {
            let code = bytes
                .get(i + 1..i + 4)
                .and_then(|digits| std::str::from_utf8(digits).ok())
                .and_then(|digits| u8::from_str_radix(digits, 8).ok());
            if let Some(code) = code {
                out.push(code);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Parse a mount table (`/etc/mtab` or `/proc/self/mounts`).
///
/// Unless `all` is set, entries whose fstype is not in `fstypes` or whose
/// device is the `none` placeholder are skipped. With `all`, a `none` device
/// is reported as an empty string.
pub fn parse_mounts(content: &str, fstypes: &HashSet<String>, all: bool) -> Vec<Partition> {
    let mut partitions = Vec::new();

    for line in content.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 3 {
            continue;
        }

        let (device, mountpoint, fstype) = (fields[0], fields[1], fields[2]);
        if !all && (device == "none" || !fstypes.contains(fstype)) {
            continue;
        }

        partitions.push(Partition {
            device: if device == "none" {
                String::new()
            } else {
                unescape_mount_field(device)
            },
            mountpoint: unescape_mount_field(mountpoint),
            fstype: fstype.to_string(),
        });
    }

    partitions
}

/// Enumerate mounted partitions from the live system.
pub fn disk_partitions(
    proc_root: &Path,
    mount_table: &Path,
    all: bool,
) -> Result<Vec<Partition>, ProbeError> {
    let fstypes = match read_file(&proc_root.join("filesystems")) {
        Ok(content) => physical_fstypes(&content),
        Err(e) => {
            warn!(error = %e, "Filesystem type list unavailable, no partition will match");
            HashSet::new()
        }
    };

    let mounts = match read_file(mount_table) {
        Ok(content) => content,
        Err(e) => {
            let fallback = proc_root.join("self").join("mounts");
            debug!(error = %e, fallback = %fallback.display(), "Mount table unavailable, using fallback");
            read_file(&fallback)?
        }
    };

    Ok(parse_mounts(&mounts, &fstypes, all))
}

// ---------------------------------------------------------------------------
// Processes
// ---------------------------------------------------------------------------

/// Scheduler state of a process, as reported in `/proc/<pid>/stat`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProcessStatus {
    Running,
    Sleeping,
    DiskSleep,
    Stopped,
    TracingStop,
    Zombie,
    Dead,
    WakeKill,
    Waking,
    Parked,
    Idle,
}

impl ProcessStatus {
    /// Map the single-letter kernel state.
    pub fn from_code(code: char) -> Option<Self> {
        Some(match code {
            'R' => Self::Running,
            'S' => Self::Sleeping,
            'D' => Self::DiskSleep,
            'T' => Self::Stopped,
            't' => Self::TracingStop,
            'Z' => Self::Zombie,
            'X' | 'x' => Self::Dead,
            'K' => Self::WakeKill,
            'W' => Self::Waking,
            'P' => Self::Parked,
            'I' => Self::Idle,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Sleeping => "sleeping",
            Self::DiskSleep => "disk-sleep",
            Self::Stopped => "stopped",
            Self::TracingStop => "tracing-stop",
            Self::Zombie => "zombie",
            Self::Dead => "dead",
            Self::WakeKill => "wake-kill",
            Self::Waking => "waking",
            Self::Parked => "parked",
            Self::Idle => "idle",
        }
    }
}

impl fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One running process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessEntry {
    pub pid: u32,
    pub name: String,
    pub status: ProcessStatus,
}

impl ProcessEntry {
    pub fn new(pid: u32, name: impl Into<String>, status: ProcessStatus) -> Self {
        Self {
            pid,
            name: name.into(),
            status,
        }
    }

    /// Parse `/proc/<pid>/stat`: `pid (comm) state ...`.
    ///
    /// `comm` may itself contain spaces and parentheses, so the name runs up
    /// to the last closing parenthesis.
    pub fn parse_stat(pid: u32, content: &str) -> Option<Self> {
        let open = content.find('(')?;
        let close = content.rfind(')')?;
        if close <= open {
            return None;
        }
        let name = &content[open + 1..close];
        let code = content[close + 1..].trim_start().chars().next()?;
        Some(Self::new(pid, name, ProcessStatus::from_code(code)?))
    }

    /// Whether the kernel may have cut the name short.
    pub fn name_is_truncated(&self) -> bool {
        self.name.len() == COMM_LEN
    }

    /// Recover a truncated name from `/proc/<pid>/cmdline`.
    ///
    /// The basename of `argv[0]` replaces the name only when it extends it,
    /// so a process that rewrote its argv keeps the kernel's name.
    pub fn complete_name(&mut self, cmdline: &str) {
        let argv0 = cmdline.split('\0').next().unwrap_or_default();
        let base = argv0.rsplit('/').next().unwrap_or_default();
        if base.len() > self.name.len() && base.starts_with(self.name.as_str()) {
            self.name = base.to_string();
        }
    }
}

/// Longest process name the kernel keeps in `stat`, without the terminator.
const COMM_LEN: usize = 15;

/// Snapshot the process table, ordered by pid.
///
/// Processes that exit between the directory scan and the read are skipped.
pub fn read_process_table(proc_root: &Path) -> Result<Vec<ProcessEntry>, ProbeError> {
    let dir = std::fs::read_dir(proc_root).map_err(|source| ProbeError::Read {
        path: proc_root.to_path_buf(),
        source,
    })?;

    let mut pids: Vec<u32> = dir
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| entry.file_name().to_str()?.parse::<u32>().ok())
        .collect();
    pids.sort_unstable();

    Ok(pids
        .into_iter()
        .filter_map(|pid| {
            let dir = proc_root.join(pid.to_string());
            let content = std::fs::read_to_string(dir.join("stat")).ok()?;
            let mut entry = ProcessEntry::parse_stat(pid, &content)?;
            if entry.name_is_truncated() {
                if let Ok(cmdline) = std::fs::read(dir.join("cmdline")) {
                    entry.complete_name(&String::from_utf8_lossy(&cmdline));
                }
            }
            Some(entry)
        })
        .collect())
}

/// Liveness of a named daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Present(ProcessStatus),
    Missing,
}

impl ProcessState {
    pub fn is_present(&self) -> bool {
        matches!(self, Self::Present(_))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Present(status) => status.as_str(),
            Self::Missing => "missing",
        }
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Look up a process by exact name. The first match in table order wins.
pub fn process_state(table: &[ProcessEntry], name: &str) -> ProcessState {
    table
        .iter()
        .find(|p| p.name == name)
        .map(|p| ProcessState::Present(p.status))
        .unwrap_or(ProcessState::Missing)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROC_STAT: &str = "cpu  4705 356 584 3699 23 23 0 0 0 0\n\
cpu0 1393280 32966 572056 13343292 6130 0 17875 0 0 0\n\
intr 114930548 113199788 3 0 5 263 0 4 [... lots more numbers ...]\n\
ctxt 1990473\n";

    #[test]
    fn test_cpu_times_parse() {
        let times = CpuTimes::parse(PROC_STAT).unwrap();
        assert_eq!(times.user, 4705);
        assert_eq!(times.nice, 356);
        assert_eq!(times.idle, 3699);
        assert_eq!(times.iowait, 23);
        assert_eq!(times.total(), 4705 + 356 + 584 + 3699 + 23 + 23);
    }

    #[test]
    fn test_cpu_times_parse_missing_line() {
        let err = CpuTimes::parse("intr 1 2 3\n").unwrap_err();
        assert!(err.to_string().contains("no aggregate cpu line"));
    }

    #[test]
    fn test_cpu_busy_percent() {
        let before = CpuTimes {
            user: 100,
            idle: 100,
            ..Default::default()
        };
        let after = CpuTimes {
            user: 130,
            system: 10,
            idle: 150,
            iowait: 10,
            ..Default::default()
        };
        // busy 40 of 100 jiffies
        assert_eq!(after.busy_percent_since(&before), 40.0);
        assert_eq!(before.busy_percent_since(&before), 0.0);
    }

    const MEMINFO: &str = "MemTotal:        8000000 kB\n\
MemFree:         1000000 kB\n\
MemAvailable:    4000000 kB\n\
Buffers:          500000 kB\n\
Cached:          2000000 kB\n\
SReclaimable:     500000 kB\n\
SwapTotal:       2000000 kB\n\
SwapFree:        1500000 kB\n";

    #[test]
    fn test_memory_info_parse() {
        let info = MemoryInfo::parse(MEMINFO).unwrap();
        assert_eq!(info.total, 8_000_000 * 1024);
        assert_eq!(info.cached, 2_500_000 * 1024);
        assert_eq!(info.used(), 4_000_000 * 1024);
        assert_eq!(info.percent(), 50.0);
        assert_eq!(info.total_mib(), 7812);
        assert_eq!(info.swap_used(), 500_000 * 1024);
        assert_eq!(info.swap_percent(), 25.0);
    }

    #[test]
    fn test_memory_info_without_swap_or_available() {
        let info = MemoryInfo::parse(
            "MemTotal: 1000 kB\nMemFree: 250 kB\nBuffers: 0 kB\nCached: 250 kB\n",
        )
        .unwrap();
        assert_eq!(info.available, 500 * 1024);
        assert_eq!(info.available_mib(), 0);
        assert_eq!(info.percent(), 50.0);
        assert_eq!(info.swap_percent(), 0.0);
    }

    #[test]
    fn test_memory_info_requires_total() {
        assert!(MemoryInfo::parse("MemFree: 1 kB\n").is_err());
    }

    #[test]
    fn test_usage_percent_zero_total() {
        assert_eq!(usage_percent(0, 0), 0.0);
        assert_eq!(usage_percent(10, 0), 0.0);
    }

    #[test]
    fn test_disk_usage_from_blocks() {
        // 1000 blocks, 300 free, 250 available to users (50 reserved)
        let usage = DiskUsage::from_blocks(1000, 300, 250, 4096);
        assert_eq!(usage.total, 4_096_000);
        assert_eq!(usage.used, 700 * 4096);
        assert_eq!(usage.free, 250 * 4096);
        assert_eq!(usage.percent, 70.0);
        assert_eq!(usage.inode_percent, None);

        assert_eq!(usage.with_inodes(1000, 250).inode_percent, Some(75.0));
        assert_eq!(usage.with_inodes(0, 0).inode_percent, None);
    }

    #[test]
    fn test_disk_usage_root_is_readable() {
        let usage = disk_usage(Path::new("/")).unwrap();
        assert!(usage.total > 0);
        assert!(usage.percent >= 0.0 && usage.percent <= 100.0);
    }

    #[test]
    fn test_mount_usage_missing_path() {
        let missing = Path::new("/definitely/not/a/mount/point");
        assert_eq!(mount_usage(missing).unwrap(), None);
    }

    const FILESYSTEMS: &str = "nodev\tsysfs\nnodev\ttmpfs\nnodev\tproc\n\text3\n\text4\n\txfs\nnodev\tcgroup2\n";

    const MTAB: &str = "/dev/nvme0n1p1 / ext4 rw,relatime 0 0\n\
proc /proc proc rw,nosuid,nodev,noexec,relatime 0 0\n\
sysfs /sys sysfs rw,nosuid,nodev,noexec,relatime 0 0\n\
tmpfs /run tmpfs rw,nosuid,nodev 0 0\n\
/dev/nvme0n1p2 /home xfs rw,relatime 0 0\n\
none /sys/fs/cgroup cgroup2 rw 0 0\n\
/dev/sdb1 /mnt/my\\040data ext3 rw 0 0\n";

    #[test]
    fn test_physical_fstypes() {
        let types = physical_fstypes(FILESYSTEMS);
        assert_eq!(types.len(), 3);
        assert!(types.contains("ext4"));
        assert!(!types.contains("tmpfs"));
    }

    #[test]
    fn test_parse_mounts_physical_only() {
        let types = physical_fstypes(FILESYSTEMS);
        let parts = parse_mounts(MTAB, &types, false);
        assert_eq!(
            parts,
            vec![
                Partition {
                    device: "/dev/nvme0n1p1".into(),
                    mountpoint: "/".into(),
                    fstype: "ext4".into(),
                },
                Partition {
                    device: "/dev/nvme0n1p2".into(),
                    mountpoint: "/home".into(),
                    fstype: "xfs".into(),
                },
                Partition {
                    device: "/dev/sdb1".into(),
                    mountpoint: "/mnt/my data".into(),
                    fstype: "ext3".into(),
                },
            ]
        );
    }

    #[test]
    fn test_parse_mounts_all_blanks_none_device() {
        let types = physical_fstypes(FILESYSTEMS);
        let parts = parse_mounts(MTAB, &types, true);
        assert_eq!(parts.len(), 7);
        let cgroup = parts
            .iter()
            .find(|p| p.mountpoint == "/sys/fs/cgroup")
            .unwrap();
        assert_eq!(cgroup.device, "");
    }

    #[test]
    fn test_parse_mounts_skips_short_lines() {
        let types = physical_fstypes(FILESYSTEMS);
        assert!(parse_mounts("garbage\n/dev/sda1 /\n", &types, true).is_empty());
    }

    #[test]
    fn test_disk_partitions_with_fake_proc() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("filesystems"), FILESYSTEMS).unwrap();
        let mtab = dir.path().join("mtab");
        std::fs::write(&mtab, MTAB).unwrap();

        let parts = disk_partitions(dir.path(), &mtab, false).unwrap();
        assert_eq!(parts.len(), 3);
    }

    #[test]
    fn test_disk_partitions_falls_back_to_self_mounts() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("filesystems"), FILESYSTEMS).unwrap();
        std::fs::create_dir(dir.path().join("self")).unwrap();
        std::fs::write(dir.path().join("self").join("mounts"), MTAB).unwrap();

        let parts = disk_partitions(dir.path(), &dir.path().join("no-mtab"), false).unwrap();
        assert_eq!(parts.len(), 3);
    }

    #[test]
    fn test_process_entry_parse_stat() {
        let entry = ProcessEntry::parse_stat(812, "812 (sshd) S 1 812 812 0 -1 4194560").unwrap();
        assert_eq!(entry.name, "sshd");
        assert_eq!(entry.status, ProcessStatus::Sleeping);

        let odd = ProcessEntry::parse_stat(9, "9 (kworker/0:1 (x)) I 2 0 0").unwrap();
        assert_eq!(odd.name, "kworker/0:1 (x)");
        assert_eq!(odd.status, ProcessStatus::Idle);

        assert!(ProcessEntry::parse_stat(1, "1 init S").is_none());
    }

    #[test]
    fn test_process_state_lookup() {
        let table = vec![
            ProcessEntry::new(1, "systemd", ProcessStatus::Sleeping),
            ProcessEntry::new(812, "sshd", ProcessStatus::Sleeping),
            ProcessEntry::new(900, "sshd", ProcessStatus::Running),
        ];
        assert_eq!(process_state(&table, "sshd").as_str(), "sleeping");
        assert_eq!(process_state(&table, "crond").as_str(), "missing");
        assert!(!process_state(&table, "crond").is_present());
        // exact match only
        assert_eq!(process_state(&table, "ssh"), ProcessState::Missing);
    }

    #[test]
    fn test_read_process_table_from_fake_proc() {
        let dir = tempfile::tempdir().unwrap();
        for (pid, stat) in [
            ("42", "42 (crond) S 1 42"),
            ("7", "7 (sshd) R 1 7"),
            ("self", "ignored"),
        ] {
            std::fs::create_dir(dir.path().join(pid)).unwrap();
            std::fs::write(dir.path().join(pid).join("stat"), stat).unwrap();
        }
        std::fs::create_dir(dir.path().join("99")).unwrap(); // exited, no stat

        let table = read_process_table(dir.path()).unwrap();
        assert_eq!(
            table,
            vec![
                ProcessEntry::new(7, "sshd", ProcessStatus::Running),
                ProcessEntry::new(42, "crond", ProcessStatus::Sleeping),
            ]
        );
    }

    #[test]
    fn test_truncated_name_completed_from_cmdline() {
        let dir = tempfile::tempdir().unwrap();
        let write = |pid: &str, stat: &str, cmdline: &[u8]| {
            let proc_dir = dir.path().join(pid);
            std::fs::create_dir(&proc_dir).unwrap();
            std::fs::write(proc_dir.join("stat"), stat).unwrap();
            std::fs::write(proc_dir.join("cmdline"), cmdline).unwrap();
        };
        write(
            "1234",
            "1234 (amazon-ssm-agen) S 1 1234",
            b"/usr/bin/amazon-ssm-agent\0--debug\0",
        );
        // argv rewritten to something unrelated: keep the kernel's name
        write("1300", "1300 (postgres-walwri) S 1 1300", b"postgres: walwriter\0");
        // short names never consult cmdline
        write("1400", "1400 (sshd) S 1 1400", b"/usr/sbin/sshd-wrapper\0");

        let table = read_process_table(dir.path()).unwrap();
        let names: Vec<&str> = table.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["amazon-ssm-agent", "postgres-walwri", "sshd"]);
        assert!(process_state(&table, "amazon-ssm-agent").is_present());
    }

    #[test]
    fn test_process_status_serde() {
        let json = serde_json::to_string(&ProcessStatus::DiskSleep).unwrap();
        assert_eq!(json, "\"disk-sleep\"");
    }
}
