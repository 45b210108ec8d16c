//! `/proc`-derived OS counter snapshots.
//!
//! Every read is best-effort: a file that cannot be read or parsed yields
//! `None` for that piece and the tick carries on without it. Cumulative
//! values (CPU jiffies, disk/net byte totals, context switches) are returned
//! as-is; the synchronizer owns delta computation across ticks.

use std::path::Path;

use crate::time::unix_now;

/// Aggregate CPU time counters from the first `cpu` line of `/proc/stat`,
/// in jiffies, cumulative since boot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
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
}

/// Parsed `/proc/stat` snapshot.
#[derive(Debug, Clone, Default)]
pub struct ProcStat {
    pub cpu: Option<CpuTimes>,
    pub context_switches: Option<u64>,
    pub processes_created: Option<u64>,
    pub procs_running: Option<u64>,
    pub procs_blocked: Option<u64>,
}

/// Per-mode CPU shares of a window between two `/proc/stat` snapshots,
/// in percent of elapsed jiffies.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CpuShares {
    pub user: f64,
    pub nice: f64,
    pub system: f64,
    pub idle: f64,
    pub iowait: f64,
    pub irq: f64,
    pub softirq: f64,
    pub steal: f64,
    /// `100 - idle share`.
    pub utilization: f64,
}

/// CPU time spent in a window between two snapshots, in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CpuSeconds {
    pub user: f64,
    pub system: f64,
    /// user + system + nice.
    pub total_active: f64,
}

/// Memory state from `/proc/meminfo`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MemInfo {
    pub total_bytes: u64,
    pub available_bytes: u64,
}

impl MemInfo {
    pub fn usage_percent(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        let used = self.total_bytes.saturating_sub(self.available_bytes);
        used as f64 / self.total_bytes as f64 * 100.0
    }

    pub fn available_gb(&self) -> f64 {
        self.available_bytes as f64 / (1024.0 * 1024.0 * 1024.0)
    }
}

/// Cumulative bytes read/written across physical disk devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiskTotals {
    pub read_bytes: u64,
    pub write_bytes: u64,
}

/// Cumulative bytes sent/received across non-loopback interfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetTotals {
    pub bytes_sent: u64,
    pub bytes_recv: u64,
}

/// 1/5/15-minute load averages.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoadAvg {
    pub one: f64,
    pub five: f64,
    pub fifteen: f64,
}

/// Everything the OS side of one bracketing read observes, stamped with the
/// wall-clock time of the capture.
#[derive(Debug, Clone, Default)]
pub struct OsSnapshot {
    pub taken_at: f64,
    pub stat: ProcStat,
    pub mem: Option<MemInfo>,
    pub disk: Option<DiskTotals>,
    pub net: Option<NetTotals>,
    pub load: Option<LoadAvg>,
    pub process_count: Option<u64>,
}

/// Capture one OS snapshot. Individual sources degrade to `None`
/// independently; the snapshot itself always exists.
pub fn capture_os_snapshot() -> OsSnapshot {
    OsSnapshot {
        taken_at: unix_now(),
        stat: read_proc_stat().unwrap_or_default(),
        mem: read_meminfo(),
        disk: read_disk_totals(),
        net: read_net_totals(),
        load: read_loadavg(),
        process_count: count_processes(),
    }
}

/// Jiffies per second, probed once per call via `sysconf`.
pub fn clk_tck() -> f64 {
    // SAFETY: `sysconf` is thread-safe for this query and has no side effects.
    let hz = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
    if hz > 0 { hz as f64 } else { 100.0 }
}

/// Parse `/proc/stat`.
pub fn read_proc_stat() -> Option<ProcStat> {
    let raw = std::fs::read_to_string("/proc/stat").ok()?;
    Some(parse_proc_stat(&raw))
}

fn parse_proc_stat(raw: &str) -> ProcStat {
    let mut stat = ProcStat::default();
    for line in raw.lines() {
        if let Some(rest) = line.strip_prefix("cpu ") {
            let parts: Vec<u64> = rest
                .split_whitespace()
                .filter_map(|s| s.parse::<u64>().ok())
                .collect();
            if parts.len() >= 4 {
                stat.cpu = Some(CpuTimes {
                    user: parts.first().copied().unwrap_or(0),
                    nice: parts.get(1).copied().unwrap_or(0),
                    system: parts.get(2).copied().unwrap_or(0),
                    idle: parts.get(3).copied().unwrap_or(0),
                    iowait: parts.get(4).copied().unwrap_or(0),
                    irq: parts.get(5).copied().unwrap_or(0),
                    softirq: parts.get(6).copied().unwrap_or(0),
                    steal: parts.get(7).copied().unwrap_or(0),
                });
            }
        } else if let Some(rest) = line.strip_prefix("ctxt ") {
            stat.context_switches = rest.trim().parse().ok();
        } else if let Some(rest) = line.strip_prefix("processes ") {
            stat.processes_created = rest.trim().parse().ok();
        } else if let Some(rest) = line.strip_prefix("procs_running ") {
            stat.procs_running = rest.trim().parse().ok();
        } else if let Some(rest) = line.strip_prefix("procs_blocked ") {
            stat.procs_blocked = rest.trim().parse().ok();
        }
    }
    stat
}

/// Per-mode shares of the jiffies elapsed between two snapshots.
/// `None` when the window is empty or went backwards (counter reset).
pub fn cpu_shares(prev: &CpuTimes, cur: &CpuTimes) -> Option<CpuShares> {
    let total_prev = prev.total();
    let total_cur = cur.total();
    if total_cur <= total_prev {
        return None;
    }
    let span = (total_cur - total_prev) as f64;
    let share = |p: u64, c: u64| c.saturating_sub(p) as f64 / span * 100.0;
    let idle = share(prev.idle, cur.idle);
    Some(CpuShares {
        user: share(prev.user, cur.user),
        nice: share(prev.nice, cur.nice),
        system: share(prev.system, cur.system),
        idle,
        iowait: share(prev.iowait, cur.iowait),
        irq: share(prev.irq, cur.irq),
        softirq: share(prev.softirq, cur.softirq),
        steal: share(prev.steal, cur.steal),
        utilization: 100.0 - idle,
    })
}

/// CPU seconds spent between two snapshots, converted at `ticks_per_sec`.
pub fn cpu_seconds(prev: &CpuTimes, cur: &CpuTimes, ticks_per_sec: f64) -> Option<CpuSeconds> {
    if cur.total() < prev.total() || ticks_per_sec <= 0.0 {
        return None;
    }
    let secs = |p: u64, c: u64| c.saturating_sub(p) as f64 / ticks_per_sec;
    let user = secs(prev.user, cur.user);
    let system = secs(prev.system, cur.system);
    let nice = secs(prev.nice, cur.nice);
    Some(CpuSeconds {
        user,
        system,
        total_active: user + system + nice,
    })
}

/// Parse `/proc/meminfo` for totals.
pub fn read_meminfo() -> Option<MemInfo> {
    let raw = std::fs::read_to_string("/proc/meminfo").ok()?;
    parse_meminfo(&raw)
}

fn parse_meminfo(raw: &str) -> Option<MemInfo> {
    let mut total = None;
    let mut available = None;
    for line in raw.lines() {
        let Some((key, rest)) = line.split_once(':') else {
            continue;
        };
        let value_kb = rest
            .split_whitespace()
            .next()
            .and_then(|v| v.parse::<u64>().ok());
        match key {
            "MemTotal" => total = value_kb,
            "MemAvailable" => available = value_kb,
            _ => {}
        }
        if total.is_some() && available.is_some() {
            break;
        }
    }
    Some(MemInfo {
        total_bytes: total? * 1024,
        available_bytes: available? * 1024,
    })
}

/// Sum sectors read/written across physical devices in `/proc/diskstats`.
pub fn read_disk_totals() -> Option<DiskTotals> {
    let raw = std::fs::read_to_string("/proc/diskstats").ok()?;
    parse_disk_totals(&raw)
}

fn parse_disk_totals(raw: &str) -> Option<DiskTotals> {
    let mut read_sectors = 0u64;
    let mut write_sectors = 0u64;
    let mut seen = false;
    for line in raw.lines() {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 14 {
            continue;
        }
        let name = parts[2];
        if !is_likely_disk_device(name) {
            continue;
        }
        let (Some(rd), Some(wr)) = (
            parts.get(5).and_then(|v| v.parse::<u64>().ok()),
            parts.get(9).and_then(|v| v.parse::<u64>().ok()),
        ) else {
            continue;
        };
        seen = true;
        read_sectors += rd;
        write_sectors += wr;
    }
    // Sector counts in /proc/diskstats are always 512-byte units.
    seen.then(|| DiskTotals {
        read_bytes: read_sectors * 512,
        write_bytes: write_sectors * 512,
    })
}

fn is_likely_disk_device(name: &str) -> bool {
    if name.starts_with("loop")
        || name.starts_with("ram")
        || name.starts_with("dm-")
        || name.starts_with("md")
        || name.starts_with("zram")
        || name.starts_with("sr")
        || name.starts_with("fd")
        || name.starts_with("nbd")
    {
        return false;
    }
    if name.starts_with("nvme") {
        return !name.contains('p');
    }
    if name.starts_with("mmcblk") {
        return !name.contains('p');
    }
    if name.starts_with("sd")
        || name.starts_with("hd")
        || name.starts_with("vd")
        || name.starts_with("xvd")
    {
        return !name.chars().last().is_some_and(|c| c.is_ascii_digit());
    }
    !name.chars().last().is_some_and(|c| c.is_ascii_digit())
}

/// Sum rx/tx bytes across non-loopback interfaces in `/proc/net/dev`.
pub fn read_net_totals() -> Option<NetTotals> {
    let raw = std::fs::read_to_string("/proc/net/dev").ok()?;
    parse_net_totals(&raw)
}

fn parse_net_totals(raw: &str) -> Option<NetTotals> {
    let mut rx = 0u64;
    let mut tx = 0u64;
    let mut seen = false;
    for line in raw.lines().skip(2) {
        let Some((iface_raw, stats_raw)) = line.split_once(':') else {
            continue;
        };
        if iface_raw.trim() == "lo" {
            continue;
        }
        let fields: Vec<u64> = stats_raw
            .split_whitespace()
            .filter_map(|s| s.parse::<u64>().ok())
            .collect();
        if fields.len() < 16 {
            continue;
        }
        seen = true;
        rx += fields[0];
        tx += fields[8];
    }
    seen.then_some(NetTotals {
        bytes_sent: tx,
        bytes_recv: rx,
    })
}

/// Load averages via `getloadavg`.
pub fn read_loadavg() -> Option<LoadAvg> {
    let mut values = [0.0_f64; 3];
    // SAFETY: `getloadavg` writes up to `n` doubles to a valid buffer.
    let n = unsafe { libc::getloadavg(values.as_mut_ptr(), 3) };
    if n < 3 {
        return None;
    }
    Some(LoadAvg {
        one: values[0],
        five: values[1],
        fifteen: values[2],
    })
}

/// Count running processes as numeric directory entries under `/proc`.
pub fn count_processes() -> Option<u64> {
    let entries = std::fs::read_dir(Path::new("/proc")).ok()?;
    let count = entries
        .flatten()
        .filter(|e| {
            e.file_name()
                .to_str()
                .is_some_and(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
        })
        .count();
    Some(count as u64)
}
