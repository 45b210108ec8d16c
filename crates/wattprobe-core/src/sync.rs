//! Sample synchronization: one internally-consistent feature record per tick.
//!
//! The synchronizer brackets each nominal tick boundary with a read just
//! before and just after it. The record timestamp is the mean of the two
//! read times, which bounds its uncertainty to half the bracketing span
//! instead of the full latency of the slowest source. Cumulative counters
//! take the post-read value and are differenced against the previous tick's
//! post-read baseline; instantaneous gauges take the pre/post mean.
//!
//! Baselines are explicit state owned by the collection loop and passed in
//! per tick, so independent runs never share mutable state.

use std::time::Duration;

use log::debug;

use crate::readers::endpoint::MetricsEndpoint;
use crate::readers::perf::{HwCounterSnapshot, HwEvent, PerfCounters};
use crate::readers::procfs::{self, OsSnapshot, capture_os_snapshot};
use crate::record::FeatureRecord;
use crate::time::{format_iso8601, unix_now};

/// How a tick's reads are scheduled around the nominal boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// Read just before and just after the boundary; average timestamps.
    Bracketed,
    /// One read per source at the boundary; lower overhead, looser timing.
    SingleShot,
}

impl std::fmt::Display for SyncMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bracketed => write!(f, "bracketed"),
            Self::SingleShot => write!(f, "single-shot"),
        }
    }
}

/// Previous-tick state needed for delta computation.
///
/// One value per cumulative source; `None` means "no usable baseline yet"
/// (first tick, source unavailable so far, or a reset observed last tick).
#[derive(Debug, Clone, Default)]
pub struct TickBaselines {
    pub hw: HwCounterSnapshot,
    pub cpu: Option<procfs::CpuTimes>,
    pub context_switches: Option<u64>,
    pub processes_created: Option<u64>,
    pub disk: Option<procfs::DiskTotals>,
    pub net: Option<procfs::NetTotals>,
    pub endpoint_total: Option<f64>,
    pub prev_timestamp: Option<f64>,
}

impl TickBaselines {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Seam the collection loop drives; scripted implementations stand in for
/// the real synchronizer in loop tests.
pub trait Sampler {
    fn sample(&mut self, boundary: f64, baselines: &mut TickBaselines, label: &str)
    -> FeatureRecord;
}

/// Delta of a cumulative integer counter against its running baseline.
///
/// The baseline always moves to the current observation when one exists.
/// A decrease means the underlying source restarted: the tick's delta is
/// absent and the next tick differences against the new baseline, so a
/// negative delta can never appear.
pub(crate) fn delta_u64(baseline: &mut Option<u64>, current: Option<u64>) -> Option<u64> {
    let Some(cur) = current else {
        // Source unavailable this tick; the old baseline stays valid.
        return None;
    };
    let delta = match *baseline {
        Some(prev) if cur >= prev => Some(cur - prev),
        Some(_) => None,
        None => None,
    };
    *baseline = Some(cur);
    delta
}

/// Float twin of [`delta_u64`] for the endpoint's cumulative CPU seconds.
pub(crate) fn delta_f64(baseline: &mut Option<f64>, current: Option<f64>) -> Option<f64> {
    let Some(cur) = current else {
        return None;
    };
    let delta = match *baseline {
        Some(prev) if cur >= prev => Some(cur - prev),
        Some(_) => None,
        None => None,
    };
    *baseline = Some(cur);
    delta
}

/// `numerator / denominator`, defined as `0.0` when the denominator is zero.
pub fn guarded_ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 || !denominator.is_finite() {
        0.0
    } else {
        numerator / denominator
    }
}

/// Mean of the bracket's two gauge observations; one-sided when a read
/// failed on one side only.
fn mean_opt(pre: Option<f64>, post: Option<f64>) -> Option<f64> {
    match (pre, post) {
        (Some(a), Some(b)) => Some((a + b) / 2.0),
        (Some(a), None) => Some(a),
        (None, Some(b)) => Some(b),
        (None, None) => None,
    }
}

/// Per-event deltas of the hardware counter set, updating each event's
/// baseline independently.
fn hw_deltas(baseline: &mut HwCounterSnapshot, current: &HwCounterSnapshot) -> HwCounterSnapshot {
    let mut deltas = HwCounterSnapshot::default();
    for event in HwEvent::ALL {
        let mut per_event = baseline.get(event);
        let delta = delta_u64(&mut per_event, current.get(event));
        if delta.is_none() && current.get(event).is_some() && baseline.get(event).is_some() {
            debug!("counter {} re-baselined after decrease", event.name());
        }
        deltas.set(event, delta);
        if let Some(cur) = current.get(event) {
            baseline.set(event, Some(cur));
        }
    }
    deltas
}

/// Produces one [`FeatureRecord`] per requested tick boundary.
pub struct SampleSynchronizer {
    mode: SyncMode,
    interval_secs: f64,
    perf: PerfCounters,
    endpoint: Option<MetricsEndpoint>,
    hostname: String,
    ticks_per_sec: f64,
}

impl SampleSynchronizer {
    pub fn new(
        mode: SyncMode,
        interval: Duration,
        perf: PerfCounters,
        endpoint: Option<MetricsEndpoint>,
        hostname: String,
    ) -> Self {
        Self {
            mode,
            interval_secs: interval.as_secs_f64(),
            perf,
            endpoint,
            hostname,
            ticks_per_sec: procfs::clk_tck(),
        }
    }

    pub fn mode(&self) -> SyncMode {
        self.mode
    }

    pub fn hardware_available(&self) -> bool {
        self.perf.is_available()
    }

    /// Wait for the nominal boundary to pass, at most `interval` from now.
    fn wait_for_boundary(&self, boundary: f64) {
        let now = unix_now();
        if boundary > now {
            let wait = (boundary - now).min(self.interval_secs.max(0.0));
            std::thread::sleep(Duration::from_secs_f64(wait));
        }
    }

    fn assemble(
        &self,
        pre: Option<&OsSnapshot>,
        post: &OsSnapshot,
        hw: Option<HwCounterSnapshot>,
        endpoint_total: Option<f64>,
        baselines: &mut TickBaselines,
        label: &str,
    ) -> FeatureRecord {
        let timestamp = match pre {
            Some(p) => (p.taken_at + post.taken_at) / 2.0,
            None => post.taken_at,
        };
        let mut rec = FeatureRecord::empty(timestamp, format_iso8601(timestamp));
        rec.workload_label = label.to_string();
        rec.collection_interval = self.interval_secs;
        rec.hostname = self.hostname.clone();
        rec.time_delta_seconds = baselines
            .prev_timestamp
            .map(|prev| (timestamp - prev).max(0.0))
            .unwrap_or(0.0);
        baselines.prev_timestamp = Some(timestamp);

        // Hardware counter deltas against the previous tick's post-read.
        let deltas = match hw {
            Some(cur) => hw_deltas(&mut baselines.hw, &cur),
            None => HwCounterSnapshot::default(),
        };
        rec.cpu_cycles = deltas.cpu_cycles;
        rec.instructions = deltas.instructions;
        rec.cache_references = deltas.cache_references;
        rec.cache_misses = deltas.cache_misses;
        rec.branches = deltas.branches;
        rec.branch_misses = deltas.branch_misses;
        rec.page_faults = deltas.page_faults;
        rec.context_switches = deltas.context_switches;

        // CPU window between the previous tick's snapshot and this one.
        if let Some(cur_cpu) = post.stat.cpu {
            if let Some(prev_cpu) = baselines.cpu {
                if let Some(shares) = procfs::cpu_shares(&prev_cpu, &cur_cpu) {
                    rec.cpu_utilization = Some(shares.utilization);
                    rec.cpu_user_time = Some(shares.user);
                    rec.cpu_system_time = Some(shares.system);
                    rec.cpu_nice_time = Some(shares.nice);
                    rec.cpu_iowait = Some(shares.iowait);
                    rec.cpu_irq = Some(shares.irq);
                    rec.cpu_softirq = Some(shares.softirq);
                    rec.cpu_steal = Some(shares.steal);
                    rec.cpu_idle = Some(shares.idle);
                }
                if let Some(secs) = procfs::cpu_seconds(&prev_cpu, &cur_cpu, self.ticks_per_sec) {
                    rec.sys_cpu_user_seconds = Some(secs.user);
                    rec.sys_cpu_system_seconds = Some(secs.system);
                    rec.sys_cpu_total_seconds = Some(secs.total_active);
                }
            }
            baselines.cpu = Some(cur_cpu);
        }

        rec.sys_context_switches =
            delta_u64(&mut baselines.context_switches, post.stat.context_switches);
        rec.sys_processes_created =
            delta_u64(&mut baselines.processes_created, post.stat.processes_created);

        // Disk and network byte deltas for the inter-tick window.
        if let Some(cur) = post.disk {
            let mut read_base = baselines.disk.map(|d| d.read_bytes);
            let mut write_base = baselines.disk.map(|d| d.write_bytes);
            let read = delta_u64(&mut read_base, Some(cur.read_bytes));
            let write = delta_u64(&mut write_base, Some(cur.write_bytes));
            rec.disk_io_read_mb = read.map(|b| b as f64 / (1024.0 * 1024.0));
            rec.disk_io_write_mb = write.map(|b| b as f64 / (1024.0 * 1024.0));
            baselines.disk = Some(cur);
        }
        if let Some(cur) = post.net {
            let mut sent_base = baselines.net.map(|n| n.bytes_sent);
            let mut recv_base = baselines.net.map(|n| n.bytes_recv);
            rec.network_bytes_sent = delta_u64(&mut sent_base, Some(cur.bytes_sent)).map(|b| b as f64);
            rec.network_bytes_recv = delta_u64(&mut recv_base, Some(cur.bytes_recv)).map(|b| b as f64);
            baselines.net = Some(cur);
        }

        // Gauges: mean across the bracket, as-is in single-shot mode.
        let pre_mem = pre.and_then(|p| p.mem);
        rec.memory_usage_percent = mean_opt(
            pre_mem.map(|m| m.usage_percent()),
            post.mem.map(|m| m.usage_percent()),
        );
        rec.memory_available_gb = mean_opt(
            pre_mem.map(|m| m.available_gb()),
            post.mem.map(|m| m.available_gb()),
        );
        let pre_load = pre.and_then(|p| p.load);
        rec.load_average_1min = mean_opt(pre_load.map(|l| l.one), post.load.map(|l| l.one));
        rec.load_average_5min = mean_opt(pre_load.map(|l| l.five), post.load.map(|l| l.five));
        rec.load_average_15min =
            mean_opt(pre_load.map(|l| l.fifteen), post.load.map(|l| l.fifteen));
        rec.process_count = mean_opt(
            pre.and_then(|p| p.process_count).map(|c| c as f64),
            post.process_count.map(|c| c as f64),
        )
        .map(|c| c.round() as u64);
        rec.sys_procs_running = mean_opt(
            pre.and_then(|p| p.stat.procs_running).map(|c| c as f64),
            post.stat.procs_running.map(|c| c as f64),
        )
        .map(|c| c.round() as u64);
        rec.sys_procs_blocked = mean_opt(
            pre.and_then(|p| p.stat.procs_blocked).map(|c| c as f64),
            post.stat.procs_blocked.map(|c| c as f64),
        )
        .map(|c| c.round() as u64);

        // External metric: the whole group is absent when the scrape failed.
        if let Some(total) = endpoint_total {
            rec.process_cpu_seconds_total = Some(total);
            let delta = delta_f64(&mut baselines.endpoint_total, Some(total));
            rec.process_cpu_seconds_delta = delta;
            rec.process_cpu_seconds_rate = delta
                .filter(|_| rec.time_delta_seconds > 0.0)
                .map(|d| d / rec.time_delta_seconds);
        }

        // Derived ratios; absent inputs count as zero, ratios stay finite.
        let as_f = |v: Option<u64>| v.map(|x| x as f64).unwrap_or(0.0);
        rec.instructions_per_cycle = guarded_ratio(as_f(rec.instructions), as_f(rec.cpu_cycles));
        rec.cache_miss_ratio = guarded_ratio(as_f(rec.cache_misses), as_f(rec.cache_references));
        rec.branch_miss_ratio = guarded_ratio(as_f(rec.branch_misses), as_f(rec.branches));
        rec.cpu_efficiency =
            (rec.cpu_user_time.unwrap_or(0.0) + rec.cpu_system_time.unwrap_or(0.0)) / 100.0;

        rec
    }
}

impl Sampler for SampleSynchronizer {
    /// Collect one tick. In bracketed mode the call is expected a little
    /// before the boundary; the pre-read happens immediately, the boundary
    /// passes, then the scrape and post-read close the bracket.
    fn sample(
        &mut self,
        boundary: f64,
        baselines: &mut TickBaselines,
        label: &str,
    ) -> FeatureRecord {
        match self.mode {
            SyncMode::Bracketed => {
                let pre = capture_os_snapshot();
                self.wait_for_boundary(boundary);
                let endpoint_total = self.endpoint.as_ref().and_then(MetricsEndpoint::read);
                let hw = self.perf.read();
                let post = capture_os_snapshot();
                self.assemble(Some(&pre), &post, hw, endpoint_total, baselines, label)
            }
            SyncMode::SingleShot => {
                self.wait_for_boundary(boundary);
                let endpoint_total = self.endpoint.as_ref().and_then(MetricsEndpoint::read);
                let hw = self.perf.read();
                let post = capture_os_snapshot();
                self.assemble(None, &post, hw, endpoint_total, baselines, label)
            }
        }
    }
}
