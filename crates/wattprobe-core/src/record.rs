//! On-disk record types: feature ticks, host power samples, merged rows.
//!
//! Field names are the stable contract between the collector, the external
//! power collaborator, and the fusion engine. A value that could not be
//! observed for a tick is absent (`None`, skipped in JSON, empty CSV cell) —
//! never zero-filled, so consumers can tell "no activity" from "no data".

use serde::{Deserialize, Serialize};

/// One sampling tick of VM-visible performance signals.
///
/// Hardware counter fields hold the per-tick delta of a cumulative counter;
/// they are absent when the counter was unavailable or re-baselined during
/// the tick. OS metric fields are absent when the corresponding `/proc`
/// source could not be read. Derived ratios are always present and guarded
/// to `0.0` on a zero or absent denominator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRecord {
    pub timestamp: f64,
    pub timestamp_iso: String,

    // Hardware performance counter deltas for this tick.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu_cycles: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_references: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_misses: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branches: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch_misses: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_faults: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_switches: Option<u64>,

    // Per-mode CPU time shares of the tick window, percent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu_utilization: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu_user_time: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu_system_time: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu_nice_time: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu_iowait: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu_irq: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu_softirq: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu_steal: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu_idle: Option<f64>,

    // Memory, I/O, and load state.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_usage_percent: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_available_gb: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disk_io_read_mb: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disk_io_write_mb: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network_bytes_sent: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network_bytes_recv: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub process_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub load_average_1min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub load_average_5min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub load_average_15min: Option<f64>,

    // System-wide CPU time deltas from /proc/stat, in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sys_cpu_user_seconds: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sys_cpu_system_seconds: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sys_cpu_total_seconds: Option<f64>,

    // System activity deltas and instantaneous scheduler state from /proc/stat.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sys_context_switches: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sys_processes_created: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sys_procs_running: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sys_procs_blocked: Option<u64>,

    // Derived ratios, guarded against zero denominators.
    pub instructions_per_cycle: f64,
    pub cache_miss_ratio: f64,
    pub branch_miss_ratio: f64,
    pub cpu_efficiency: f64,

    // Cumulative process CPU seconds scraped from the monitoring endpoint.
    // The whole group is absent when the endpoint was unreachable this tick;
    // delta and rate are additionally absent on the first tick and after an
    // endpoint counter reset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub process_cpu_seconds_total: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub process_cpu_seconds_delta: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub process_cpu_seconds_rate: Option<f64>,

    /// Name of the stress pattern active at the tick's start, or `"idle"`.
    pub workload_label: String,

    /// Intended seconds between ticks.
    pub collection_interval: f64,
    /// Measured seconds since the previous tick (0 for the first tick).
    pub time_delta_seconds: f64,
    pub hostname: String,
}

impl FeatureRecord {
    /// An all-absent record at the given timestamp; the synchronizer fills in
    /// whatever each reader produced.
    pub fn empty(timestamp: f64, iso: String) -> Self {
        Self {
            timestamp,
            timestamp_iso: iso,
            cpu_cycles: None,
            instructions: None,
            cache_references: None,
            cache_misses: None,
            branches: None,
            branch_misses: None,
            page_faults: None,
            context_switches: None,
            cpu_utilization: None,
            cpu_user_time: None,
            cpu_system_time: None,
            cpu_nice_time: None,
            cpu_iowait: None,
            cpu_irq: None,
            cpu_softirq: None,
            cpu_steal: None,
            cpu_idle: None,
            memory_usage_percent: None,
            memory_available_gb: None,
            disk_io_read_mb: None,
            disk_io_write_mb: None,
            network_bytes_sent: None,
            network_bytes_recv: None,
            process_count: None,
            load_average_1min: None,
            load_average_5min: None,
            load_average_15min: None,
            sys_cpu_user_seconds: None,
            sys_cpu_system_seconds: None,
            sys_cpu_total_seconds: None,
            sys_context_switches: None,
            sys_processes_created: None,
            sys_procs_running: None,
            sys_procs_blocked: None,
            instructions_per_cycle: 0.0,
            cache_miss_ratio: 0.0,
            branch_miss_ratio: 0.0,
            cpu_efficiency: 0.0,
            process_cpu_seconds_total: None,
            process_cpu_seconds_delta: None,
            process_cpu_seconds_rate: None,
            workload_label: "idle".to_string(),
            collection_interval: 0.0,
            time_delta_seconds: 0.0,
            hostname: String::new(),
        }
    }
}

/// One host-side power sample, produced independently of the feature run.
///
/// The external collaborator writes these as CSV rows with columns
/// `timestamp`, `total_cpu_watts_core`, `total_cpu_watts_package`,
/// `vm_count`; the loader maps them onto these field names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PowerRecord {
    pub timestamp: f64,
    pub power_core_watts: f64,
    pub power_package_watts: f64,
    pub vm_count: u64,
}

/// One feature tick extended with its power label, produced once by the
/// fusion engine and never mutated afterward.
///
/// `power_watts` and `time_diff` are absent on unmatched rows; unmatched
/// rows are retained for feature-only analysis rather than dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedRow {
    #[serde(flatten)]
    pub features: FeatureRecord,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub power_watts: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_diff: Option<f64>,
    pub matched: bool,
}
