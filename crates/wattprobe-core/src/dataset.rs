//! Dataset files: feature sequences, power inputs, merged outputs.
//!
//! Feature runs are written as a pretty JSON array (the canonical form the
//! fusion engine consumes) with a CSV mirror carrying the identical field
//! set for spreadsheet-side analysis. Power input is the external
//! collaborator's CSV contract. Absent values are empty CSV cells, omitted
//! JSON keys — never zeroes.
//!
//! Loading is strict where it matters: a per-row parse problem is skipped
//! and counted, but an input that cannot yield any usable records is a
//! structural failure, because no meaningful merge can come out of it.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use log::warn;

use crate::collector::RunMeta;
use crate::fusion::{MergeConfig, MergeStats};
use crate::record::{FeatureRecord, MergedRow, PowerRecord};

/// Structural dataset failure. Per-row/per-field trouble never raises this;
/// an input or output that is unusable as a whole does.
#[derive(Debug)]
pub enum DatasetError {
    Io(std::io::Error),
    Malformed { path: PathBuf, reason: String },
}

impl std::fmt::Display for DatasetError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "dataset i/o error: {e}"),
            Self::Malformed { path, reason } => {
                write!(f, "malformed dataset {}: {reason}", path.display())
            }
        }
    }
}

impl std::error::Error for DatasetError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Malformed { .. } => None,
        }
    }
}

impl From<std::io::Error> for DatasetError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

fn malformed(path: &Path, reason: impl Into<String>) -> DatasetError {
    DatasetError::Malformed {
        path: path.to_path_buf(),
        reason: reason.into(),
    }
}

// ---------------------------------------------------------------------------
// Feature sequence
// ---------------------------------------------------------------------------

/// Column order of the feature CSV mirror; matches the JSON field set.
const FEATURE_COLUMNS: &[&str] = &[
    "timestamp",
    "timestamp_iso",
    "cpu_cycles",
    "instructions",
    "cache_references",
    "cache_misses",
    "branches",
    "branch_misses",
    "page_faults",
    "context_switches",
    "cpu_utilization",
    "cpu_user_time",
    "cpu_system_time",
    "cpu_nice_time",
    "cpu_iowait",
    "cpu_irq",
    "cpu_softirq",
    "cpu_steal",
    "cpu_idle",
    "memory_usage_percent",
    "memory_available_gb",
    "disk_io_read_mb",
    "disk_io_write_mb",
    "network_bytes_sent",
    "network_bytes_recv",
    "process_count",
    "load_average_1min",
    "load_average_5min",
    "load_average_15min",
    "sys_cpu_user_seconds",
    "sys_cpu_system_seconds",
    "sys_cpu_total_seconds",
    "sys_context_switches",
    "sys_processes_created",
    "sys_procs_running",
    "sys_procs_blocked",
    "instructions_per_cycle",
    "cache_miss_ratio",
    "branch_miss_ratio",
    "cpu_efficiency",
    "process_cpu_seconds_total",
    "process_cpu_seconds_delta",
    "process_cpu_seconds_rate",
    "workload_label",
    "collection_interval",
    "time_delta_seconds",
    "hostname",
];

fn cell_u64(v: Option<u64>) -> String {
    v.map(|x| x.to_string()).unwrap_or_default()
}

fn cell_f64(v: Option<f64>) -> String {
    v.map(|x| x.to_string()).unwrap_or_default()
}

fn feature_cells(r: &FeatureRecord) -> Vec<String> {
    vec![
        r.timestamp.to_string(),
        r.timestamp_iso.clone(),
        cell_u64(r.cpu_cycles),
        cell_u64(r.instructions),
        cell_u64(r.cache_references),
        cell_u64(r.cache_misses),
        cell_u64(r.branches),
        cell_u64(r.branch_misses),
        cell_u64(r.page_faults),
        cell_u64(r.context_switches),
        cell_f64(r.cpu_utilization),
        cell_f64(r.cpu_user_time),
        cell_f64(r.cpu_system_time),
        cell_f64(r.cpu_nice_time),
        cell_f64(r.cpu_iowait),
        cell_f64(r.cpu_irq),
        cell_f64(r.cpu_softirq),
        cell_f64(r.cpu_steal),
        cell_f64(r.cpu_idle),
        cell_f64(r.memory_usage_percent),
        cell_f64(r.memory_available_gb),
        cell_f64(r.disk_io_read_mb),
        cell_f64(r.disk_io_write_mb),
        cell_f64(r.network_bytes_sent),
        cell_f64(r.network_bytes_recv),
        cell_u64(r.process_count),
        cell_f64(r.load_average_1min),
        cell_f64(r.load_average_5min),
        cell_f64(r.load_average_15min),
        cell_f64(r.sys_cpu_user_seconds),
        cell_f64(r.sys_cpu_system_seconds),
        cell_f64(r.sys_cpu_total_seconds),
        cell_u64(r.sys_context_switches),
        cell_u64(r.sys_processes_created),
        cell_u64(r.sys_procs_running),
        cell_u64(r.sys_procs_blocked),
        r.instructions_per_cycle.to_string(),
        r.cache_miss_ratio.to_string(),
        r.branch_miss_ratio.to_string(),
        r.cpu_efficiency.to_string(),
        cell_f64(r.process_cpu_seconds_total),
        cell_f64(r.process_cpu_seconds_delta),
        cell_f64(r.process_cpu_seconds_rate),
        r.workload_label.clone(),
        r.collection_interval.to_string(),
        r.time_delta_seconds.to_string(),
        r.hostname.clone(),
    ]
}

/// Write the feature sequence as a JSON array at `path` plus a CSV mirror
/// with the same field set at `path` with a `.csv` extension.
pub fn save_features(path: &Path, records: &[FeatureRecord]) -> Result<(), DatasetError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let json = serde_json::to_string_pretty(records)
        .map_err(|e| malformed(path, format!("serialization failed: {e}")))?;
    fs::write(path, json)?;

    let csv_path = path.with_extension("csv");
    let mut csv = BufWriter::new(File::create(&csv_path)?);
    writeln!(csv, "{}", FEATURE_COLUMNS.join(","))?;
    for record in records {
        writeln!(csv, "{}", feature_cells(record).join(","))?;
    }
    csv.flush()?;
    Ok(())
}

/// Write run metadata beside a dataset written at `path`.
pub fn write_run_meta(path: &Path, meta: &RunMeta) -> Result<PathBuf, DatasetError> {
    let meta_path = path.with_extension("run.json");
    let json = serde_json::to_string_pretty(meta)
        .map_err(|e| malformed(&meta_path, format!("serialization failed: {e}")))?;
    fs::write(&meta_path, json)?;
    Ok(meta_path)
}

/// Load a feature sequence, sorted by timestamp. An unreadable, unparsable,
/// or empty file is a structural failure.
pub fn load_features(path: &Path) -> Result<Vec<FeatureRecord>, DatasetError> {
    let raw = fs::read_to_string(path)?;
    let mut records: Vec<FeatureRecord> = serde_json::from_str(&raw)
        .map_err(|e| malformed(path, format!("not a feature record array: {e}")))?;
    if records.is_empty() {
        return Err(malformed(path, "no feature records"));
    }
    records.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));
    Ok(records)
}

// ---------------------------------------------------------------------------
// Power sequence
// ---------------------------------------------------------------------------

/// Load the external power CSV, sorted by timestamp.
///
/// Columns are resolved by header name; `timestamp`,
/// `total_cpu_watts_core`, and `total_cpu_watts_package` are required,
/// `vm_count` defaults to 1 when missing. Rows that fail to parse are
/// skipped with a warning; zero usable rows is a structural failure.
pub fn load_power_csv(path: &Path) -> Result<Vec<PowerRecord>, DatasetError> {
    let raw = fs::read_to_string(path)?;
    let mut lines = raw.lines().filter(|l| !l.trim().is_empty());
    let header = lines
        .next()
        .ok_or_else(|| malformed(path, "empty power file"))?;
    let columns: Vec<&str> = header.split(',').map(str::trim).collect();

    let col = |name: &str| columns.iter().position(|c| *c == name);
    let ts_idx = col("timestamp").ok_or_else(|| malformed(path, "missing column 'timestamp'"))?;
    let core_idx = col("total_cpu_watts_core")
        .ok_or_else(|| malformed(path, "missing column 'total_cpu_watts_core'"))?;
    let package_idx = col("total_cpu_watts_package")
        .ok_or_else(|| malformed(path, "missing column 'total_cpu_watts_package'"))?;
    let vm_idx = col("vm_count");

    let mut records = Vec::new();
    let mut skipped = 0usize;
    for line in lines {
        let cells: Vec<&str> = line.split(',').map(str::trim).collect();
        let parsed = (|| {
            let timestamp: f64 = cells.get(ts_idx)?.parse().ok()?;
            let core: f64 = cells.get(core_idx)?.parse().ok()?;
            let package: f64 = cells.get(package_idx)?.parse().ok()?;
            let vm_count = match vm_idx {
                Some(i) => cells.get(i)?.parse().ok()?,
                None => 1,
            };
            timestamp.is_finite().then_some(PowerRecord {
                timestamp,
                power_core_watts: core,
                power_package_watts: package,
                vm_count,
            })
        })();
        match parsed {
            Some(record) => records.push(record),
            None => skipped += 1,
        }
    }

    if skipped > 0 {
        warn!(
            "skipped {skipped} malformed power row(s) in {}",
            path.display()
        );
    }
    if records.is_empty() {
        return Err(malformed(path, "no usable power rows"));
    }
    records.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));
    Ok(records)
}

// ---------------------------------------------------------------------------
// Merged dataset
// ---------------------------------------------------------------------------

/// Summary sidecar written next to the merged table.
#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct MergeSummary {
    pub statistics: MergeStats,
    pub parameters: MergeConfig,
    pub total_rows: u64,
}

/// Write the merged table as CSV at `path` and a `*.stats.json` sidecar
/// holding the match-quality statistics and merge parameters.
pub fn save_merged(
    path: &Path,
    rows: &[MergedRow],
    stats: &MergeStats,
    config: &MergeConfig,
) -> Result<PathBuf, DatasetError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let mut csv = BufWriter::new(File::create(path)?);
    // Label columns lead so the training target is visible up front.
    writeln!(
        csv,
        "timestamp,timestamp_iso,power_watts,time_diff,matched,{}",
        FEATURE_COLUMNS[2..].join(",")
    )?;
    for row in rows {
        let feature = feature_cells(&row.features);
        writeln!(
            csv,
            "{},{},{},{},{},{}",
            feature[0],
            feature[1],
            cell_f64(row.power_watts),
            cell_f64(row.time_diff),
            row.matched,
            feature[2..].join(",")
        )?;
    }
    csv.flush()?;

    let summary = MergeSummary {
        statistics: stats.clone(),
        parameters: config.clone(),
        total_rows: rows.len() as u64,
    };
    let sidecar = path.with_extension("stats.json");
    let json = serde_json::to_string_pretty(&summary)
        .map_err(|e| malformed(&sidecar, format!("serialization failed: {e}")))?;
    fs::write(&sidecar, json)?;
    Ok(sidecar)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fusion::{self, PowerZone};

    fn sample_records() -> Vec<FeatureRecord> {
        let mut a = FeatureRecord::empty(2.0, "t2".to_string());
        a.cpu_cycles = Some(1000);
        a.cpu_utilization = Some(55.5);
        let b = FeatureRecord::empty(1.0, "t1".to_string());
        vec![a, b]
    }

    #[test]
    fn save_and_load_features_round_trips_sorted() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("features.json");
        save_features(&path, &sample_records()).unwrap();

        let loaded = load_features(&path).unwrap();
        assert_eq!(loaded.len(), 2);
        // Loader sorts by timestamp.
        assert_eq!(loaded[0].timestamp, 1.0);
        assert_eq!(loaded[1].cpu_cycles, Some(1000));

        let csv = fs::read_to_string(path.with_extension("csv")).unwrap();
        let mut lines = csv.lines();
        assert!(lines.next().unwrap().starts_with("timestamp,timestamp_iso,cpu_cycles"));
        // Absent counters are empty cells, not zeros.
        let first_row = lines.next().unwrap();
        assert!(first_row.starts_with("2,t2,1000,,"));
    }

    #[test]
    fn load_features_rejects_empty_and_malformed_input() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("features.json");

        fs::write(&path, "[]").unwrap();
        assert!(matches!(
            load_features(&path),
            Err(DatasetError::Malformed { .. })
        ));

        fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            load_features(&path),
            Err(DatasetError::Malformed { .. })
        ));

        assert!(matches!(
            load_features(&tmp.path().join("missing.json")),
            Err(DatasetError::Io(_))
        ));
    }

    #[test]
    fn power_csv_resolves_reordered_headers() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("power.csv");
        fs::write(
            &path,
            "vm_count,total_cpu_watts_package,timestamp,total_cpu_watts_core\n\
             2,12.5,100.5,10.0\n\
             2,13.0,99.5,11.0\n",
        )
        .unwrap();
        let records = load_power_csv(&path).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].timestamp, 99.5);
        assert_eq!(records[0].power_core_watts, 11.0);
        assert_eq!(records[1].power_package_watts, 12.5);
        assert_eq!(records[1].vm_count, 2);
    }

    #[test]
    fn power_csv_skips_bad_rows_but_requires_columns() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("power.csv");
        fs::write(
            &path,
            "timestamp,total_cpu_watts_core,total_cpu_watts_package\n\
             1.0,5.0,6.0\n\
             garbage,x,y\n\
             2.0,7.0,8.0\n",
        )
        .unwrap();
        let records = load_power_csv(&path).unwrap();
        assert_eq!(records.len(), 2);
        // Missing vm_count column defaults to one VM.
        assert_eq!(records[0].vm_count, 1);

        fs::write(&path, "timestamp,watts\n1.0,5.0\n").unwrap();
        assert!(matches!(
            load_power_csv(&path),
            Err(DatasetError::Malformed { .. })
        ));

        fs::write(&path, "timestamp,total_cpu_watts_core,total_cpu_watts_package\nbad,row,here\n")
            .unwrap();
        assert!(matches!(
            load_power_csv(&path),
            Err(DatasetError::Malformed { .. })
        ));
    }

    #[test]
    fn merged_output_writes_table_and_sidecar() {
        let tmp = tempfile::tempdir().unwrap();
        let features = vec![FeatureRecord::empty(1.0, "t1".to_string())];
        let power = vec![PowerRecord {
            timestamp: 1.05,
            power_core_watts: 9.5,
            power_package_watts: 11.0,
            vm_count: 1,
        }];
        let config = MergeConfig {
            tolerance_secs: 0.2,
            zone: PowerZone::Core,
            min_power_watts: 0.0,
        };
        let (rows, stats) = fusion::merge(&features, &power, &config);

        let out = tmp.path().join("merged.csv");
        let sidecar = save_merged(&out, &rows, &stats, &config).unwrap();

        let csv = fs::read_to_string(&out).unwrap();
        let mut lines = csv.lines();
        assert!(lines
            .next()
            .unwrap()
            .starts_with("timestamp,timestamp_iso,power_watts,time_diff,matched,cpu_cycles"));
        assert!(lines.next().unwrap().contains("9.5"));

        let summary: MergeSummary =
            serde_json::from_str(&fs::read_to_string(&sidecar).unwrap()).unwrap();
        assert_eq!(summary.total_rows, 1);
        assert_eq!(summary.statistics.matched_points, 1);
        assert!((summary.parameters.tolerance_secs - 0.2).abs() < 1e-12);
    }

    #[test]
    fn merge_and_save_are_byte_identical_across_runs() {
        let tmp = tempfile::tempdir().unwrap();
        let features = sample_records();
        let power = vec![
            PowerRecord {
                timestamp: 1.02,
                power_core_watts: 5.25,
                power_package_watts: 6.5,
                vm_count: 1,
            },
            PowerRecord {
                timestamp: 2.11,
                power_core_watts: 7.75,
                power_package_watts: 9.0,
                vm_count: 1,
            },
        ];
        let config = MergeConfig::default();

        let write_once = |name: &str| {
            let (rows, stats) = fusion::merge(&features, &power, &config);
            let path = tmp.path().join(name);
            save_merged(&path, &rows, &stats, &config).unwrap();
            (
                fs::read_to_string(&path).unwrap(),
                fs::read_to_string(path.with_extension("stats.json")).unwrap(),
            )
        };
        let (csv_a, stats_a) = write_once("a.csv");
        let (csv_b, stats_b) = write_once("b.csv");
        assert_eq!(csv_a, csv_b);
        assert_eq!(stats_a, stats_b);
    }
}
