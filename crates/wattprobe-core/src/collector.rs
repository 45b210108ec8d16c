//! The collection loop: drives sampling ticks over a run.
//!
//! Ticks fire at nominal boundaries `start + n * interval`. The loop blocks
//! on one synchronizer call at a time, absorbs per-tick source failures, and
//! records cadence trouble instead of hiding it: falling behind by more than
//! a full interval is logged and skipped past, never "caught up" with burst
//! ticks. A stop request between ticks aborts the run but keeps every tick
//! collected so far.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::record::FeatureRecord;
use crate::sync::{Sampler, SyncMode, TickBaselines};
use crate::time::{format_iso8601, unix_now};
use crate::workload::WorkloadLabeler;

/// Lead time before a boundary at which the sampler is invoked, leaving the
/// bracketed pre-read room on the early side of the boundary.
const TICK_LEAD: Duration = Duration::from_millis(10);

/// Lifecycle of one collection run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Idle,
    Running,
    Completed,
    Aborted,
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Aborted => write!(f, "aborted"),
        }
    }
}

/// Machine identity captured at run start.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineInfo {
    pub os: String,
    pub arch: String,
    pub chip: String,
    pub cores: usize,
    pub hostname: String,
}

/// Detect machine information (best-effort).
pub fn detect_machine_info() -> MachineInfo {
    let os = format!(
        "{} {}",
        std::env::consts::OS,
        os_version().unwrap_or_default()
    );
    let arch = std::env::consts::ARCH.to_string();
    let chip = detect_chip().unwrap_or_else(|| "unknown".to_string());
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    let hostname = detect_hostname().unwrap_or_else(|| "unknown-vm".to_string());

    MachineInfo {
        os,
        arch,
        chip,
        cores,
        hostname,
    }
}

fn os_version() -> Option<String> {
    std::fs::read_to_string("/etc/os-release").ok().and_then(|s| {
        s.lines()
            .find(|l| l.starts_with("PRETTY_NAME="))
            .map(|l| {
                l.trim_start_matches("PRETTY_NAME=")
                    .trim_matches('"')
                    .to_string()
            })
    })
}

fn detect_chip() -> Option<String> {
    std::fs::read_to_string("/proc/cpuinfo").ok().and_then(|s| {
        s.lines()
            .find(|l| l.starts_with("model name"))
            .map(|l| l.split(':').nth(1).unwrap_or("").trim().to_string())
    })
}

fn detect_hostname() -> Option<String> {
    let raw = std::fs::read_to_string("/proc/sys/kernel/hostname")
        .or_else(|_| std::fs::read_to_string("/etc/hostname"))
        .ok()?;
    let name = raw.trim();
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

/// Run metadata written next to the dataset (`*.run.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMeta {
    pub version: u32,
    pub run_id: String,
    pub state: RunState,
    pub started_at: String,
    pub ended_at: String,
    pub duration_requested_secs: f64,
    pub interval_secs: f64,
    pub sync_mode: String,
    pub ticks_attempted: u64,
    pub ticks_recorded: u64,
    pub schedule_overruns: u64,
    pub records_dropped_nonmonotonic: u64,
    pub machine: MachineInfo,
    pub wattprobe_version: String,
}

/// Everything a finished run produced.
#[derive(Debug)]
pub struct CollectionRun {
    pub records: Vec<FeatureRecord>,
    pub meta: RunMeta,
}

/// Drives a [`Sampler`] at a fixed cadence for a fixed duration.
pub struct CollectionLoop<S: Sampler> {
    sampler: S,
    labeler: Box<dyn WorkloadLabeler>,
    duration: Duration,
    interval: Duration,
    mode: SyncMode,
    state: RunState,
}

impl<S: Sampler> CollectionLoop<S> {
    pub fn new(
        sampler: S,
        labeler: Box<dyn WorkloadLabeler>,
        duration: Duration,
        interval: Duration,
        mode: SyncMode,
    ) -> Self {
        Self {
            sampler,
            labeler,
            duration,
            interval,
            mode,
            state: RunState::Idle,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Run to completion or until `stop` is raised. The stop flag is observed
    /// between ticks only; an in-flight tick finishes (or times out at the
    /// source level) before the loop exits.
    pub fn run(&mut self, stop: &AtomicBool) -> CollectionRun {
        let started_wall = unix_now();
        let duration_secs = self.duration.as_secs_f64();
        let interval_secs = self.interval.as_secs_f64().max(1e-3);
        let lead_secs = TICK_LEAD.as_secs_f64().min(interval_secs / 2.0);

        self.state = RunState::Running;
        let mut baselines = TickBaselines::new();
        let mut records: Vec<FeatureRecord> = Vec::new();
        let mut ticks_attempted = 0u64;
        let mut schedule_overruns = 0u64;
        let mut dropped_nonmonotonic = 0u64;
        let mut n = 0u64;

        loop {
            if stop.load(Ordering::SeqCst) {
                self.state = RunState::Aborted;
                break;
            }

            let mut boundary = started_wall + n as f64 * interval_secs;
            if boundary - started_wall > duration_secs {
                self.state = RunState::Completed;
                break;
            }

            let now = unix_now();
            if now < boundary - lead_secs {
                std::thread::sleep(Duration::from_secs_f64(boundary - lead_secs - now));
            } else if now - boundary > interval_secs {
                // More than one interval behind schedule. Record the skew and
                // realign to the next future boundary; firing catch-up ticks
                // under load would only make the backlog worse.
                let missed = ((now - boundary) / interval_secs).floor() as u64;
                warn!(
                    "tick {n} behind schedule by {:.3}s, skipping {missed} boundary(ies)",
                    now - boundary
                );
                schedule_overruns += 1;
                n += missed;
                boundary = started_wall + n as f64 * interval_secs;
                if boundary - started_wall > duration_secs {
                    self.state = RunState::Completed;
                    break;
                }
            }

            if stop.load(Ordering::SeqCst) {
                self.state = RunState::Aborted;
                break;
            }

            let label = self.labeler.current_label().to_string();
            let record = self.sampler.sample(boundary, &mut baselines, &label);
            ticks_attempted += 1;

            let monotonic = records
                .last()
                .is_none_or(|last| record.timestamp > last.timestamp);
            if monotonic {
                records.push(record);
            } else {
                // Wall clock stepped backwards under the run; fabricating an
                // adjusted timestamp would poison the fusion join.
                warn!(
                    "dropping tick {n}: timestamp {:.6} not after previous record",
                    record.timestamp
                );
                dropped_nonmonotonic += 1;
            }

            debug!("tick {n} recorded ({} total)", records.len());
            n += 1;
        }

        let ended_wall = unix_now();
        let meta = RunMeta {
            version: 1,
            run_id: Uuid::new_v4().to_string(),
            state: self.state,
            started_at: format_iso8601(started_wall),
            ended_at: format_iso8601(ended_wall),
            duration_requested_secs: duration_secs,
            interval_secs,
            sync_mode: self.mode.to_string(),
            ticks_attempted,
            ticks_recorded: records.len() as u64,
            schedule_overruns,
            records_dropped_nonmonotonic: dropped_nonmonotonic,
            machine: detect_machine_info(),
            wattprobe_version: crate::VERSION.to_string(),
        };

        CollectionRun { records, meta }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::TickBaselines;
    use crate::workload::StaticLabel;
    use std::sync::atomic::AtomicBool;

    /// Sampler that fabricates records; optionally slow, optionally missing
    /// hardware counters on one tick.
    struct ScriptedSampler {
        calls: u64,
        hw_unavailable_on: Option<u64>,
        delay: Option<Duration>,
    }

    impl ScriptedSampler {
        fn new() -> Self {
            Self {
                calls: 0,
                hw_unavailable_on: None,
                delay: None,
            }
        }
    }

    impl Sampler for ScriptedSampler {
        fn sample(
            &mut self,
            _boundary: f64,
            baselines: &mut TickBaselines,
            label: &str,
        ) -> FeatureRecord {
            if let Some(d) = self.delay {
                std::thread::sleep(d);
            }
            self.calls += 1;
            let now = unix_now();
            let mut rec = FeatureRecord::empty(now, String::new());
            rec.workload_label = label.to_string();
            rec.time_delta_seconds = baselines
                .prev_timestamp
                .map(|p| now - p)
                .unwrap_or_default();
            baselines.prev_timestamp = Some(now);
            if self.hw_unavailable_on != Some(self.calls) {
                rec.cpu_cycles = Some(1000 * self.calls);
                rec.instructions = Some(800 * self.calls);
            }
            rec
        }
    }

    fn run_loop(
        sampler: ScriptedSampler,
        duration_ms: u64,
        interval_ms: u64,
        stop: &AtomicBool,
    ) -> CollectionRun {
        let mut cl = CollectionLoop::new(
            sampler,
            Box::new(StaticLabel::idle()),
            Duration::from_millis(duration_ms),
            Duration::from_millis(interval_ms),
            SyncMode::SingleShot,
        );
        let run = cl.run(stop);
        assert_eq!(cl.state(), run.meta.state);
        run
    }

    #[test]
    fn completes_with_bounded_record_count_and_increasing_timestamps() {
        let stop = AtomicBool::new(false);
        let run = run_loop(ScriptedSampler::new(), 100, 20, &stop);
        assert_eq!(run.meta.state, RunState::Completed);
        // ceil(100/20) + 1 boundaries at most.
        assert!(run.records.len() <= 6);
        assert!(!run.records.is_empty());
        for pair in run.records.windows(2) {
            assert!(pair[1].timestamp > pair[0].timestamp);
        }
        assert_eq!(run.meta.ticks_recorded, run.records.len() as u64);
    }

    #[test]
    fn one_unavailable_tick_never_aborts_the_run() {
        let stop = AtomicBool::new(false);
        let sampler = ScriptedSampler {
            calls: 0,
            hw_unavailable_on: Some(2),
            delay: None,
        };
        let run = run_loop(sampler, 80, 20, &stop);
        assert_eq!(run.meta.state, RunState::Completed);
        assert_eq!(run.records.len() as u64, run.meta.ticks_attempted);
        let absent: Vec<_> = run
            .records
            .iter()
            .filter(|r| r.cpu_cycles.is_none())
            .collect();
        assert_eq!(absent.len(), 1);
        assert!(absent[0].instructions.is_none());
    }

    #[test]
    fn stop_raised_before_start_aborts_with_no_records() {
        let stop = AtomicBool::new(true);
        let run = run_loop(ScriptedSampler::new(), 100, 20, &stop);
        assert_eq!(run.meta.state, RunState::Aborted);
        assert!(run.records.is_empty());
    }

    #[test]
    fn slow_ticks_skip_boundaries_instead_of_bursting() {
        let stop = AtomicBool::new(false);
        let sampler = ScriptedSampler {
            calls: 0,
            hw_unavailable_on: None,
            delay: Some(Duration::from_millis(35)),
        };
        let run = run_loop(sampler, 120, 10, &stop);
        assert_eq!(run.meta.state, RunState::Completed);
        assert!(run.meta.schedule_overruns > 0);
        // Far fewer records than boundaries: no catch-up bursts.
        assert!(run.records.len() <= 6);
        for pair in run.records.windows(2) {
            assert!(pair[1].timestamp > pair[0].timestamp);
        }
    }

    #[test]
    fn run_meta_reflects_configuration() {
        let stop = AtomicBool::new(false);
        let run = run_loop(ScriptedSampler::new(), 40, 20, &stop);
        assert_eq!(run.meta.version, 1);
        assert!((run.meta.interval_secs - 0.02).abs() < 1e-9);
        assert_eq!(run.meta.sync_mode, "single-shot");
        assert!(!run.meta.run_id.is_empty());
        assert!(!run.meta.machine.hostname.is_empty());
        assert!(run.meta.started_at <= run.meta.ended_at);
    }
}
