//! # wattprobe-core
//!
//! **Turn a virtual machine into a labeled power-model training rig.**
//!
//! `wattprobe-core` samples VM-visible CPU performance signals — hardware
//! performance counters, `/proc` OS counters, and a metrics-endpoint scrape —
//! into one internally-consistent record per tick, then fuses a finished run
//! with independently captured host power samples by nearest timestamp.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::atomic::AtomicBool;
//! use std::time::Duration;
//! use wattprobe_core::collector::CollectionLoop;
//! use wattprobe_core::readers::PerfCounters;
//! use wattprobe_core::sync::{SampleSynchronizer, SyncMode};
//! use wattprobe_core::workload::StaticLabel;
//!
//! let sync = SampleSynchronizer::new(
//!     SyncMode::Bracketed,
//!     Duration::from_secs(1),
//!     PerfCounters::open(),
//!     None,
//!     "my-vm".to_string(),
//! );
//! let mut run_loop = CollectionLoop::new(
//!     sync,
//!     Box::new(StaticLabel::idle()),
//!     Duration::from_secs(60),
//!     Duration::from_secs(1),
//!     SyncMode::Bracketed,
//! );
//! let stop = AtomicBool::new(false);
//! let run = run_loop.run(&stop);
//! println!("{} ticks recorded", run.records.len());
//! ```
//!
//! ## Architecture
//!
//! Readers → Synchronizer → Collection loop → dataset files →
//! (external power capture) → Fusion → merged training table
//!
//! Two disciplines carry the design:
//! - **Bracketed sampling**: each tick's sources are read just before and
//!   just after the nominal boundary, so the record timestamp's uncertainty
//!   is half the bracket span, not the slowest source's latency.
//! - **Absence over zero**: a source that cannot be observed this tick
//!   leaves its fields out entirely. Zeroes in the dataset always mean a
//!   measured zero.

pub mod collector;
pub mod dataset;
pub mod fusion;
pub mod readers;
pub mod record;
pub mod sync;
pub mod time;
pub mod workload;

pub use collector::{CollectionLoop, CollectionRun, MachineInfo, RunMeta, RunState,
    detect_machine_info};
pub use dataset::{DatasetError, load_features, load_power_csv, save_features, save_merged,
    write_run_meta};
pub use fusion::{MergeConfig, MergeStats, PowerZone, merge};
pub use readers::{MetricsEndpoint, PerfCounters};
pub use record::{FeatureRecord, MergedRow, PowerRecord};
pub use sync::{SampleSynchronizer, Sampler, SyncMode, TickBaselines};
pub use workload::{StaticLabel, WorkloadLabeler, WorkloadSequence};

/// Library version (from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
