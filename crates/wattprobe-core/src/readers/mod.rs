//! Stateless counter readers: hardware performance counters, `/proc`
//! snapshots, and the metrics endpoint scrape.
//!
//! Readers share one contract: a read that cannot observe its source returns
//! `None` and is never an error. The caller decides what absence means for
//! the tick; readers of cumulative sources return raw cumulative values and
//! leave delta computation to the synchronizer.

pub mod endpoint;
pub mod perf;
pub mod procfs;

pub use endpoint::MetricsEndpoint;
pub use perf::{HwCounterSnapshot, HwEvent, PerfCounters};
pub use procfs::{OsSnapshot, capture_os_snapshot};
