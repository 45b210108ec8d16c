//! Hardware performance counters via `perf_event_open(2)`.
//!
//! Counters are opened system-wide, one descriptor per event per online CPU,
//! and read as cumulative counts since the reader was constructed. A machine
//! that refuses the syscall (missing PMU virtualization, restrictive
//! `kernel.perf_event_paranoid`) simply yields an unavailable reader; each
//! event also degrades independently, so a hypervisor that exposes cycles
//! but not cache events still contributes what it has.

use std::os::raw::{c_int, c_ulong};

use log::debug;

/// `struct perf_event_attr`, first published layout (PERF_ATTR_SIZE_VER0,
/// 64 bytes). All flag bits stay zero: the counter starts enabled and counts
/// user and kernel time on the target CPU.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
struct PerfEventAttr {
    type_: u32,
    size: u32,
    config: u64,
    sample_period: u64,
    sample_type: u64,
    read_format: u64,
    flags: u64,
    wakeup_events: u32,
    bp_type: u32,
    config1: u64,
}

const PERF_ATTR_SIZE_VER0: u32 = 64;

// Kernel enum perf_type_id.
const PERF_TYPE_HARDWARE: u32 = 0;
const PERF_TYPE_SOFTWARE: u32 = 1;

// Kernel enums perf_hw_id / perf_sw_ids.
const PERF_COUNT_HW_CPU_CYCLES: u64 = 0;
const PERF_COUNT_HW_INSTRUCTIONS: u64 = 1;
const PERF_COUNT_HW_CACHE_REFERENCES: u64 = 2;
const PERF_COUNT_HW_CACHE_MISSES: u64 = 3;
const PERF_COUNT_HW_BRANCH_INSTRUCTIONS: u64 = 4;
const PERF_COUNT_HW_BRANCH_MISSES: u64 = 5;
const PERF_COUNT_SW_PAGE_FAULTS: u64 = 2;
const PERF_COUNT_SW_CONTEXT_SWITCHES: u64 = 3;

const PERF_FLAG_FD_CLOEXEC: c_ulong = 1 << 3;

/// The fixed event set sampled for every tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HwEvent {
    CpuCycles,
    Instructions,
    CacheReferences,
    CacheMisses,
    Branches,
    BranchMisses,
    PageFaults,
    ContextSwitches,
}

impl HwEvent {
    pub const ALL: [HwEvent; 8] = [
        HwEvent::CpuCycles,
        HwEvent::Instructions,
        HwEvent::CacheReferences,
        HwEvent::CacheMisses,
        HwEvent::Branches,
        HwEvent::BranchMisses,
        HwEvent::PageFaults,
        HwEvent::ContextSwitches,
    ];

    /// Feature field name this event feeds.
    pub fn name(self) -> &'static str {
        match self {
            HwEvent::CpuCycles => "cpu_cycles",
            HwEvent::Instructions => "instructions",
            HwEvent::CacheReferences => "cache_references",
            HwEvent::CacheMisses => "cache_misses",
            HwEvent::Branches => "branches",
            HwEvent::BranchMisses => "branch_misses",
            HwEvent::PageFaults => "page_faults",
            HwEvent::ContextSwitches => "context_switches",
        }
    }

    fn type_and_config(self) -> (u32, u64) {
        match self {
            HwEvent::CpuCycles => (PERF_TYPE_HARDWARE, PERF_COUNT_HW_CPU_CYCLES),
            HwEvent::Instructions => (PERF_TYPE_HARDWARE, PERF_COUNT_HW_INSTRUCTIONS),
            HwEvent::CacheReferences => (PERF_TYPE_HARDWARE, PERF_COUNT_HW_CACHE_REFERENCES),
            HwEvent::CacheMisses => (PERF_TYPE_HARDWARE, PERF_COUNT_HW_CACHE_MISSES),
            HwEvent::Branches => (PERF_TYPE_HARDWARE, PERF_COUNT_HW_BRANCH_INSTRUCTIONS),
            HwEvent::BranchMisses => (PERF_TYPE_HARDWARE, PERF_COUNT_HW_BRANCH_MISSES),
            HwEvent::PageFaults => (PERF_TYPE_SOFTWARE, PERF_COUNT_SW_PAGE_FAULTS),
            HwEvent::ContextSwitches => (PERF_TYPE_SOFTWARE, PERF_COUNT_SW_CONTEXT_SWITCHES),
        }
    }
}

/// Cumulative counter values at one read. Each event is absent when its
/// descriptors could not be opened or read this time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HwCounterSnapshot {
    pub cpu_cycles: Option<u64>,
    pub instructions: Option<u64>,
    pub cache_references: Option<u64>,
    pub cache_misses: Option<u64>,
    pub branches: Option<u64>,
    pub branch_misses: Option<u64>,
    pub page_faults: Option<u64>,
    pub context_switches: Option<u64>,
}

impl HwCounterSnapshot {
    pub(crate) fn set(&mut self, event: HwEvent, value: Option<u64>) {
        match event {
            HwEvent::CpuCycles => self.cpu_cycles = value,
            HwEvent::Instructions => self.instructions = value,
            HwEvent::CacheReferences => self.cache_references = value,
            HwEvent::CacheMisses => self.cache_misses = value,
            HwEvent::Branches => self.branches = value,
            HwEvent::BranchMisses => self.branch_misses = value,
            HwEvent::PageFaults => self.page_faults = value,
            HwEvent::ContextSwitches => self.context_switches = value,
        }
    }

    pub fn get(&self, event: HwEvent) -> Option<u64> {
        match event {
            HwEvent::CpuCycles => self.cpu_cycles,
            HwEvent::Instructions => self.instructions,
            HwEvent::CacheReferences => self.cache_references,
            HwEvent::CacheMisses => self.cache_misses,
            HwEvent::Branches => self.branches,
            HwEvent::BranchMisses => self.branch_misses,
            HwEvent::PageFaults => self.page_faults,
            HwEvent::ContextSwitches => self.context_switches,
        }
    }
}

/// One opened event: a descriptor per online CPU, summed on read.
struct OpenEvent {
    event: HwEvent,
    fds: Vec<c_int>,
}

impl OpenEvent {
    fn read_total(&self) -> Option<u64> {
        let mut total = 0u64;
        for &fd in &self.fds {
            let mut buf = [0u8; 8];
            // SAFETY: `fd` is a perf event descriptor owned by this struct and
            // the buffer is 8 valid bytes; a counting event's read() yields one
            // u64 when no read_format extras were requested.
            let n = unsafe { libc::read(fd, buf.as_mut_ptr().cast(), buf.len()) };
            if n != 8 {
                return None;
            }
            total = total.wrapping_add(u64::from_ne_bytes(buf));
        }
        Some(total)
    }
}

impl Drop for OpenEvent {
    fn drop(&mut self) {
        for &fd in &self.fds {
            // SAFETY: each fd was returned by perf_event_open and is closed once.
            unsafe {
                libc::close(fd);
            }
        }
    }
}

/// System-wide hardware counter reader.
pub struct PerfCounters {
    events: Vec<OpenEvent>,
}

impl PerfCounters {
    /// Probe and open the full event set. Events the kernel refuses are
    /// skipped; an empty set means the reader reports unavailable.
    pub fn open() -> Self {
        let cpus = online_cpus();
        let mut events = Vec::new();
        for event in HwEvent::ALL {
            match open_event_on_all_cpus(event, &cpus) {
                Some(open) => events.push(open),
                None => debug!("perf event {} unavailable on this machine", event.name()),
            }
        }
        Self { events }
    }

    /// A reader with no events at all, for machines without perf access.
    pub fn unavailable() -> Self {
        Self { events: Vec::new() }
    }

    /// True when at least one event opened.
    pub fn is_available(&self) -> bool {
        !self.events.is_empty()
    }

    /// Names of the events that opened successfully.
    pub fn available_events(&self) -> Vec<&'static str> {
        self.events.iter().map(|e| e.event.name()).collect()
    }

    /// Read cumulative counts for every opened event. `None` when nothing
    /// is open; individual events degrade to absent on read failure.
    pub fn read(&self) -> Option<HwCounterSnapshot> {
        if self.events.is_empty() {
            return None;
        }
        let mut snap = HwCounterSnapshot::default();
        for open in &self.events {
            snap.set(open.event, open.read_total());
        }
        Some(snap)
    }
}

fn online_cpus() -> Vec<c_int> {
    // SAFETY: `sysconf` is thread-safe for this query and has no side effects.
    let n = unsafe { libc::sysconf(libc::_SC_NPROCESSORS_ONLN) };
    let n = if n > 0 { n as c_int } else { 1 };
    (0..n).collect()
}

fn open_event_on_all_cpus(event: HwEvent, cpus: &[c_int]) -> Option<OpenEvent> {
    let (type_, config) = event.type_and_config();
    let attr = PerfEventAttr {
        type_,
        size: PERF_ATTR_SIZE_VER0,
        config,
        ..Default::default()
    };

    let mut fds = Vec::with_capacity(cpus.len());
    for &cpu in cpus {
        // SAFETY: the attr struct is a valid PERF_ATTR_SIZE_VER0 layout and
        // outlives the call; pid -1 + explicit cpu requests a system-wide
        // counter on that CPU.
        let fd = unsafe {
            libc::syscall(
                libc::SYS_perf_event_open,
                &attr as *const PerfEventAttr,
                -1 as c_int,
                cpu,
                -1 as c_int,
                PERF_FLAG_FD_CLOEXEC,
            )
        };
        if fd < 0 {
            // Partial opens are rolled back by OpenEvent::drop.
            drop(OpenEvent { event, fds });
            return None;
        }
        fds.push(fd as c_int);
    }
    Some(OpenEvent { event, fds })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attr_layout_matches_ver0_size() {
        assert_eq!(std::mem::size_of::<PerfEventAttr>(), 64);
    }

    #[test]
    fn event_names_match_record_fields() {
        assert_eq!(HwEvent::CpuCycles.name(), "cpu_cycles");
        assert_eq!(HwEvent::ContextSwitches.name(), "context_switches");
        assert_eq!(HwEvent::ALL.len(), 8);
    }

    #[test]
    fn unavailable_reader_reads_none() {
        let reader = PerfCounters::unavailable();
        assert!(!reader.is_available());
        assert!(reader.read().is_none());
    }

    #[test]
    fn open_never_panics_and_reads_are_monotonic_when_available() {
        // Perf access is environment-dependent (containers and VMs commonly
        // deny it); assert behavior only when the kernel granted events.
        let reader = PerfCounters::open();
        if !reader.is_available() {
            return;
        }
        let first = reader.read().unwrap();
        let second = reader.read().unwrap();
        if let (Some(a), Some(b)) = (first.cpu_cycles, second.cpu_cycles) {
            assert!(b >= a);
        }
    }

    #[test]
    fn snapshot_get_set_round_trip() {
        let mut snap = HwCounterSnapshot::default();
        snap.set(HwEvent::Branches, Some(42));
        assert_eq!(snap.get(HwEvent::Branches), Some(42));
        assert_eq!(snap.get(HwEvent::CacheMisses), None);
    }
}
