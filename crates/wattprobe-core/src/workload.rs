//! Stress-workload labeling.
//!
//! The stress workloads themselves run outside this crate; the sampler only
//! ever asks "what pattern is active right now?" and attaches the answer to
//! the tick. [`WorkloadSequence`] mirrors the timed round-robin the external
//! runner drives, so a collection run can label ticks without any coupling
//! to process management.

use std::time::{Duration, Instant};

/// Label used when no stress pattern is active.
pub const IDLE_LABEL: &str = "idle";

/// Read-only view of the currently active workload pattern.
pub trait WorkloadLabeler: Send {
    /// Name of the active pattern, or [`IDLE_LABEL`].
    fn current_label(&mut self) -> &str;

    /// Time left in the active pattern, when known.
    fn remaining_hint(&mut self) -> Option<Duration> {
        None
    }
}

/// A fixed label for the whole run.
pub struct StaticLabel(String);

impl StaticLabel {
    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }

    pub fn idle() -> Self {
        Self(IDLE_LABEL.to_string())
    }
}

impl WorkloadLabeler for StaticLabel {
    fn current_label(&mut self) -> &str {
        &self.0
    }
}

/// One entry in a workload sequence.
#[derive(Debug, Clone)]
pub struct WorkloadEntry {
    pub name: String,
    pub duration: Duration,
}

/// Timed round-robin over a workload sequence.
///
/// State is `(sequence index, entry start)`; it advances lazily whenever a
/// label is requested, wrapping to the first entry after the last. An empty
/// sequence behaves like [`StaticLabel::idle`].
pub struct WorkloadSequence {
    entries: Vec<WorkloadEntry>,
    index: usize,
    entry_started: Instant,
}

impl WorkloadSequence {
    pub fn new(entries: Vec<WorkloadEntry>) -> Self {
        // Zero-duration entries can never be active; dropping them keeps
        // lazy advancement finite.
        let entries = entries
            .into_iter()
            .filter(|e| !e.duration.is_zero())
            .collect();
        Self {
            entries,
            index: 0,
            entry_started: Instant::now(),
        }
    }

    /// Parse a comma-separated sequence (`cycle,cpu_intensive`) with a
    /// uniform per-entry duration.
    pub fn from_names(names: &str, each: Duration) -> Self {
        let entries = names
            .split(',')
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(|n| WorkloadEntry {
                name: n.to_string(),
                duration: each,
            })
            .collect();
        Self::new(entries)
    }

    fn advance(&mut self) {
        if self.entries.is_empty() {
            return;
        }
        loop {
            let current = &self.entries[self.index];
            let elapsed = self.entry_started.elapsed();
            if elapsed < current.duration {
                break;
            }
            self.entry_started += current.duration;
            self.index = (self.index + 1) % self.entries.len();
        }
    }
}

impl WorkloadLabeler for WorkloadSequence {
    fn current_label(&mut self) -> &str {
        if self.entries.is_empty() {
            return IDLE_LABEL;
        }
        self.advance();
        &self.entries[self.index].name
    }

    fn remaining_hint(&mut self) -> Option<Duration> {
        if self.entries.is_empty() {
            return None;
        }
        self.advance();
        let current = &self.entries[self.index];
        Some(current.duration.saturating_sub(self.entry_started.elapsed()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_label_is_constant() {
        let mut label = StaticLabel::idle();
        assert_eq!(label.current_label(), "idle");
        assert_eq!(label.current_label(), "idle");
        assert!(label.remaining_hint().is_none());
    }

    #[test]
    fn empty_sequence_reports_idle() {
        let mut seq = WorkloadSequence::new(Vec::new());
        assert_eq!(seq.current_label(), IDLE_LABEL);
        assert!(seq.remaining_hint().is_none());
    }

    #[test]
    fn sequence_advances_and_wraps() {
        let mut seq = WorkloadSequence::new(vec![
            WorkloadEntry {
                name: "cycle".to_string(),
                duration: Duration::from_millis(20),
            },
            WorkloadEntry {
                name: "cpu_intensive".to_string(),
                duration: Duration::from_millis(20),
            },
        ]);
        assert_eq!(seq.current_label(), "cycle");
        std::thread::sleep(Duration::from_millis(25));
        assert_eq!(seq.current_label(), "cpu_intensive");
        std::thread::sleep(Duration::from_millis(25));
        // Wrapped back to the first entry.
        assert_eq!(seq.current_label(), "cycle");
    }

    #[test]
    fn remaining_hint_shrinks_within_an_entry() {
        let mut seq = WorkloadSequence::new(vec![WorkloadEntry {
            name: "cycle".to_string(),
            duration: Duration::from_millis(100),
        }]);
        let first = seq.remaining_hint().unwrap();
        std::thread::sleep(Duration::from_millis(10));
        let second = seq.remaining_hint().unwrap();
        assert!(second <= first);
    }

    #[test]
    fn from_names_trims_and_skips_empty() {
        let mut seq = WorkloadSequence::from_names(" cycle , ,cpu_intensive", Duration::from_secs(60));
        assert_eq!(seq.current_label(), "cycle");
    }
}
