//! Tracker counters.

use serde::Serialize;

/// Counters collected across the passes of one localization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TrackerStats {
    /// Passes started
    pub passes: u32,

    /// Snapshots recorded
    pub recorded: u64,

    /// Positions checked against the baseline
    pub checked: u64,

    /// Mismatches observed (state or fingerprint)
    pub mismatches: u64,

    /// Window narrowings
    pub narrowings: u32,

    /// Call-site markers recorded
    pub marks: u64,

    /// Largest baseline held at once (bytes)
    pub peak_snapshot_bytes: usize,
}

impl TrackerStats {
    pub(crate) fn observe_bytes(&mut self, total: usize) {
        self.peak_snapshot_bytes = self.peak_snapshot_bytes.max(total);
    }
}
