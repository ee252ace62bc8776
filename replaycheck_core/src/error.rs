//! Error types for the divergence tracker.

use crate::types::DivergencePoint;
use replaycheck_env::CodecError;
use thiserror::Error;

/// Fatal tracker failures.
///
/// Recoverable mismatches are not errors: they narrow the window and surface
/// only through the final `DivergencePoint`.
#[derive(Debug, Error)]
pub enum TrackerError {
    /// Positions did not arrive densely, or the store saw a gap or rewind.
    #[error("Missing calls: expected position {expected}, got {got}")]
    MissingCalls { expected: u64, got: u64 },

    /// A checking pass ended before it reached every baseline snapshot.
    #[error("Truncated pass: reached {reached} of {baseline} baseline snapshots")]
    TruncatedPass { reached: usize, baseline: usize },

    /// The snapshot store hit its size ceiling.
    #[error("Too many snapshots: limit {limit} reached at position {position}")]
    TooManySnapshots { limit: usize, position: u64 },

    /// A snapshot index beyond the stored range was requested.
    #[error("Snapshot index {index} out of range (len {len})")]
    IndexOutOfRange { index: usize, len: usize },

    /// The state codec failed to read a buffer.
    #[error("Corrupted state: {0}")]
    CorruptedState(#[from] CodecError),

    /// Call-site markers differ at single-step granularity.
    #[error("Control flow diverged at {point}")]
    ControlFlowDiverged { point: DivergencePoint },

    /// Localization did not converge within the pass budget.
    #[error("Divergence not isolated after {passes} passes")]
    PassLimit { passes: u32 },

    /// Window bounds violate `start <= end` or `step >= 1`.
    #[error("Invalid window [{start},{end}], step {step}")]
    InvalidWindow { start: u64, end: u64, step: u64 },

    /// Configuration failed validation.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration file could not be parsed.
    #[error("Configuration parse error: {0}")]
    ConfigParse(#[from] serde_json::Error),

    /// Configuration file could not be read.
    #[error("Configuration I/O error: {0}")]
    ConfigIo(#[from] std::io::Error),

    /// The tracker is already borrowed by a verification in progress.
    #[error("Tracker is busy with a verification in progress")]
    Reentrant,

    /// The operation requires an enabled tracker.
    #[error("Tracker is disabled")]
    Disabled,
}

impl TrackerError {
    /// Returns true for failures caused by the replayed process rather than
    /// by tracker configuration or misuse.
    pub fn is_divergence(&self) -> bool {
        matches!(
            self,
            TrackerError::MissingCalls { .. }
                | TrackerError::TruncatedPass { .. }
                | TrackerError::ControlFlowDiverged { .. }
        )
    }
}
