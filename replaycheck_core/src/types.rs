//! Common types shared by the tracker, the handle and the orchestrator.

use serde::Serialize;
use std::fmt;

/// Independently numbered position counter sharing one tracker.
pub type SessionId = u32;

/// Session bound by `localize` for single-instance replays.
pub const PRIMARY_SESSION: SessionId = 1;

/// Lifecycle of a tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackerState {
    /// Every call is a no-op.
    Disabled,

    /// The store is empty; sampled positions are recorded.
    Recording,

    /// A baseline exists; sampled positions are checked against it.
    Checking,

    /// The divergence is isolated. Nothing else happens until `reset`.
    Found,
}

impl fmt::Display for TrackerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TrackerState::Disabled => "disabled",
            TrackerState::Recording => "recording",
            TrackerState::Checking => "checking",
            TrackerState::Found => "found",
        };
        write!(f, "{}", name)
    }
}

/// What kind of disagreement was observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DivergenceKind {
    /// Snapshot bytes differ.
    StateMismatch,

    /// Same number of call-site markers, different content.
    FingerprintMismatch,

    /// Different number of call-site markers.
    FingerprintCountMismatch,
}

impl DivergenceKind {
    pub fn is_control_flow(&self) -> bool {
        !matches!(self, DivergenceKind::StateMismatch)
    }
}

impl fmt::Display for DivergenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DivergenceKind::StateMismatch => "state mismatch",
            DivergenceKind::FingerprintMismatch => "fingerprint mismatch",
            DivergenceKind::FingerprintCountMismatch => "fingerprint count mismatch",
        };
        write!(f, "{}", name)
    }
}

/// A position at which a replay disagreed with the baseline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DivergencePoint {
    /// Step position
    pub position: u64,

    /// Kind of disagreement
    pub kind: DivergenceKind,

    /// First differing field path or call-site marker, if known
    pub culprit: Option<String>,
}

impl DivergencePoint {
    pub fn new(position: u64, kind: DivergenceKind) -> Self {
        Self {
            position,
            kind,
            culprit: None,
        }
    }

    pub fn with_culprit(mut self, culprit: impl Into<String>) -> Self {
        self.culprit = Some(culprit.into());
        self
    }
}

impl fmt::Display for DivergencePoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "step {} ({})", self.position, self.kind)?;
        if let Some(culprit) = &self.culprit {
            write!(f, ": {}", culprit)?;
        }
        Ok(())
    }
}

/// Result of one `verify` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Nothing happened: position outside the window, no session bound,
    /// tracker disabled, or the pass already diverged.
    Idle,

    /// Snapshot appended to the baseline.
    Recorded,

    /// Live state and fingerprint agree with the baseline.
    Matched,

    /// Coarse mismatch; the window narrows when the pass ends.
    Diverged(DivergencePoint),

    /// Mismatch at single-step granularity; localization is complete.
    Found(DivergencePoint),
}

impl Verdict {
    /// The mismatch carried by this verdict, if any.
    pub fn divergence(&self) -> Option<&DivergencePoint> {
        match self {
            Verdict::Diverged(point) | Verdict::Found(point) => Some(point),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_divergence_point_display() {
        let point = DivergencePoint::new(1234, DivergenceKind::StateMismatch)
            .with_culprit("oracle.entities[0].position.x");
        assert_eq!(
            point.to_string(),
            "step 1234 (state mismatch): oracle.entities[0].position.x"
        );
    }

    #[test]
    fn test_kind_classification() {
        assert!(!DivergenceKind::StateMismatch.is_control_flow());
        assert!(DivergenceKind::FingerprintMismatch.is_control_flow());
        assert!(DivergenceKind::FingerprintCountMismatch.is_control_flow());
    }
}
