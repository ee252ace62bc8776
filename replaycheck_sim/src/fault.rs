//! Determinism faults that can be injected into the reference simulation.
//!
//! Each fault breaks replay determinism in a different way, so every failure
//! class the tracker distinguishes can be provoked on purpose.

use serde::Serialize;
use std::fmt;

/// A single injected fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Fault {
    /// From `at_step` on, physics noise is drawn from the cosmetic stream.
    EntropyLeak { at_step: u64 },

    /// Like `EntropyLeak`, but only on the first checking replay.
    TransientLeak { at_step: u64 },

    /// At `at_step`, every second replay takes an alternate code path that
    /// leaves the state unchanged.
    BranchFlip { at_step: u64 },

    /// At `at_step`, every second replay makes one extra instrumented call.
    ExtraCall { at_step: u64 },

    /// On every replay after the first, the driver skips `verify` at `at_step`.
    DroppedProbe { at_step: u64 },
}

impl Fault {
    pub fn at_step(&self) -> u64 {
        match *self {
            Fault::EntropyLeak { at_step }
            | Fault::TransientLeak { at_step }
            | Fault::BranchFlip { at_step }
            | Fault::ExtraCall { at_step }
            | Fault::DroppedProbe { at_step } => at_step,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Fault::EntropyLeak { .. } => "entropy_leak",
            Fault::TransientLeak { .. } => "transient_leak",
            Fault::BranchFlip { .. } => "branch_flip",
            Fault::ExtraCall { .. } => "extra_call",
            Fault::DroppedProbe { .. } => "dropped_probe",
        }
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name(), self.at_step())
    }
}

/// Replay index convention: replays are numbered from 1, and the "second"
/// replays of the alternating faults are the even ones.
fn is_alternate(replay: u32) -> bool {
    replay % 2 == 0
}

/// The replay that checks the first baseline.
const FIRST_CHECK: u32 = 2;

/// The set of faults active in one simulation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FaultPlan {
    faults: Vec<Fault>,
}

impl FaultPlan {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn new(faults: Vec<Fault>) -> Self {
        Self { faults }
    }

    pub fn with(mut self, fault: Fault) -> Self {
        self.faults.push(fault);
        self
    }

    pub fn faults(&self) -> &[Fault] {
        &self.faults
    }

    pub fn is_empty(&self) -> bool {
        self.faults.is_empty()
    }

    /// True if physics at `step` draws from the cosmetic stream on `replay`.
    pub fn leaks_entropy(&self, step: u64, replay: u32) -> bool {
        self.faults.iter().any(|f| match *f {
            Fault::EntropyLeak { at_step } => step >= at_step,
            Fault::TransientLeak { at_step } => replay == FIRST_CHECK && step >= at_step,
            _ => false,
        })
    }

    /// True if `step` takes the alternate branch on `replay`.
    pub fn flips_branch(&self, step: u64, replay: u32) -> bool {
        is_alternate(replay)
            && self
                .faults
                .iter()
                .any(|f| matches!(*f, Fault::BranchFlip { at_step } if step == at_step))
    }

    /// True if `step` makes an extra instrumented call on `replay`.
    pub fn adds_call(&self, step: u64, replay: u32) -> bool {
        is_alternate(replay)
            && self
                .faults
                .iter()
                .any(|f| matches!(*f, Fault::ExtraCall { at_step } if step == at_step))
    }

    /// True if the driver skips `verify` at `step` on `replay`.
    pub fn drops_probe(&self, step: u64, replay: u32) -> bool {
        replay > 1
            && self
                .faults
                .iter()
                .any(|f| matches!(*f, Fault::DroppedProbe { at_step } if step == at_step))
    }
}
