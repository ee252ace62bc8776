//! Determinism fault scenarios.

use crate::fault::{Fault, FaultPlan};

use replaycheck_core::{DivergenceKind, TrackerError, Window};
use serde::Serialize;

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioId {
    /// RC-001: no fault, every replay agrees
    Clean,

    /// RC-002: physics noise drawn from the cosmetic stream
    EntropyLeak,

    /// RC-003: alternate code path on every second replay
    BranchFlip,

    /// RC-004: one extra instrumented call on every second replay
    ExtraCall,

    /// RC-005: the driver skips one verify on checking replays
    DroppedProbe,

    /// RC-006: two instances compared inside one pass
    Lockstep,

    /// RC-007: single-step window over a long run, store overflows
    Runaway,

    /// RC-008: long run under the default window
    LongHaul,

    /// RC-009: physics leak on the first checking replay only
    Flaky,
}

/// What a scenario is expected to end with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Expected {
    /// Localization reports no divergence
    Clean,

    /// Localization isolates a divergence of `kind` at `position`
    Divergence { position: u64, kind: DivergenceKind },

    /// A mismatch near `position` is seen once and never reproduced
    Unreproduced { position: u64 },

    /// Replay aborts with `MissingCalls`
    MissingCalls { expected: u64, got: u64 },

    /// Replay aborts with `TooManySnapshots`
    TooManySnapshots { limit: usize },
}

impl Expected {
    /// True if `error` is the fatal failure this expectation names.
    ///
    /// Control-flow divergences found at single-step resolution surface as
    /// errors and satisfy a `Divergence` expectation of the same kind.
    pub fn matches_error(&self, error: &TrackerError) -> bool {
        match (*self, error) {
            (
                Expected::MissingCalls { expected, got },
                TrackerError::MissingCalls {
                    expected: e,
                    got: g,
                },
            ) => expected == *e && got == *g,
            (
                Expected::TooManySnapshots { limit },
                TrackerError::TooManySnapshots { limit: l, .. },
            ) => limit == *l,
            (
                Expected::Divergence { position, kind },
                TrackerError::ControlFlowDiverged { point },
            ) => point.position == position && point.kind == kind,
            _ => false,
        }
    }
}

/// Everything the runner needs to execute a scenario.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScenarioSetup {
    /// Steps per replay
    pub steps: u64,

    /// Injected faults
    pub faults: FaultPlan,

    /// Initial bisection window
    pub window: Window,

    /// Store ceiling override
    pub max_snapshots: Option<usize>,

    /// Drive two instances under sessions 1 and 2
    pub lockstep: bool,

    /// Expected end of the localization
    pub expected: Expected,
}

/// Stride of the initial window for short scenarios.
pub const SCENARIO_STRIDE: u64 = 100;

/// Store ceiling for the runaway scenario.
pub const RUNAWAY_MAX_SNAPSHOTS: usize = 64;

/// Steps per replay of the long-haul scenario.
pub const LONG_HAUL_STEPS: u64 = 300_000;

/// Places a fault at `permille` of the run.
fn fault_step(steps: u64, permille: u64) -> u64 {
    steps.saturating_mul(permille) / 1000
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::Clean,
            ScenarioId::EntropyLeak,
            ScenarioId::BranchFlip,
            ScenarioId::ExtraCall,
            ScenarioId::DroppedProbe,
            ScenarioId::Lockstep,
            ScenarioId::Runaway,
            ScenarioId::LongHaul,
            ScenarioId::Flaky,
        ]
    }

    /// Returns the scenarios that finish in a few seconds.
    pub fn quick() -> Vec<ScenarioId> {
        Self::all().into_iter().filter(|s| !s.is_long()).collect()
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::Clean => "clean",
            ScenarioId::EntropyLeak => "entropy_leak",
            ScenarioId::BranchFlip => "branch_flip",
            ScenarioId::ExtraCall => "extra_call",
            ScenarioId::DroppedProbe => "dropped_probe",
            ScenarioId::Lockstep => "lockstep",
            ScenarioId::Runaway => "runaway",
            ScenarioId::LongHaul => "long_haul",
            ScenarioId::Flaky => "flaky",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::Clean => "No fault injected, replays must agree",
            ScenarioId::EntropyLeak => {
                "Physics noise leaks from the unverified stream, expect a state mismatch"
            }
            ScenarioId::BranchFlip => {
                "Alternate code path on even replays, expect control flow divergence"
            }
            ScenarioId::ExtraCall => {
                "Extra instrumented call on even replays, expect a marker count mismatch"
            }
            ScenarioId::DroppedProbe => {
                "Driver skips one verify on checking replays, expect missing calls"
            }
            ScenarioId::Lockstep => {
                "Two instances side by side, entropy leak found inside a single pass"
            }
            ScenarioId::Runaway => {
                "Single-step window over the whole run, expect the store ceiling"
            }
            ScenarioId::LongHaul => {
                "300k steps under the default window, entropy leak deep in the run"
            }
            ScenarioId::Flaky => {
                "Entropy leak on one replay only, expect an unreproduced divergence"
            }
        }
    }

    /// Returns true for scenarios that take minutes rather than seconds.
    pub fn is_long(&self) -> bool {
        matches!(self, ScenarioId::LongHaul)
    }

    /// Default steps per replay.
    pub fn default_steps(&self) -> u64 {
        match self {
            ScenarioId::LongHaul => LONG_HAUL_STEPS,
            _ => 5_000,
        }
    }

    /// Builds the scenario for a run of `steps` steps (at least one).
    pub fn setup(&self, steps: u64) -> ScenarioSetup {
        let steps = steps.max(1);
        let last = steps - 1;
        let window = Window::new(0, last, SCENARIO_STRIDE).unwrap_or_default();

        let base = ScenarioSetup {
            steps,
            faults: FaultPlan::none(),
            window,
            max_snapshots: None,
            lockstep: false,
            expected: Expected::Clean,
        };

        match self {
            ScenarioId::Clean => base,
            ScenarioId::EntropyLeak => {
                let at_step = fault_step(steps, 643);
                ScenarioSetup {
                    faults: FaultPlan::none().with(Fault::EntropyLeak { at_step }),
                    expected: Expected::Divergence {
                        position: at_step,
                        kind: DivergenceKind::StateMismatch,
                    },
                    ..base
                }
            }
            ScenarioId::BranchFlip => {
                let at_step = fault_step(steps, 247);
                ScenarioSetup {
                    faults: FaultPlan::none().with(Fault::BranchFlip { at_step }),
                    expected: Expected::Divergence {
                        position: at_step,
                        kind: DivergenceKind::FingerprintMismatch,
                    },
                    ..base
                }
            }
            ScenarioId::ExtraCall => {
                let at_step = fault_step(steps, 500);
                ScenarioSetup {
                    faults: FaultPlan::none().with(Fault::ExtraCall { at_step }),
                    expected: Expected::Divergence {
                        position: at_step,
                        kind: DivergenceKind::FingerprintCountMismatch,
                    },
                    ..base
                }
            }
            ScenarioId::DroppedProbe => {
                let at_step = fault_step(steps, 155).min(last.saturating_sub(1));
                ScenarioSetup {
                    faults: FaultPlan::none().with(Fault::DroppedProbe { at_step }),
                    expected: Expected::MissingCalls {
                        expected: at_step,
                        got: at_step + 1,
                    },
                    ..base
                }
            }
            ScenarioId::Lockstep => {
                let at_step = fault_step(steps, 371);
                ScenarioSetup {
                    faults: FaultPlan::none().with(Fault::EntropyLeak { at_step }),
                    lockstep: true,
                    expected: Expected::Divergence {
                        position: at_step,
                        kind: DivergenceKind::StateMismatch,
                    },
                    ..base
                }
            }
            ScenarioId::Runaway => ScenarioSetup {
                window: Window::exact(0, last).unwrap_or_default(),
                max_snapshots: Some(RUNAWAY_MAX_SNAPSHOTS),
                expected: if steps > RUNAWAY_MAX_SNAPSHOTS as u64 {
                    Expected::TooManySnapshots {
                        limit: RUNAWAY_MAX_SNAPSHOTS,
                    }
                } else {
                    Expected::Clean
                },
                ..base
            },
            ScenarioId::LongHaul => {
                let at_step = fault_step(steps, 411);
                ScenarioSetup {
                    faults: FaultPlan::none().with(Fault::EntropyLeak { at_step }),
                    window: Window::default(),
                    expected: Expected::Divergence {
                        position: at_step,
                        kind: DivergenceKind::StateMismatch,
                    },
                    ..base
                }
            }
            ScenarioId::Flaky => {
                let at_step = fault_step(steps, 450);
                ScenarioSetup {
                    faults: FaultPlan::none().with(Fault::TransientLeak { at_step }),
                    expected: Expected::Unreproduced {
                        position: at_step.div_ceil(SCENARIO_STRIDE) * SCENARIO_STRIDE,
                    },
                    ..base
                }
            }
        }
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "clean" | "rc-001" => Ok(ScenarioId::Clean),
            "entropy_leak" | "entropyleak" | "rc-002" => Ok(ScenarioId::EntropyLeak),
            "branch_flip" | "branchflip" | "rc-003" => Ok(ScenarioId::BranchFlip),
            "extra_call" | "extracall" | "rc-004" => Ok(ScenarioId::ExtraCall),
            "dropped_probe" | "droppedprobe" | "rc-005" => Ok(ScenarioId::DroppedProbe),
            "lockstep" | "rc-006" => Ok(ScenarioId::Lockstep),
            "runaway" | "rc-007" => Ok(ScenarioId::Runaway),
            "long_haul" | "longhaul" | "rc-008" => Ok(ScenarioId::LongHaul),
            "flaky" | "rc-009" => Ok(ScenarioId::Flaky),
            _ => Err(format!("Unknown scenario: {}", s)),
        }
    }
}
