//! Scenario runner - localizes the divergence of a fault scenario.

use crate::driver::{LockstepDriver, SimDriver};
use crate::scenarios::{Expected, ScenarioId, ScenarioSetup};
use crate::world::SimConfig;

use replaycheck_core::{
    localize, DivergencePoint, Localization, PassRecord, TrackerConfig, TrackerError,
    TrackerHandle, TrackerStats, Window,
};
use replaycheck_env::Snapshot;
use tracing::{debug, info, warn};

/// Results from running a scenario.
#[derive(Debug, Clone)]
pub struct ScenarioResult {
    /// Scenario that was run
    pub scenario: ScenarioId,

    /// Seed used
    pub seed: u64,

    /// Steps per replay
    pub steps: u64,

    /// Whether the run ended the way the scenario expects
    pub passed: bool,

    /// What the scenario expected
    pub expected: Expected,

    /// The isolated divergence, if any
    pub divergence: Option<DivergencePoint>,

    /// A mismatch that narrowed replays did not reproduce
    pub unreproduced: Option<DivergencePoint>,

    /// Pass history (empty when a replay aborted)
    pub passes: Vec<PassRecord>,

    /// Tracker counters
    pub stats: TrackerStats,

    /// One-line verdict
    pub summary: String,

    /// Fatal tracker error, if the localization aborted
    pub error: Option<String>,

    /// Failure message if the outcome was unexpected
    pub failure_reason: Option<String>,

    /// Baseline snapshot at the divergence position
    pub baseline: Option<Snapshot>,
}

/// Runs fault scenarios.
pub struct ScenarioRunner {
    /// Configuration seed
    seed: u64,

    /// Number of entities
    num_entities: usize,

    /// Tick rate in Hz
    tick_rate_hz: u32,

    /// Steps per replay (scenario default if unset)
    steps: Option<u64>,

    /// Initial window (scenario default if unset)
    window: Option<Window>,

    /// Base tracker configuration
    tracker_config: TrackerConfig,
}

impl ScenarioRunner {
    /// Creates a new scenario runner.
    pub fn new(seed: u64) -> Self {
        let defaults = SimConfig::default();
        Self {
            seed,
            num_entities: defaults.num_entities,
            tick_rate_hz: defaults.tick_rate_hz,
            steps: None,
            window: None,
            tracker_config: TrackerConfig::default(),
        }
    }

    /// Sets the number of simulated entities.
    pub fn with_entities(mut self, num_entities: usize) -> Self {
        self.num_entities = num_entities;
        self
    }

    /// Sets the tick rate.
    pub fn with_tick_rate(mut self, hz: u32) -> Self {
        self.tick_rate_hz = hz;
        self
    }

    /// Overrides the steps per replay.
    pub fn with_steps(mut self, steps: u64) -> Self {
        self.steps = Some(steps);
        self
    }

    /// Overrides the initial window.
    pub fn with_window(mut self, window: Window) -> Self {
        self.window = Some(window);
        self
    }

    /// Sets the base tracker configuration. Its window is replaced by the
    /// scenario's unless `with_window` is used.
    pub fn with_tracker_config(mut self, config: TrackerConfig) -> Self {
        self.tracker_config = config;
        self
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Runs a scenario and returns the result.
    pub fn run(&self, scenario: ScenarioId) -> ScenarioResult {
        info!("Starting scenario: {} (seed={})", scenario.name(), self.seed);
        if scenario.is_long() {
            warn!("{} replays {} steps per pass", scenario, scenario.default_steps());
        }

        let steps = self.steps.unwrap_or_else(|| scenario.default_steps());
        let setup = scenario.setup(steps);
        let sim_config = SimConfig {
            seed: self.seed,
            num_entities: self.num_entities,
            tick_rate_hz: self.tick_rate_hz,
            steps: setup.steps,
            ..Default::default()
        };

        let window = self.window.unwrap_or(setup.window);
        let mut tracker_config = self.tracker_config.clone().with_window(window);
        if let Some(limit) = setup.max_snapshots {
            tracker_config = tracker_config.with_max_snapshots(limit);
        }
        debug!("{}: {:?}", scenario, tracker_config);

        let tracker = TrackerHandle::with_config(tracker_config.clone());
        let outcome = tracker_config
            .validate()
            .and_then(|()| tracker.start())
            .and_then(|()| Self::drive(&tracker, &setup, sim_config));

        let result = self.evaluate(scenario, &setup, &tracker, outcome);
        if result.passed {
            info!("{}: {}", scenario, result.summary);
        } else {
            warn!(
                "{}: {}",
                scenario,
                result.failure_reason.as_deref().unwrap_or("unexpected outcome")
            );
        }
        result
    }

    fn drive(
        tracker: &TrackerHandle,
        setup: &ScenarioSetup,
        config: SimConfig,
    ) -> Result<Localization, TrackerError> {
        if setup.lockstep {
            let mut driver = LockstepDriver::new(config, setup.faults.clone());
            localize(tracker, &mut driver)
        } else {
            let mut driver = SimDriver::new(config, setup.faults.clone());
            localize(tracker, &mut driver)
        }
    }

    fn evaluate(
        &self,
        scenario: ScenarioId,
        setup: &ScenarioSetup,
        tracker: &TrackerHandle,
        outcome: Result<Localization, TrackerError>,
    ) -> ScenarioResult {
        let expected = setup.expected;

        let (passed, divergence, unreproduced, passes, summary, error) = match outcome {
            Ok(localization) => {
                let passed = match expected {
                    Expected::Clean => localization.is_clean(),
                    Expected::Divergence { position, kind } => localization
                        .divergence
                        .as_ref()
                        .is_some_and(|point| point.position == position && point.kind == kind),
                    Expected::Unreproduced { position } => {
                        localization.is_unreproduced()
                            && localization
                                .unreproduced
                                .as_ref()
                                .is_some_and(|point| point.position == position)
                    }
                    Expected::MissingCalls { .. } | Expected::TooManySnapshots { .. } => false,
                };
                let summary = localization.summary();
                (
                    passed,
                    localization.divergence,
                    localization.unreproduced,
                    localization.passes,
                    summary,
                    None,
                )
            }
            Err(e) => {
                let passed = expected.matches_error(&e);
                let divergence = match &e {
                    TrackerError::ControlFlowDiverged { point } => Some(point.clone()),
                    _ => None,
                };
                let summary = match &divergence {
                    Some(point) => Localization {
                        divergence: Some(point.clone()),
                        unreproduced: None,
                        passes: Vec::new(),
                    }
                    .summary(),
                    None => e.to_string(),
                };
                (passed, divergence, None, Vec::new(), summary, Some(e.to_string()))
            }
        };

        let baseline = divergence.as_ref().and_then(|point| {
            tracker
                .try_with(|t| t.baseline_at(point.position).cloned())
                .ok()
                .flatten()
        });
        let stats = tracker.stats().unwrap_or_default();
        let failure_reason =
            (!passed).then(|| format!("expected {:?}, got: {}", expected, summary));

        ScenarioResult {
            scenario,
            seed: self.seed,
            steps: setup.steps,
            passed,
            expected,
            divergence,
            unreproduced,
            passes,
            stats,
            summary,
            error,
            failure_reason,
            baseline,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use replaycheck_core::{DivergenceKind, PassOutcome};

    fn runner() -> ScenarioRunner {
        ScenarioRunner::new(42).with_entities(4).with_steps(1_000)
    }

    #[test]
    fn test_clean_scenario() {
        let result = runner().run(ScenarioId::Clean);
        assert!(result.passed, "{:?}", result.failure_reason);
        assert!(result.divergence.is_none());
        assert_eq!(result.passes.len(), 2);
        assert_eq!(result.summary, "no divergence found in window");
        assert!(result.baseline.is_none());
    }

    #[test]
    fn test_entropy_leak_scenario() {
        let result = runner().run(ScenarioId::EntropyLeak);
        assert!(result.passed, "{:?}", result.failure_reason);

        let point = result.divergence.unwrap();
        assert_eq!(point.position, 643);
        assert_eq!(point.kind, DivergenceKind::StateMismatch);
        assert!(result.summary.starts_with("divergence isolated at step 643"));
        assert!(matches!(result.passes[1].outcome, PassOutcome::Narrowed { at: 700, .. }));
        assert!(result.baseline.is_some());
    }

    #[test]
    fn test_branch_flip_scenario() {
        let result = runner().run(ScenarioId::BranchFlip);
        assert!(result.passed, "{:?}", result.failure_reason);
        assert_eq!(result.divergence.unwrap().kind, DivergenceKind::FingerprintMismatch);
        assert!(result.error.unwrap().starts_with("Control flow diverged at step 247"));
    }

    #[test]
    fn test_extra_call_scenario() {
        let result = runner().run(ScenarioId::ExtraCall);
        assert!(result.passed, "{:?}", result.failure_reason);
        let point = result.divergence.unwrap();
        assert_eq!(point.position, 500);
        assert_eq!(point.kind, DivergenceKind::FingerprintCountMismatch);
        assert!(point.culprit.unwrap().contains("marker #2"));
    }

    #[test]
    fn test_dropped_probe_scenario() {
        let result = runner().run(ScenarioId::DroppedProbe);
        assert!(result.passed, "{:?}", result.failure_reason);
        assert!(result.divergence.is_none());
        assert_eq!(result.stats.passes, 2);
    }

    #[test]
    fn test_lockstep_scenario() {
        let result = runner().run(ScenarioId::Lockstep);
        assert!(result.passed, "{:?}", result.failure_reason);
        assert_eq!(result.divergence.unwrap().position, 371);
    }

    #[test]
    fn test_runaway_scenario() {
        let result = runner().run(ScenarioId::Runaway);
        assert!(result.passed, "{:?}", result.failure_reason);
        assert_eq!(result.stats.recorded, 64);
        assert!(result.error.unwrap().contains("limit 64"));
    }

    #[test]
    fn test_flaky_scenario() {
        let result = runner().run(ScenarioId::Flaky);
        assert!(result.passed, "{:?}", result.failure_reason);
        assert!(result.divergence.is_none());
        assert_eq!(result.unreproduced.unwrap().position, 500);
        assert!(result.summary.contains("not reproduced"));
        assert_eq!(result.passes.len(), 4);
        assert!(matches!(result.passes[3].outcome, PassOutcome::Unreproduced { .. }));
    }

    #[test]
    fn test_unreproduced_run_is_not_clean() {
        let runner = runner();
        let setup = ScenarioId::Clean.setup(1_000);
        let tracker = TrackerHandle::with_config(TrackerConfig::default());
        let point = DivergencePoint::new(500, DivergenceKind::StateMismatch);
        let outcome = Ok(Localization {
            divergence: None,
            unreproduced: Some(point),
            passes: Vec::new(),
        });

        let result = runner.evaluate(ScenarioId::Clean, &setup, &tracker, outcome);
        assert!(!result.passed);
        assert!(result.failure_reason.unwrap().contains("near step 500 not reproduced"));
        assert!(result.unreproduced.is_some());
    }

    #[test]
    fn test_unexpected_outcome_is_reported() {
        let result = runner()
            .with_window(Window::new(0, 100, 10).unwrap())
            .run(ScenarioId::EntropyLeak);
        assert!(!result.passed);
        assert!(result.failure_reason.unwrap().contains("no divergence found in window"));
    }

    #[test]
    fn test_invalid_config_fails_scenario() {
        let result = runner()
            .with_tracker_config(TrackerConfig::default().with_max_passes(0))
            .run(ScenarioId::Clean);
        assert!(!result.passed);
        assert!(result.error.is_some());
    }
}
