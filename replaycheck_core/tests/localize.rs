//! End-to-end localization tests.

use replaycheck_core::{
    localize, DivergenceKind, PassOutcome, TrackerConfig, TrackerError, TrackerHandle,
    TrackerState, Window,
};
use replaycheck_env::{CodecError, ProcessState, StateCodec};

/// Cheap deterministic state: a running hash of the positions seen.
struct Accumulator {
    value: u64,
    steps: u64,
}

impl Accumulator {
    fn new() -> Self {
        Self { value: 17, steps: 0 }
    }

    fn step(&mut self, position: u64, corrupt: bool) {
        self.value = self.value.wrapping_mul(31).wrapping_add(position);
        if corrupt {
            self.value ^= 1;
        }
        self.steps += 1;
    }
}

impl ProcessState for Accumulator {
    fn process_state(&mut self, codec: &mut StateCodec<'_>) -> Result<(), CodecError> {
        codec.field("value", &mut self.value)?;
        codec.field("steps", &mut self.steps)
    }
}

/// Driver whose even-numbered replays corrupt the state at `diverge_at`.
fn flaky_driver(
    steps: u64,
    diverge_at: Option<u64>,
) -> impl FnMut(&TrackerHandle) -> Result<(), TrackerError> {
    let mut replays = 0u32;
    move |tracker: &TrackerHandle| {
        replays += 1;
        let broken = replays % 2 == 0;
        let mut state = Accumulator::new();
        for position in 0..steps {
            state.step(position, broken && Some(position) == diverge_at);
            tracker.verify(position, &mut state)?;
        }
        Ok(())
    }
}

/// Routes tracker logs to the test harness; `RUST_LOG=debug` shows every sample.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn armed(config: TrackerConfig) -> TrackerHandle {
    init_tracing();
    let handle = TrackerHandle::with_config(config);
    handle.start().unwrap();
    handle
}

#[test]
fn test_localize_isolates_divergence() {
    let handle = armed(TrackerConfig::default());
    let mut driver = flaky_driver(700_000, Some(512_345));

    let result = localize(&handle, &mut driver).unwrap();
    let point = result.divergence.clone().unwrap();
    assert_eq!(point.position, 512_345);
    assert_eq!(point.kind, DivergenceKind::StateMismatch);
    assert!(point.culprit.as_deref().unwrap().starts_with("value"));

    let windows: Vec<Window> = result.passes.iter().map(|p| p.window).collect();
    assert_eq!(
        windows,
        vec![
            Window::default(),
            Window::default(),
            Window::new(400_000, 600_000, 200).unwrap(),
            Window::new(400_000, 600_000, 200).unwrap(),
            Window::exact(512_000, 512_400).unwrap(),
            Window::exact(512_000, 512_400).unwrap(),
        ]
    );
    assert!(matches!(result.passes[0].outcome, PassOutcome::Baselined { snapshots: 7 }));
    assert!(matches!(result.passes[1].outcome, PassOutcome::Narrowed { at: 600_000, .. }));
    assert!(matches!(result.passes[3].outcome, PassOutcome::Narrowed { at: 512_400, .. }));

    assert_eq!(handle.state().unwrap(), TrackerState::Found);
    assert_eq!(handle.divergence_position(), 512_345);
    assert!(result.summary().starts_with("divergence isolated at step 512345"));

    let stats = handle.stats().unwrap();
    assert_eq!(stats.passes, 6);
    assert_eq!(stats.narrowings, 2);
}

#[test]
fn test_narrowing_from_default_window() {
    let handle = armed(TrackerConfig::default().with_max_passes(2));
    let mut driver = flaky_driver(600_000, Some(450_001));

    // Two passes are not enough to finish, but the first narrowing is visible
    let err = localize(&handle, &mut driver).unwrap_err();
    assert!(matches!(err, TrackerError::PassLimit { passes: 2 }));
    assert_eq!(handle.window().unwrap(), Window::new(300_000, 500_000, 200).unwrap());
}

#[test]
fn test_localize_clean_run() {
    let handle = armed(TrackerConfig::default().with_window(Window::new(0, 9_999, 100).unwrap()));
    let mut driver = flaky_driver(10_000, None);

    let result = localize(&handle, &mut driver).unwrap();
    assert!(result.is_clean());
    assert_eq!(result.pass_count(), 2);
    assert_eq!(result.passes[0].outcome, PassOutcome::Baselined { snapshots: 100 });
    assert_eq!(result.passes[1].outcome, PassOutcome::Clean);
    assert_eq!(result.summary(), "no divergence found in window");
    assert_eq!(handle.divergence_position(), -1);
    assert!(!handle.is_failure());
}

#[test]
fn test_mismatch_on_a_single_replay_is_unreproduced() {
    let window = Window::new(0, 999, 100).unwrap();
    let handle = armed(TrackerConfig::default().with_window(window));
    let mut replays = 0;
    let mut driver = |tracker: &TrackerHandle| -> Result<(), TrackerError> {
        replays += 1;
        let mut state = Accumulator::new();
        for position in 0..1_000 {
            state.step(position, replays == 2 && position == 450);
            tracker.verify(position, &mut state)?;
        }
        Ok(())
    };

    let result = localize(&handle, &mut driver).unwrap();
    assert!(!result.is_clean());
    assert!(result.is_unreproduced());
    assert!(result.divergence.is_none());
    let point = result.unreproduced.clone().unwrap();
    assert_eq!(point.position, 500);
    assert_eq!(point.kind, DivergenceKind::StateMismatch);

    let outcomes: Vec<PassOutcome> = result.passes.iter().map(|p| p.outcome.clone()).collect();
    assert_eq!(outcomes[0], PassOutcome::Baselined { snapshots: 10 });
    assert!(matches!(outcomes[1], PassOutcome::Narrowed { at: 500, .. }));
    assert_eq!(outcomes[2], PassOutcome::Baselined { snapshots: 201 });
    assert_eq!(outcomes[3], PassOutcome::Unreproduced { divergence: point });
    assert!(result.summary().contains("near step 500 not reproduced"));

    // The coarse mismatch stays visible until the tracker is re-armed
    assert!(handle.is_failure());
    assert_eq!(handle.divergence_position(), 500);
    handle.reset(window).unwrap();
    assert!(!handle.is_failure());
    assert_eq!(handle.divergence_position(), -1);
}

#[test]
fn test_divergence_at_origin() {
    let handle = armed(TrackerConfig::default().with_window(Window::new(0, 999, 50).unwrap()));
    let mut driver = flaky_driver(1_000, Some(0));

    let result = localize(&handle, &mut driver).unwrap();
    assert_eq!(result.divergence.unwrap().position, 0);
}

#[test]
fn test_missing_calls_is_fatal() {
    let handle = armed(TrackerConfig::default().with_window(Window::exact(0, 100).unwrap()));
    let mut driver = |tracker: &TrackerHandle| -> Result<(), TrackerError> {
        let mut state = Accumulator::new();
        for position in [0, 1, 3] {
            state.step(position, false);
            tracker.verify(position, &mut state)?;
        }
        Ok(())
    };

    let err = localize(&handle, &mut driver).unwrap_err();
    assert!(matches!(err, TrackerError::MissingCalls { expected: 2, got: 3 }));
    assert!(err.is_divergence());
}

#[test]
fn test_shortened_replay_is_truncated() {
    let handle = armed(TrackerConfig::default().with_window(Window::new(0, 999, 10).unwrap()));
    let mut replays = 0;
    let mut driver = |tracker: &TrackerHandle| -> Result<(), TrackerError> {
        replays += 1;
        let steps = if replays == 1 { 1_000 } else { 600 };
        let mut state = Accumulator::new();
        for position in 0..steps {
            state.step(position, false);
            tracker.verify(position, &mut state)?;
        }
        Ok(())
    };

    let err = localize(&handle, &mut driver).unwrap_err();
    assert!(matches!(err, TrackerError::TruncatedPass { reached: 60, baseline: 100 }));
}

#[test]
fn test_extra_marker_is_control_flow_divergence() {
    let handle = armed(TrackerConfig::default().with_window(Window::new(0, 999, 100).unwrap()));
    let mut replays = 0;
    let mut driver = |tracker: &TrackerHandle| -> Result<(), TrackerError> {
        replays += 1;
        let mut state = Accumulator::new();
        for position in 0..1_000 {
            tracker.mark();
            if replays % 2 == 0 && position == 77 {
                tracker.mark();
            }
            state.step(position, false);
            tracker.verify(position, &mut state)?;
        }
        Ok(())
    };

    let err = localize(&handle, &mut driver).unwrap_err();
    match err {
        TrackerError::ControlFlowDiverged { point } => {
            assert_eq!(point.position, 77);
            assert_eq!(point.kind, DivergenceKind::FingerprintCountMismatch);
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(handle.state().unwrap(), TrackerState::Found);
    assert_eq!(handle.divergence_position(), 77);
}

#[test]
fn test_lockstep_sessions() {
    let handle = armed(TrackerConfig::default().with_window(Window::new(0, 999, 10).unwrap()));
    let mut driver = |tracker: &TrackerHandle| -> Result<(), TrackerError> {
        let mut first = Accumulator::new();
        let mut second = Accumulator::new();
        for position in 0..1_000 {
            first.step(position, false);
            second.step(position, position == 42);

            tracker.set_session(1)?;
            tracker.verify(position, &mut first)?;
            tracker.set_session(2)?;
            tracker.verify(position, &mut second)?;
        }
        Ok(())
    };

    let result = localize(&handle, &mut driver).unwrap();
    assert_eq!(result.divergence.as_ref().unwrap().position, 42);
    assert_eq!(result.pass_count(), 2);
    assert_eq!(
        result.passes[0].outcome,
        PassOutcome::Narrowed {
            from: Window::new(0, 999, 10).unwrap(),
            to: Window::exact(30, 50).unwrap(),
            at: 50,
        }
    );
}

#[test]
fn test_disabled_tracker_cannot_localize() {
    let handle = TrackerHandle::with_config(TrackerConfig::default());
    let mut driver = flaky_driver(10, None);
    assert!(matches!(localize(&handle, &mut driver), Err(TrackerError::Disabled)));
}

#[test]
fn test_trackers_are_independent_across_threads() {
    let workers: Vec<_> = [1_234u64, 3_456]
        .into_iter()
        .map(|diverge_at| {
            std::thread::spawn(move || {
                let window = Window::new(0, 4_999, 100).unwrap();
                let handle = armed(TrackerConfig::default().with_window(window));
                let mut driver = flaky_driver(5_000, Some(diverge_at));
                localize(&handle, &mut driver).unwrap().divergence.unwrap().position
            })
        })
        .collect();

    let found: Vec<u64> = workers.into_iter().map(|w| w.join().unwrap()).collect();
    assert_eq!(found, vec![1_234, 3_456]);
}
