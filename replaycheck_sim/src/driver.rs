//! Replay drivers for the reference simulation.
//!
//! A driver rebuilds the world from its seed on every replay, so each replay
//! sees the identical input sequence. Only the injected faults (and the
//! cosmetic stream) differ between replays.

use crate::fault::FaultPlan;
use crate::world::{SimConfig, SimWorld};

use replaycheck_core::{ReplayDriver, TrackerError, TrackerHandle};
use replaycheck_env::Snapshot;
use tracing::debug;

/// Default number of steps between lockstep resynchronizations.
pub const DEFAULT_SYNC_INTERVAL: u64 = 10;

/// Replays a single world, verifying once per step.
pub struct SimDriver {
    config: SimConfig,
    faults: FaultPlan,

    /// Replays run so far
    replays: u32,

    /// Last replayed world, kept for inspection
    last: Option<SimWorld>,
}

impl SimDriver {
    pub fn new(config: SimConfig, faults: FaultPlan) -> Self {
        Self {
            config,
            faults,
            replays: 0,
            last: None,
        }
    }

    /// Number of replays run so far.
    pub fn replays(&self) -> u32 {
        self.replays
    }

    /// World state at the end of the last replay.
    pub fn last_world(&mut self) -> Option<&mut SimWorld> {
        self.last.as_mut()
    }
}

impl ReplayDriver for SimDriver {
    fn replay(&mut self, tracker: &TrackerHandle) -> Result<(), TrackerError> {
        self.replays += 1;
        let replay = self.replays;
        debug!("replay {} ({} steps)", replay, self.config.steps);

        let mut world = SimWorld::new(self.config.clone())
            .with_faults(self.faults.clone(), replay)
            .with_probe(tracker.clone());

        for position in 0..self.config.steps {
            world.tick();
            if self.faults.drops_probe(position, replay) {
                debug!("replay {}: skipping verify at {}", replay, position);
                continue;
            }
            tracker.verify(position, &mut world)?;
        }

        self.last = Some(world);
        Ok(())
    }
}

/// Drives two worlds side by side under sessions 1 and 2.
///
/// Session 1 runs ahead by one call at every position, so it records each
/// sampled snapshot and session 2 checks against it within the same pass.
/// The second world is overwritten with the first world's state every
/// `sync_interval` steps.
pub struct LockstepDriver {
    config: SimConfig,
    faults: FaultPlan,
    sync_interval: u64,
    replays: u32,
}

impl LockstepDriver {
    /// Session bound while the first world steps.
    pub const LEADER: u32 = 1;

    /// Session bound while the second world steps.
    pub const FOLLOWER: u32 = 2;

    pub fn new(config: SimConfig, faults: FaultPlan) -> Self {
        Self {
            config,
            faults,
            sync_interval: DEFAULT_SYNC_INTERVAL,
            replays: 0,
        }
    }

    /// Sets the resynchronization interval (at least one step).
    pub fn with_sync_interval(mut self, steps: u64) -> Self {
        self.sync_interval = steps.max(1);
        self
    }

    pub fn replays(&self) -> u32 {
        self.replays
    }

    fn sync(leader: &mut SimWorld, follower: &mut SimWorld) -> Result<(), TrackerError> {
        let snapshot: Snapshot = leader.snapshot()?;
        follower.restore(&snapshot)?;
        Ok(())
    }
}

impl ReplayDriver for LockstepDriver {
    fn replay(&mut self, tracker: &TrackerHandle) -> Result<(), TrackerError> {
        self.replays += 1;
        let replay = self.replays;
        debug!("lockstep replay {} ({} steps)", replay, self.config.steps);

        let mut leader = SimWorld::new(self.config.clone())
            .with_faults(self.faults.clone(), replay)
            .with_probe(tracker.clone());
        let mut follower = SimWorld::new(self.config.clone())
            .with_faults(self.faults.clone(), replay)
            .with_probe(tracker.clone());

        for position in 0..self.config.steps {
            if position % self.sync_interval == 0 {
                Self::sync(&mut leader, &mut follower)?;
            }

            tracker.set_session(Self::LEADER)?;
            leader.tick();
            tracker.verify(position, &mut leader)?;

            tracker.set_session(Self::FOLLOWER)?;
            follower.tick();
            tracker.verify(position, &mut follower)?;
        }

        tracker.disable_session()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fault::Fault;
    use replaycheck_core::{localize, PassOutcome, TrackerConfig, Window};

    fn small_config() -> SimConfig {
        SimConfig {
            seed: 7,
            num_entities: 4,
            steps: 400,
            ..Default::default()
        }
    }

    fn handle(window: Window) -> TrackerHandle {
        let handle = TrackerHandle::with_config(TrackerConfig::default().with_window(window));
        handle.start().unwrap();
        handle
    }

    #[test]
    fn test_clean_replays_agree() {
        let tracker = handle(Window::new(0, 399, 50).unwrap());
        let mut driver = SimDriver::new(small_config(), FaultPlan::none());

        let result = localize(&tracker, &mut driver).unwrap();
        assert!(result.is_clean());
        assert_eq!(driver.replays(), 2);
        assert_eq!(result.passes[0].outcome, PassOutcome::Baselined { snapshots: 8 });
        assert_eq!(driver.last_world().unwrap().tick_count(), 400);
    }

    #[test]
    fn test_entropy_leak_is_isolated() {
        let tracker = handle(Window::new(0, 399, 50).unwrap());
        let plan = FaultPlan::none().with(Fault::EntropyLeak { at_step: 123 });
        let mut driver = SimDriver::new(small_config(), plan);

        let result = localize(&tracker, &mut driver).unwrap();
        let point = result.divergence.unwrap();
        assert_eq!(point.position, 123);
        assert!(point.culprit.unwrap().starts_with("oracle.entities[0]"));
    }

    #[test]
    fn test_dropped_probe_is_missing_call() {
        let tracker = handle(Window::new(0, 399, 50).unwrap());
        let plan = FaultPlan::none().with(Fault::DroppedProbe { at_step: 40 });
        let mut driver = SimDriver::new(small_config(), plan);

        let err = localize(&tracker, &mut driver).unwrap_err();
        assert!(matches!(err, TrackerError::MissingCalls { expected: 40, got: 41 }));
    }

    #[test]
    fn test_lockstep_clean() {
        let tracker = handle(Window::new(0, 399, 20).unwrap());
        let mut driver = LockstepDriver::new(small_config(), FaultPlan::none());

        let result = localize(&tracker, &mut driver).unwrap();
        assert!(result.is_clean());
        assert_eq!(driver.replays(), 2);
    }

    #[test]
    fn test_lockstep_compares_within_a_pass() {
        let tracker = handle(Window::new(0, 399, 20).unwrap());
        let plan = FaultPlan::none().with(Fault::EntropyLeak { at_step: 205 });
        let mut driver = LockstepDriver::new(small_config(), plan).with_sync_interval(1000);

        let result = localize(&tracker, &mut driver).unwrap();
        assert!(matches!(
            result.passes[0].outcome,
            PassOutcome::Narrowed { at: 220, .. }
        ));
        assert_eq!(result.divergence.unwrap().position, 205);
    }
}
