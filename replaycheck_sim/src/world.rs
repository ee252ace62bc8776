//! SimWorld - The simulation harness container.

use crate::context::SimContext;
use crate::fault::FaultPlan;
use crate::oracle::{Oracle, ARENA_HALF_WIDTH};

use nalgebra::Vector3;
use rand::Rng;
use rand_distr::{Distribution, Normal};
use replaycheck_core::TrackerHandle;
use replaycheck_env::{CodecError, ProcessState, Snapshot, StateCodec};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Probability per tick of a random velocity gust.
const GUST_PROBABILITY: f64 = 0.05;

/// Configuration for a simulation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Master seed for determinism
    pub seed: u64,

    /// Number of entities to spawn
    pub num_entities: usize,

    /// Tick rate in Hz
    pub tick_rate_hz: u32,

    /// Steps per replay
    pub steps: u64,

    /// Velocity process noise standard deviation
    pub process_noise_std: f64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            num_entities: 8,
            tick_rate_hz: 30,
            steps: 5_000,
            process_noise_std: 0.05,
        }
    }
}

/// The SimWorld - container for the entire simulation.
pub struct SimWorld {
    /// Configuration
    pub config: SimConfig,

    /// Simulation context (virtual clock, entropy)
    pub context: SimContext,

    /// Ground truth oracle
    pub oracle: Oracle,

    /// Injected determinism faults
    faults: FaultPlan,

    /// 1-based replay number this world belongs to
    replay: u32,

    /// Tracker probe for call-site markers
    probe: Option<TrackerHandle>,

    /// Current tick count
    tick_count: u64,
}

impl SimWorld {
    /// Creates a new SimWorld with the given configuration.
    pub fn new(config: SimConfig) -> Self {
        // Derive separate seeds for different subsystems
        let context_seed = config.seed;
        let physics_seed = config.seed.wrapping_mul(0x9e3779b97f4a7c15);

        let mut context = SimContext::new(context_seed);
        let mut oracle = Oracle::new(physics_seed);
        oracle.set_process_noise(config.process_noise_std);

        let classes = ["drone", "vehicle", "pedestrian"];
        for i in 0..config.num_entities {
            let rng = context.rng();
            let position = Vector3::new(
                rng.gen_range(-500.0..500.0),
                rng.gen_range(-500.0..500.0),
                rng.gen_range(0.0..200.0),
            );
            let velocity = Vector3::new(
                rng.gen_range(-20.0..20.0),
                rng.gen_range(-20.0..20.0),
                rng.gen_range(-2.0..2.0),
            );
            oracle.spawn_entity(position, velocity, classes[i % classes.len()]);
        }

        Self {
            config,
            context,
            oracle,
            faults: FaultPlan::none(),
            replay: 1,
            probe: None,
            tick_count: 0,
        }
    }

    /// Attaches a tracker probe for call-site markers.
    pub fn with_probe(mut self, probe: TrackerHandle) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Injects `faults` as seen by replay number `replay`.
    pub fn with_faults(mut self, faults: FaultPlan, replay: u32) -> Self {
        self.faults = faults;
        self.replay = replay;
        self
    }

    /// Advances simulation by one tick.
    pub fn tick(&mut self) {
        let step = self.tick_count;
        let dt = 1.0 / self.config.tick_rate_hz as f64;

        // Advance virtual time
        self.context.advance_time(Duration::from_secs_f64(dt));

        // Advance physics
        self.mark();
        if self.faults.leaks_entropy(step, self.replay) {
            self.oracle.step_with(dt, self.context.cosmetic_rng());
        } else {
            self.oracle.step(dt);
        }

        if self.faults.flips_branch(step, self.replay) {
            self.mark();
        } else {
            self.mark();
        }
        if self.faults.adds_call(step, self.replay) {
            self.mark();
        }

        self.gust();
        self.tick_count += 1;
    }

    /// Random velocity gust on one entity, driven by the deterministic stream.
    fn gust(&mut self) {
        let count = self.oracle.entity_count() as u64;
        let rng = self.context.rng();
        if count == 0 || !rng.gen_bool(GUST_PROBABILITY) {
            return;
        }
        let id = rng.gen_range(0..count);
        let Ok(normal) = Normal::new(0.0, 1.0) else {
            return;
        };
        let delta_v = Vector3::new(normal.sample(rng), normal.sample(rng), 0.0);
        self.mark();
        self.oracle.nudge(id, delta_v);
    }

    #[track_caller]
    fn mark(&self) {
        if let Some(probe) = &self.probe {
            probe.mark();
        }
    }

    /// Runs `steps` ticks without verification.
    pub fn run(&mut self, steps: u64) {
        for _ in 0..steps {
            self.tick();
        }
    }

    /// Serializes the deterministic state.
    pub fn snapshot(&mut self) -> Result<Snapshot, CodecError> {
        StateCodec::record(self)
    }

    /// Overwrites the deterministic state from a snapshot.
    pub fn restore(&mut self, snapshot: &Snapshot) -> Result<(), CodecError> {
        StateCodec::restore(self, snapshot.as_bytes())
    }

    /// Returns the current simulation time in seconds.
    pub fn time(&self) -> f64 {
        self.context.now().as_secs_f64()
    }

    /// Returns the current tick count.
    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    /// Returns the number of active entities.
    pub fn entity_count(&self) -> usize {
        self.oracle.active_entities().len()
    }

    /// True if every entity is inside the arena.
    pub fn in_bounds(&self) -> bool {
        self.oracle
            .ground_truth_positions()
            .iter()
            .all(|(_, p)| p.iter().all(|c| c.abs() <= ARENA_HALF_WIDTH))
    }
}

impl ProcessState for SimWorld {
    fn process_state(&mut self, codec: &mut StateCodec<'_>) -> Result<(), CodecError> {
        codec.field("tick_count", &mut self.tick_count)?;
        codec.nested("context", &mut self.context)?;
        codec.nested("oracle", &mut self.oracle)
    }
}
