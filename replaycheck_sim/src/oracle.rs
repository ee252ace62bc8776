//! Ground truth oracle for simulation.
//!
//! The Oracle maintains the "God's eye view" of the simulated world:
//! - True positions of all entities
//! - Physics simulation (kinematics with Gaussian process noise)
//!
//! All of it is deterministic state and is visited by the state walk.

use nalgebra::Vector3;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use replaycheck_env::{CodecError, ProcessState, StateCodec};
use serde::Serialize;
use std::collections::BTreeMap;

/// Half-width of the simulated arena (meters).
pub const ARENA_HALF_WIDTH: f64 = 1000.0;

/// A ground truth entity in the simulation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroundTruthEntity {
    /// Unique entity ID
    pub id: u64,

    /// Position [x, y, z] in meters (global frame)
    pub position: Vector3<f64>,

    /// Velocity [vx, vy, vz] in m/s
    pub velocity: Vector3<f64>,

    /// Entity class (e.g., "drone", "vehicle", "pedestrian")
    pub class: String,

    /// Entity is active (not destroyed/removed)
    pub active: bool,
}

impl GroundTruthEntity {
    /// Creates a new entity with initial velocity.
    pub fn with_velocity(
        id: u64,
        position: Vector3<f64>,
        velocity: Vector3<f64>,
        class: &str,
    ) -> Self {
        Self {
            id,
            position,
            velocity,
            class: class.to_string(),
            active: true,
        }
    }
}

impl Default for GroundTruthEntity {
    fn default() -> Self {
        Self::with_velocity(0, Vector3::zeros(), Vector3::zeros(), "")
    }
}

/// Visits the three components of a vector under `label`.
pub fn process_vector(
    codec: &mut StateCodec<'_>,
    label: &'static str,
    v: &mut Vector3<f64>,
) -> Result<(), CodecError> {
    codec.scope(label, |codec| {
        codec.field("x", &mut v.x)?;
        codec.field("y", &mut v.y)?;
        codec.field("z", &mut v.z)
    })
}

impl ProcessState for GroundTruthEntity {
    fn process_state(&mut self, codec: &mut StateCodec<'_>) -> Result<(), CodecError> {
        codec.field("id", &mut self.id)?;
        process_vector(codec, "position", &mut self.position)?;
        process_vector(codec, "velocity", &mut self.velocity)?;
        codec.string("class", &mut self.class)?;
        codec.field("active", &mut self.active)
    }
}

/// The Oracle - maintains ground truth and advances physics.
pub struct Oracle {
    /// Seed of the physics stream
    physics_seed: u64,

    /// RNG for physics (noise, random events)
    physics_rng: ChaCha8Rng,

    /// All ground truth entities, ordered by ID
    entities: BTreeMap<u64, GroundTruthEntity>,

    /// Next entity ID
    next_id: u64,

    /// Current simulation time (seconds)
    current_time: f64,

    /// Velocity process noise standard deviation (m/s per step)
    process_noise_std: f64,
}

impl Oracle {
    /// Creates a new Oracle with the given physics seed.
    pub fn new(physics_seed: u64) -> Self {
        Self {
            physics_seed,
            physics_rng: ChaCha8Rng::seed_from_u64(physics_seed),
            entities: BTreeMap::new(),
            next_id: 0,
            current_time: 0.0,
            process_noise_std: 0.05,
        }
    }

    /// Sets the velocity process noise standard deviation.
    pub fn set_process_noise(&mut self, std_dev: f64) {
        self.process_noise_std = std_dev;
    }

    /// Spawns a new entity and returns its ID.
    pub fn spawn_entity(
        &mut self,
        position: Vector3<f64>,
        velocity: Vector3<f64>,
        class: &str,
    ) -> u64 {
        let id = self.next_id;
        self.next_id += 1;

        let entity = GroundTruthEntity::with_velocity(id, position, velocity, class);
        self.entities.insert(id, entity);

        id
    }

    /// Advances physics by `dt` seconds, drawing process noise from the physics stream.
    pub fn step(&mut self, dt: f64) {
        self.current_time += dt;
        integrate(&mut self.entities, dt, self.process_noise_std, &mut self.physics_rng);
    }

    /// Advances physics by `dt` seconds, drawing process noise from `rng`.
    pub fn step_with<R: Rng + ?Sized>(&mut self, dt: f64, rng: &mut R) {
        self.current_time += dt;
        integrate(&mut self.entities, dt, self.process_noise_std, rng);
    }

    /// Applies a velocity impulse to an entity.
    pub fn nudge(&mut self, id: u64, delta_v: Vector3<f64>) {
        if let Some(entity) = self.entities.get_mut(&id) {
            entity.velocity += delta_v;
        }
    }

    /// Returns the current simulation time.
    pub fn time(&self) -> f64 {
        self.current_time
    }

    /// Returns all active entities.
    pub fn active_entities(&self) -> Vec<&GroundTruthEntity> {
        self.entities.values().filter(|e| e.active).collect()
    }

    /// Returns a specific entity by ID.
    pub fn entity(&self, id: u64) -> Option<&GroundTruthEntity> {
        self.entities.get(&id)
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// Returns ground truth positions for error calculation.
    pub fn ground_truth_positions(&self) -> Vec<(u64, Vector3<f64>)> {
        self.entities
            .values()
            .filter(|e| e.active)
            .map(|e| (e.id, e.position))
            .collect()
    }
}

/// Constant-velocity kinematics with Gaussian velocity noise; entities bounce
/// off the arena walls.
fn integrate<R: Rng + ?Sized>(
    entities: &mut BTreeMap<u64, GroundTruthEntity>,
    dt: f64,
    noise_std: f64,
    rng: &mut R,
) {
    let noise = Normal::new(0.0, noise_std).ok();

    for entity in entities.values_mut().filter(|e| e.active) {
        if let Some(noise) = &noise {
            entity.velocity +=
                Vector3::new(noise.sample(rng), noise.sample(rng), noise.sample(rng));
        }
        entity.position += entity.velocity * dt;

        for axis in 0..3 {
            if entity.position[axis].abs() > ARENA_HALF_WIDTH {
                entity.position[axis] =
                    entity.position[axis].clamp(-ARENA_HALF_WIDTH, ARENA_HALF_WIDTH);
                entity.velocity[axis] = -entity.velocity[axis];
            }
        }
    }
}

impl ProcessState for Oracle {
    fn process_state(&mut self, codec: &mut StateCodec<'_>) -> Result<(), CodecError> {
        codec.field("physics_seed", &mut self.physics_seed)?;
        codec.rng("physics_rng", &mut self.physics_rng)?;
        codec.field("next_id", &mut self.next_id)?;
        codec.field("current_time", &mut self.current_time)?;

        let mut entities: Vec<GroundTruthEntity> = self.entities.values().cloned().collect();
        codec.seq("entities", &mut entities)?;
        if codec.is_restoring() {
            self.entities = entities.into_iter().map(|e| (e.id, e)).collect();
        }
        Ok(())
    }
}
