//! Simulation context: virtual clock and entropy sources.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use replaycheck_env::{CodecError, ProcessState, StateCodec};
use std::time::Duration;

/// Simulation context backed by a virtual clock and two generators.
///
/// - `rng` is seeded from the master seed and is part of the verified state.
/// - `cosmetic_rng` is seeded from OS entropy, differs on every run, and is
///   never visited by the state walk. Only presentation-level effects may
///   draw from it.
pub struct SimContext {
    /// Master seed for this simulation
    seed: u64,

    /// Current virtual time (nanoseconds since simulation start)
    virtual_time_ns: u64,

    /// Deterministic RNG
    rng: ChaCha8Rng,

    /// Non-deterministic RNG, excluded from verification
    cosmetic_rng: ChaCha8Rng,
}

impl SimContext {
    /// Creates a new SimContext with the given seed.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            virtual_time_ns: 0,
            rng: ChaCha8Rng::seed_from_u64(seed),
            cosmetic_rng: ChaCha8Rng::seed_from_u64(rand::thread_rng().gen::<u64>()),
        }
    }

    /// Advances virtual time by the given duration.
    pub fn advance_time(&mut self, duration: Duration) {
        self.virtual_time_ns += duration.as_nanos() as u64;
    }

    /// Returns the current virtual time in nanoseconds.
    pub fn time_ns(&self) -> u64 {
        self.virtual_time_ns
    }

    /// Returns the current virtual time.
    pub fn now(&self) -> Duration {
        Duration::from_nanos(self.virtual_time_ns)
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Deterministic generator (verified).
    pub fn rng(&mut self) -> &mut ChaCha8Rng {
        &mut self.rng
    }

    /// Non-deterministic generator (not verified).
    pub fn cosmetic_rng(&mut self) -> &mut ChaCha8Rng {
        &mut self.cosmetic_rng
    }
}

impl ProcessState for SimContext {
    fn process_state(&mut self, codec: &mut StateCodec<'_>) -> Result<(), CodecError> {
        codec.field("seed", &mut self.seed)?;
        codec.field("time_ns", &mut self.virtual_time_ns)?;
        codec.rng("rng", &mut self.rng)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sim_context_time() {
        let mut ctx = SimContext::new(42);
        assert_eq!(ctx.now(), Duration::ZERO);

        ctx.advance_time(Duration::from_secs(1));
        assert_eq!(ctx.now(), Duration::from_secs(1));

        ctx.advance_time(Duration::from_millis(500));
        assert_eq!(ctx.now(), Duration::from_millis(1500));
    }

    #[test]
    fn test_sim_context_deterministic_rng() {
        let mut ctx1 = SimContext::new(42);
        let mut ctx2 = SimContext::new(42);
        assert_eq!(ctx1.rng().gen::<u64>(), ctx2.rng().gen::<u64>());

        let mut ctx3 = SimContext::new(43);
        assert_ne!(ctx1.rng().gen::<u64>(), ctx3.rng().gen::<u64>());
    }

    #[test]
    fn test_cosmetic_rng_is_not_recorded() {
        let mut ctx1 = SimContext::new(7);
        let mut ctx2 = SimContext::new(7);
        ctx1.cosmetic_rng().gen::<u64>();

        let a = StateCodec::record(&mut ctx1).unwrap();
        let b = StateCodec::record(&mut ctx2).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_restore_continues_rng() {
        let mut original = SimContext::new(99);
        original.rng().gen::<u32>();
        original.advance_time(Duration::from_millis(33));
        let snapshot = StateCodec::record(&mut original).unwrap();

        let mut copy = SimContext::new(0);
        StateCodec::restore(&mut copy, snapshot.as_bytes()).unwrap();
        assert_eq!(copy.seed(), 99);
        assert_eq!(copy.time_ns(), original.time_ns());
        assert_eq!(copy.rng().gen::<u64>(), original.rng().gen::<u64>());
    }
}
