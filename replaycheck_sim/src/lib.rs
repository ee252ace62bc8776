//! ReplayCheck Reference Simulation
//!
//! A small deterministic world (seeded context, ground-truth oracle with
//! bouncing entities) used to exercise the divergence tracker end to end.
//!
//! # Core Principle
//!
//! Every piece of state that must replay identically is visited by the
//! `ProcessState` walk; everything that may legitimately differ between runs
//! (the cosmetic stream) is not. Faults break that contract on purpose:
//! - **Entropy leak**: physics draws from the unverified stream
//! - **Branch flip / extra call**: control flow drifts without touching state
//! - **Dropped probe**: the driver skips a `verify` call
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                     ScenarioRunner                       │
//! │  ┌────────────┐   replay()   ┌────────────────────────┐  │
//! │  │  localize  │─────────────►│ SimDriver / Lockstep   │  │
//! │  └─────┬──────┘              └───────────┬────────────┘  │
//! │        │ TrackerHandle                   │ tick()        │
//! │  ┌─────▼──────┐   verify()   ┌───────────▼────────────┐  │
//! │  │  Tracker   │◄─────────────│ SimWorld               │  │
//! │  │  + Store   │◄── mark() ───│  SimContext + Oracle   │  │
//! │  └────────────┘              └────────────────────────┘  │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use replaycheck_sim::{ScenarioRunner, ScenarioId};
//!
//! let result = ScenarioRunner::new(42).run(ScenarioId::EntropyLeak);
//! println!("{}", result.summary);
//! ```

mod context;
mod driver;
mod error;
mod exporter;
mod fault;
mod oracle;
mod runner;
mod world;
pub mod scenarios;

pub use context::SimContext;
pub use driver::{LockstepDriver, SimDriver, DEFAULT_SYNC_INTERVAL};
pub use error::SimError;
pub use exporter::{dump_baseline, DivergenceReport};
pub use fault::{Fault, FaultPlan};
pub use oracle::{GroundTruthEntity, Oracle, ARENA_HALF_WIDTH};
pub use runner::{ScenarioResult, ScenarioRunner};
pub use scenarios::{Expected, ScenarioId, ScenarioSetup};
pub use world::{SimConfig, SimWorld};
