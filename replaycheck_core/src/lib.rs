//! ReplayCheck Core - Divergence Localization for Deterministic Replay
//!
//! A long-running simulation must produce bit-identical state when it replays
//! the same input sequence. When it does not, this library finds the first
//! step at which two replays disagree:
//! 1. **Snapshot Store**: baseline of serialized state at sampled steps
//! 2. **Fingerprints**: call-site markers that catch control-flow drift between samples
//! 3. **Tracker**: bisects the step window over repeated replays until the stride is one step
//!
//! State is serialized through `replaycheck_env::StateCodec`.

pub mod config;
pub mod error;
pub mod fingerprint;
pub mod handle;
pub mod localize;
pub mod stats;
pub mod store;
pub mod tracker;
pub mod types;
pub mod window;

// Re-export key types for convenience
pub use config::TrackerConfig;
pub use error::TrackerError;
pub use fingerprint::{CallSite, Fingerprint};
pub use handle::TrackerHandle;
pub use localize::{localize, Localization, PassRecord, ReplayDriver};
pub use stats::TrackerStats;
pub use store::SnapshotStore;
pub use tracker::{PassOutcome, Tracker};
pub use types::{DivergenceKind, DivergencePoint, SessionId, TrackerState, Verdict, PRIMARY_SESSION};
pub use window::Window;
