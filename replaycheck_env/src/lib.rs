//! # ReplayCheck Env
//!
//! State codec for deterministic replay verification.
//!
//! A process makes its deterministic state visible to the tracker by
//! implementing [`ProcessState`]. The same traversal then serves three
//! purposes through [`StateCodec`]: recording a [`Snapshot`], restoring
//! state from one, and verifying live state against one field by field.
//!
//! Sources of entropy that are allowed to differ between runs (wall clock,
//! cosmetic randomness) are simply not visited.

pub mod codec;
pub mod error;
pub mod state;
pub mod types;

pub use codec::StateCodec;
pub use error::CodecError;
pub use state::{Primitive, ProcessState};
pub use types::{CodecMode, FieldMismatch, FieldPath, Fnv64, MismatchDetail, PathSegment, Snapshot};
