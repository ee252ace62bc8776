//! Error types for the simulation harness.

use replaycheck_core::TrackerError;
use replaycheck_env::CodecError;
use thiserror::Error;

/// Errors from scenario setup, export and the CLI.
#[derive(Debug, Error)]
pub enum SimError {
    #[error("Tracker error: {0}")]
    Tracker(#[from] TrackerError),

    #[error("State codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}
