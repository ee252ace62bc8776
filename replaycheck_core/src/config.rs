//! Tracker configuration.

use crate::error::TrackerError;
use crate::store::DEFAULT_MAX_SNAPSHOTS;
use crate::window::Window;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default bound on localization passes.
pub const DEFAULT_MAX_PASSES: u32 = 64;

/// Default number of call-site markers kept per fingerprint for reporting.
pub const DEFAULT_FINGERPRINT_PREFIX: usize = 32;

/// Tracker configuration.
///
/// Every field is optional in JSON; missing fields take their defaults.
///
/// ```json
/// { "window": { "start": 0, "end": 5000, "step": 100 }, "max_passes": 32 }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Initial bisection window
    pub window: Window,

    /// Snapshot store ceiling
    pub max_snapshots: usize,

    /// Bound on passes run by `localize`
    pub max_passes: u32,

    /// Whether `mark()` calls are recorded
    pub fingerprints: bool,

    /// Markers kept per fingerprint for diagnostics
    pub fingerprint_prefix: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            window: Window::default(),
            max_snapshots: DEFAULT_MAX_SNAPSHOTS,
            max_passes: DEFAULT_MAX_PASSES,
            fingerprints: true,
            fingerprint_prefix: DEFAULT_FINGERPRINT_PREFIX,
        }
    }
}

impl TrackerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the initial window.
    pub fn with_window(mut self, window: Window) -> Self {
        self.window = window;
        self
    }

    /// Sets the snapshot ceiling.
    pub fn with_max_snapshots(mut self, max_snapshots: usize) -> Self {
        self.max_snapshots = max_snapshots;
        self
    }

    /// Sets the pass budget.
    pub fn with_max_passes(mut self, max_passes: u32) -> Self {
        self.max_passes = max_passes;
        self
    }

    /// Enables or disables call-site fingerprints.
    pub fn with_fingerprints(mut self, enabled: bool) -> Self {
        self.fingerprints = enabled;
        self
    }

    /// Sets how many markers are kept per fingerprint for reporting.
    pub fn with_fingerprint_prefix(mut self, prefix: usize) -> Self {
        self.fingerprint_prefix = prefix;
        self
    }

    /// Parses and validates a JSON document.
    pub fn from_json_str(text: &str) -> Result<Self, TrackerError> {
        let config: TrackerConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a JSON file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, TrackerError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<(), TrackerError> {
        if self.max_snapshots == 0 {
            return Err(TrackerError::Config("max_snapshots must be at least 1".into()));
        }
        if self.max_passes == 0 {
            return Err(TrackerError::Config("max_passes must be at least 1".into()));
        }
        Ok(())
    }
}
