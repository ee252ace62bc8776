//! JSON exporter for divergence reports.
//!
//! Writes one report per scenario run, and optionally the raw baseline
//! snapshot at the divergence position for offline inspection.

use crate::error::SimError;
use crate::runner::ScenarioResult;
use crate::scenarios::Expected;

use replaycheck_core::{DivergencePoint, PassRecord, TrackerStats};
use serde::Serialize;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use uuid::Uuid;

/// Complete report of one scenario run.
#[derive(Debug, Clone, Serialize)]
pub struct DivergenceReport {
    /// Unique ID of this run
    pub run_id: Uuid,

    /// Scenario name
    pub scenario: String,

    /// Seed used
    pub seed: u64,

    /// Steps per replay
    pub steps: u64,

    /// Whether the run ended as expected
    pub passed: bool,

    /// Expected outcome
    pub expected: Expected,

    /// One-line verdict
    pub summary: String,

    /// Isolated divergence
    #[serde(skip_serializing_if = "Option::is_none")]
    pub divergence: Option<DivergencePoint>,

    /// Mismatch that did not reproduce after narrowing
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unreproduced: Option<DivergencePoint>,

    /// Fatal tracker error
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Pass history
    pub passes: Vec<PassRecord>,

    /// Tracker counters
    pub stats: TrackerStats,

    /// Size of the baseline snapshot at the divergence position
    #[serde(skip_serializing_if = "Option::is_none")]
    pub baseline_bytes: Option<usize>,

    /// FNV-1a checksum of that snapshot
    #[serde(skip_serializing_if = "Option::is_none")]
    pub baseline_checksum: Option<String>,
}

impl DivergenceReport {
    /// Builds a report from a scenario result.
    pub fn from_result(result: &ScenarioResult) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            scenario: result.scenario.name().to_string(),
            seed: result.seed,
            steps: result.steps,
            passed: result.passed,
            expected: result.expected,
            summary: result.summary.clone(),
            divergence: result.divergence.clone(),
            unreproduced: result.unreproduced.clone(),
            error: result.error.clone(),
            passes: result.passes.clone(),
            stats: result.stats.clone(),
            baseline_bytes: result.baseline.as_ref().map(|s| s.len()),
            baseline_checksum: result
                .baseline
                .as_ref()
                .map(|s| format!("{:016x}", s.checksum())),
        }
    }

    /// Serializes the report as pretty JSON.
    pub fn to_json(&self) -> Result<String, SimError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Writes to a JSON file.
    pub fn write_to_file(&self, path: impl AsRef<Path>) -> Result<(), SimError> {
        let json = self.to_json()?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }
}

/// Writes the raw baseline snapshot of `result`, if one was captured.
///
/// Returns the number of bytes written.
pub fn dump_baseline(
    result: &ScenarioResult,
    path: impl AsRef<Path>,
) -> Result<Option<usize>, SimError> {
    let Some(snapshot) = &result.baseline else {
        return Ok(None);
    };
    std::fs::write(path, snapshot.as_bytes())?;
    Ok(Some(snapshot.len()))
}
