//! Replay orchestration: run passes until the divergence is isolated.

use crate::error::TrackerError;
use crate::handle::TrackerHandle;
use crate::tracker::PassOutcome;
use crate::types::{DivergencePoint, PRIMARY_SESSION};
use crate::window::Window;
use serde::Serialize;
use tracing::{error, info, warn};

/// Re-runs the simulation from the beginning.
///
/// Every call must replay the identical input sequence and call
/// `tracker.verify` once per step, starting at position 0.
pub trait ReplayDriver {
    fn replay(&mut self, tracker: &TrackerHandle) -> Result<(), TrackerError>;
}

impl<F> ReplayDriver for F
where
    F: FnMut(&TrackerHandle) -> Result<(), TrackerError>,
{
    fn replay(&mut self, tracker: &TrackerHandle) -> Result<(), TrackerError> {
        self(tracker)
    }
}

/// One pass of a localization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PassRecord {
    /// 1-based pass number
    pub pass: u32,

    /// Window the pass ran under
    pub window: Window,

    /// How it ended
    pub outcome: PassOutcome,
}

/// Result of [`localize`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Localization {
    /// The isolated divergence
    pub divergence: Option<DivergencePoint>,

    /// A mismatch seen at a coarse stride that no narrowed replay reproduced
    pub unreproduced: Option<DivergencePoint>,

    /// Pass history
    pub passes: Vec<PassRecord>,
}

impl Localization {
    /// True if every replay agreed.
    pub fn is_clean(&self) -> bool {
        self.divergence.is_none() && self.unreproduced.is_none()
    }

    /// True if a mismatch was seen but could not be isolated.
    pub fn is_unreproduced(&self) -> bool {
        self.divergence.is_none() && self.unreproduced.is_some()
    }

    pub fn pass_count(&self) -> usize {
        self.passes.len()
    }

    /// Human readable verdict.
    pub fn summary(&self) -> String {
        match (&self.divergence, &self.unreproduced) {
            (None, None) => "no divergence found in window".to_string(),
            (None, Some(point)) => format!(
                "divergence near step {} not reproduced, replays are non-deterministic",
                point.position
            ),
            (Some(point), _) => match &point.culprit {
                Some(culprit) => format!(
                    "divergence isolated at step {}, first differing field/marker: {}",
                    point.position, culprit
                ),
                None => format!("divergence isolated at step {} ({})", point.position, point.kind),
            },
        }
    }
}

/// Drives replays until the tracker isolates a divergence or a checking pass
/// comes back clean.
///
/// A clean checking pass after an earlier mismatch yields a localization
/// with `unreproduced` set rather than a clean one.
///
/// The tracker must be armed (`reset` or `start`) beforehand. Each pass binds
/// [`PRIMARY_SESSION`] for the duration of the replay; drivers that run
/// several instances rebind sessions themselves.
pub fn localize<D>(
    tracker: &TrackerHandle,
    driver: &mut D,
) -> Result<Localization, TrackerError>
where
    D: ReplayDriver + ?Sized,
{
    let max_passes = tracker.try_with(|t| t.config().max_passes)?;
    let mut passes = Vec::new();

    loop {
        if passes.len() >= max_passes as usize {
            error!("no convergence after {} passes", max_passes);
            return Err(TrackerError::PassLimit { passes: max_passes });
        }

        let (pass, window) = tracker.try_with(|t| -> Result<_, TrackerError> {
            t.begin_pass()?;
            t.set_session(PRIMARY_SESSION);
            Ok((t.pass(), t.window()))
        })??;

        let replayed = driver.replay(tracker);
        tracker.disable_session()?;
        replayed?;

        let outcome = tracker.end_pass()?;
        passes.push(PassRecord {
            pass,
            window,
            outcome: outcome.clone(),
        });

        match outcome {
            PassOutcome::Found(point) => {
                info!("divergence isolated after {} passes: {}", passes.len(), point);
                return Ok(Localization {
                    divergence: Some(point),
                    unreproduced: None,
                    passes,
                });
            }
            PassOutcome::Clean => {
                info!("no divergence after {} passes", passes.len());
                return Ok(Localization {
                    divergence: None,
                    unreproduced: None,
                    passes,
                });
            }
            PassOutcome::Unreproduced { divergence } => {
                warn!("{} not reproduced after {} passes", divergence, passes.len());
                return Ok(Localization {
                    divergence: None,
                    unreproduced: Some(divergence),
                    passes,
                });
            }
            PassOutcome::Baselined { .. } | PassOutcome::Narrowed { .. } => {}
        }
    }
}
