//! The bisection window.
//!
//! A window `{start, end, step}` samples the positions
//! `start, start + step, start + 2*step, ...` up to `end`. After a mismatch at
//! `p` it shrinks to `[max(p - 2*step, 0), p]` with a step of one thousandth
//! of the new span, until the step reaches one.

use crate::error::TrackerError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Contiguous range of positions under bisection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawWindow", into = "RawWindow")]
pub struct Window {
    start: u64,
    end: u64,
    step: u64,
}

impl Window {
    pub const DEFAULT_START: u64 = 0;
    pub const DEFAULT_END: u64 = 2_000_000_000;
    pub const DEFAULT_STEP: u64 = 100_000;

    /// Samples per narrowed window (approximately).
    pub const RESOLUTION: u64 = 1000;

    /// Creates a window, validating `start <= end` and `step >= 1`.
    pub fn new(start: u64, end: u64, step: u64) -> Result<Self, TrackerError> {
        if start > end || step == 0 {
            return Err(TrackerError::InvalidWindow { start, end, step });
        }
        Ok(Self { start, end, step })
    }

    /// Single-step window over `[start, end]`.
    pub fn exact(start: u64, end: u64) -> Result<Self, TrackerError> {
        Self::new(start, end, 1)
    }

    pub fn start(&self) -> u64 {
        self.start
    }

    pub fn end(&self) -> u64 {
        self.end
    }

    pub fn step(&self) -> u64 {
        self.step
    }

    /// `end - start`
    pub fn span(&self) -> u64 {
        self.end - self.start
    }

    /// Number of sampled positions.
    pub fn sample_count(&self) -> u64 {
        self.span() / self.step + 1
    }

    /// True if `position` is sampled by this window.
    pub fn contains(&self, position: u64) -> bool {
        position >= self.start && position <= self.end && (position - self.start) % self.step == 0
    }

    /// Store index of a sampled position.
    pub fn index_of(&self, position: u64) -> Option<usize> {
        if !self.contains(position) {
            return None;
        }
        usize::try_from((position - self.start) / self.step).ok()
    }

    /// Position of the snapshot at `index`.
    pub fn position_of(&self, index: usize) -> u64 {
        self.start.saturating_add((index as u64).saturating_mul(self.step))
    }

    /// True when no further narrowing is possible.
    pub fn is_finest(&self) -> bool {
        self.step == 1 || self.span() == 0
    }

    /// Narrows around a mismatch observed at `position`.
    ///
    /// The result is always strictly narrower than `self`: when
    /// `[position - 2*step, position]` would not be, its start is clamped so
    /// the span shrinks by one.
    pub fn narrow(&self, position: u64) -> Window {
        let end = position;
        let mut start = position.saturating_sub(self.step.saturating_mul(2));

        let old_span = self.span();
        if end - start >= old_span {
            start = end - old_span.saturating_sub(1).min(end);
        }

        let step = ((end - start) / Self::RESOLUTION).max(1);
        Window { start, end, step }
    }
}

impl Default for Window {
    fn default() -> Self {
        Self {
            start: Self::DEFAULT_START,
            end: Self::DEFAULT_END,
            step: Self::DEFAULT_STEP,
        }
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{},{}], {}", self.start, self.end, self.step)
    }
}

/// Unvalidated form used for (de)serialization.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
struct RawWindow {
    start: u64,
    end: u64,
    step: u64,
}

impl Default for RawWindow {
    fn default() -> Self {
        Window::default().into()
    }
}

impl TryFrom<RawWindow> for Window {
    type Error = TrackerError;

    fn try_from(raw: RawWindow) -> Result<Self, Self::Error> {
        Window::new(raw.start, raw.end, raw.step)
    }
}

impl From<Window> for RawWindow {
    fn from(window: Window) -> Self {
        RawWindow {
            start: window.start,
            end: window.end,
            step: window.step,
        }
    }
}
