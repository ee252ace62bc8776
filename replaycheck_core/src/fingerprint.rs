//! Call-site fingerprints.
//!
//! Simulation code calls `mark()` at hot points inside a step. The markers a
//! session emits between two sampled positions are folded into a
//! [`Fingerprint`]: a marker count, an FNV-1a digest over
//! `(order, file, line, column)`, and a bounded prefix kept for diagnostics.
//! Two replays that took the same code path produce equal fingerprints.

use crate::types::DivergenceKind;
use replaycheck_env::Fnv64;
use serde::Serialize;
use std::fmt;
use std::panic::Location;

/// Source location of a `mark()` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct CallSite {
    pub file: &'static str,
    pub line: u32,
    pub column: u32,
}

impl CallSite {
    /// Location of the (track_caller-propagated) caller.
    #[track_caller]
    pub fn caller() -> Self {
        let location = Location::caller();
        Self {
            file: location.file(),
            line: location.line(),
            column: location.column(),
        }
    }
}

impl fmt::Display for CallSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

/// Folded trace of the markers between two sampled positions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Fingerprint {
    /// Number of markers
    count: u64,

    /// Digest over every marker in order
    digest: u64,

    /// First markers, for reporting
    prefix: Vec<CallSite>,
}

impl Fingerprint {
    /// Fingerprint of a trace without markers.
    pub fn empty() -> Self {
        Self {
            count: 0,
            digest: Fnv64::new().finish(),
            prefix: Vec::new(),
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn digest(&self) -> u64 {
        self.digest
    }

    pub fn prefix(&self) -> &[CallSite] {
        &self.prefix
    }

    /// Compares a live fingerprint against this baseline.
    ///
    /// Returns the kind of disagreement and a description of the first
    /// differing marker, or `None` if both traces are identical.
    pub fn compare(&self, live: &Fingerprint) -> Option<(DivergenceKind, String)> {
        if self.count != live.count {
            let mut culprit = format!("expected {} markers, found {}", self.count, live.count);
            if let Some(first) = first_difference(&self.prefix, &live.prefix) {
                culprit.push_str(&format!("; {}", first));
            }
            return Some((DivergenceKind::FingerprintCountMismatch, culprit));
        }

        if self.digest != live.digest {
            let culprit = first_difference(&self.prefix, &live.prefix).unwrap_or_else(|| {
                format!("markers differ beyond the first {}", self.prefix.len())
            });
            return Some((DivergenceKind::FingerprintMismatch, culprit));
        }

        None
    }
}

impl Default for Fingerprint {
    fn default() -> Self {
        Self::empty()
    }
}

fn first_difference(expected: &[CallSite], actual: &[CallSite]) -> Option<String> {
    let longest = expected.len().max(actual.len());
    (0..longest).find_map(|i| match (expected.get(i), actual.get(i)) {
        (Some(a), Some(b)) if a == b => None,
        (Some(a), Some(b)) => Some(format!("marker #{}: expected {}, found {}", i, a, b)),
        (Some(a), None) => Some(format!("marker #{}: expected {}, found none", i, a)),
        (None, Some(b)) => Some(format!("marker #{}: unexpected {}", i, b)),
        (None, None) => None,
    })
}

/// Accumulates markers for one session until the next sampled position.
#[derive(Debug, Clone)]
pub struct TraceRecorder {
    count: u64,
    hasher: Fnv64,
    prefix: Vec<CallSite>,
    prefix_limit: usize,
}

impl TraceRecorder {
    pub fn new(prefix_limit: usize) -> Self {
        Self {
            count: 0,
            hasher: Fnv64::new(),
            prefix: Vec::new(),
            prefix_limit,
        }
    }

    /// Appends one marker.
    pub fn push(&mut self, site: CallSite) {
        self.hasher.write_u64(self.count);
        self.hasher.write(site.file.as_bytes());
        self.hasher.write_u32(site.line);
        self.hasher.write_u32(site.column);
        if self.prefix.len() < self.prefix_limit {
            self.prefix.push(site);
        }
        self.count += 1;
    }

    pub fn len(&self) -> u64 {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Folds the pending markers into a fingerprint and starts a new trace.
    pub fn take(&mut self) -> Fingerprint {
        let fingerprint = Fingerprint {
            count: self.count,
            digest: self.hasher.finish(),
            prefix: std::mem::take(&mut self.prefix),
        };
        self.count = 0;
        self.hasher = Fnv64::new();
        fingerprint
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn site(line: u32) -> CallSite {
        CallSite {
            file: "src/world.rs",
            line,
            column: 9,
        }
    }

    fn trace(lines: &[u32], prefix_limit: usize) -> Fingerprint {
        let mut recorder = TraceRecorder::new(prefix_limit);
        for &line in lines {
            recorder.push(site(line));
        }
        recorder.take()
    }

    #[test]
    fn test_caller_location() {
        let here = CallSite::caller();
        assert!(here.file.ends_with("fingerprint.rs"));
        assert!(here.line > 0);
    }

    #[test]
    fn test_identical_traces_match() {
        assert_eq!(trace(&[10, 20, 30], 32).compare(&trace(&[10, 20, 30], 32)), None);
        assert_eq!(Fingerprint::empty().compare(&trace(&[], 32)), None);
    }

    #[test]
    fn test_count_mismatch() {
        let (kind, culprit) = trace(&[10, 20], 32).compare(&trace(&[10, 20, 20], 32)).unwrap();
        assert_eq!(kind, DivergenceKind::FingerprintCountMismatch);
        assert!(culprit.contains("expected 2 markers, found 3"));
        assert!(culprit.contains("marker #2: unexpected src/world.rs:20:9"));
    }

    #[test]
    fn test_content_mismatch_names_first_marker() {
        let (kind, culprit) = trace(&[10, 20, 30], 32).compare(&trace(&[10, 21, 30], 32)).unwrap();
        assert_eq!(kind, DivergenceKind::FingerprintMismatch);
        assert_eq!(culprit, "marker #1: expected src/world.rs:20:9, found src/world.rs:21:9");
    }

    #[test]
    fn test_order_matters() {
        let (kind, _) = trace(&[10, 20], 32).compare(&trace(&[20, 10], 32)).unwrap();
        assert_eq!(kind, DivergenceKind::FingerprintMismatch);
    }

    #[test]
    fn test_difference_beyond_prefix() {
        let (kind, culprit) = trace(&[1, 2, 3], 2).compare(&trace(&[1, 2, 4], 2)).unwrap();
        assert_eq!(kind, DivergenceKind::FingerprintMismatch);
        assert_eq!(culprit, "markers differ beyond the first 2");
    }

    #[test]
    fn test_take_resets_recorder() {
        let mut recorder = TraceRecorder::new(4);
        recorder.push(site(1));
        assert_eq!(recorder.len(), 1);
        let first = recorder.take();
        assert_eq!(first.count(), 1);
        assert!(recorder.is_empty());
        assert_eq!(recorder.take(), Fingerprint::empty());
    }
}
