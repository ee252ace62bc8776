//! Snapshot Store: append-only baseline for the current window.

use crate::error::TrackerError;
use crate::fingerprint::Fingerprint;
use crate::window::Window;
use replaycheck_env::Snapshot;

/// Default ceiling on stored snapshots.
pub const DEFAULT_MAX_SNAPSHOTS: usize = 100_000;

/// Dense, index-addressed snapshots and fingerprints of one window.
///
/// Index `i` holds the sample at `window.position_of(i)`. Entries are only
/// ever appended in order; `clear` re-addresses the store to a new window.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    /// Window the indices are relative to
    window: Window,

    /// Serialized state per sampled position
    snapshots: Vec<Snapshot>,

    /// Call-site trace per sampled position
    fingerprints: Vec<Fingerprint>,

    /// Size ceiling
    max_snapshots: usize,

    /// Sum of snapshot sizes
    bytes: usize,
}

impl SnapshotStore {
    pub fn new(window: Window, max_snapshots: usize) -> Self {
        Self {
            window,
            snapshots: Vec::new(),
            fingerprints: Vec::new(),
            max_snapshots,
            bytes: 0,
        }
    }

    /// Drops every entry and re-addresses the store to `window`.
    pub fn clear(&mut self, window: Window) {
        self.window = window;
        self.snapshots.clear();
        self.fingerprints.clear();
        self.bytes = 0;
    }

    /// Appends the sample at `position`; returns its index.
    ///
    /// `position` must be the next unrecorded sample of the window.
    pub fn append(
        &mut self,
        position: u64,
        snapshot: Snapshot,
        fingerprint: Fingerprint,
    ) -> Result<usize, TrackerError> {
        let index = self.snapshots.len();
        if self.window.index_of(position) != Some(index) {
            return Err(TrackerError::MissingCalls {
                expected: self.window.position_of(index),
                got: position,
            });
        }
        if index >= self.max_snapshots {
            return Err(TrackerError::TooManySnapshots {
                limit: self.max_snapshots,
                position,
            });
        }

        self.bytes += snapshot.len();
        self.snapshots.push(snapshot);
        self.fingerprints.push(fingerprint);
        Ok(index)
    }

    pub fn get(&self, index: usize) -> Result<&Snapshot, TrackerError> {
        self.snapshots.get(index).ok_or(TrackerError::IndexOutOfRange {
            index,
            len: self.snapshots.len(),
        })
    }

    pub fn fingerprint(&self, index: usize) -> Result<&Fingerprint, TrackerError> {
        self.fingerprints.get(index).ok_or(TrackerError::IndexOutOfRange {
            index,
            len: self.fingerprints.len(),
        })
    }

    /// Baseline snapshot recorded at `position`, if any.
    pub fn snapshot_at(&self, position: u64) -> Option<&Snapshot> {
        self.window
            .index_of(position)
            .and_then(|index| self.snapshots.get(index))
    }

    pub fn window(&self) -> Window {
        self.window
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn max_snapshots(&self) -> usize {
        self.max_snapshots
    }

    /// Total snapshot bytes held.
    pub fn total_bytes(&self) -> usize {
        self.bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(bytes: &[u8]) -> Snapshot {
        Snapshot::from_bytes(bytes.to_vec())
    }

    #[test]
    fn test_append_in_order() {
        let mut store = SnapshotStore::new(Window::new(100, 500, 100).unwrap(), 10);
        assert_eq!(store.append(100, snap(&[1]), Fingerprint::empty()).unwrap(), 0);
        assert_eq!(store.append(200, snap(&[2, 2]), Fingerprint::empty()).unwrap(), 1);
        assert_eq!(store.len(), 2);
        assert_eq!(store.total_bytes(), 3);
        assert_eq!(store.get(1).unwrap().as_bytes(), &[2, 2]);
        assert_eq!(store.snapshot_at(200).unwrap().as_bytes(), &[2, 2]);
        assert!(store.snapshot_at(300).is_none());
        assert!(store.snapshot_at(250).is_none());
    }

    #[test]
    fn test_gap_is_missing_calls() {
        let mut store = SnapshotStore::new(Window::new(0, 500, 100).unwrap(), 10);
        store.append(0, snap(&[0]), Fingerprint::empty()).unwrap();
        let err = store.append(200, snap(&[2]), Fingerprint::empty()).unwrap_err();
        assert!(matches!(err, TrackerError::MissingCalls { expected: 100, got: 200 }));
    }

    #[test]
    fn test_rewind_is_missing_calls() {
        let mut store = SnapshotStore::new(Window::new(0, 500, 100).unwrap(), 10);
        store.append(0, snap(&[0]), Fingerprint::empty()).unwrap();
        store.append(100, snap(&[1]), Fingerprint::empty()).unwrap();
        let err = store.append(0, snap(&[0]), Fingerprint::empty()).unwrap_err();
        assert!(matches!(err, TrackerError::MissingCalls { expected: 200, got: 0 }));
    }

    #[test]
    fn test_size_ceiling() {
        let mut store = SnapshotStore::new(Window::exact(0, 100).unwrap(), 2);
        store.append(0, snap(&[0]), Fingerprint::empty()).unwrap();
        store.append(1, snap(&[1]), Fingerprint::empty()).unwrap();
        let err = store.append(2, snap(&[2]), Fingerprint::empty()).unwrap_err();
        assert!(matches!(err, TrackerError::TooManySnapshots { limit: 2, position: 2 }));
    }

    #[test]
    fn test_index_out_of_range() {
        let store = SnapshotStore::new(Window::default(), 10);
        assert!(matches!(
            store.get(0),
            Err(TrackerError::IndexOutOfRange { index: 0, len: 0 })
        ));
        assert!(store.fingerprint(3).is_err());
    }

    #[test]
    fn test_clear_readdresses() {
        let mut store = SnapshotStore::new(Window::new(0, 500, 100).unwrap(), 10);
        store.append(0, snap(&[0]), Fingerprint::empty()).unwrap();

        let narrowed = Window::exact(50, 60).unwrap();
        store.clear(narrowed);
        assert!(store.is_empty());
        assert_eq!(store.total_bytes(), 0);
        assert_eq!(store.window(), narrowed);
        assert_eq!(store.append(50, snap(&[5]), Fingerprint::empty()).unwrap(), 0);
    }
}
