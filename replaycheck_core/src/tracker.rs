//! The divergence Tracker.
//!
//! A Tracker localizes the first step at which repeated replays of the same
//! input sequence stop agreeing. Each pass the driver replays from the start
//! and calls [`Tracker::verify`] after every step:
//!
//! - a sampled position with no baseline entry is **recorded**;
//! - a sampled position with a baseline entry is **checked**, first the
//!   call-site fingerprint, then the state itself.
//!
//! A mismatch in a coarse window marks the pass as diverged; when the pass
//! ends the window narrows around the mismatch and the next pass re-records a
//! baseline at the finer stride. Once the stride is one step, the next
//! reproduced mismatch is the answer. A mismatch that no later pass
//! reproduces ends the localization as unreproduced: the replays are not
//! deterministic, but not at a single isolatable step.
//!
//! ```text
//!   reset ─► Recording ─end_pass─► Checking ─mismatch─► (narrow) ─► Recording ...
//!                                    │      │
//!                       finest mismatch    clean after a mismatch
//!                                    ▼      ▼
//!                                Found    Unreproduced
//! ```

use crate::config::TrackerConfig;
use crate::error::TrackerError;
use crate::fingerprint::{CallSite, Fingerprint, TraceRecorder};
use crate::stats::TrackerStats;
use crate::store::SnapshotStore;
use crate::types::{DivergenceKind, DivergencePoint, SessionId, TrackerState, Verdict};
use crate::window::Window;
use replaycheck_env::{ProcessState, Snapshot, StateCodec};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, error, info, warn};

/// How a pass ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PassOutcome {
    /// A baseline was recorded.
    Baselined { snapshots: usize },

    /// A coarse mismatch narrowed the window.
    Narrowed { from: Window, to: Window, at: u64 },

    /// Every baseline position matched.
    Clean,

    /// Every baseline position matched, but an earlier pass saw `divergence`.
    Unreproduced { divergence: DivergencePoint },

    /// The divergence was isolated.
    Found(DivergencePoint),
}

/// Per-session position cursor and pending call-site trace.
#[derive(Debug, Clone)]
struct SessionCursor {
    /// Next expected position
    next: u64,

    /// Markers since the previous sampled position
    trace: TraceRecorder,
}

impl SessionCursor {
    fn new(prefix_limit: usize) -> Self {
        Self {
            next: 0,
            trace: TraceRecorder::new(prefix_limit),
        }
    }
}

/// Bisecting divergence tracker.
pub struct Tracker {
    config: TrackerConfig,
    state: TrackerState,
    window: Window,
    store: SnapshotStore,

    /// Cursors of the sessions seen this pass
    sessions: BTreeMap<SessionId, SessionCursor>,

    /// Session receiving `verify` and `mark` calls
    active: Option<SessionId>,

    /// Passes since the last reset
    pass: u32,

    /// Baseline length when the current pass began
    baseline_len: usize,

    /// Highest sampled index reached this pass, plus one
    reached: usize,

    /// Coarse mismatch to narrow around when the pass ends
    pending: Option<DivergencePoint>,

    /// Latest mismatch since the last reset, visible through `is_failure`
    failure: Option<DivergencePoint>,

    /// The isolated divergence (state `Found`)
    found: Option<DivergencePoint>,

    stats: TrackerStats,
}

impl Tracker {
    /// Creates a disabled tracker.
    ///
    /// Call [`Tracker::reset`] or [`Tracker::start`] to arm it.
    pub fn new(config: TrackerConfig) -> Self {
        let window = config.window;
        let store = SnapshotStore::new(window, config.max_snapshots);
        Self {
            config,
            state: TrackerState::Disabled,
            window,
            store,
            sessions: BTreeMap::new(),
            active: None,
            pass: 0,
            baseline_len: 0,
            reached: 0,
            pending: None,
            failure: None,
            found: None,
            stats: TrackerStats::default(),
        }
    }

    // =========================================================================
    // LIFECYCLE
    // =========================================================================

    /// Arms the tracker on `window` and discards all previous results.
    pub fn reset(&mut self, window: Window) {
        info!("validating {}", window);
        self.window = window;
        self.store.clear(window);
        self.state = TrackerState::Recording;
        self.sessions.clear();
        self.active = None;
        self.pass = 0;
        self.baseline_len = 0;
        self.reached = 0;
        self.pending = None;
        self.failure = None;
        self.found = None;
        self.stats = TrackerStats::default();
    }

    /// Arms the tracker on the configured window.
    pub fn start(&mut self) {
        self.reset(self.config.window);
    }

    /// Turns every subsequent call into a no-op. Idempotent.
    pub fn disable(&mut self) {
        if self.state != TrackerState::Disabled {
            info!("tracker disabled");
        }
        self.state = TrackerState::Disabled;
        self.active = None;
    }

    /// Binds `session` as the receiver of `verify` and `mark` calls.
    pub fn set_session(&mut self, session: SessionId) {
        self.active = Some(session);
    }

    /// Unbinds the active session; `verify` is a no-op until `set_session`.
    pub fn disable_session(&mut self) {
        self.active = None;
    }

    /// Starts a replay pass.
    ///
    /// Session cursors restart at position 0. Mismatches seen by earlier
    /// passes stay visible until the next reset.
    pub fn begin_pass(&mut self) -> Result<(), TrackerError> {
        if self.state == TrackerState::Disabled {
            return Err(TrackerError::Disabled);
        }
        if self.state == TrackerState::Found {
            return Ok(());
        }

        self.pass += 1;
        self.stats.passes += 1;
        self.sessions.clear();
        self.active = None;
        self.pending = None;
        self.reached = 0;
        self.baseline_len = self.store.len();
        self.state = if self.store.is_empty() {
            TrackerState::Recording
        } else {
            TrackerState::Checking
        };

        info!(
            "pass {}: {} {} ({} baseline snapshots)",
            self.pass,
            self.state,
            self.window,
            self.baseline_len
        );
        Ok(())
    }

    /// Finishes a replay pass and applies its result to the window.
    pub fn end_pass(&mut self) -> Result<PassOutcome, TrackerError> {
        self.active = None;

        if self.state == TrackerState::Disabled {
            return Err(TrackerError::Disabled);
        }
        if let Some(point) = &self.found {
            return Ok(PassOutcome::Found(point.clone()));
        }

        if let Some(point) = self.pending.take() {
            let from = self.window;
            let to = from.narrow(point.position);
            info!("divergence near {}, narrowing {} -> {}", point, from, to);
            info!("validating {}", to);

            self.window = to;
            self.store.clear(to);
            self.state = TrackerState::Recording;
            self.stats.narrowings += 1;
            return Ok(PassOutcome::Narrowed {
                from,
                to,
                at: point.position,
            });
        }

        if self.state == TrackerState::Recording {
            let snapshots = self.store.len();
            info!(
                "pass {}: baseline of {} snapshots ({} bytes)",
                self.pass,
                snapshots,
                self.store.total_bytes()
            );
            self.state = TrackerState::Checking;
            return Ok(PassOutcome::Baselined { snapshots });
        }

        if self.reached < self.baseline_len {
            error!(
                "pass {} ended after {} of {} baseline snapshots",
                self.pass, self.reached, self.baseline_len
            );
            return Err(TrackerError::TruncatedPass {
                reached: self.reached,
                baseline: self.baseline_len,
            });
        }

        if let Some(point) = &self.failure {
            warn!("pass {}: {} did not reproduce in {}", self.pass, point, self.window);
            return Ok(PassOutcome::Unreproduced {
                divergence: point.clone(),
            });
        }

        info!("pass {}: no divergence in {}", self.pass, self.window);
        Ok(PassOutcome::Clean)
    }

    // =========================================================================
    // VERIFICATION
    // =========================================================================

    /// Verifies `state` at `position` for the active session.
    ///
    /// Positions of a session must be `0, 1, 2, ...` within a pass. Only
    /// positions sampled by the window touch the store.
    pub fn verify<S: ProcessState + ?Sized>(
        &mut self,
        position: u64,
        state: &mut S,
    ) -> Result<Verdict, TrackerError> {
        if matches!(self.state, TrackerState::Disabled | TrackerState::Found) {
            return Ok(Verdict::Idle);
        }
        let Some(session) = self.active else {
            return Ok(Verdict::Idle);
        };

        let prefix_limit = self.config.fingerprint_prefix;
        let cursor = self
            .sessions
            .entry(session)
            .or_insert_with(|| SessionCursor::new(prefix_limit));
        if position != cursor.next {
            error!(
                "session {}: expected position {}, got {}",
                session, cursor.next, position
            );
            return Err(TrackerError::MissingCalls {
                expected: cursor.next,
                got: position,
            });
        }
        cursor.next += 1;

        if self.pending.is_some() {
            return Ok(Verdict::Idle);
        }
        let Some(index) = self.window.index_of(position) else {
            return Ok(Verdict::Idle);
        };
        let fingerprint = cursor.trace.take();
        self.reached = self.reached.max(index + 1);

        if index < self.store.len() {
            self.check(session, position, index, fingerprint, state)
        } else {
            self.record(session, position, fingerprint, state)
        }
    }

    /// Verifies `state` at the active session's next position.
    pub fn verify_next<S: ProcessState + ?Sized>(
        &mut self,
        state: &mut S,
    ) -> Result<Verdict, TrackerError> {
        let position = self.next_position();
        self.verify(position, state)
    }

    /// Next position the active session is expected to verify.
    pub fn next_position(&self) -> u64 {
        self.active
            .and_then(|session| self.sessions.get(&session))
            .map_or(0, |cursor| cursor.next)
    }

    /// Records a call-site marker for the active session.
    #[track_caller]
    pub fn mark(&mut self) {
        self.mark_at(CallSite::caller());
    }

    /// Records an explicit call-site marker for the active session.
    pub fn mark_at(&mut self, site: CallSite) {
        if !self.config.fingerprints {
            return;
        }
        if matches!(self.state, TrackerState::Disabled | TrackerState::Found) {
            return;
        }
        let Some(session) = self.active else {
            return;
        };
        let prefix_limit = self.config.fingerprint_prefix;
        self.sessions
            .entry(session)
            .or_insert_with(|| SessionCursor::new(prefix_limit))
            .trace
            .push(site);
        self.stats.marks += 1;
    }

    fn record<S: ProcessState + ?Sized>(
        &mut self,
        session: SessionId,
        position: u64,
        fingerprint: Fingerprint,
        state: &mut S,
    ) -> Result<Verdict, TrackerError> {
        let snapshot = StateCodec::record(state)?;
        let checksum = snapshot.checksum();
        if let Err(e) = self.store.append(position, snapshot, fingerprint) {
            error!("session {}: cannot record step {}: {}", session, position, e);
            return Err(e);
        }

        self.stats.recorded += 1;
        self.stats.observe_bytes(self.store.total_bytes());
        debug!("session {}: recorded step {} ({:016x})", session, position, checksum);
        Ok(Verdict::Recorded)
    }

    fn check<S: ProcessState + ?Sized>(
        &mut self,
        session: SessionId,
        position: u64,
        index: usize,
        fingerprint: Fingerprint,
        state: &mut S,
    ) -> Result<Verdict, TrackerError> {
        self.stats.checked += 1;

        if let Some((kind, culprit)) = self.store.fingerprint(index)?.compare(&fingerprint) {
            let point = DivergencePoint::new(position, kind).with_culprit(culprit);
            if self.window.is_finest() {
                error!("session {}: control flow diverged at {}", session, point);
                self.found(point.clone());
                return Err(TrackerError::ControlFlowDiverged { point });
            }
            return Ok(self.diverged(session, point));
        }

        let mismatch = StateCodec::verify(state, self.store.get(index)?.as_bytes())?;
        let Some(mismatch) = mismatch else {
            debug!("session {}: step {} matches", session, position);
            return Ok(Verdict::Matched);
        };

        let point = DivergencePoint::new(position, DivergenceKind::StateMismatch)
            .with_culprit(mismatch.to_string());
        if self.window.is_finest() {
            info!("session {}: divergence isolated at {}", session, point);
            self.found(point.clone());
            return Ok(Verdict::Found(point));
        }
        Ok(self.diverged(session, point))
    }

    fn diverged(&mut self, session: SessionId, point: DivergencePoint) -> Verdict {
        warn!("session {}: {} in {}", session, point, self.window);
        self.stats.mismatches += 1;
        self.pending = Some(point.clone());
        self.failure = Some(point.clone());
        Verdict::Diverged(point)
    }

    fn found(&mut self, point: DivergencePoint) {
        self.stats.mismatches += 1;
        self.state = TrackerState::Found;
        self.failure = Some(point.clone());
        self.found = Some(point);
    }

    // =========================================================================
    // QUERIES
    // =========================================================================

    /// True once any pass since the last reset has seen a mismatch.
    pub fn is_failure(&self) -> bool {
        self.failure.is_some()
    }

    /// Position of the latest mismatch, or `-1` if none.
    pub fn divergence_position(&self) -> i64 {
        self.failure
            .as_ref()
            .map_or(-1, |point| i64::try_from(point.position).unwrap_or(i64::MAX))
    }

    /// Latest mismatch, if any.
    pub fn divergence(&self) -> Option<&DivergencePoint> {
        self.failure.as_ref()
    }

    /// The isolated divergence, once the tracker is in `Found`.
    pub fn found_divergence(&self) -> Option<&DivergencePoint> {
        self.found.as_ref()
    }

    /// Baseline snapshot at `position` in the current window, if recorded.
    pub fn baseline_at(&self, position: u64) -> Option<&Snapshot> {
        self.store.snapshot_at(position)
    }

    pub fn state(&self) -> TrackerState {
        self.state
    }

    pub fn window(&self) -> Window {
        self.window
    }

    pub fn pass(&self) -> u32 {
        self.pass
    }

    pub fn active_session(&self) -> Option<SessionId> {
        self.active
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn stats(&self) -> &TrackerStats {
        &self.stats
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }
}
