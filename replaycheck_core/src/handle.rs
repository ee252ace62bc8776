//! Instance-local shared handle to a [`Tracker`].
//!
//! Simulation code deep inside a step needs to reach the tracker (for
//! `mark()`), and the driver needs it for `verify`. Instead of a process-wide
//! "current tracker", each simulation instance holds a clone of one
//! `TrackerHandle`. The handle is `!Send`: a tracker belongs to the thread
//! that drives its instance.

use crate::config::TrackerConfig;
use crate::error::TrackerError;
use crate::fingerprint::CallSite;
use crate::tracker::{PassOutcome, Tracker};
use crate::stats::TrackerStats;
use crate::types::{DivergencePoint, SessionId, TrackerState, Verdict};
use crate::window::Window;
use replaycheck_env::ProcessState;
use std::cell::{Cell, RefCell, RefMut};
use std::rc::Rc;
use tracing::{debug, trace};

struct Inner {
    tracker: RefCell<Tracker>,

    /// Set while a state walk runs under `verify`
    in_progress: Cell<bool>,
}

/// Cloneable handle; all clones address the same tracker.
#[derive(Clone)]
pub struct TrackerHandle {
    inner: Rc<Inner>,
}

/// Clears the in-progress flag when the walk finishes, even on error.
struct InProgress<'a>(&'a Cell<bool>);

impl<'a> InProgress<'a> {
    fn enter(flag: &'a Cell<bool>) -> Self {
        flag.set(true);
        Self(flag)
    }
}

impl Drop for InProgress<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

impl TrackerHandle {
    pub fn new(tracker: Tracker) -> Self {
        Self {
            inner: Rc::new(Inner {
                tracker: RefCell::new(tracker),
                in_progress: Cell::new(false),
            }),
        }
    }

    /// Creates a handle to a new (disabled) tracker.
    pub fn with_config(config: TrackerConfig) -> Self {
        Self::new(Tracker::new(config))
    }

    /// True while a verification walk is running.
    pub fn in_progress(&self) -> bool {
        self.inner.in_progress.get()
    }

    /// Runs `f` with exclusive access to the tracker.
    ///
    /// Fails with `Reentrant` when called from inside a verification walk.
    pub fn try_with<R>(&self, f: impl FnOnce(&mut Tracker) -> R) -> Result<R, TrackerError> {
        if self.in_progress() {
            return Err(TrackerError::Reentrant);
        }
        let mut tracker = self
            .inner
            .tracker
            .try_borrow_mut()
            .map_err(|_| TrackerError::Reentrant)?;
        Ok(f(&mut tracker))
    }

    /// Borrows the tracker for a verification call.
    ///
    /// Fails with `Reentrant` when the tracker is already borrowed, e.g. from
    /// inside a `try_with` closure.
    fn borrow_for_verify(&self, call: &str) -> Result<RefMut<'_, Tracker>, TrackerError> {
        self.inner.tracker.try_borrow_mut().map_err(|_| {
            debug!("{} while the tracker is borrowed", call);
            TrackerError::Reentrant
        })
    }

    /// Verifies `state` at `position`; see [`Tracker::verify`].
    ///
    /// Ignored (returns `Verdict::Idle`) while another verification is in
    /// progress.
    pub fn verify<S: ProcessState + ?Sized>(
        &self,
        position: u64,
        state: &mut S,
    ) -> Result<Verdict, TrackerError> {
        if self.in_progress() {
            trace!("ignoring nested verify at {}", position);
            return Ok(Verdict::Idle);
        }
        let mut tracker = self.borrow_for_verify("verify")?;
        let _guard = InProgress::enter(&self.inner.in_progress);
        tracker.verify(position, state)
    }

    /// Verifies `state` at the active session's next position.
    pub fn verify_next<S: ProcessState + ?Sized>(
        &self,
        state: &mut S,
    ) -> Result<Verdict, TrackerError> {
        if self.in_progress() {
            trace!("ignoring nested verify_next");
            return Ok(Verdict::Idle);
        }
        let mut tracker = self.borrow_for_verify("verify_next")?;
        let _guard = InProgress::enter(&self.inner.in_progress);
        tracker.verify_next(state)
    }

    /// Records the caller's location as a call-site marker.
    #[track_caller]
    pub fn mark(&self) {
        let site = CallSite::caller();
        if self.in_progress() {
            return;
        }
        match self.inner.tracker.try_borrow_mut() {
            Ok(mut tracker) => tracker.mark_at(site),
            Err(_) => debug!("dropping marker {} while the tracker is borrowed", site),
        }
    }

    pub fn reset(&self, window: Window) -> Result<(), TrackerError> {
        self.try_with(|t| t.reset(window))
    }

    pub fn start(&self) -> Result<(), TrackerError> {
        self.try_with(|t| t.start())
    }

    pub fn disable(&self) -> Result<(), TrackerError> {
        self.try_with(|t| t.disable())
    }

    pub fn set_session(&self, session: SessionId) -> Result<(), TrackerError> {
        self.try_with(|t| t.set_session(session))
    }

    pub fn disable_session(&self) -> Result<(), TrackerError> {
        self.try_with(|t| t.disable_session())
    }

    pub fn begin_pass(&self) -> Result<(), TrackerError> {
        self.try_with(|t| t.begin_pass())?
    }

    pub fn end_pass(&self) -> Result<PassOutcome, TrackerError> {
        self.try_with(|t| t.end_pass())?
    }

    /// False while busy as well as when no failure is recorded.
    pub fn is_failure(&self) -> bool {
        self.try_with(|t| t.is_failure()).unwrap_or(false)
    }

    /// `-1` while busy as well as when no divergence is recorded.
    pub fn divergence_position(&self) -> i64 {
        self.try_with(|t| t.divergence_position()).unwrap_or(-1)
    }

    pub fn divergence(&self) -> Option<DivergencePoint> {
        self.try_with(|t| t.divergence().cloned()).ok().flatten()
    }

    pub fn state(&self) -> Result<TrackerState, TrackerError> {
        self.try_with(|t| t.state())
    }

    pub fn window(&self) -> Result<Window, TrackerError> {
        self.try_with(|t| t.window())
    }

    pub fn stats(&self) -> Result<TrackerStats, TrackerError> {
        self.try_with(|t| t.stats().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use replaycheck_env::{CodecError, StateCodec};

    /// State whose walk tries to call back into the tracker.
    struct Nosy {
        handle: TrackerHandle,
        value: u32,
        nested: Vec<Result<Verdict, String>>,
    }

    impl ProcessState for Nosy {
        fn process_state(&mut self, codec: &mut StateCodec<'_>) -> Result<(), CodecError> {
            self.handle.mark();
            let mut inner = Value(0);
            let nested = self.handle.verify(99, &mut inner).map_err(|e| e.to_string());
            self.nested.push(nested);
            assert!(matches!(self.handle.state(), Err(TrackerError::Reentrant)));
            codec.field("value", &mut self.value)
        }
    }

    struct Value(u32);

    impl ProcessState for Value {
        fn process_state(&mut self, codec: &mut StateCodec<'_>) -> Result<(), CodecError> {
            codec.field("v", &mut self.0)
        }
    }

    fn armed() -> TrackerHandle {
        let handle = TrackerHandle::with_config(
            TrackerConfig::default().with_window(Window::exact(0, 10).unwrap()),
        );
        handle.start().unwrap();
        handle.begin_pass().unwrap();
        handle.set_session(1).unwrap();
        handle
    }

    #[test]
    fn test_nested_calls_are_ignored() {
        let handle = armed();
        let mut state = Nosy {
            handle: handle.clone(),
            value: 5,
            nested: Vec::new(),
        };

        assert_eq!(handle.verify(0, &mut state).unwrap(), Verdict::Recorded);
        assert_eq!(state.nested, vec![Ok(Verdict::Idle)]);
        assert!(!handle.in_progress());

        let stats = handle.stats().unwrap();
        assert_eq!(stats.marks, 0);
        assert_eq!(stats.recorded, 1);

        // The nested position was not consumed
        assert_eq!(handle.verify(1, &mut state).unwrap(), Verdict::Recorded);
    }

    #[test]
    fn test_clones_share_tracker() {
        let handle = armed();
        let other = handle.clone();
        let mut value = Value(1);
        handle.verify(0, &mut value).unwrap();
        other.verify(1, &mut value).unwrap();
        assert_eq!(handle.try_with(|t| t.store().len()).unwrap(), 2);
    }

    #[test]
    fn test_mark_through_handle() {
        let handle = armed();
        handle.mark();
        handle.mark();
        assert_eq!(handle.stats().unwrap().marks, 2);
    }

    #[test]
    fn test_try_with_inside_try_with_is_reentrant() {
        let handle = armed();
        let inner = handle.clone();
        let nested = handle.try_with(|_| inner.try_with(|t| t.pass())).unwrap();
        assert!(matches!(nested, Err(TrackerError::Reentrant)));
    }

    #[test]
    fn test_verify_inside_try_with_is_reentrant() {
        let handle = armed();
        let inner = handle.clone();
        let mut value = Value(3);

        let nested = handle.try_with(|_| inner.verify(0, &mut value)).unwrap();
        assert!(matches!(nested, Err(TrackerError::Reentrant)));
        let nested = handle.try_with(|_| inner.verify_next(&mut value)).unwrap();
        assert!(matches!(nested, Err(TrackerError::Reentrant)));

        // Nothing was consumed, position 0 is still next
        assert_eq!(handle.verify(0, &mut value).unwrap(), Verdict::Recorded);
    }

    #[test]
    fn test_disable_session_through_handle() {
        let handle = armed();
        let mut value = Value(1);
        handle.verify(0, &mut value).unwrap();

        handle.disable_session().unwrap();
        handle.disable_session().unwrap();
        assert_eq!(handle.verify(1, &mut value).unwrap(), Verdict::Idle);
        handle.mark();
        assert_eq!(handle.stats().unwrap().marks, 0);
        assert_eq!(handle.try_with(|t| t.store().len()).unwrap(), 1);
    }

    #[test]
    fn test_flag_cleared_after_error() {
        let handle = armed();
        let mut value = Value(0);
        assert!(handle.verify(4, &mut value).is_err());
        assert!(!handle.in_progress());
        assert!(handle.try_with(|_| ()).is_ok());
    }
}
