//! Single-drain guard and session bookkeeping

use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::models::{DrainTrigger, SyncSession};

#[derive(Debug, Default)]
struct DrainState {
    running: bool,
    /// Trigger of a request that arrived while a pass was in flight
    rerun: Option<DrainTrigger>,
    current: Option<SyncSession>,
    last: Option<SyncSession>,
}

/// Drain-in-progress flag plus the running and most recent sessions.
///
/// The lock is never held across an await point.
#[derive(Debug, Default)]
pub(super) struct DrainGuard {
    state: Mutex<DrainState>,
}

/// Snapshot of the guard for status reporting
#[derive(Debug, Clone)]
pub(crate) struct DrainSnapshot {
    pub draining: bool,
    pub current: Option<SyncSession>,
    pub last: Option<SyncSession>,
}

impl DrainGuard {
    fn lock(&self) -> MutexGuard<'_, DrainState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim the drain, or note a rerun and return `None` if one is in flight
    pub fn try_begin(&self, trigger: DrainTrigger) -> Option<DrainPermit<'_>> {
        let mut state = self.lock();
        if state.running {
            state.rerun.get_or_insert(trigger);
            return None;
        }

        state.running = true;
        state.current = Some(SyncSession::start(trigger));
        Some(DrainPermit { guard: self })
    }

    pub fn snapshot(&self) -> DrainSnapshot {
        let state = self.lock();
        DrainSnapshot {
            draining: state.running,
            current: state.current.clone(),
            last: state.last.clone(),
        }
    }
}

/// Exclusive right to run drain passes; released on drop
pub(super) struct DrainPermit<'a> {
    guard: &'a DrainGuard,
}

impl DrainPermit<'_> {
    /// Trigger of the pass about to run
    pub fn trigger(&self) -> DrainTrigger {
        self.guard
            .lock()
            .current
            .as_ref()
            .map_or(DrainTrigger::Manual, |session| session.trigger)
    }

    /// Publish progress of the running pass
    pub fn publish(&self, session: &SyncSession) {
        self.guard.lock().current = Some(session.clone());
    }

    /// Record a finished pass. Returns the trigger of a coalesced request if
    /// another pass must run, otherwise releases the drain.
    pub fn complete(&self, session: SyncSession, rerun_allowed: bool) -> Option<DrainTrigger> {
        let mut state = self.guard.lock();
        state.last = Some(session);

        match state.rerun.take().filter(|_| rerun_allowed) {
            Some(trigger) => {
                state.current = Some(SyncSession::start(trigger));
                Some(trigger)
            }
            None => {
                state.current = None;
                state.running = false;
                None
            }
        }
    }
}

impl DrainPermit<'_> {
    /// Release without recording a session, for a drain that never started
    pub fn abandon(self) {
        let mut state = self.guard.lock();
        state.running = false;
        state.current = None;
        state.rerun = None;
    }
}

impl Drop for DrainPermit<'_> {
    fn drop(&mut self) {
        let mut state = self.guard.lock();
        if !state.running {
            return;
        }

        // Pass aborted by an error or cancellation
        if let Some(mut session) = state.current.take() {
            session.finish();
            state.last = Some(session);
        }
        state.running = false;
        state.rerun = None;
    }
}
