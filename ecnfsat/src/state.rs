//! Miscellaneous solver state.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Satisfiability state.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum SatState {
    Unknown,
    Sat,
    Unsat,
    UnsatUnderAssumptions,
    /// The search was cancelled cooperatively; the trail holds a partial
    /// assignment.
    Stopped,
}

impl Default for SatState {
    fn default() -> SatState {
        SatState::Unknown
    }
}

/// Shared handle used to cancel a running search.
///
/// The flag is checked at every propagator-queue boundary; timeouts are
/// implemented by raising it from another thread.
#[derive(Clone, Default)]
pub struct StopHandle {
    flag: Arc<AtomicBool>,
}

impl StopHandle {
    /// Request cooperative cancellation of the search.
    pub fn signal_stop(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    /// Whether a stop was requested.
    pub fn stop_requested(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    /// Clear the flag so the next search can run.
    pub fn reset(&self) {
        self.flag.store(false, Ordering::Relaxed);
    }
}

/// Miscellaneous solver state.
///
/// Anything larger or any larger group of related state variables should be
/// moved into a separate part of [`Context`](crate::context::Context).
#[derive(Default)]
pub struct SolverState {
    pub sat_state: SatState,
    pub stop: StopHandle,
    /// Set once the builder's finish pass ran; declarations are frozen after.
    pub finished: bool,
}
