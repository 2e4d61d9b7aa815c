//! Lifecycle state and the readiness guard.
//!
//! The interpreter is a process-wide resource that is started once, used
//! many times and stopped once. This module tracks where in that sequence a
//! processor is, and counts the boundary calls currently in flight so that
//! shutdown never overlaps a call.
//!
//! The guard is two atomics. A call registers itself in `in_flight` and only
//! then checks that the state is `Ready`; shutdown publishes `Finalizing` and
//! only then waits for `in_flight` to reach zero. With sequentially
//! consistent ordering on both sides, either the call observes `Finalizing`
//! and backs out, or shutdown observes the call and waits for it. No lock is
//! held while a call is inside the foreign runtime.

use std::fmt;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::time::Duration;

use crate::error::{Error, Operation, Result};

/// Where a processor is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    /// Nothing has been started.
    Uninitialized,
    /// `initialize` is running.
    Starting,
    /// Interpreter and module are up; boundary calls are allowed.
    Ready,
    /// The interpreter started but the module failed to initialize.
    /// `finalize` is still required.
    Failed,
    /// `finalize` is waiting for in-flight calls or tearing down.
    Finalizing,
    /// Interpreter stopped. A fresh `initialize` is allowed.
    Finalized,
}

impl LifecycleState {
    fn as_u8(self) -> u8 {
        match self {
            LifecycleState::Uninitialized => 0,
            LifecycleState::Starting => 1,
            LifecycleState::Ready => 2,
            LifecycleState::Failed => 3,
            LifecycleState::Finalizing => 4,
            LifecycleState::Finalized => 5,
        }
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => LifecycleState::Uninitialized,
            1 => LifecycleState::Starting,
            2 => LifecycleState::Ready,
            3 => LifecycleState::Failed,
            4 => LifecycleState::Finalizing,
            _ => LifecycleState::Finalized,
        }
    }

    /// True while the interpreter may be running and needs `finalize`.
    pub fn needs_finalize(&self) -> bool {
        matches!(self, LifecycleState::Ready | LifecycleState::Failed)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Uninitialized => "uninitialized",
            LifecycleState::Starting => "starting",
            LifecycleState::Ready => "ready",
            LifecycleState::Failed => "failed",
            LifecycleState::Finalizing => "finalizing",
            LifecycleState::Finalized => "finalized",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
pub(crate) struct Lifecycle {
    state: AtomicU8,
    in_flight: AtomicUsize,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self {
            state: AtomicU8::new(LifecycleState::Uninitialized.as_u8()),
            in_flight: AtomicUsize::new(0),
        }
    }
}

impl Lifecycle {
    pub(crate) fn state(&self) -> LifecycleState {
        LifecycleState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub(crate) fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    fn transition(&self, from: LifecycleState, to: LifecycleState) -> bool {
        self.state
            .compare_exchange(from.as_u8(), to.as_u8(), Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Claim the right to start the interpreter.
    pub(crate) fn begin_start(&self) -> Result<()> {
        if self.transition(LifecycleState::Uninitialized, LifecycleState::Starting)
            || self.transition(LifecycleState::Finalized, LifecycleState::Starting)
        {
            Ok(())
        } else {
            Err(Error::AlreadyInitialized {
                state: self.state(),
            })
        }
    }

    /// Record the outcome of startup.
    pub(crate) fn finish_start(&self, module_ready: bool) {
        let next = if module_ready {
            LifecycleState::Ready
        } else {
            LifecycleState::Failed
        };
        self.state.store(next.as_u8(), Ordering::SeqCst);
    }

    /// Register a boundary call. The call is admitted only while `Ready`.
    pub(crate) fn enter(&self, operation: Operation) -> Result<CallGuard<'_>> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let guard = CallGuard { lifecycle: self };
        match self.state() {
            LifecycleState::Ready => Ok(guard),
            state => Err(Error::NotInitialized { operation, state }),
        }
    }

    /// Close the guard. Returns the state shutdown started from, or `None`
    /// when there is nothing to shut down.
    pub(crate) fn begin_finalize(&self) -> Option<LifecycleState> {
        [LifecycleState::Ready, LifecycleState::Failed]
            .into_iter()
            .find(|&from| self.transition(from, LifecycleState::Finalizing))
    }

    /// Block until every admitted call has returned.
    pub(crate) fn wait_idle(&self, poll: Duration) {
        let mut spins = 0u32;
        while self.in_flight() > 0 {
            if spins < 64 {
                spins += 1;
                std::thread::yield_now();
            } else {
                std::thread::sleep(poll);
            }
        }
    }

    pub(crate) fn finish_finalize(&self) {
        self.state
            .store(LifecycleState::Finalized.as_u8(), Ordering::SeqCst);
    }
}

/// Marks one boundary call as in flight until dropped.
pub(crate) struct CallGuard<'a> {
    lifecycle: &'a Lifecycle,
}

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        self.lifecycle.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_round_trips_through_u8() {
        for state in [
            LifecycleState::Uninitialized,
            LifecycleState::Starting,
            LifecycleState::Ready,
            LifecycleState::Failed,
            LifecycleState::Finalizing,
            LifecycleState::Finalized,
        ] {
            assert_eq!(LifecycleState::from_u8(state.as_u8()), state);
        }
    }

    #[test]
    fn enter_refused_before_start() {
        let lifecycle = Lifecycle::default();
        let result = lifecycle.enter(Operation::RenderChatTemplate);
        assert!(matches!(
            result,
            Err(Error::NotInitialized {
                state: LifecycleState::Uninitialized,
                ..
            })
        ));
        assert_eq!(lifecycle.in_flight(), 0);
    }

    #[test]
    fn enter_admitted_when_ready() {
        let lifecycle = Lifecycle::default();
        lifecycle.begin_start().unwrap();
        lifecycle.finish_start(true);

        let guard = lifecycle.enter(Operation::RenderChatTemplate).unwrap();
        assert_eq!(lifecycle.in_flight(), 1);
        drop(guard);
        assert_eq!(lifecycle.in_flight(), 0);
    }

    #[test]
    fn double_start_rejected() {
        let lifecycle = Lifecycle::default();
        lifecycle.begin_start().unwrap();
        assert!(matches!(
            lifecycle.begin_start(),
            Err(Error::AlreadyInitialized {
                state: LifecycleState::Starting
            })
        ));
    }

    #[test]
    fn failed_start_still_needs_finalize() {
        let lifecycle = Lifecycle::default();
        lifecycle.begin_start().unwrap();
        lifecycle.finish_start(false);

        assert_eq!(lifecycle.state(), LifecycleState::Failed);
        assert!(lifecycle.state().needs_finalize());
        assert!(lifecycle.enter(Operation::ClearCaches).is_err());
        assert_eq!(lifecycle.begin_finalize(), Some(LifecycleState::Failed));
    }

    #[test]
    fn finalize_without_start_is_noop() {
        let lifecycle = Lifecycle::default();
        assert_eq!(lifecycle.begin_finalize(), None);
        assert_eq!(lifecycle.state(), LifecycleState::Uninitialized);
    }

    #[test]
    fn restart_after_finalize() {
        let lifecycle = Lifecycle::default();
        lifecycle.begin_start().unwrap();
        lifecycle.finish_start(true);
        assert_eq!(lifecycle.begin_finalize(), Some(LifecycleState::Ready));
        lifecycle.wait_idle(Duration::from_millis(1));
        lifecycle.finish_finalize();

        lifecycle.begin_start().unwrap();
        assert_eq!(lifecycle.state(), LifecycleState::Starting);
    }
}
