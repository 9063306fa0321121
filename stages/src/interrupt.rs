//! Cooperative interruption for stage bodies.
//!
//! Stage bodies are plain closures running on an executor thread (or inline on the
//! caller's thread), so they cannot be preempted. Instead every invocation gets its own
//! [`Interrupt`] token, installed as the thread's *current* token for the duration of
//! the body. Cancellation tracers and timeouts raise it; the body observes it through
//! [`current()`] and gives up by returning [`StageError::Interrupted`].
//!
//! ```ignore
//! builder.then_if(|| {
//!     let interrupt = stages::interrupt::current().unwrap_or_default();
//!     while !done() {
//!         interrupt.check()?;
//!         step();
//!     }
//!     Ok(Some(result()))
//! })
//! ```

use std::cell::RefCell;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::{StageError, StageResult};

thread_local! {
    static CURRENT: RefCell<Option<Interrupt>> = const { RefCell::new(None) };
}

/// Interrupt request flag shared between a running stage and whoever may cancel it.
#[derive(Clone, Default)]
pub struct Interrupt {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    raised: Mutex<Option<Reason>>,
    cond: Condvar,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reason {
    /// Someone asked the body to stop (cancellation, user code).
    Requested,
    /// Nobody is waiting for the result any more (deadline won, future dropped).
    Abandoned,
}

impl Interrupt {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the interrupt and wake any body blocked in [`sleep`](Self::sleep) or
    /// [`wait`](Self::wait).
    pub fn interrupt(&self) {
        self.raise(Reason::Requested);
    }

    pub fn is_interrupted(&self) -> bool {
        self.inner.raised.lock().is_some()
    }

    /// Raised because the result is no longer awaited.
    pub(crate) fn abandon(&self) {
        self.raise(Reason::Abandoned);
    }

    /// Raised by an explicit [`interrupt`](Self::interrupt) rather than by abandonment.
    pub(crate) fn was_requested(&self) -> bool {
        *self.inner.raised.lock() == Some(Reason::Requested)
    }

    fn raise(&self, reason: Reason) {
        let mut raised = self.inner.raised.lock();
        if raised.is_none() {
            *raised = Some(reason);
        }
        self.inner.cond.notify_all();
    }

    /// `Err(Interrupted)` once the interrupt has been raised.
    pub fn check(&self) -> StageResult<()> {
        if self.is_interrupted() {
            Err(StageError::Interrupted)
        } else {
            Ok(())
        }
    }

    /// Sleep for `duration` unless interrupted first.
    pub fn sleep(&self, duration: Duration) -> StageResult<()> {
        let deadline = Instant::now() + duration;
        let mut raised = self.inner.raised.lock();
        while raised.is_none() {
            if self.inner.cond.wait_until(&mut raised, deadline).timed_out() {
                return match *raised {
                    Some(_) => Err(StageError::Interrupted),
                    None => Ok(()),
                };
            }
        }
        Err(StageError::Interrupted)
    }

    /// Block until interrupted. Always returns [`StageError::Interrupted`].
    pub fn wait(&self) -> StageError {
        let mut raised = self.inner.raised.lock();
        while raised.is_none() {
            self.inner.cond.wait(&mut raised);
        }
        StageError::Interrupted
    }

    #[cfg(test)]
    pub(crate) fn same_as(&self, other: &Interrupt) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for Interrupt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Interrupt")
            .field("interrupted", &self.is_interrupted())
            .finish()
    }
}

/// Interrupt token of the stage body running on this thread, if any.
pub fn current() -> Option<Interrupt> {
    CURRENT.with(|current| current.borrow().clone())
}

/// Install `interrupt` as the current token until the guard is dropped.
///
/// Inline chains can nest (a stage body awaiting another inline chain), so the previous
/// token is restored rather than cleared.
pub(crate) fn enter(interrupt: Interrupt) -> CurrentGuard {
    let previous = CURRENT.with(|current| current.borrow_mut().replace(interrupt));
    CurrentGuard { previous }
}

pub(crate) struct CurrentGuard {
    previous: Option<Interrupt>,
}

impl Drop for CurrentGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        CURRENT.with(|current| *current.borrow_mut() = previous);
    }
}

/// Raises the interrupt when dropped while still armed.
///
/// Held by the future waiting on an executor-hosted stage: if that future is dropped
/// (timeout won the race, caller gave up) the body is asked to stop.
pub(crate) struct InterruptOnDrop {
    interrupt: Interrupt,
    armed: bool,
}

impl InterruptOnDrop {
    pub(crate) fn new(interrupt: Interrupt) -> Self {
        Self {
            interrupt,
            armed: true,
        }
    }

    pub(crate) fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for InterruptOnDrop {
    fn drop(&mut self) {
        if self.armed {
            tracing::trace!("stage abandoned while running, raising interrupt");
            self.interrupt.abandon();
        }
    }
}
