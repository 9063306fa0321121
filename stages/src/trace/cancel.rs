//! Cancellation support as a tracer decorator.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, ThreadId};
use std::time::Duration;

use parking_lot::Mutex;

use super::Tracer;
use crate::error::{StageError, StageResult};
use crate::interrupt::{self, Interrupt};

/// Tracer that can cancel the chains built with it.
///
/// Keeps a registry of the stage bodies currently running, keyed by thread, together
/// with the interrupt token of each body. A thread holds a stack of bodies: a stage
/// body that drives another inline chain on the same tracer nests a second entry
/// above its own. [`cancel_chain`](Self::cancel_chain) marks the tracer
/// cancelled so every later `start_proc` fails with [`StageError::Cancelled`], and can
/// additionally raise the interrupt of every running body.
///
/// The registry is scoped to this tracer, not process-wide: share one instance between
/// the chains that should be cancelled together.
///
/// ```ignore
/// let cancel = Arc::new(CancelableTracer::wrapping(trace::console()));
/// let chain = StagedFutureBuilder::async_pool()
///     .tracer(cancel.clone())
///     .then_if(|| slow_lookup())
///     .then(|v| Ok(render(v)));
/// // ... elsewhere
/// cancel.cancel_chain(true);
/// ```
#[derive(Default)]
pub struct CancelableTracer {
    next: Option<Arc<dyn Tracer>>,
    cancelled: AtomicBool,
    /// Bodies running per thread, innermost last. Check-and-register and cancel both
    /// hold this lock, so a body either sees the cancellation or is seen by it.
    active: Mutex<HashMap<ThreadId, Vec<Interrupt>>>,
}

impl CancelableTracer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add cancel support in front of `next`.
    pub fn wrapping(next: Arc<dyn Tracer>) -> Self {
        Self {
            next: Some(next),
            ..Self::default()
        }
    }

    /// Cancel the chain(s) using this tracer.
    ///
    /// Stages that have not started yet fail with [`StageError::Cancelled`]. With
    /// `interrupt_running`, bodies currently executing are asked to stop; whether they do
    /// is up to the body.
    pub fn cancel_chain(&self, interrupt_running: bool) {
        let active = self.active.lock();
        self.cancelled.store(true, Ordering::SeqCst);
        tracing::info!(
            interrupt_running,
            running = active.values().map(Vec::len).sum::<usize>(),
            "cancelling stage chain"
        );

        if interrupt_running {
            for interrupt in active.values().flatten() {
                interrupt.interrupt();
            }
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Number of stage bodies currently running under this tracer.
    pub fn active_count(&self) -> usize {
        self.active.lock().values().map(Vec::len).sum()
    }

    /// A body ended on an interrupted thread: treat the whole chain as cancelled.
    fn handle_interrupted(&self) {
        if !self.cancelled.swap(true, Ordering::SeqCst) {
            tracing::debug!("stage ended after an interrupt, chain marked cancelled");
        }
    }

    /// Pop the innermost body registered by this thread.
    fn unregister(&self) -> Option<Interrupt> {
        let mut active = self.active.lock();
        let id = thread::current().id();
        let bodies = active.get_mut(&id)?;
        let innermost = bodies.pop();
        if bodies.is_empty() {
            active.remove(&id);
        }
        innermost
    }

    fn end(&self) {
        let removed = self.unregister();
        // Abandoned bodies (deadline won) are not a cancellation of the chain.
        let interrupted = removed
            .or_else(interrupt::current)
            .is_some_and(|interrupt| interrupt.was_requested());
        if interrupted {
            self.handle_interrupted();
        }
    }
}

impl Tracer for CancelableTracer {
    fn start_proc(&self) -> StageResult<()> {
        {
            let mut active = self.active.lock();
            if self.cancelled.load(Ordering::SeqCst) {
                return Err(StageError::Cancelled);
            }
            active
                .entry(thread::current().id())
                .or_default()
                .push(interrupt::current().unwrap_or_default());
        }

        if let Some(next) = &self.next {
            if let Err(e) = next.start_proc() {
                // No end callback follows a rejected start.
                self.unregister();
                return Err(e);
            }
        }
        Ok(())
    }

    fn end_proc_success(&self, duration: Duration) {
        self.end();
        if let Some(next) = &self.next {
            next.end_proc_success(duration);
        }
    }

    fn end_proc_fail(&self, error: &StageError, duration: Duration) {
        self.end();
        if let Some(next) = &self.next {
            next.end_proc_fail(error, duration);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::MetricsTracer;

    #[test]
    fn test_start_fails_after_cancel() {
        let tracer = CancelableTracer::new();
        tracer.start_proc().unwrap();
        tracer.end_proc_success(Duration::ZERO);

        tracer.cancel_chain(false);
        assert!(tracer.is_cancelled());
        assert!(matches!(tracer.start_proc(), Err(StageError::Cancelled)));
        assert_eq!(tracer.active_count(), 0);
    }

    #[test]
    fn test_cancel_interrupts_registered_bodies() {
        let tracer = CancelableTracer::new();
        let body = Interrupt::new();
        let _guard = interrupt::enter(body.clone());

        tracer.start_proc().unwrap();
        assert_eq!(tracer.active_count(), 1);

        tracer.cancel_chain(true);
        assert!(body.is_interrupted());

        tracer.end_proc_fail(&StageError::Interrupted, Duration::ZERO);
        assert_eq!(tracer.active_count(), 0);
    }

    #[test]
    fn test_cancel_without_interrupt_leaves_running_body_alone() {
        let tracer = CancelableTracer::new();
        let body = Interrupt::new();
        let _guard = interrupt::enter(body.clone());

        tracer.start_proc().unwrap();
        tracer.cancel_chain(false);
        assert!(!body.is_interrupted());
    }

    #[test]
    fn test_interrupted_end_marks_cancelled() {
        let tracer = CancelableTracer::new();
        let body = Interrupt::new();
        let _guard = interrupt::enter(body.clone());

        tracer.start_proc().unwrap();
        body.interrupt();
        tracer.end_proc_success(Duration::ZERO);

        assert!(tracer.is_cancelled());
    }

    #[test]
    fn test_abandoned_end_does_not_cancel() {
        let tracer = CancelableTracer::new();
        let body = Interrupt::new();
        let _guard = interrupt::enter(body.clone());

        tracer.start_proc().unwrap();
        body.abandon();
        tracer.end_proc_fail(&StageError::Interrupted, Duration::ZERO);

        assert!(!tracer.is_cancelled());
    }

    #[test]
    fn test_nested_body_keeps_outer_registered() {
        let tracer = CancelableTracer::new();
        let outer = Interrupt::new();
        let _outer_guard = interrupt::enter(outer.clone());
        tracer.start_proc().unwrap();

        {
            let inner = Interrupt::new();
            let _inner_guard = interrupt::enter(inner.clone());
            tracer.start_proc().unwrap();
            assert_eq!(tracer.active_count(), 2);
            tracer.end_proc_success(Duration::ZERO);
        }
        assert_eq!(tracer.active_count(), 1);
        assert!(!tracer.is_cancelled());

        tracer.cancel_chain(true);
        assert!(outer.is_interrupted());

        tracer.end_proc_fail(&StageError::Interrupted, Duration::ZERO);
        assert_eq!(tracer.active_count(), 0);
    }

    #[test]
    fn test_rejected_nested_start_keeps_outer_registered() {
        /// Accepts the first start only.
        #[derive(Default)]
        struct FirstOnly(std::sync::atomic::AtomicUsize);
        impl Tracer for FirstOnly {
            fn start_proc(&self) -> StageResult<()> {
                match self.0.fetch_add(1, Ordering::SeqCst) {
                    0 => Ok(()),
                    _ => Err(StageError::Cancelled),
                }
            }
            fn end_proc_success(&self, _duration: Duration) {}
            fn end_proc_fail(&self, _error: &StageError, _duration: Duration) {}
        }

        let tracer = CancelableTracer::wrapping(Arc::new(FirstOnly::default()));
        let outer = Interrupt::new();
        let _guard = interrupt::enter(outer.clone());

        tracer.start_proc().unwrap();
        assert!(tracer.start_proc().is_err());
        assert_eq!(tracer.active_count(), 1);

        tracer.cancel_chain(true);
        assert!(outer.is_interrupted());
    }

    #[test]
    fn test_forwards_to_next() {
        let metrics = Arc::new(MetricsTracer::new());
        let tracer = CancelableTracer::wrapping(metrics.clone());

        tracer.start_proc().unwrap();
        tracer.end_proc_success(Duration::from_millis(1));
        tracer.cancel_chain(false);
        let _ = tracer.start_proc();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.stages_started, 1);
        assert_eq!(snapshot.stages_succeeded, 1);
    }
}
