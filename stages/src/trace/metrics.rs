//! Stage counters as a tracer decorator.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use super::Tracer;
use crate::error::{StageError, StageResult};

/// Snapshot of a [`MetricsTracer`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChainMetrics {
    pub stages_started: u64,
    pub stages_succeeded: u64,
    pub stages_failed: u64,
    /// Sum of the durations of all finished stage bodies.
    pub busy_duration_ms: u128,
}

impl ChainMetrics {
    /// Stages started but not yet finished.
    pub fn in_flight(&self) -> u64 {
        self.stages_started
            .saturating_sub(self.stages_succeeded + self.stages_failed)
    }
}

/// Counts stage executions (lock-free) and forwards to an optional next tracer.
///
/// All counters are monotonic; delta calculation is the caller's responsibility.
#[derive(Default)]
pub struct MetricsTracer {
    next: Option<Arc<dyn Tracer>>,
    started: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    busy_nanos: AtomicU64,
}

impl MetricsTracer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn wrapping(next: Arc<dyn Tracer>) -> Self {
        Self {
            next: Some(next),
            ..Self::default()
        }
    }

    pub fn snapshot(&self) -> ChainMetrics {
        ChainMetrics {
            stages_started: self.started.load(Ordering::Relaxed),
            stages_succeeded: self.succeeded.load(Ordering::Relaxed),
            stages_failed: self.failed.load(Ordering::Relaxed),
            busy_duration_ms: Duration::from_nanos(self.busy_nanos.load(Ordering::Relaxed))
                .as_millis(),
        }
    }

    fn add_busy(&self, duration: Duration) {
        let nanos = u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX);
        self.busy_nanos.fetch_add(nanos, Ordering::Relaxed);
    }
}

impl Tracer for MetricsTracer {
    fn start_proc(&self) -> StageResult<()> {
        if let Some(next) = &self.next {
            next.start_proc()?;
        }
        self.started.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn end_proc_success(&self, duration: Duration) {
        self.succeeded.fetch_add(1, Ordering::Relaxed);
        self.add_busy(duration);
        if let Some(next) = &self.next {
            next.end_proc_success(duration);
        }
    }

    fn end_proc_fail(&self, error: &StageError, duration: Duration) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        self.add_busy(duration);
        if let Some(next) = &self.next {
            next.end_proc_fail(error, duration);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::CancelableTracer;

    #[test]
    fn test_counts_and_busy_time() {
        let tracer = MetricsTracer::new();
        tracer.start_proc().unwrap();
        tracer.end_proc_success(Duration::from_millis(3));
        tracer.start_proc().unwrap();
        tracer.end_proc_fail(&StageError::Interrupted, Duration::from_millis(4));
        tracer.start_proc().unwrap();

        let snapshot = tracer.snapshot();
        assert_eq!(snapshot.stages_started, 3);
        assert_eq!(snapshot.stages_succeeded, 1);
        assert_eq!(snapshot.stages_failed, 1);
        assert_eq!(snapshot.busy_duration_ms, 7);
        assert_eq!(snapshot.in_flight(), 1);
    }

    #[test]
    fn test_rejected_start_not_counted() {
        let cancel = Arc::new(CancelableTracer::new());
        cancel.cancel_chain(false);
        let tracer = MetricsTracer::wrapping(cancel);

        assert!(tracer.start_proc().is_err());
        assert_eq!(tracer.snapshot().stages_started, 0);
    }
}
