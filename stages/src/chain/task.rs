//! Running one stage body: tracing, interruption, panics and executor hand-off.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::sync::oneshot;

use super::stage::{Deadline, ExecutionMode};
use crate::error::StageError;
use crate::executor::Task;
use crate::interrupt::{self, Interrupt, InterruptOnDrop};
use crate::outcome::Settled;
use crate::timeout::TimerService;
use crate::trace::Tracer;

/// Everything a chain needs to run its stages. Shared by every stage of one chain.
#[derive(Clone, Default)]
pub(crate) struct Runner {
    pub(crate) mode: ExecutionMode,
    pub(crate) tracer: Option<Arc<dyn Tracer>>,
    /// `None` uses the shared timer, started on first use.
    pub(crate) timer: Option<TimerService>,
}

impl Runner {
    pub(crate) fn new(mode: ExecutionMode) -> Self {
        Self {
            mode,
            tracer: None,
            timer: None,
        }
    }

    fn timer(&self) -> TimerService {
        match &self.timer {
            Some(timer) => timer.clone(),
            None => TimerService::global().clone(),
        }
    }

    /// Run a traced stage body according to the execution mode.
    ///
    /// Nothing happens until the returned future is polled, so a skipped stage never
    /// reaches the executor.
    pub(crate) fn run<U, F>(&self, body: F) -> BoxFuture<'static, Settled<U>>
    where
        U: Send + 'static,
        F: FnOnce() -> anyhow::Result<Option<U>> + Send + 'static,
    {
        let tracer = self.tracer.clone();
        match &self.mode {
            ExecutionMode::Inline => {
                async move { invoke(tracer.as_deref(), Interrupt::new(), body) }.boxed()
            }
            ExecutionMode::Executor(executor) => {
                let executor = Arc::clone(executor);
                async move {
                    let interrupt = Interrupt::new();
                    let (tx, rx) = oneshot::channel();

                    let remote = interrupt.clone();
                    let task: Task = Box::new(move || {
                        let settled = invoke(tracer.as_deref(), remote, body);
                        // Receiver gone means the stage was abandoned.
                        let _ = tx.send(settled);
                    });

                    tracing::trace!("submitting stage to executor");
                    if let Err(e) = executor.submit(task) {
                        tracing::warn!(error = %e, "executor rejected stage");
                        return Settled::Failed(e);
                    }

                    let mut guard = InterruptOnDrop::new(interrupt);
                    let settled = rx.await.unwrap_or_else(|_| {
                        Settled::Failed(StageError::Rejected(
                            "stage task dropped before completing".into(),
                        ))
                    });
                    guard.disarm();
                    settled
                }
                .boxed()
            }
        }
    }

    /// Race one stage against its deadline.
    ///
    /// When the deadline wins the stage future is dropped (an executor-hosted body is
    /// interrupted) and either a timeout failure or the traced fallback value settles
    /// the stage.
    pub(crate) fn race<U>(
        &self,
        stage: BoxFuture<'static, Settled<U>>,
        deadline: Deadline<U>,
    ) -> BoxFuture<'static, Settled<U>>
    where
        U: Send + 'static,
    {
        let timer = self.timer();
        let tracer = self.tracer.clone();
        let Deadline { duration, fallback } = deadline;
        async move {
            match timer.within(stage, duration).await {
                Ok(settled) => settled,
                Err(elapsed) => match fallback {
                    None => Settled::Failed(elapsed.into()),
                    Some(fallback) => {
                        tracing::debug!(
                            timeout_ms = duration.as_millis() as u64,
                            "stage timed out, using default value"
                        );
                        invoke(tracer.as_deref(), Interrupt::new(), move || {
                            Ok(Some(fallback()))
                        })
                    }
                },
            }
        }
        .boxed()
    }
}

/// Run `body` on the current thread between the tracer callbacks.
///
/// A start rejected by the tracer fails the stage without running the body and without
/// an end callback. An abort is reported to the tracer as a success.
fn invoke<U, F>(tracer: Option<&dyn Tracer>, interrupt: Interrupt, body: F) -> Settled<U>
where
    F: FnOnce() -> anyhow::Result<Option<U>>,
{
    let _current = interrupt::enter(interrupt);
    let start = Instant::now();

    if let Some(tracer) = tracer {
        if let Err(e) = tracer.start_proc() {
            tracing::trace!(error = %e, "tracer rejected stage start");
            return Settled::Failed(e);
        }
    }

    let settled = match catch(body) {
        Ok(result) => Settled::from_body(result),
        Err(e) => Settled::Failed(e),
    };

    if let Some(tracer) = tracer {
        let duration = start.elapsed();
        match &settled {
            Settled::Failed(e) => tracer.end_proc_fail(e, duration),
            _ => tracer.end_proc_success(duration),
        }
    }
    settled
}

/// Call `f`, turning a panic into [`StageError::Panicked`].
pub(crate) fn catch<R>(f: impl FnOnce() -> R) -> Result<R, StageError> {
    panic::catch_unwind(AssertUnwindSafe(f)).map_err(StageError::from_panic)
}
