//! Racing an operation against a deadline.
//!
//! All deadlines are driven by a [`TimerService`]: one background thread running a
//! current-thread tokio runtime with the time driver enabled. Racing does not require the
//! caller to be inside a tokio runtime, so inline chains polled by any executor (even
//! `futures::executor::block_on`) can still carry timeouts.
//!
//! The pending timer task is aborted as soon as the race is decided or the race future is
//! dropped. When both sides are ready at the same poll the operation wins.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, OnceLock};
use std::task::{Context, Poll};
use std::thread;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::error::{StageError, StageResult};

/// The deadline won the race.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Timeout after {0:?}")]
pub struct Elapsed(Duration);

impl Elapsed {
    pub fn duration(&self) -> Duration {
        self.0
    }
}

impl From<Elapsed> for StageError {
    fn from(elapsed: Elapsed) -> Self {
        StageError::Timeout(elapsed.0)
    }
}

// ============================================================================
// TIMER SERVICE
// ============================================================================

/// Process-wide timer (lazy initialization, never torn down).
static GLOBAL_TIMER: OnceLock<TimerService> = OnceLock::new();

/// Handle to the scheduler that fires deadlines.
///
/// **Cloning**: cheap, all clones share the same timer thread. A private service started
/// with [`TimerService::new`] stops its thread when the last clone is dropped.
#[derive(Clone)]
pub struct TimerService {
    handle: Handle,
    _owner: Option<Arc<oneshot::Sender<()>>>,
}

impl TimerService {
    /// Get or initialize the shared timer.
    ///
    /// # Panics
    ///
    /// Panics if the timer thread cannot be started. This indicates a serious system
    /// issue (thread or runtime creation failed).
    pub fn global() -> &'static TimerService {
        GLOBAL_TIMER.get_or_init(|| {
            tracing::debug!("starting shared stage timer");
            Self::new().expect("Failed to start shared stage timer")
        })
    }

    /// Start a private timer thread.
    pub fn new() -> StageResult<Self> {
        let (ready_tx, ready_rx) = std::sync::mpsc::channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        thread::Builder::new()
            .name("stages-timer".into())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_time()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(runtime.handle().clone()));
                // Resolves once every TimerService clone is gone.
                let _ = runtime.block_on(shutdown_rx);
            })
            .map_err(|e| StageError::Config(format!("failed to spawn timer thread: {}", e)))?;

        let handle = ready_rx
            .recv()
            .map_err(|_| StageError::Config("timer thread exited during startup".into()))?
            .map_err(|e| StageError::Config(format!("failed to build timer runtime: {}", e)))?;

        Ok(Self {
            handle,
            _owner: Some(Arc::new(shutdown_tx)),
        })
    }

    /// Drive deadlines with an existing runtime. The runtime must have the time driver
    /// enabled.
    pub fn from_handle(handle: Handle) -> Self {
        Self {
            handle,
            _owner: None,
        }
    }

    /// A future that resolves after `duration`.
    pub fn delay(&self, duration: Duration) -> Delay {
        let (tx, rx) = oneshot::channel();
        let task = self.handle.spawn(async move {
            tokio::time::sleep(duration).await;
            let _ = tx.send(());
        });
        Delay { rx, task }
    }

    /// Complete with `operation`'s output, or `Err(Elapsed)` if `duration` passes first.
    pub async fn within<F>(&self, operation: F, duration: Duration) -> Result<F::Output, Elapsed>
    where
        F: Future,
    {
        let delay = self.delay(duration);
        tokio::select! {
            biased;
            output = operation => Ok(output),
            () = delay => {
                tracing::debug!(timeout_ms = duration.as_millis() as u64, "deadline elapsed before operation completed");
                Err(Elapsed(duration))
            }
        }
    }

    /// Like [`within`](Self::within) but substitutes `default()` on elapse.
    pub async fn within_or<F, D>(&self, operation: F, duration: Duration, default: D) -> F::Output
    where
        F: Future,
        D: FnOnce() -> F::Output,
    {
        match self.within(operation, duration).await {
            Ok(output) => output,
            Err(_) => default(),
        }
    }

    /// Resolve with [`Elapsed`] after `duration`.
    pub async fn fail_after(&self, duration: Duration) -> Elapsed {
        self.delay(duration).await;
        Elapsed(duration)
    }

    /// Resolve with `value()` after `duration`.
    pub async fn complete_after<T, V>(&self, duration: Duration, value: V) -> T
    where
        V: FnOnce() -> T,
    {
        self.delay(duration).await;
        value()
    }
}

impl std::fmt::Debug for TimerService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerService")
            .field("owned", &self._owner.is_some())
            .finish()
    }
}

/// A pending deadline. Dropping it cancels the timer task.
pub struct Delay {
    rx: oneshot::Receiver<()>,
    task: JoinHandle<()>,
}

impl Future for Delay {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(())) => Poll::Ready(()),
            // The timer runtime went away: the deadline can no longer fire.
            Poll::Ready(Err(_)) => Poll::Pending,
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for Delay {
    fn drop(&mut self) {
        self.task.abort();
    }
}

// ============================================================================
// SHARED-TIMER SHORTCUTS
// ============================================================================

/// [`TimerService::within`] on the shared timer.
pub async fn within<F>(operation: F, duration: Duration) -> Result<F::Output, Elapsed>
where
    F: Future,
{
    TimerService::global().within(operation, duration).await
}

/// [`TimerService::within_or`] on the shared timer.
pub async fn within_or<F, D>(operation: F, duration: Duration, default: D) -> F::Output
where
    F: Future,
    D: FnOnce() -> F::Output,
{
    TimerService::global()
        .within_or(operation, duration, default)
        .await
}

/// [`TimerService::fail_after`] on the shared timer.
pub async fn fail_after(duration: Duration) -> Elapsed {
    TimerService::global().fail_after(duration).await
}

/// [`TimerService::complete_after`] on the shared timer.
pub async fn complete_after<T, V>(duration: Duration, value: V) -> T
where
    V: FnOnce() -> T,
{
    TimerService::global().complete_after(duration, value).await
}
