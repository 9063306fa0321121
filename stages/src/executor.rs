//! Executors that host stage bodies off the calling thread.
//!
//! The chain engine only needs `submit`: the result travels back through a channel owned
//! by the task runner, so an executor never sees stage values.

use std::sync::{Arc, OnceLock};
use std::thread;

use crate::error::{StageError, StageResult};

/// A unit of work handed to an executor.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Something that can run a [`Task`] somewhere else.
pub trait Executor: Send + Sync {
    /// Schedule the task. An `Err` means the task will never run.
    fn submit(&self, task: Task) -> StageResult<()>;
}

impl<E: Executor + ?Sized> Executor for Arc<E> {
    fn submit(&self, task: Task) -> StageResult<()> {
        (**self).submit(task)
    }
}

// ============================================================================
// DEFAULT POOL
// ============================================================================

/// Process-wide default pool (lazy initialization, never torn down).
static DEFAULT_POOL: OnceLock<Arc<dyn Executor>> = OnceLock::new();

/// Get or initialize the default shared pool.
///
/// Uses rayon's global pool when it offers real parallelism, otherwise falls back to a
/// thread per task so that a blocked stage can never starve the only worker.
pub fn default_pool() -> Arc<dyn Executor> {
    Arc::clone(DEFAULT_POOL.get_or_init(|| {
        let threads = rayon::current_num_threads();
        if threads > 1 {
            tracing::debug!(threads, "default stage pool uses the rayon global pool");
            Arc::new(RayonExecutor)
        } else {
            tracing::debug!("default stage pool falls back to thread-per-task");
            Arc::new(ThreadPerTaskExecutor::default())
        }
    }))
}

// ============================================================================
// IMPLEMENTATIONS
// ============================================================================

/// Spawns a fresh named OS thread for every task.
#[derive(Debug, Clone)]
pub struct ThreadPerTaskExecutor {
    name: String,
}

impl ThreadPerTaskExecutor {
    pub fn named(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Default for ThreadPerTaskExecutor {
    fn default() -> Self {
        Self::named("stage-worker")
    }
}

impl Executor for ThreadPerTaskExecutor {
    fn submit(&self, task: Task) -> StageResult<()> {
        thread::Builder::new()
            .name(self.name.clone())
            .spawn(task)
            .map(|_| ())
            .map_err(|e| StageError::Rejected(format!("failed to spawn worker thread: {}", e)))
    }
}

/// Runs tasks on rayon's global thread pool.
#[derive(Debug, Clone, Copy, Default)]
pub struct RayonExecutor;

impl Executor for RayonExecutor {
    fn submit(&self, task: Task) -> StageResult<()> {
        rayon::spawn(task);
        Ok(())
    }
}

/// Runs tasks on a tokio runtime's blocking pool.
#[derive(Debug, Clone)]
pub struct TokioBlockingExecutor {
    handle: tokio::runtime::Handle,
}

impl TokioBlockingExecutor {
    pub fn new(handle: tokio::runtime::Handle) -> Self {
        Self { handle }
    }

    /// Use the runtime the caller is currently running in.
    ///
    /// # Errors
    ///
    /// Returns [`StageError::Config`] outside of a tokio runtime.
    pub fn current() -> StageResult<Self> {
        tokio::runtime::Handle::try_current()
            .map(Self::new)
            .map_err(|e| StageError::Config(format!("no tokio runtime available: {}", e)))
    }
}

impl Executor for TokioBlockingExecutor {
    fn submit(&self, task: Task) -> StageResult<()> {
        // The JoinHandle is dropped: the result comes back through the runner's channel.
        drop(self.handle.spawn_blocking(task));
        Ok(())
    }
}
