//! Entry point for building chains.

use std::future::Future;
use std::sync::Arc;

use super::chain::{Chain, StagedFuture};
use super::stage::{ExecutionMode, Stage};
use super::task::Runner;
use crate::config::{ExecutionKind, StagesOptions};
use crate::error::{StageError, StageResult};
use crate::executor::{self, Executor};
use crate::timeout::TimerService;
use crate::trace::{self, Tracer};

/// Starts chains with a fixed execution mode, tracer and timer.
///
/// The builder is reusable: every first-stage call starts an independent chain.
///
/// ```ignore
/// let outcome = StagedFutureBuilder::async_pool()
///     .tracer(trace::console())
///     .then_if(|| lookup_user(id))
///     .then(|user| Ok(user.email))
///     .with_timeout(Duration::from_secs(2))
///     .when_aborted(|| tracing::info!("no such user"))
///     .await;
/// ```
#[derive(Clone, Default)]
pub struct StagedFutureBuilder {
    runner: Runner,
}

impl StagedFutureBuilder {
    pub fn new(mode: ExecutionMode) -> Self {
        Self {
            runner: Runner::new(mode),
        }
    }

    /// Run every stage on the thread polling the chain.
    pub fn sync() -> Self {
        Self::new(ExecutionMode::Inline)
    }

    pub fn sync_traced(tracer: Arc<dyn Tracer>) -> Self {
        Self::sync().tracer(tracer)
    }

    /// Submit every stage to `executor`.
    pub fn with_executor(executor: Arc<dyn Executor>) -> Self {
        Self::new(ExecutionMode::Executor(executor))
    }

    /// Submit every stage to the process-wide [default pool](executor::default_pool).
    pub fn async_pool() -> Self {
        Self::with_executor(executor::default_pool())
    }

    /// Build from configuration.
    ///
    /// # Errors
    ///
    /// [`StageError::Config`] when the options are invalid, or when they ask for
    /// `executor` execution and `executor` is `None`.
    pub fn from_options(
        options: &StagesOptions,
        executor: Option<Arc<dyn Executor>>,
    ) -> StageResult<Self> {
        options.sanitize()?;

        let mut builder = match (options.execution, executor) {
            (ExecutionKind::Inline, _) => Self::sync(),
            (ExecutionKind::Pool, _) => Self::async_pool(),
            (ExecutionKind::Executor, Some(executor)) => Self::with_executor(executor),
            (ExecutionKind::Executor, None) => {
                return Err(StageError::Config(
                    "execution = executor requires an executor".into(),
                ));
            }
        };

        if let Some(tracing) = &options.tracing {
            builder = builder.tracer(trace::from_options(tracing)?);
        }
        tracing::debug!(mode = ?builder.mode(), traced = builder.runner.tracer.is_some(), "stage builder configured");
        Ok(builder)
    }

    pub fn tracer(mut self, tracer: Arc<dyn Tracer>) -> Self {
        self.runner.tracer = Some(tracer);
        self
    }

    /// Drive deadlines with `timer` instead of the shared timer.
    pub fn timer(mut self, timer: TimerService) -> Self {
        self.runner.timer = Some(timer);
        self
    }

    pub fn mode(&self) -> &ExecutionMode {
        &self.runner.mode
    }

    /// First stage, which may abort the chain by returning `Ok(None)`.
    pub fn then_if<U, F>(&self, proc: F) -> Stage<U>
    where
        U: Send + 'static,
        F: FnOnce() -> anyhow::Result<Option<U>> + Send + 'static,
    {
        self.seed().then_if(move |()| proc())
    }

    /// First stage producing a value.
    pub fn then<U, F>(&self, proc: F) -> Stage<U>
    where
        U: Send + 'static,
        F: FnOnce() -> anyhow::Result<U> + Send + 'static,
    {
        self.seed().then(move |()| proc())
    }

    /// Start from an existing future that may abort the chain.
    pub fn then_stage_if<U, Fut>(&self, stage: Fut) -> Stage<U>
    where
        U: Send + 'static,
        Fut: Future<Output = anyhow::Result<Option<U>>> + Send + 'static,
    {
        self.seed().then_stage_if(move |()| stage)
    }

    /// Start from an existing future.
    pub fn then_stage<U, Fut>(&self, stage: Fut) -> Stage<U>
    where
        U: Send + 'static,
        Fut: Future<Output = anyhow::Result<U>> + Send + 'static,
    {
        self.seed().then_stage(move |()| stage)
    }

    fn seed(&self) -> Chain<()> {
        Chain::seed(self.runner.clone())
    }
}

impl std::fmt::Debug for StagedFutureBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StagedFutureBuilder")
            .field("mode", &self.runner.mode)
            .field("traced", &self.runner.tracer.is_some())
            .finish()
    }
}
