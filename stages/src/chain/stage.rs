//! Execution modes and the stage that can still take a deadline.

use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;

use super::chain::{Chain, StagedFuture};
use super::task::Runner;
use crate::executor::Executor;
use crate::outcome::{Outcome, Settled};

/// Where stage bodies run.
#[derive(Clone, Default)]
pub enum ExecutionMode {
    /// On whichever thread polls the chain. No parallelism, and a deadline cannot cut a
    /// blocking body short.
    #[default]
    Inline,
    /// Submitted to an executor, one task per stage.
    Executor(Arc<dyn Executor>),
}

impl ExecutionMode {
    pub fn is_inline(&self) -> bool {
        matches!(self, ExecutionMode::Inline)
    }
}

impl std::fmt::Debug for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionMode::Inline => f.write_str("Inline"),
            ExecutionMode::Executor(_) => f.write_str("Executor(..)"),
        }
    }
}

/// Deadline attached to the most recent stage.
pub(crate) struct Deadline<T> {
    pub(crate) duration: Duration,
    pub(crate) fallback: Option<Box<dyn FnOnce() -> T + Send>>,
}

type BuildFn<T> = Box<dyn FnOnce(Option<Deadline<T>>) -> BoxFuture<'static, Settled<T>> + Send>;

/// A chain whose most recent stage has not been sealed yet.
///
/// Every stage-attaching call returns a `Stage`, so a deadline can be put on exactly that
/// stage with [`with_timeout`](Self::with_timeout) or
/// [`with_timeout_or`](Self::with_timeout_or). Anything else seals the stage without a
/// deadline.
#[must_use = "stages do nothing unless awaited"]
pub struct Stage<T> {
    runner: Runner,
    build: BuildFn<T>,
}

impl<T: Send + 'static> Stage<T> {
    pub(crate) fn new<B>(runner: Runner, build: B) -> Self
    where
        B: FnOnce(Option<Deadline<T>>) -> BoxFuture<'static, Settled<T>> + Send + 'static,
    {
        Self {
            runner,
            build: Box::new(build),
        }
    }

    /// Fail the chain with [`StageError::Timeout`](crate::StageError::Timeout) if this
    /// stage has not finished within `duration`.
    ///
    /// The clock starts when the stage starts, not when the chain does. Later stages are
    /// skipped after a timeout.
    pub fn with_timeout(self, duration: Duration) -> Chain<T> {
        self.seal(Some(Deadline {
            duration,
            fallback: None,
        }))
    }

    /// Like [`with_timeout`](Self::with_timeout), but a late stage yields `default()`
    /// and the chain carries on.
    ///
    /// The default is produced through the tracer like a regular stage body.
    pub fn with_timeout_or<D>(self, duration: Duration, default: D) -> Chain<T>
    where
        D: FnOnce() -> T + Send + 'static,
    {
        self.seal(Some(Deadline {
            duration,
            fallback: Some(Box::new(default)),
        }))
    }

    fn seal(self, deadline: Option<Deadline<T>>) -> Chain<T> {
        let state = (self.build)(deadline);
        Chain::from_parts(self.runner, state)
    }
}

impl<T: Send + 'static> StagedFuture<T> for Stage<T> {
    fn into_chain(self) -> Chain<T> {
        self.seal(None)
    }
}

impl<T: Send + 'static> IntoFuture for Stage<T> {
    type Output = Outcome<T>;
    type IntoFuture = BoxFuture<'static, Outcome<T>>;

    fn into_future(self) -> Self::IntoFuture {
        self.into_chain().into_future()
    }
}
