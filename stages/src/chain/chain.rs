//! The chain itself and the fluent [`StagedFuture`] surface.

use std::future::{Future, IntoFuture};
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use futures::future::BoxFuture;

use super::stage::Stage;
use super::task::{Runner, catch};
use super::terminal::Terminal;
use crate::error::StageError;
use crate::outcome::{Outcome, Settled};

/// A chain of stages with no pending deadline.
///
/// Holds the (lazy) settled state of its last stage and the runner shared by all stages.
#[must_use = "chains do nothing unless awaited"]
pub struct Chain<T> {
    runner: Runner,
    state: BoxFuture<'static, Settled<T>>,
}

impl<T: Send + 'static> Chain<T> {
    pub(crate) fn from_parts(runner: Runner, state: BoxFuture<'static, Settled<T>>) -> Self {
        Self { runner, state }
    }

    /// Attach a stage that runs only when this chain settles present.
    ///
    /// Any other state is handed through retyped without calling `op`, so a skipped
    /// stage never reaches the tracer or the executor.
    fn attach<U, Op>(self, op: Op) -> Stage<U>
    where
        U: Send + 'static,
        Op: FnOnce(T, &Runner) -> BoxFuture<'static, Settled<U>> + Send + 'static,
    {
        let Chain { runner, state } = self;
        let stage_runner = runner.clone();
        Stage::new(runner, move |deadline| {
            async move {
                let value = match state.await.into_present() {
                    Ok(value) => value,
                    Err(skipped) => {
                        tracing::trace!("chain already settled, skipping stage");
                        return skipped;
                    }
                };

                let stage = op(value, &stage_runner);
                match deadline {
                    Some(deadline) => stage_runner.race(stage, deadline).await,
                    None => stage.await,
                }
            }
            .boxed()
        })
    }

    fn map_settled<U, F>(self, f: F) -> Chain<U>
    where
        U: Send + 'static,
        F: FnOnce(Settled<T>) -> Settled<U> + Send + 'static,
    {
        let Chain { runner, state } = self;
        Chain::from_parts(runner, async move { f(state.await) }.boxed())
    }

    pub(crate) fn on_complete_yield<U, F>(self, handler: F) -> Chain<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        self.map_settled(|settled| match settled.into_present() {
            Ok(value) => match catch(move || handler(value)) {
                Ok(next) => Settled::Present(next),
                Err(e) => Settled::Failed(e),
            },
            Err(other) => other,
        })
    }

    pub(crate) fn on_complete<F>(self, handler: F) -> Chain<T>
    where
        F: FnOnce(&T) + Send + 'static,
    {
        self.on_complete_yield(|value| {
            handler(&value);
            value
        })
    }

    pub(crate) fn on_aborted<F>(self, handler: F) -> Chain<T>
    where
        F: FnOnce() + Send + 'static,
    {
        self.map_settled(|settled| match settled {
            Settled::Aborted => match catch(handler) {
                Ok(()) => Settled::Aborted,
                Err(e) => Settled::Failed(e),
            },
            other => other,
        })
    }

    pub(crate) fn on_failed<F>(self, handler: F) -> Chain<T>
    where
        F: FnOnce(&StageError) + Send + 'static,
    {
        self.map_settled(|settled| match settled {
            Settled::Failed(e) => match catch(|| handler(&e)) {
                Ok(()) => Settled::Recovered,
                Err(panic) => Settled::Failed(panic),
            },
            other => other,
        })
    }

    pub(crate) fn on_aborted_or_failed<F>(self, handler: F) -> Chain<T>
    where
        F: FnOnce(Option<&StageError>) + Send + 'static,
    {
        self.map_settled(|settled| match settled {
            Settled::Aborted => match catch(|| handler(None)) {
                Ok(()) => Settled::Aborted,
                Err(e) => Settled::Failed(e),
            },
            Settled::Failed(e) => match catch(|| handler(Some(&e))) {
                Ok(()) => Settled::Recovered,
                Err(panic) => Settled::Failed(panic),
            },
            other => other,
        })
    }

    pub(crate) fn on_final<F>(self, handler: F) -> Chain<T>
    where
        F: FnOnce() + Send + 'static,
    {
        self.map_settled(|settled| match catch(handler) {
            Ok(()) => settled,
            // An earlier failure is the more useful one to report.
            Err(e) => match settled {
                Settled::Failed(earlier) => Settled::Failed(earlier),
                _ => Settled::Failed(e),
            },
        })
    }

    pub(crate) fn into_outcome(self) -> BoxFuture<'static, Outcome<T>> {
        let state = self.state;
        async move { state.await.into_outcome() }.boxed()
    }
}

impl Chain<()> {
    /// The empty, already-present chain every builder starts from.
    pub(crate) fn seed(runner: Runner) -> Self {
        Chain::from_parts(runner, futures::future::ready(Settled::Present(())).boxed())
    }
}

impl<T: Send + 'static> StagedFuture<T> for Chain<T> {
    fn into_chain(self) -> Chain<T> {
        self
    }
}

impl<T: Send + 'static> IntoFuture for Chain<T> {
    type Output = Outcome<T>;
    type IntoFuture = BoxFuture<'static, Outcome<T>>;

    fn into_future(self) -> Self::IntoFuture {
        self.into_outcome()
    }
}

/// Fluent operations shared by [`Stage`] and [`Chain`].
///
/// Stage-attaching methods (`then*`) run their function only when everything before
/// them produced a value. Once a stage aborts or fails, every later stage is passed over
/// without being invoked, traced or submitted to the executor; terminal handlers
/// (`when_*`) still run.
pub trait StagedFuture<T: Send + 'static>: Sized {
    /// Seal any pending deadline and get the plain chain.
    fn into_chain(self) -> Chain<T>;

    /// Attach a stage that may abort the chain by returning `Ok(None)`.
    fn then_if<U, F>(self, proc: F) -> Stage<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> anyhow::Result<Option<U>> + Send + 'static,
    {
        self.into_chain()
            .attach(move |value, runner| runner.run(move || proc(value)))
    }

    /// Attach a stage that always produces a value.
    ///
    /// Equivalent to `then_if(|v| proc(v).map(Some))`. The value is never inspected, so
    /// a `U` that is itself an `Option` is carried as a present value even when it is
    /// `None`; use [`then_if`](Self::then_if) to abort.
    fn then<U, F>(self, proc: F) -> Stage<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> anyhow::Result<U> + Send + 'static,
    {
        self.then_if(move |value| proc(value).map(Some))
    }

    /// Attach an externally supplied future that may abort the chain.
    ///
    /// The future is polled by whoever polls the chain and is not traced.
    fn then_stage_if<U, F, Fut>(self, stage: F) -> Stage<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<Option<U>>> + Send + 'static,
    {
        self.into_chain().attach(move |value, _| {
            async move {
                let stage = match catch(move || stage(value)) {
                    Ok(stage) => stage,
                    Err(e) => return Settled::Failed(e),
                };
                match AssertUnwindSafe(stage).catch_unwind().await {
                    Ok(result) => Settled::from_body(result),
                    Err(panic) => Settled::Failed(StageError::from_panic(panic)),
                }
            }
            .boxed()
        })
    }

    /// Attach an externally supplied future whose completion is always present.
    fn then_stage<U, F, Fut>(self, stage: F) -> Stage<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<U>> + Send + 'static,
    {
        self.then_stage_if(move |value| stage(value).map(|result| result.map(Some)))
    }

    /// Run `handler` on the final value if the chain settles present.
    fn when_complete<F>(self, handler: F) -> Terminal<T>
    where
        F: FnOnce(&T) + Send + 'static,
    {
        Terminal::new(self.into_chain().on_complete(handler))
    }

    /// Replace the final value with `handler(value)` if the chain settles present.
    fn when_complete_yield<U, F>(self, handler: F) -> Terminal<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        Terminal::new(self.into_chain().on_complete_yield(handler))
    }

    /// Run `handler` if a stage aborted the chain.
    fn when_aborted<F>(self, handler: F) -> Terminal<T>
    where
        F: FnOnce() + Send + 'static,
    {
        Terminal::new(self.into_chain().on_aborted(handler))
    }

    /// Run `handler` if the chain failed. The failure counts as handled: the chain then
    /// settles absent, without triggering [`when_aborted`](Self::when_aborted).
    fn when_failed<F>(self, handler: F) -> Terminal<T>
    where
        F: FnOnce(&StageError) + Send + 'static,
    {
        Terminal::new(self.into_chain().on_failed(handler))
    }

    /// Run `handler` with `None` on abort or `Some(error)` on failure.
    fn when_aborted_or_failed<F>(self, handler: F) -> Terminal<T>
    where
        F: FnOnce(Option<&StageError>) + Send + 'static,
    {
        Terminal::new(self.into_chain().on_aborted_or_failed(handler))
    }

    /// Run `handler` exactly once however the chain settles.
    fn when_final<F>(self, handler: F) -> Terminal<T>
    where
        F: FnOnce() + Send + 'static,
    {
        Terminal::new(self.into_chain().on_final(handler))
    }

    /// The settled outcome as a plain boxed future.
    fn unwrap(self) -> BoxFuture<'static, Outcome<T>> {
        self.into_chain().into_outcome()
    }
}
