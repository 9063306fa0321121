//! Shared helpers for chain integration tests.
//!
//! `RecordingTracer` records one [`Trace`] per tracer callback. The context of a trace is
//! the calling thread's current context label, which stage bodies set through the worker
//! helpers below. A body runs after its own `start` was recorded, so the workers also
//! patch that start with [`RecordingTracer::reset_last_context`].

#![allow(dead_code)]

use std::cell::RefCell;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::{self, ThreadId};
use std::time::Duration;

use parking_lot::Mutex;
use stages::error::{StageError, StageResult};
use stages::executor::{Executor, Task, ThreadPerTaskExecutor};
use stages::{Tracer, interrupt};

thread_local! {
    static CONTEXT: RefCell<Option<String>> = const { RefCell::new(None) };
}

pub fn set_context(context: &str) {
    CONTEXT.with(|c| *c.borrow_mut() = Some(context.to_string()));
}

pub fn clear_context() {
    CONTEXT.with(|c| *c.borrow_mut() = None);
}

fn current_context() -> Option<String> {
    CONTEXT.with(|c| c.borrow().clone())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trace {
    pub status: &'static str,
    pub context: Option<String>,
    pub thread: ThreadId,
}

impl Trace {
    /// `(status, context)` for compact assertions.
    pub fn key(&self) -> (&'static str, Option<&str>) {
        (self.status, self.context.as_deref())
    }
}

#[derive(Default)]
pub struct RecordingTracer {
    traces: Mutex<Vec<Trace>>,
    errors: Mutex<Vec<String>>,
}

impl RecordingTracer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn traces(&self) -> Vec<Trace> {
        self.traces.lock().clone()
    }

    pub fn keys(&self) -> Vec<(&'static str, Option<String>)> {
        self.traces
            .lock()
            .iter()
            .map(|t| (t.status, t.context.clone()))
            .collect()
    }

    /// Messages of the errors passed to `end_proc_fail`.
    pub fn errors(&self) -> Vec<String> {
        self.errors.lock().clone()
    }

    /// Rewrite the context of the last trace recorded on this thread.
    pub fn reset_last_context(&self, context: &str) {
        let me = thread::current().id();
        let mut traces = self.traces.lock();
        if let Some(trace) = traces.iter_mut().rev().find(|t| t.thread == me) {
            trace.context = Some(context.to_string());
        }
    }

    fn record(&self, status: &'static str) {
        self.traces.lock().push(Trace {
            status,
            context: current_context(),
            thread: thread::current().id(),
        });
    }
}

impl Tracer for RecordingTracer {
    fn start_proc(&self) -> StageResult<()> {
        self.record("start");
        Ok(())
    }

    fn end_proc_success(&self, _duration: Duration) {
        self.record("success");
        clear_context();
    }

    fn end_proc_fail(&self, error: &StageError, _duration: Duration) {
        self.record("fail");
        self.errors.lock().push(error.to_string());
        clear_context();
    }
}

// ============================================================================
// WORKERS
// ============================================================================

fn enter(tracer: &RecordingTracer, context: &str) {
    set_context(context);
    tracer.reset_last_context(context);
}

/// First-stage body producing `context`.
pub fn worker(
    tracer: &Arc<RecordingTracer>,
    context: &str,
) -> impl FnOnce() -> anyhow::Result<Option<String>> + Send + use<> {
    let tracer = Arc::clone(tracer);
    let context = context.to_string();
    move || {
        enter(&tracer, &context);
        Ok(Some(context))
    }
}

/// Later-stage body ignoring its input and producing `context`.
pub fn step<T: Send + 'static>(
    tracer: &Arc<RecordingTracer>,
    context: &str,
) -> impl FnOnce(T) -> anyhow::Result<Option<String>> + Send + use<T> {
    let tracer = Arc::clone(tracer);
    let context = context.to_string();
    move |_| {
        enter(&tracer, &context);
        Ok(Some(context))
    }
}

/// Later-stage body using its input as the context.
pub fn echo(
    tracer: &Arc<RecordingTracer>,
) -> impl FnOnce(String) -> anyhow::Result<Option<String>> + Send + use<> {
    let tracer = Arc::clone(tracer);
    move |input| {
        enter(&tracer, &input);
        Ok(Some(input))
    }
}

/// Body failing with `context` as the error message.
pub fn failing<T: Send + 'static>(
    tracer: &Arc<RecordingTracer>,
    context: &str,
) -> impl FnOnce(T) -> anyhow::Result<Option<String>> + Send + use<T> {
    let tracer = Arc::clone(tracer);
    let context = context.to_string();
    move |_| {
        enter(&tracer, &context);
        anyhow::bail!("{}", context)
    }
}

/// Body blocking until its interrupt is raised.
pub fn hanging<T: Send + 'static>(
    tracer: &Arc<RecordingTracer>,
    context: &str,
) -> impl FnOnce(T) -> anyhow::Result<Option<String>> + Send + use<T> {
    let tracer = Arc::clone(tracer);
    let context = context.to_string();
    move |_| {
        enter(&tracer, &context);
        let interrupt = interrupt::current().unwrap_or_default();
        Err(interrupt.wait().into())
    }
}

// ============================================================================
// EXECUTORS
// ============================================================================

/// Thread-per-task executor counting submissions.
#[derive(Default)]
pub struct CountingExecutor {
    inner: ThreadPerTaskExecutor,
    submitted: AtomicUsize,
}

impl CountingExecutor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn submitted(&self) -> usize {
        self.submitted.load(Ordering::SeqCst)
    }
}

impl Executor for CountingExecutor {
    fn submit(&self, task: Task) -> StageResult<()> {
        self.submitted.fetch_add(1, Ordering::SeqCst);
        self.inner.submit(task)
    }
}

/// Route `stages` events to the test output when `RUST_LOG` is set.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
