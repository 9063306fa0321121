//! Per-stage tracing.
//!
//! A [`Tracer`] is told when every stage body starts and how it ended. Calls happen
//! synchronously on the thread running the body, in order:
//!
//! ```text
//! start_proc ──→ body ──┬──→ end_proc_success(duration)
//!                       └──→ end_proc_fail(error, duration)
//! ```
//!
//! Tracers compose as decorators: [`CancelableTracer`] and [`MetricsTracer`] do their
//! own bookkeeping and then forward to an optional next tracer, so a chain can be
//! cancellable, measured and logged at the same time.

mod cancel;
mod console;
mod log;
mod metrics;

pub use cancel::CancelableTracer;
pub use console::ConsoleTracer;
pub use log::LogTracer;
pub use metrics::{ChainMetrics, MetricsTracer};

use std::backtrace::Backtrace;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::config::{TraceLevel, TraceTarget, TracingOptions};
use crate::error::{StageError, StageResult};

/// Observer of stage executions.
pub trait Tracer: Send + Sync {
    /// Called just before a stage body runs.
    ///
    /// Returning an error rejects the stage: the body is skipped, no end callback is
    /// made and the chain fails with that error. Only cancelling tracers do this.
    fn start_proc(&self) -> StageResult<()>;

    /// Called when the body returned a value or aborted.
    fn end_proc_success(&self, duration: Duration);

    /// Called when the body failed or panicked.
    fn end_proc_fail(&self, error: &StageError, duration: Duration);
}

/// Produces context lines (thread label, call sites) for trace messages.
pub type ContextFn = Arc<dyn Fn() -> Vec<String> + Send + Sync>;

// ============================================================================
// FACTORIES
// ============================================================================

/// Console tracer with full call-site context.
pub fn console() -> Arc<dyn Tracer> {
    console_with_depth(usize::MAX)
}

/// Console tracer keeping at most `max_context` call-site frames.
pub fn console_with_depth(max_context: usize) -> Arc<dyn Tracer> {
    Arc::new(ConsoleTracer::new(context(max_context)))
}

/// `tracing`-facade tracer with full call-site context.
pub fn log(level: TraceLevel) -> Arc<dyn Tracer> {
    log_with_depth(level, usize::MAX)
}

/// `tracing`-facade tracer keeping at most `max_context` call-site frames.
pub fn log_with_depth(level: TraceLevel, max_context: usize) -> Arc<dyn Tracer> {
    Arc::new(LogTracer::new(level, context(max_context)))
}

/// Build the sink described by `options`.
pub fn from_options(options: &TracingOptions) -> StageResult<Arc<dyn Tracer>> {
    options.sanitize()?;
    Ok(match options.target {
        TraceTarget::Console => console_with_depth(options.context_depth),
        TraceTarget::Logger => match &options.logger {
            Some(logger) => Arc::new(LogTracer::named(
                logger.clone(),
                options.level,
                context(options.context_depth),
            )),
            None => log_with_depth(options.level, options.context_depth),
        },
    })
}

/// Context callback capturing the thread label and at most `max_context` caller frames.
pub fn context(max_context: usize) -> ContextFn {
    Arc::new(move || capture_context(max_context))
}

// ============================================================================
// CONTEXT & FORMATTING
// ============================================================================

/// Crates whose frames are plumbing between the caller and the stage machinery.
const GLUE_CRATES: &[&str] = &[
    "std",
    "core",
    "alloc",
    "futures",
    "futures_core",
    "futures_util",
    "futures_executor",
    "tokio",
    "rayon",
    "rayon_core",
];

/// Thread label followed by at most `max` caller frames.
///
/// Frames of this crate and of runtime glue (std, futures, tokio, rayon) are skipped,
/// including trait-impl frames such as `<stages::.. as ..>::start_proc`; the frames
/// recorded are those of the code that drives the chain.
pub fn capture_context(max: usize) -> Vec<String> {
    let current = thread::current();
    let mut context = vec![format!("@{}", current.name().unwrap_or("-"))];
    if max == 0 {
        return context;
    }

    let rendered = Backtrace::force_capture().to_string();
    let symbols = rendered.lines().filter_map(|line| {
        let (index, symbol) = line.trim().split_once(": ")?;
        index
            .chars()
            .all(|c| c.is_ascii_digit())
            .then(|| symbol.to_string())
    });

    context.extend(caller_frames(symbols, max));
    context
}

/// Keep at most `max` frames that belong neither to this crate nor to glue crates.
///
/// Frames are innermost first, so everything before the first crate frame is the
/// backtrace machinery itself and is dropped.
fn caller_frames(symbols: impl Iterator<Item = String>, max: usize) -> Vec<String> {
    let mut frames = Vec::new();
    let mut reached_crate = false;
    for symbol in symbols {
        if frames.len() >= max {
            break;
        }
        if mentions_crate(&symbol, "stages") {
            reached_crate = true;
            continue;
        }
        if !reached_crate
            || symbol.starts_with("__rust")
            || symbol == "rust_begin_unwind"
            || GLUE_CRATES.iter().any(|krate| rooted_in(&symbol, krate))
        {
            continue;
        }
        frames.push(symbol);
    }
    frames
}

/// Whether the outermost path of a demangled symbol is in `krate` (`krate::f` or
/// `<krate::T as ..>`).
fn rooted_in(symbol: &str, krate: &str) -> bool {
    symbol
        .trim_start_matches('<')
        .strip_prefix(krate)
        .is_some_and(|rest| rest.starts_with("::"))
}

/// Whether a demangled symbol names `krate` anywhere: as its path, as a self type
/// or type argument (`<krate::T as ..>`) or as the implemented trait (`<.. as krate::Tr>`).
fn mentions_crate(symbol: &str, krate: &str) -> bool {
    let path = format!("{}::", krate);
    rooted_in(symbol, krate)
        || symbol.contains(&format!("<{}", path))
        || symbol.contains(&format!(" as {}", path))
}

fn render(context: &[String]) -> String {
    format!("[{}]", context.join(", "))
}

pub fn format_start(context: &[String]) -> String {
    format!("Start ({})", render(context))
}

pub fn format_success(context: &[String], duration: Duration) -> String {
    format!(
        "Success ({}) - ({}) nanos",
        render(context),
        duration.as_nanos()
    )
}

pub fn format_fail(context: &[String], error: &StageError, duration: Duration) -> String {
    let error = format!("type ({}) - message ({})", error.kind(), error);
    format!(
        "Failure ({}) - error: ({}) - ({}) nanos",
        render(context),
        error,
        duration.as_nanos()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_messages() {
        let context = vec!["@main".to_string(), "app::run".to_string()];
        assert_eq!(format_start(&context), "Start ([@main, app::run])");
        assert_eq!(
            format_success(&context, Duration::from_nanos(42)),
            "Success ([@main, app::run]) - (42) nanos"
        );
        assert_eq!(
            format_fail(
                &context,
                &StageError::Task(anyhow::anyhow!("2")),
                Duration::from_nanos(7)
            ),
            "Failure ([@main, app::run]) - error: (type (Task) - message (2)) - (7) nanos"
        );
    }

    #[test]
    fn test_capture_context_thread_label() {
        let context = thread::Builder::new()
            .name("ctx-thread".into())
            .spawn(|| capture_context(0))
            .unwrap()
            .join()
            .unwrap();
        assert_eq!(context, vec!["@ctx-thread".to_string()]);
    }

    #[test]
    fn test_capture_context_respects_depth() {
        let context = capture_context(2);
        assert!(context.len() <= 3);
        assert!(context[0].starts_with('@'));
    }

    #[test]
    fn test_caller_frames_skip_crate_impls_and_glue() {
        let symbols = [
            "std::backtrace::Backtrace::force_capture",
            "stages::trace::capture_context",
            "<stages::trace::console::ConsoleTracer as stages::trace::Tracer>::start_proc",
            "stages::chain::task::invoke",
            "<core::pin::Pin<P> as core::future::future::Future>::poll",
            "<futures_util::future::future::map::Map<Fut,F> as core::future::future::Future>::poll",
            "<app::Wrapper as stages::chain::StagedFuture<T>>::into_chain",
            "tokio::runtime::park::CachedParkThread::block_on",
            "<app::Fetch as core::future::future::Future>::poll",
            "app::handlers::load_user",
            "__rust_begin_short_backtrace",
            "app::main",
            "app::later",
        ]
        .map(String::from);

        assert_eq!(
            caller_frames(symbols.clone().into_iter(), 2),
            vec![
                "<app::Fetch as core::future::future::Future>::poll",
                "app::handlers::load_user"
            ]
        );
        assert_eq!(
            caller_frames(symbols.into_iter(), 3),
            vec![
                "<app::Fetch as core::future::future::Future>::poll",
                "app::handlers::load_user",
                "app::main"
            ]
        );
    }

    #[test]
    fn test_mentions_crate_forms() {
        assert!(mentions_crate("stages::chain::task::invoke", "stages"));
        assert!(mentions_crate(
            "<stages::MetricsTracer as stages::Tracer>::end_proc_success",
            "stages"
        ));
        assert!(mentions_crate("<Vec<stages::Outcome<u8>> as Drop>::drop", "stages"));
        assert!(mentions_crate("<app::T as stages::Tracer>::start_proc", "stages"));
        assert!(!mentions_crate("my_stages::run", "stages"));
        assert!(!mentions_crate("app::stages::run", "stages"));

        assert!(rooted_in("<core::pin::Pin<P> as core::future::Future>::poll", "core"));
        assert!(!rooted_in("<app::Fetch as core::future::Future>::poll", "core"));
        assert!(!rooted_in("futures_util::stream::next", "futures"));
    }

    #[test]
    fn test_from_options_rejects_zero_depth() {
        let options = TracingOptions {
            context_depth: 0,
            ..Default::default()
        };
        assert!(matches!(from_options(&options), Err(StageError::Config(_))));
        assert!(from_options(&TracingOptions::default()).is_ok());
    }
}
