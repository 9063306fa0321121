//! Tracer emitting events through the `tracing` facade.

use std::borrow::Cow;
use std::time::Duration;

use super::{ContextFn, Tracer, format_fail, format_start, format_success};
use crate::config::TraceLevel;
use crate::error::{StageError, StageResult};

/// Logger name used when none is given.
pub const DEFAULT_LOGGER: &str = "stages::trace";

/// Logs every stage event at a fixed level under the `stages::trace` target.
///
/// `tracing` targets are fixed at compile time, so the logger name travels on every
/// event as the `logger` field instead. Layers and formatters route on that field:
///
/// ```ignore
/// let tracer = LogTracer::named("payments", TraceLevel::Info, trace::context(4));
/// // INFO stages::trace: Start ([@worker-1, app::charge]) event="start" logger=payments
/// ```
///
/// Context capture is skipped entirely when the level is disabled for that target.
pub struct LogTracer {
    level: TraceLevel,
    context: ContextFn,
    logger: Cow<'static, str>,
}

impl LogTracer {
    pub fn new(level: TraceLevel, context: ContextFn) -> Self {
        Self::named(DEFAULT_LOGGER, level, context)
    }

    /// Tag every event with `logger` so applications can tell chains apart.
    pub fn named(
        logger: impl Into<Cow<'static, str>>,
        level: TraceLevel,
        context: ContextFn,
    ) -> Self {
        Self {
            level,
            context,
            logger: logger.into(),
        }
    }

    pub fn level(&self) -> TraceLevel {
        self.level
    }

    pub fn logger(&self) -> &str {
        &self.logger
    }

    fn enabled(&self) -> bool {
        match self.level {
            TraceLevel::Trace => tracing::enabled!(target: "stages::trace", tracing::Level::TRACE),
            TraceLevel::Debug => tracing::enabled!(target: "stages::trace", tracing::Level::DEBUG),
            TraceLevel::Info => tracing::enabled!(target: "stages::trace", tracing::Level::INFO),
        }
    }

    fn emit(&self, event: &'static str, message: impl FnOnce(&[String]) -> String) {
        if !self.enabled() {
            return;
        }
        let message = message(&(self.context)());
        let logger = &*self.logger;
        match self.level {
            TraceLevel::Trace => {
                tracing::trace!(target: "stages::trace", event, logger = %logger, "{}", message)
            }
            TraceLevel::Debug => {
                tracing::debug!(target: "stages::trace", event, logger = %logger, "{}", message)
            }
            TraceLevel::Info => {
                tracing::info!(target: "stages::trace", event, logger = %logger, "{}", message)
            }
        }
    }
}

impl Tracer for LogTracer {
    fn start_proc(&self) -> StageResult<()> {
        self.emit("start", format_start);
        Ok(())
    }

    fn end_proc_success(&self, duration: Duration) {
        self.emit("success", |context| format_success(context, duration));
    }

    fn end_proc_fail(&self, error: &StageError, duration: Duration) {
        self.emit("failure", |context| format_fail(context, error, duration));
    }
}
