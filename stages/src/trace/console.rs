//! Tracer printing one line per event.

use std::io::{self, Write};
use std::time::Duration;

use parking_lot::Mutex;

use super::{ContextFn, Tracer, format_fail, format_start, format_success};
use crate::error::{StageError, StageResult};

pub struct ConsoleTracer {
    context: ContextFn,
    out: Mutex<Box<dyn Write + Send>>,
}

impl ConsoleTracer {
    /// Print to stdout.
    pub fn new(context: ContextFn) -> Self {
        Self::with_writer(context, Box::new(io::stdout()))
    }

    /// Print to an arbitrary writer.
    pub fn with_writer(context: ContextFn, out: Box<dyn Write + Send>) -> Self {
        Self {
            context,
            out: Mutex::new(out),
        }
    }

    fn print(&self, line: String) {
        let mut out = self.out.lock();
        // Trace output is best effort; a closed stdout must not fail the stage.
        let _ = writeln!(out, "{}", line);
    }
}

impl Tracer for ConsoleTracer {
    fn start_proc(&self) -> StageResult<()> {
        self.print(format_start(&(self.context)()));
        Ok(())
    }

    fn end_proc_success(&self, duration: Duration) {
        self.print(format_success(&(self.context)(), duration));
    }

    fn end_proc_fail(&self, error: &StageError, duration: Duration) {
        self.print(format_fail(&(self.context)(), error, duration));
    }
}
