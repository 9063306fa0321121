//! Linear async stage chains.
//!
//! Builds pipelines of stages where any stage can abort the rest of the chain without
//! raising an error, any single stage can be bounded by a timeout (failing, or falling
//! back to a default), and every stage execution can be traced and cancelled.
//!
//! Start with [`StagedFutureBuilder`]; see [`chain`] for the model.

pub mod chain;
pub mod config;
pub mod error;
pub mod executor;
pub mod interrupt;
pub mod outcome;
pub mod timeout;
pub mod trace;

// Re-export the common surface
pub use chain::{Chain, ExecutionMode, Stage, StagedFuture, StagedFutureBuilder, Terminal};
pub use config::{ExecutionKind, StagesOptions, TraceLevel, TraceTarget, TracingOptions};
pub use error::{StageError, StageResult};
pub use executor::{Executor, RayonExecutor, ThreadPerTaskExecutor, TokioBlockingExecutor};
pub use interrupt::Interrupt;
pub use outcome::Outcome;
pub use timeout::{Elapsed, TimerService};
pub use trace::{CancelableTracer, MetricsTracer, Tracer};

/// Everything needed to build and consume chains.
pub mod prelude {
    pub use crate::chain::{StagedFuture, StagedFutureBuilder};
    pub use crate::config::TraceLevel;
    pub use crate::error::StageError;
    pub use crate::outcome::Outcome;
    pub use std::time::Duration;
}
