//! Error taxonomy for stage chains.
//!
//! An *abort* is not an error: a stage that returns `None` settles the chain as
//! [`Outcome::Absent`](crate::Outcome::Absent). Everything here is a *failure*: an error
//! escaping a stage body, a deadline without a default, or a cancellation.

use std::any::Any;
use std::time::Duration;

/// Result alias used throughout the crate.
pub type StageResult<T> = Result<T, StageError>;

#[derive(Debug, thiserror::Error)]
pub enum StageError {
    /// The chain settled absent where a value was required.
    #[error("Aborted")]
    Aborted,

    /// A stage did not finish before its deadline and no default was attached.
    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    /// The chain was cancelled before the stage body could start.
    #[error("Chain has been canceled")]
    Cancelled,

    /// A running stage observed an interrupt request and gave up.
    #[error("Stage was interrupted")]
    Interrupted,

    /// A stage body or handler panicked.
    #[error("Stage panicked: {0}")]
    Panicked(String),

    /// The executor refused to run the stage.
    #[error("Executor rejected stage: {0}")]
    Rejected(String),

    /// Invalid builder or tracing configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Error returned by a stage body.
    #[error(transparent)]
    Task(anyhow::Error),
}

impl StageError {
    /// Convert an error returned by a stage body.
    ///
    /// Bodies report interruption and cancellation by returning the matching
    /// `StageError`; those are unwrapped so they keep their own variant instead of
    /// being buried inside [`StageError::Task`].
    pub fn from_task(error: anyhow::Error) -> Self {
        match error.downcast::<StageError>() {
            Ok(stage_error) => stage_error,
            Err(other) => StageError::Task(other),
        }
    }

    /// Build a [`StageError::Panicked`] from a caught panic payload.
    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        StageError::Panicked(message)
    }

    /// Short variant name, used by trace formatting.
    pub fn kind(&self) -> &'static str {
        match self {
            StageError::Aborted => "Aborted",
            StageError::Timeout(_) => "Timeout",
            StageError::Cancelled => "Cancelled",
            StageError::Interrupted => "Interrupted",
            StageError::Panicked(_) => "Panicked",
            StageError::Rejected(_) => "Rejected",
            StageError::Config(_) => "Config",
            StageError::Task(_) => "Task",
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, StageError::Timeout(_))
    }

    /// True for both flavours of cancellation: rejected before start or interrupted
    /// while running.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, StageError::Cancelled | StageError::Interrupted)
    }
}
