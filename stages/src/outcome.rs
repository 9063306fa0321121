//! Settled states of a chain.

use crate::error::{StageError, StageResult};

/// What a chain settles to once every stage has run or been skipped.
///
/// Callers must match on all three arms: there is no silent default beyond an explicit
/// `with_timeout_or` fallback.
#[derive(Debug)]
pub enum Outcome<T> {
    /// Every stage produced a value; this is the last one.
    Present(T),
    /// A stage returned `None`, or a failure was consumed by `when_failed`.
    Absent,
    /// A stage failed and nobody handled it.
    Failed(StageError),
}

impl<T> Outcome<T> {
    pub fn is_present(&self) -> bool {
        matches!(self, Outcome::Present(_))
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, Outcome::Absent)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Outcome::Failed(_))
    }

    /// The value, if present.
    pub fn present(self) -> Option<T> {
        match self {
            Outcome::Present(value) => Some(value),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&StageError> {
        match self {
            Outcome::Failed(e) => Some(e),
            _ => None,
        }
    }

    /// Collapse into the usual `Result<Option<T>>` shape.
    pub fn into_result(self) -> StageResult<Option<T>> {
        match self {
            Outcome::Present(value) => Ok(Some(value)),
            Outcome::Absent => Ok(None),
            Outcome::Failed(e) => Err(e),
        }
    }

    /// Like [`into_result`](Self::into_result) but treats an absent value as
    /// [`StageError::Aborted`].
    pub fn into_required(self) -> StageResult<T> {
        match self {
            Outcome::Present(value) => Ok(value),
            Outcome::Absent => Err(StageError::Aborted),
            Outcome::Failed(e) => Err(e),
        }
    }
}

impl<T> From<StageResult<Option<T>>> for Outcome<T> {
    fn from(result: StageResult<Option<T>>) -> Self {
        match result {
            Ok(Some(value)) => Outcome::Present(value),
            Ok(None) => Outcome::Absent,
            Err(e) => Outcome::Failed(e),
        }
    }
}

/// Internal settled state carried between stages.
///
/// `Recovered` is a failure that a `when_failed`/`when_aborted_or_failed` handler has
/// already consumed. It looks like [`Outcome::Absent`] from the outside but does not
/// trigger abort handlers.
#[derive(Debug)]
pub(crate) enum Settled<T> {
    Present(T),
    Aborted,
    Failed(StageError),
    Recovered,
}

impl<T> Settled<T> {
    pub(crate) fn from_body(result: anyhow::Result<Option<T>>) -> Self {
        match result {
            Ok(Some(value)) => Settled::Present(value),
            Ok(None) => Settled::Aborted,
            Err(e) => Settled::Failed(StageError::from_task(e)),
        }
    }

    /// Split off the present value; every other state is re-typed for the next stage
    /// unchanged.
    pub(crate) fn into_present<U>(self) -> Result<T, Settled<U>> {
        match self {
            Settled::Present(value) => Ok(value),
            Settled::Aborted => Err(Settled::Aborted),
            Settled::Failed(e) => Err(Settled::Failed(e)),
            Settled::Recovered => Err(Settled::Recovered),
        }
    }

    pub(crate) fn into_outcome(self) -> Outcome<T> {
        match self {
            Settled::Present(value) => Outcome::Present(value),
            Settled::Aborted | Settled::Recovered => Outcome::Absent,
            Settled::Failed(e) => Outcome::Failed(e),
        }
    }
}
