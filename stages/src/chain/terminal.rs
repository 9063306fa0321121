//! Terminal view of a chain: handlers only, no more stages.

use std::future::IntoFuture;

use futures::future::BoxFuture;

use super::chain::Chain;
use crate::error::StageError;
use crate::outcome::Outcome;

/// What `when_*` handlers return.
///
/// Further handlers can be stacked and the outcome awaited, but no stage can be attached
/// after a terminal handler.
#[must_use = "handlers do nothing unless the chain is awaited"]
pub struct Terminal<T> {
    chain: Chain<T>,
}

impl<T: Send + 'static> Terminal<T> {
    pub(crate) fn new(chain: Chain<T>) -> Self {
        Self { chain }
    }

    pub fn when_complete<F>(self, handler: F) -> Terminal<T>
    where
        F: FnOnce(&T) + Send + 'static,
    {
        Terminal::new(self.chain.on_complete(handler))
    }

    pub fn when_complete_yield<U, F>(self, handler: F) -> Terminal<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        Terminal::new(self.chain.on_complete_yield(handler))
    }

    pub fn when_aborted<F>(self, handler: F) -> Terminal<T>
    where
        F: FnOnce() + Send + 'static,
    {
        Terminal::new(self.chain.on_aborted(handler))
    }

    /// See [`StagedFuture::when_failed`](super::StagedFuture::when_failed).
    pub fn when_failed<F>(self, handler: F) -> Terminal<T>
    where
        F: FnOnce(&StageError) + Send + 'static,
    {
        Terminal::new(self.chain.on_failed(handler))
    }

    pub fn when_aborted_or_failed<F>(self, handler: F) -> Terminal<T>
    where
        F: FnOnce(Option<&StageError>) + Send + 'static,
    {
        Terminal::new(self.chain.on_aborted_or_failed(handler))
    }

    pub fn when_final<F>(self, handler: F) -> Terminal<T>
    where
        F: FnOnce() + Send + 'static,
    {
        Terminal::new(self.chain.on_final(handler))
    }

    pub fn unwrap(self) -> BoxFuture<'static, Outcome<T>> {
        self.chain.into_outcome()
    }
}

impl<T: Send + 'static> IntoFuture for Terminal<T> {
    type Output = Outcome<T>;
    type IntoFuture = BoxFuture<'static, Outcome<T>>;

    fn into_future(self) -> Self::IntoFuture {
        self.chain.into_outcome()
    }
}

#[cfg(test)]
mod tests {
    use super::super::chain::StagedFuture;
    use super::super::task::Runner;
    use super::*;
    use futures::executor::block_on;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_handlers_stack_in_order() {
        let log = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let (a, b, c) = (log.clone(), log.clone(), log.clone());

        let outcome = block_on(
            Chain::seed(Runner::default())
                .then(|()| Ok("v"))
                .when_complete(move |v| a.lock().push(format!("complete {}", v)))
                .when_aborted(move || b.lock().push("aborted".to_string()))
                .when_final(move || c.lock().push("final".to_string()))
                .into_future(),
        );

        assert_eq!(outcome.present(), Some("v"));
        assert_eq!(*log.lock(), vec!["complete v", "final"]);
    }

    #[test]
    fn test_aborted_or_failed_fires_once_for_abort() {
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        let outcome = block_on(
            Chain::seed(Runner::default())
                .then_if(|()| Ok(None::<u32>))
                .when_aborted_or_failed(move |e| {
                    assert!(e.is_none());
                    counter.fetch_add(1, Ordering::SeqCst);
                })
                .when_complete_yield(|v| v + 1)
                .into_future(),
        );
        assert!(outcome.is_absent());
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }
}
