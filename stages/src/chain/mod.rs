//! Linear stage chains.
//!
//! A chain is a sequence of stages where each stage consumes the value produced by the
//! previous one. Any stage can stop the rest of the chain in two distinct ways:
//! - *abort*: return `Ok(None)`, a normal, expected end
//! - *fail*: return an error, panic, time out or be cancelled
//!
//! ## Architecture
//!
//! ```text
//! StagedFutureBuilder → Stage ⇄ Chain → Terminal → Outcome
//!
//! - StagedFutureBuilder: execution mode, tracer and timer; starts chains
//! - Stage: chain whose last stage can still take a deadline (with_timeout*)
//! - Chain: chain with every deadline sealed
//! - Terminal: handlers only (when_*), no more stages
//! - Outcome: Present(T) | Absent | Failed(StageError)
//! ```
//!
//! Chains are lazy. Every attach wraps the previous state in a new boxed future and
//! nothing runs until the chain is awaited; stages of one chain never overlap.
//!
//! ## Example
//!
//! ```ignore
//! use stages::prelude::*;
//!
//! let outcome = StagedFutureBuilder::async_pool()
//!     .tracer(stages::trace::log(TraceLevel::Debug))
//!     .then(|| Ok(read_request()?))
//!     .then_if(|request| Ok(cache.get(&request.key)))
//!     .with_timeout(Duration::from_millis(250))
//!     .then(|hit| Ok(render(hit)))
//!     .when_aborted(|| tracing::debug!("cache miss"))
//!     .await;
//!
//! match outcome {
//!     Outcome::Present(page) => send(page),
//!     Outcome::Absent => send_not_found(),
//!     Outcome::Failed(e) => send_error(e),
//! }
//! ```

mod builder;
#[allow(clippy::module_inception)]
mod chain;
mod stage;
mod task;
mod terminal;

pub use builder::StagedFutureBuilder;
pub use chain::{Chain, StagedFuture};
pub use stage::{ExecutionMode, Stage};
pub use terminal::Terminal;
