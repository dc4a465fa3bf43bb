//! Typed, staged, concurrent dataflow pipeline runtime
//!
//! Provides a library for declaring linear `source → stage → … → sink`
//! dataflow pipelines. Each stage runs concurrently over bounded channels
//! with backpressure; the runtime captures the first failure, propagates
//! cancellation, and terminates deterministically with a
//! [`State::Succeeded`], [`State::Cancelled`], or [`State::Failed`] outcome.
//!
//! A pipeline is declared with a typed builder: the payload type of each
//! stage's input must equal the previous stage's output, checked at compile
//! time.
//!
//! ```
//! use std::sync::{Arc, Mutex};
//! use ductwork::{CancellationToken, Context, Error, Outcome, Pipeline};
//!
//! # tokio_test::block_on(async {
//! let source = |_cx: Context| async move {
//!     let (tx, rx) = flume::bounded(3);
//!     for n in 1..=3 {
//!         tx.send(n).map_err(|_| Error::Source("channel closed".into()))?;
//!     }
//!     Ok(rx)
//! };
//!
//! let collected = Arc::new(Mutex::new(Vec::new()));
//! let output = Arc::clone(&collected);
//!
//! let runnable = Pipeline::new("example", source)
//!     .then(|_cx, n: i32| async move { Ok(format!("n={}", n * 10)) })
//!     .to(move |_cx, line: String| {
//!         let output = Arc::clone(&output);
//!         async move {
//!             output.lock().expect("collector poisoned").push(line);
//!             Ok(())
//!         }
//!     });
//!
//! let outcome = runnable.run(CancellationToken::new()).await;
//! assert_eq!(outcome, Outcome::Succeeded);
//! assert_eq!(
//!     *collected.lock().expect("collector poisoned"),
//!     vec!["n=10", "n=20", "n=30"],
//! );
//! # });
//! ```
//!
//! The caller owns the source channel and closes it by dropping the sender;
//! the runtime never closes it. Cancellation is cooperative: pass a
//! [`CancellationToken`] to [`Runnable::run`] and cancel it to collapse the
//! pipeline promptly, draining in-flight items without invoking user
//! callbacks.
use std::fmt;
use std::sync::Arc;
use thiserror::Error as ThisError;

pub mod builder;
pub mod coalesce;
mod runtime;

pub use builder::{Pipeline, Runnable, StageOptions};
pub use coalesce::Coalescer;
/// Cooperative cancellation handle accepted by [`Runnable::run`].
pub use tokio_util::sync::CancellationToken;

/// BatchPolicy controls how a batch stage groups items before invoking its
/// handler.
///
/// A batch is flushed when `size` items have accumulated, or (when
/// `max_wait` is non-zero) once `max_wait` has elapsed since the first
/// buffered item, whichever comes first. A zero `max_wait` disables the
/// time-based flush entirely.
///
/// ```
/// use std::time::Duration;
/// use ductwork::BatchPolicy;
///
/// let policy = BatchPolicy::new(500).max_wait(Duration::from_secs(10));
/// assert_eq!(policy.size, 500);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchPolicy {
    /// Number of buffered items that forces a flush. Must be at least 1;
    /// a zero size is rejected when the pipeline is built.
    pub size: usize,
    /// Maximum time to hold a non-empty buffer before flushing.
    /// `Duration::ZERO` means the batch flushes on size alone.
    pub max_wait: std::time::Duration,
}

impl BatchPolicy {
    /// Creates a size-only policy; combine with [`BatchPolicy::max_wait`]
    /// for a time-based flush.
    pub fn new(size: usize) -> Self {
        Self {
            size,
            max_wait: std::time::Duration::ZERO,
        }
    }

    /// Sets the maximum time a non-empty buffer may wait before flushing.
    pub fn max_wait(mut self, max_wait: std::time::Duration) -> Self {
        self.max_wait = max_wait;
        self
    }
}

/// Context is handed to every user callback: the source function, stage
/// handlers, and the sink. It carries the pipeline name and the root
/// cancellation handle so user code can compose its own blocking work with
/// pipeline shutdown.
#[derive(Debug, Clone)]
pub struct Context {
    cancel: CancellationToken,
    pipeline: Arc<str>,
}

impl Context {
    pub(crate) fn new(cancel: CancellationToken, pipeline: Arc<str>) -> Self {
        Self { cancel, pipeline }
    }

    /// Name of the pipeline this callback belongs to.
    pub fn pipeline(&self) -> &str {
        &self.pipeline
    }

    /// Returns true once the associated cancellation scope has fired.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Completes when the associated cancellation scope fires.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }

    /// The underlying cancellation handle, for `select!`-style composition
    /// in user sources and handlers.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }
}

/// Enum to capture errors occurring while building or running a pipeline.
///
/// User callbacks return this type as well; [`Error::Source`],
/// [`Error::Processing`], and [`Error::Sink`] are general-purpose carriers
/// for failures raised inside sources, stage handlers, and sinks.
#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
pub enum Error {
    /// The pipeline definition is unusable: currently a batch stage whose
    /// policy size is zero. Surfaced by [`Runnable::run`] before any stage
    /// is spawned.
    #[error("invalid pipeline configuration: {0}")]
    InvalidConfig(String),

    /// The source function failed before yielding a channel.
    #[error("source error: {0}")]
    Source(String),

    /// A single or batch stage handler failed. Emission of the failed
    /// item's output is suppressed and the cause is latched as the
    /// pipeline's failure.
    #[error("processing error: {0}")]
    Processing(String),

    /// The sink rejected an item. Subsequent items are drained without
    /// invoking the sink.
    #[error("sink error: {0}")]
    Sink(String),

    /// A user callback panicked. The panic is confined to the offending
    /// item; the message names the stage it happened in.
    #[error("panic in handler ({stage}): {message}")]
    HandlerPanic {
        /// Name of the stage whose handler panicked (`sink` for the sink).
        stage: String,
        /// Rendering of the panic payload.
        message: String,
    },

    /// The pipeline was cancelled through its root cancellation handle, or
    /// a callback reported its own work as cancelled.
    #[error("pipeline cancelled")]
    Cancelled,

    /// An internal channel disconnected while it was still needed.
    #[error("channel closed: {0}")]
    ChannelClosed(&'static str),
}

impl Error {
    /// Whether this cause classifies the run as cancelled rather than
    /// failed.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

/// Terminal state of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// The source was exhausted and every item flowed through to the sink
    /// without failure.
    Succeeded,
    /// The root cancellation handle fired, or the latched cause was itself
    /// a cancellation.
    Cancelled,
    /// A handler, sink, source, or configuration failure was latched.
    Failed,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            State::Succeeded => write!(f, "succeeded"),
            State::Cancelled => write!(f, "cancelled"),
            State::Failed => write!(f, "failed"),
        }
    }
}

/// Outcome of a pipeline run: the terminal [`State`] plus, for cancelled
/// and failed runs, the first cause observed.
///
/// Cancellation takes precedence: if the root handle fired, the outcome is
/// [`Outcome::Cancelled`] even when a handler failure was latched first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Run completed; sink consumed every item.
    Succeeded,
    /// Run was cut short by cancellation.
    Cancelled(Error),
    /// Run was cut short by the contained failure.
    Failed(Error),
}

impl Outcome {
    /// The uniform state label for this outcome.
    pub fn state(&self) -> State {
        match self {
            Outcome::Succeeded => State::Succeeded,
            Outcome::Cancelled(_) => State::Cancelled,
            Outcome::Failed(_) => State::Failed,
        }
    }

    /// The latched cause, if the run did not succeed.
    pub fn cause(&self) -> Option<&Error> {
        match self {
            Outcome::Succeeded => None,
            Outcome::Cancelled(cause) | Outcome::Failed(cause) => Some(cause),
        }
    }

    /// Convenience mirror of the outcome: `Ok(())` for a successful run,
    /// otherwise the cause as an error.
    pub fn into_result(self) -> Result<(), Error> {
        match self {
            Outcome::Succeeded => Ok(()),
            Outcome::Cancelled(cause) | Outcome::Failed(cause) => Err(cause),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_display_labels() {
        assert_eq!(State::Succeeded.to_string(), "succeeded");
        assert_eq!(State::Cancelled.to_string(), "cancelled");
        assert_eq!(State::Failed.to_string(), "failed");
    }

    #[test]
    fn handler_panic_message_names_the_stage() {
        let cause = Error::HandlerPanic {
            stage: "normalize".into(),
            message: "index out of bounds".into(),
        };
        assert_eq!(
            cause.to_string(),
            "panic in handler (normalize): index out of bounds"
        );
    }

    #[test]
    fn cancellation_kind() {
        assert!(Error::Cancelled.is_cancellation());
        assert!(!Error::Processing("boom".into()).is_cancellation());
        assert!(!Error::InvalidConfig("bad".into()).is_cancellation());
    }

    #[test]
    fn outcome_state_and_cause() {
        let sentinel = Error::Processing("boom".into());
        assert_eq!(Outcome::Succeeded.state(), State::Succeeded);
        assert_eq!(Outcome::Succeeded.cause(), None);

        let failed = Outcome::Failed(sentinel.clone());
        assert_eq!(failed.state(), State::Failed);
        assert_eq!(failed.cause(), Some(&sentinel));

        let cancelled = Outcome::Cancelled(Error::Cancelled);
        assert_eq!(cancelled.state(), State::Cancelled);
        assert_eq!(cancelled.into_result(), Err(Error::Cancelled));
        assert_eq!(Outcome::Succeeded.into_result(), Ok(()));
    }

    #[test]
    fn batch_policy_builder() {
        let policy = BatchPolicy::new(2);
        assert_eq!(policy.size, 2);
        assert!(policy.max_wait.is_zero());

        let timed = BatchPolicy::new(8).max_wait(std::time::Duration::from_millis(50));
        assert_eq!(timed.max_wait, std::time::Duration::from_millis(50));
    }

    #[test]
    fn context_reports_pipeline_and_cancellation() {
        let token = CancellationToken::new();
        let cx = Context::new(token.clone(), Arc::from("ingest"));
        assert_eq!(cx.pipeline(), "ingest");
        assert!(!cx.is_cancelled());
        token.cancel();
        assert!(cx.is_cancelled());
    }
}
