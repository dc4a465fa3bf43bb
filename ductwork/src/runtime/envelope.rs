use std::any::Any;
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use crate::{Context, Error};

/// Type-erased payload travelling between stages. The typed builder wraps
/// user handlers so that the boxed value is always the concrete type the
/// next stage downcasts to.
pub(crate) type ErasedPayload = Box<dyn Any + Send>;

/// Transport record between adjacent stages. Carries the root cancellation
/// handle so every downstream worker honours the top-level cancel, and the
/// pipeline name for diagnostics. Consumed exactly once.
pub(crate) struct Envelope {
    pub root: CancellationToken,
    pub pipeline: Arc<str>,
    pub payload: ErasedPayload,
}

pub(crate) type HandlerFuture<T> = BoxFuture<'static, Result<T, Error>>;

/// Erased single-item transform: one input envelope payload in, at most one
/// payload out.
pub(crate) type ErasedSingle =
    Arc<dyn Fn(Context, ErasedPayload) -> HandlerFuture<ErasedPayload> + Send + Sync>;

/// Erased batch transform. Output length is unrelated to input length.
pub(crate) type ErasedBatch =
    Arc<dyn Fn(Context, Vec<ErasedPayload>) -> HandlerFuture<Vec<ErasedPayload>> + Send + Sync>;

/// Erased terminal consumer.
pub(crate) type ErasedSink =
    Arc<dyn Fn(Context, ErasedPayload) -> HandlerFuture<()> + Send + Sync>;

/// Future that drains the user's source channel into the first inter-stage
/// buffer. Produced by [`ErasedSource`] once the source function yields its
/// channel.
pub(crate) type SourcePump = BoxFuture<'static, ()>;

/// Erased source opener: invoked once per run with the source-scope
/// context, the root handle for envelope stamping, and the first
/// inter-stage buffer. Fails without spawning anything when the user source
/// function errors.
pub(crate) type ErasedSource = Arc<
    dyn Fn(
            Context,
            CancellationToken,
            flume::Sender<Envelope>,
        ) -> BoxFuture<'static, Result<SourcePump, Error>>
        + Send
        + Sync,
>;
