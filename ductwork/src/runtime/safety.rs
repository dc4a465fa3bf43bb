use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use futures::FutureExt;

use crate::runtime::envelope::{ErasedBatch, ErasedSingle, ErasedSink};
use crate::runtime::policy::FailureLatch;
use crate::Error;

/// Wraps an erased single-item handler so that user misbehaviour stays
/// confined to one envelope: error returns are latched, panics (whether
/// raised while the handler closure builds its future or while the future
/// is polled) become latched [`Error::HandlerPanic`] causes naming the
/// stage, and no output is ever produced on a failed call.
pub(crate) fn guard_single(
    stage: &str,
    inner: ErasedSingle,
    latch: Arc<FailureLatch>,
) -> ErasedSingle {
    let stage: Arc<str> = stage.into();
    Arc::new(move |cx, payload| {
        let stage = Arc::clone(&stage);
        let latch = Arc::clone(&latch);
        let call = panic::catch_unwind(AssertUnwindSafe(|| inner(cx, payload)));
        Box::pin(async move {
            let fut = match call {
                Ok(fut) => fut,
                Err(payload) => return Err(latch_panic(&latch, &stage, payload)),
            };
            match AssertUnwindSafe(fut).catch_unwind().await {
                Ok(Ok(output)) => Ok(output),
                Ok(Err(cause)) => {
                    latch.set(cause.clone());
                    Err(cause)
                }
                Err(payload) => Err(latch_panic(&latch, &stage, payload)),
            }
        })
    })
}

/// Batch counterpart of [`guard_single`].
pub(crate) fn guard_batch(stage: &str, inner: ErasedBatch, latch: Arc<FailureLatch>) -> ErasedBatch {
    let stage: Arc<str> = stage.into();
    Arc::new(move |cx, payloads| {
        let stage = Arc::clone(&stage);
        let latch = Arc::clone(&latch);
        let call = panic::catch_unwind(AssertUnwindSafe(|| inner(cx, payloads)));
        Box::pin(async move {
            let fut = match call {
                Ok(fut) => fut,
                Err(payload) => return Err(latch_panic(&latch, &stage, payload)),
            };
            match AssertUnwindSafe(fut).catch_unwind().await {
                Ok(Ok(outputs)) => Ok(outputs),
                Ok(Err(cause)) => {
                    latch.set(cause.clone());
                    Err(cause)
                }
                Err(payload) => Err(latch_panic(&latch, &stage, payload)),
            }
        })
    })
}

/// Sink counterpart of [`guard_single`]; the stage label is always `sink`.
pub(crate) fn guard_sink(inner: ErasedSink, latch: Arc<FailureLatch>) -> ErasedSink {
    let stage: Arc<str> = "sink".into();
    Arc::new(move |cx, payload| {
        let stage = Arc::clone(&stage);
        let latch = Arc::clone(&latch);
        let call = panic::catch_unwind(AssertUnwindSafe(|| inner(cx, payload)));
        Box::pin(async move {
            let fut = match call {
                Ok(fut) => fut,
                Err(payload) => return Err(latch_panic(&latch, &stage, payload)),
            };
            match AssertUnwindSafe(fut).catch_unwind().await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(cause)) => {
                    latch.set(cause.clone());
                    Err(cause)
                }
                Err(payload) => Err(latch_panic(&latch, &stage, payload)),
            }
        })
    })
}

fn latch_panic(latch: &FailureLatch, stage: &str, payload: Box<dyn Any + Send>) -> Error {
    let cause = Error::HandlerPanic {
        stage: stage.to_owned(),
        message: panic_message(payload),
    };
    latch.set(cause.clone());
    cause
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    match payload.downcast::<String>() {
        Ok(message) => *message,
        Err(payload) => match payload.downcast::<&'static str>() {
            Ok(message) => (*message).to_owned(),
            Err(_) => "opaque panic payload".to_owned(),
        },
    }
}
