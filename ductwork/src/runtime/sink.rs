use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, trace};

use crate::runtime::envelope::{Envelope, ErasedSink};
use crate::runtime::policy::FailureLatch;
use crate::Context;

/// Terminal consumer, run inline on the coordinator's task.
///
/// Once the root scope is cancelled or a failure has been latched the loop
/// keeps draining without invoking the sink, so upstream stages can finish
/// their sends and shut down without deadlocking on a full buffer.
pub(crate) async fn consume(
    root: CancellationToken,
    input: flume::Receiver<Envelope>,
    sink: ErasedSink,
    latch: Arc<FailureLatch>,
) {
    while let Ok(envelope) = input.recv_async().await {
        if root.is_cancelled() {
            continue;
        }
        if latch.is_set() {
            continue;
        }

        let cx = Context::new(envelope.root.clone(), envelope.pipeline.clone());
        if let Err(cause) = sink(cx, envelope.payload).await {
            // The guard has latched the cause; later items only drain.
            error!(error = %cause, "pipeline sink error");
        }
    }
    trace!("sink drained");
}
