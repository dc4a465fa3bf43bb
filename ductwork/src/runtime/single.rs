use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::runtime::envelope::{Envelope, ErasedSingle};
use crate::Context;

/// One worker of a single-item stage. A stage with concurrency `C` runs
/// `C` of these over the same inbound receiver; the outbound channel closes
/// when the last worker drops its sender clone.
///
/// After cancellation the loop keeps receiving until the inbound channel
/// closes so upstream producers never block on a full buffer during
/// shutdown, but the handler is no longer invoked.
pub(crate) async fn worker(
    root: CancellationToken,
    input: flume::Receiver<Envelope>,
    output: flume::Sender<Envelope>,
    handler: ErasedSingle,
) {
    while let Ok(envelope) = input.recv_async().await {
        if root.is_cancelled() {
            continue;
        }

        let cx = Context::new(envelope.root.clone(), envelope.pipeline.clone());
        match handler(cx, envelope.payload).await {
            Ok(payload) => {
                let next = Envelope {
                    root: envelope.root,
                    pipeline: envelope.pipeline,
                    payload,
                };
                tokio::select! {
                    _ = root.cancelled() => continue,
                    sent = output.send_async(next) => {
                        if sent.is_err() {
                            debug!("downstream stage disconnected");
                        }
                    }
                }
            }
            Err(_) => {
                // Latched by the guard; the failed item produces no output.
                continue;
            }
        }
    }
    trace!("stage worker finished");
}
