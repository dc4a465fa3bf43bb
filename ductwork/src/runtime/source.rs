use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::runtime::envelope::Envelope;
use crate::Context;

/// Drains the user's typed source channel into the first inter-stage buffer
/// as envelopes, preserving source order.
///
/// Exits when the source channel disconnects (the caller dropped its
/// sender) or the source scope is cancelled; the user channel itself is
/// never closed from here, only the receiver is dropped. Dropping the
/// outbound sender on return closes the first buffer.
pub(crate) async fn pump<T: Send + 'static>(
    root: CancellationToken,
    cx: Context,
    source: flume::Receiver<T>,
    output: flume::Sender<Envelope>,
) {
    loop {
        tokio::select! {
            _ = cx.cancelled() => break,
            received = source.recv_async() => {
                let Ok(item) = received else { break };
                let envelope = Envelope {
                    root: root.clone(),
                    pipeline: cx.pipeline.clone(),
                    payload: Box::new(item),
                };
                tokio::select! {
                    _ = cx.cancelled() => break,
                    sent = output.send_async(envelope) => {
                        if sent.is_err() {
                            break;
                        }
                    }
                }
            }
        }
    }
    trace!(pipeline = cx.pipeline(), "source pump finished");
}
