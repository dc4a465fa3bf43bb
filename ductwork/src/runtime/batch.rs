use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::runtime::envelope::{Envelope, ErasedBatch, ErasedPayload};
use crate::{BatchPolicy, Context};

/// Single-task accumulator for a batch stage.
///
/// Flushes when `policy.size` items are pending, when `policy.max_wait`
/// elapses after the first pending item (never armed for a zero wait), when
/// the inbound channel closes, and best-effort once on cancellation. The
/// deadline is armed only on the empty→non-empty transition and cleared on
/// every flush, so it cannot fire against an empty buffer.
pub(crate) async fn worker(
    root: CancellationToken,
    input: flume::Receiver<Envelope>,
    output: flume::Sender<Envelope>,
    handler: ErasedBatch,
    policy: BatchPolicy,
) {
    let size = policy.size.max(1);
    let mut pending: Vec<Envelope> = Vec::with_capacity(size);
    let mut deadline: Option<Instant> = None;

    loop {
        // Dummy instant when unarmed; the guard keeps the branch unpolled.
        let wake_at = deadline.unwrap_or_else(Instant::now);

        tokio::select! {
            _ = root.cancelled() => {
                flush(&root, &output, &handler, &mut pending).await;
                break;
            }
            _ = time::sleep_until(wake_at), if deadline.is_some() => {
                flush(&root, &output, &handler, &mut pending).await;
                deadline = None;
            }
            received = input.recv_async() => match received {
                Ok(envelope) => {
                    if pending.is_empty() && !policy.max_wait.is_zero() {
                        deadline = Some(Instant::now() + policy.max_wait);
                    }
                    pending.push(envelope);
                    if pending.len() >= size {
                        flush(&root, &output, &handler, &mut pending).await;
                        deadline = None;
                    }
                }
                Err(_) => {
                    flush(&root, &output, &handler, &mut pending).await;
                    break;
                }
            }
        }
    }
    trace!("batch stage finished");
}

/// Hands the pending payloads to the handler in arrival order and emits its
/// outputs. A handler error empties the buffer without emitting (the cause
/// is already latched by the guard); cancellation mid-emission drops the
/// remaining outputs. The buffer is empty on return either way.
async fn flush(
    root: &CancellationToken,
    output: &flume::Sender<Envelope>,
    handler: &ErasedBatch,
    pending: &mut Vec<Envelope>,
) {
    if pending.is_empty() {
        return;
    }

    let pipeline = pending[0].pipeline.clone();
    let inputs: Vec<ErasedPayload> = pending.drain(..).map(|envelope| envelope.payload).collect();

    let cx = Context::new(root.clone(), pipeline.clone());
    let outputs = match handler(cx, inputs).await {
        Ok(outputs) => outputs,
        Err(_) => return,
    };

    for payload in outputs {
        let next = Envelope {
            root: root.clone(),
            pipeline: pipeline.clone(),
            payload,
        };
        tokio::select! {
            _ = root.cancelled() => return,
            sent = output.send_async(next) => {
                if sent.is_err() {
                    return;
                }
            }
        }
    }
}
