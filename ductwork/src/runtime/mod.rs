//! Execution engine behind [`crate::Runnable`]: buffer allocation, worker
//! spawning, shutdown coordination, and outcome classification.
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::builder::{Definition, StageKind};
use crate::{Context, Error, Outcome};

pub(crate) mod batch;
pub(crate) mod envelope;
pub(crate) mod policy;
pub(crate) mod safety;
pub(crate) mod single;
pub(crate) mod sink;
pub(crate) mod source;

use self::envelope::ErasedSink;
use self::policy::FailureLatch;

/// Runs one pipeline execution to completion and classifies the result.
///
/// Wiring order follows the definition: source pump into the first buffer,
/// one worker set per stage, then the sink inline on this task. Every
/// spawned worker is joined before returning, and the derived source scope
/// is released on all exit paths by its drop guard.
pub(crate) async fn execute(
    def: &Definition,
    sink: &ErasedSink,
    root: CancellationToken,
) -> Outcome {
    if let Some(cause) = &def.invalid {
        return Outcome::Failed(cause.clone());
    }

    let source_scope = root.child_token();
    let _source_guard = source_scope.clone().drop_guard();
    let latch = FailureLatch::shared();

    info!(pipeline = %def.name, "pipeline started");

    let source_cx = Context::new(source_scope.clone(), def.name.clone());
    let (first_tx, first_rx) = flume::bounded(def.default_buffer);
    let pump = match (def.source)(source_cx, root.clone(), first_tx).await {
        Ok(pump) => pump,
        Err(cause) => {
            error!(pipeline = %def.name, error = %cause, "source failed to start");
            return Outcome::Failed(cause);
        }
    };

    let mut workers: JoinSet<()> = JoinSet::new();
    workers.spawn(pump);

    let mut current = first_rx;
    for stage in &def.stages {
        let capacity = stage.buffer.unwrap_or(def.default_buffer);
        let (tx, rx) = flume::bounded(capacity);

        match &stage.kind {
            StageKind::Single { handler } => {
                let guarded = safety::guard_single(&stage.name, handler.clone(), latch.clone());
                for _ in 0..stage.concurrency.max(1) {
                    workers.spawn(single::worker(
                        root.clone(),
                        current.clone(),
                        tx.clone(),
                        guarded.clone(),
                    ));
                }
            }
            StageKind::Batch { handler, policy } => {
                let guarded = safety::guard_batch(&stage.name, handler.clone(), latch.clone());
                workers.spawn(batch::worker(root.clone(), current, tx, guarded, *policy));
            }
        }

        // The spawned workers hold the only senders for this stage; the
        // channel disconnects once they all finish draining.
        current = rx;
    }

    let guarded_sink = safety::guard_sink(sink.clone(), latch.clone());
    sink::consume(root.clone(), current, guarded_sink, latch.clone()).await;

    // Stop feeding the source promptly once the sink is done with a
    // latched failure; the drop guard covers the success path.
    if latch.is_set() {
        source_scope.cancel();
    }

    while let Some(joined) = workers.join_next().await {
        if let Err(cause) = joined {
            error!(error = %cause, "pipeline worker task failed");
        }
    }

    // Cancellation wins over any latched intrinsic failure.
    let outcome = if root.is_cancelled() {
        Outcome::Cancelled(Error::Cancelled)
    } else {
        match latch.get() {
            Some(cause) if cause.is_cancellation() => Outcome::Cancelled(cause),
            Some(cause) => Outcome::Failed(cause),
            None => Outcome::Succeeded,
        }
    };

    info!(pipeline = %def.name, state = %outcome.state(), "pipeline finished");
    outcome
}
