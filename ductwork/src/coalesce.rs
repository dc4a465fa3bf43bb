//! Collapses bursts of trigger requests into at most one pending run.
//!
//! Useful in front of a pipeline that is re-run on demand: schedulers,
//! file watchers, and webhook handlers can all call
//! [`Coalescer::request`] freely, and the consuming loop executes at most
//! one queued run at a time with at most one more pending.
use std::future::Future;

use tokio_util::sync::CancellationToken;

use crate::Error;

/// Coalesces trigger requests into at most one pending run.
///
/// [`Coalescer::request`] never blocks: while a run is in progress and one
/// request is already queued, further requests are dropped.
///
/// ```
/// use ductwork::{CancellationToken, Coalescer};
///
/// # tokio_test::block_on(async {
/// let coalescer = Coalescer::new();
/// coalescer.request();
///
/// let cancel = CancellationToken::new();
/// cancel.cancel();
///
/// // Runs the queued request (at most), then reports cancellation.
/// let result = coalescer.run(cancel, |_cancel| async { Ok(()) }).await;
/// assert!(result.is_err());
/// # });
/// ```
#[derive(Debug, Clone)]
pub struct Coalescer {
    requests_tx: flume::Sender<()>,
    requests_rx: flume::Receiver<()>,
}

impl Coalescer {
    /// Creates a coalescer with a single pending slot.
    pub fn new() -> Self {
        let (requests_tx, requests_rx) = flume::bounded(1);
        Self {
            requests_tx,
            requests_rx,
        }
    }

    /// Queues a run if no run is already pending; otherwise drops the
    /// request. Never blocks.
    pub fn request(&self) {
        let _ = self.requests_tx.try_send(());
    }

    /// Consumes queued requests sequentially, calling `run_once` for each,
    /// until `cancel` fires (returned as [`Error::Cancelled`]) or a run
    /// fails.
    pub async fn run<F, Fut>(&self, cancel: CancellationToken, mut run_once: F) -> Result<(), Error>
    where
        F: FnMut(CancellationToken) -> Fut,
        Fut: Future<Output = Result<(), Error>>,
    {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                received = self.requests_rx.recv_async() => {
                    received.map_err(|_| Error::ChannelClosed("coalescer requests"))?;
                    run_once(cancel.clone()).await?;
                }
            }
        }
    }
}

impl Default for Coalescer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn burst_of_requests_coalesces_to_one_pending_run() {
        let cancel = CancellationToken::new();
        let coalescer = Coalescer::new();

        let runs = Arc::new(AtomicU32::new(0));
        let (first_started_tx, first_started_rx) = flume::bounded::<()>(1);
        let (release_first_tx, release_first_rx) = flume::bounded::<()>(1);

        let consumer = {
            let coalescer = coalescer.clone();
            let cancel = cancel.clone();
            let runs = Arc::clone(&runs);
            tokio::spawn(async move {
                coalescer
                    .run(cancel, move |_cancel| {
                        let runs = Arc::clone(&runs);
                        let first_started_tx = first_started_tx.clone();
                        let release_first_rx = release_first_rx.clone();
                        async move {
                            if runs.fetch_add(1, Ordering::SeqCst) == 0 {
                                let _ = first_started_tx.send_async(()).await;
                                let _ = release_first_rx.recv_async().await;
                            }
                            Ok(())
                        }
                    })
                    .await
            })
        };

        coalescer.request();
        first_started_rx
            .recv_async()
            .await
            .expect("first run must start");

        // While the first run is blocked, spam requests; only one may queue.
        for _ in 0..100 {
            coalescer.request();
        }
        release_first_tx
            .send_async(())
            .await
            .expect("first run must be released");

        // Wait for the single pending run to complete.
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while runs.load(Ordering::SeqCst) < 2 {
            assert!(
                tokio::time::Instant::now() < deadline,
                "expected the pending run to execute"
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 2, "expected exactly 2 runs");

        cancel.cancel();
        let result = consumer.await.expect("consumer task must not panic");
        assert_eq!(result, Err(Error::Cancelled));
    }

    #[tokio::test]
    async fn run_once_failure_stops_the_loop() {
        let coalescer = Coalescer::new();
        coalescer.request();

        let result = coalescer
            .run(CancellationToken::new(), |_cancel| async {
                Err(Error::Processing("trigger failed".into()))
            })
            .await;
        assert_eq!(result, Err(Error::Processing("trigger failed".into())));
    }
}
