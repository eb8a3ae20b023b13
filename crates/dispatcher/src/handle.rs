//! SinkHandle - manages a sink with isolated queue and worker task
//!
//! The queue is a bounded MPMC channel; the handle keeps a receiver clone so
//! that a full queue can shed its *oldest* entry instead of the newest.
//! Losing the stalest point is preferable to stalling acquisition or growing
//! without bound.

use std::sync::Arc;

use async_channel::{Receiver, Sender, TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, error, instrument, warn};

use contracts::{DataSink, Reading};

use crate::metrics::SinkMetrics;

/// Handle to a running sink worker
pub struct SinkHandle {
    /// Sink name
    name: String,
    /// Channel to send readings to the worker
    tx: Sender<Reading>,
    /// Receiver clone used only to evict the oldest entry when full
    evict_rx: Receiver<Reading>,
    /// Shared metrics
    metrics: Arc<SinkMetrics>,
    /// Worker task handle
    worker_handle: JoinHandle<()>,
}

impl SinkHandle {
    /// Create a new SinkHandle and spawn the worker task
    pub fn spawn<S: DataSink + Send + 'static>(sink: S, queue_capacity: usize) -> Self {
        let name = sink.name().to_string();
        let (tx, rx) = async_channel::bounded(queue_capacity);
        let metrics = Arc::new(SinkMetrics::new());

        let worker_metrics = Arc::clone(&metrics);
        let worker_name = name.clone();
        let worker_rx = rx.clone();

        let worker_handle = tokio::spawn(async move {
            sink_worker(sink, worker_rx, worker_metrics, worker_name).await;
        });

        Self {
            name,
            tx,
            evict_rx: rx,
            metrics,
            worker_handle,
        }
    }

    /// Get sink name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get current metrics
    pub fn metrics(&self) -> &Arc<SinkMetrics> {
        &self.metrics
    }

    /// Enqueue a reading without blocking.
    ///
    /// When the queue is full the oldest queued reading is evicted (and
    /// counted as dropped) to make room; per-device order of the survivors
    /// is preserved. Returns false only if nothing could be enqueued.
    pub fn try_send(&self, reading: Reading) -> bool {
        match self.tx.try_send(reading) {
            Ok(()) => {
                self.metrics.set_queue_len(self.tx.len());
                true
            }
            Err(TrySendError::Full(reading)) => {
                if let Ok(evicted) = self.evict_rx.try_recv() {
                    self.metrics.record_drop();
                    warn!(
                        sink = %self.name,
                        device = %evicted.device_id,
                        seq = evicted.seq,
                        "queue full, oldest reading dropped"
                    );
                }
                match self.tx.try_send(reading) {
                    Ok(()) => true,
                    Err(TrySendError::Full(reading)) | Err(TrySendError::Closed(reading)) => {
                        // lost the race for the freed slot
                        self.metrics.record_drop();
                        warn!(
                            sink = %self.name,
                            device = %reading.device_id,
                            seq = reading.seq,
                            "reading dropped"
                        );
                        false
                    }
                }
            }
            Err(TrySendError::Closed(_)) => {
                error!(sink = %self.name, "sink worker closed unexpectedly");
                false
            }
        }
    }

    /// Shutdown the sink worker gracefully
    #[instrument(name = "sink_handle_shutdown", skip(self))]
    pub async fn shutdown(self) {
        // Close the channel so the worker drains the backlog and stops
        self.tx.close();
        drop(self.evict_rx);
        if let Err(e) = self.worker_handle.await {
            error!(sink = %self.name, error = ?e, "worker task panicked");
        }
        debug!(sink = %self.name, "sink handle shutdown complete");
    }
}

/// Worker task that consumes readings and writes to the sink
#[instrument(
    name = "sink_worker_loop",
    skip(sink, rx, metrics),
    fields(sink = %name)
)]
async fn sink_worker<S: DataSink>(
    mut sink: S,
    rx: Receiver<Reading>,
    metrics: Arc<SinkMetrics>,
    name: String,
) {
    debug!(sink = %name, "sink worker started");

    while let Ok(reading) = rx.recv().await {
        metrics.set_queue_len(rx.len());

        match sink.write(&reading).await {
            Ok(()) => {
                metrics.record_write();
            }
            Err(e) => {
                metrics.record_failure();
                error!(
                    sink = %name,
                    device = %reading.device_id,
                    seq = reading.seq,
                    error = %e,
                    "write failed"
                );
                // Continue processing - don't crash on single failure
            }
        }
    }

    // Cleanup
    if let Err(e) = sink.flush().await {
        error!(sink = %name, error = %e, "flush failed on shutdown");
    }
    if let Err(e) = sink.close().await {
        error!(sink = %name, error = %e, "close failed on shutdown");
    }

    debug!(sink = %name, "sink worker stopped");
}
