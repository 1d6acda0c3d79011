use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use super::HealthTracker;
use crate::breaker::SharedBreaker;
use crate::models::UsageLogEntry;
use crate::store::ProxyStore;

/// Ceiling on buffered reports while the store is unreachable; beyond this
/// the oldest entries are discarded.
const MAX_BUFFERED_REPORTS: usize = 10_000;

/// Background worker owning the periodic refresh and the batched flush
///
/// Runs in a spawned task; stopped through the watch shutdown channel, with
/// a final flush of whatever is still buffered.
pub struct HealthWorker {
    tracker: Arc<HealthTracker>,
    store: Arc<dyn ProxyStore>,
    breaker: SharedBreaker,
    refresh_interval: Duration,
    batch_interval: Duration,
    report_rx: mpsc::Receiver<UsageLogEntry>,
    buffer: Vec<UsageLogEntry>,
}

impl HealthWorker {
    pub fn new(
        tracker: Arc<HealthTracker>,
        store: Arc<dyn ProxyStore>,
        breaker: SharedBreaker,
        refresh_interval: Duration,
        batch_interval: Duration,
    ) -> Self {
        let report_rx = tracker.take_report_receiver();
        Self {
            tracker,
            store,
            breaker,
            refresh_interval,
            batch_interval,
            report_rx,
            buffer: Vec::new(),
        }
    }

    /// Run the worker (call in a spawned task)
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            refresh_secs = self.refresh_interval.as_secs(),
            batch_secs = self.batch_interval.as_secs(),
            "Starting health worker"
        );

        let mut refresh_tick = interval(self.refresh_interval);
        let mut flush_tick = interval(self.batch_interval);
        // Skip the immediate ticks; the service refreshes once at startup.
        refresh_tick.tick().await;
        flush_tick.tick().await;

        loop {
            tokio::select! {
                _ = refresh_tick.tick() => {
                    // Errors are already logged by the tracker; the stale
                    // view keeps serving.
                    let _ = self.tracker.refresh().await;
                }
                _ = flush_tick.tick() => {
                    self.drain_channel();
                    self.flush().await;
                }
                entry = self.report_rx.recv() => {
                    match entry {
                        Some(entry) => self.buffer_entry(entry),
                        None => {
                            // All senders gone; nothing more will arrive.
                            self.flush().await;
                            break;
                        }
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Health worker shutting down");
                        self.drain_channel();
                        self.flush().await;
                        break;
                    }
                }
            }
        }
    }

    fn buffer_entry(&mut self, entry: UsageLogEntry) {
        if self.buffer.len() >= MAX_BUFFERED_REPORTS {
            warn!("Report buffer full, discarding oldest entry");
            self.buffer.remove(0);
        }
        self.buffer.push(entry);
        self.tracker.set_flush_backlog(self.buffer.len());
    }

    fn drain_channel(&mut self) {
        while let Ok(entry) = self.report_rx.try_recv() {
            self.buffer_entry(entry);
        }
    }

    /// Persist the buffered reports as one coalesced batch.
    ///
    /// On failure the buffer is kept and retried on the next tick.
    async fn flush(&mut self) {
        if self.buffer.is_empty() {
            return;
        }

        let count = self.buffer.len();
        match self
            .breaker
            .call(self.store.record_usage_batch(&self.buffer))
            .await
        {
            Ok(()) => {
                debug!(count, "Flushed usage reports to store");
                self.buffer.clear();
                self.tracker.set_flush_backlog(0);
                self.tracker.rotate_window();
            }
            Err(e) => {
                error!(count, error = %e, "Batch flush failed, keeping reports for retry");
            }
        }
    }
}

/// Handle for stopping the health worker
pub struct HealthWorkerHandle {
    shutdown_tx: watch::Sender<bool>,
}

impl HealthWorkerHandle {
    pub fn new() -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (Self { shutdown_tx: tx }, rx)
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

impl Default for HealthWorkerHandle {
    fn default() -> Self {
        Self::new().0
    }
}
