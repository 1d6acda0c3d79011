use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use rand::Rng;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::breaker::SharedBreaker;
use crate::config::SharedConfig;
use crate::error::Result;
use crate::models::{ProxyCounts, ProxyRecord, ProxyStatus, UsageLogEntry};
use crate::store::ProxyStore;

/// Capacity of the pending-report queue before reports degrade to
/// synchronous store writes.
const REPORT_QUEUE_CAPACITY: usize = 1024;

/// Random source for the probabilistic recovery roll
///
/// Injected so tests can force both branches deterministically.
pub trait RecoveryRoll: Send + Sync {
    /// Uniform sample in [0, 1)
    fn roll(&self) -> f64;
}

/// Default thread-rng implementation
pub struct ThreadRngRoll;

impl RecoveryRoll for ThreadRngRoll {
    fn roll(&self) -> f64 {
        rand::thread_rng().gen()
    }
}

/// In-memory, periodically refreshed view of proxy health
///
/// Selection decisions always read this view; the durable store may lag by
/// up to one batch interval. A refresh failure never blocks request serving;
/// the last known-good view keeps being served.
pub struct HealthTracker {
    store: Arc<dyn ProxyStore>,
    breaker: SharedBreaker,
    config: SharedConfig,
    roll: Arc<dyn RecoveryRoll>,
    view: DashMap<i32, ProxyRecord>,
    report_tx: mpsc::Sender<UsageLogEntry>,
    report_rx: Mutex<Option<mpsc::Receiver<UsageLogEntry>>>,
    last_refresh: Mutex<Option<Instant>>,
    window_total: AtomicU64,
    window_success: AtomicU64,
    last_rate_bits: AtomicU64,
    /// Reports the flush worker has drained but not yet persisted
    flush_backlog: AtomicUsize,
}

impl HealthTracker {
    pub fn new(
        store: Arc<dyn ProxyStore>,
        breaker: SharedBreaker,
        config: SharedConfig,
        roll: Arc<dyn RecoveryRoll>,
    ) -> Arc<Self> {
        let (report_tx, report_rx) = mpsc::channel(REPORT_QUEUE_CAPACITY);

        Arc::new(Self {
            store,
            breaker,
            config,
            roll,
            view: DashMap::new(),
            report_tx,
            report_rx: Mutex::new(Some(report_rx)),
            last_refresh: Mutex::new(None),
            window_total: AtomicU64::new(0),
            window_success: AtomicU64::new(0),
            last_rate_bits: AtomicU64::new(0f64.to_bits()),
            flush_backlog: AtomicUsize::new(0),
        })
    }

    /// Take the report receiver for the flush worker. Panics if taken twice.
    pub(crate) fn take_report_receiver(&self) -> mpsc::Receiver<UsageLogEntry> {
        self.report_rx
            .lock()
            .take()
            .expect("report receiver already taken")
    }

    /// Pull a fresh snapshot from the store through the circuit breaker.
    ///
    /// On failure the previous view stays in place and the staleness is
    /// logged; the error is returned for the caller's bookkeeping only.
    pub async fn refresh(&self) -> Result<usize> {
        let config = self.config.load();
        let result = self
            .breaker
            .call(self.store.fetch_candidates(config.health.refresh_limit, &[]))
            .await;

        match result {
            Ok(records) => {
                let fetched = records.len();
                let fetched_ids: Vec<i32> = records.iter().map(|r| r.id).collect();

                for record in records {
                    self.view.insert(record.id, record);
                }

                // Selectable entries the store no longer returns were deleted
                // or degraded externally; drop them. Locally degraded entries
                // stay so stats and recovery rolls still see them.
                let threshold = config.health.error_threshold;
                self.view.retain(|id, record| {
                    fetched_ids.contains(id) || !record.is_selectable(threshold)
                });

                *self.last_refresh.lock() = Some(Instant::now());
                debug!(count = fetched, "Refreshed proxy health view");
                Ok(fetched)
            }
            Err(e) => {
                let stale_for = self
                    .last_refresh
                    .lock()
                    .map(|at| at.elapsed().as_secs())
                    .unwrap_or(0);
                warn!(
                    error = %e,
                    stale_secs = stale_for,
                    "Health view refresh failed, serving last known-good snapshot"
                );
                Err(e)
            }
        }
    }

    /// Record one usage outcome.
    ///
    /// The in-memory view is updated immediately so same-process selection
    /// sees it; persistence happens asynchronously via the flush worker.
    /// When the report queue is full the write degrades to a synchronous
    /// store call instead of dropping the report.
    pub async fn report(&self, entry: UsageLogEntry) {
        self.apply_to_view(&entry);

        self.window_total.fetch_add(1, Ordering::Relaxed);
        if entry.success {
            self.window_success.fetch_add(1, Ordering::Relaxed);
        }

        match self.report_tx.try_send(entry) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(entry))
            | Err(mpsc::error::TrySendError::Closed(entry)) => {
                debug!(proxy_id = entry.proxy_id, "Report queue unavailable, writing through");
                if let Err(e) = self.breaker.call(self.store.record_usage(&entry)).await {
                    warn!(proxy_id = entry.proxy_id, error = %e, "Synchronous usage write failed");
                }
            }
        }
    }

    fn apply_to_view(&self, entry: &UsageLogEntry) {
        let config = self.config.load();
        let mut revive = false;

        if let Some(mut record) = self.view.get_mut(&entry.proxy_id) {
            record.last_used = Some(Utc::now());

            if entry.success {
                if let Some(ms) = entry.response_time_ms {
                    let old = record.response_time_ms.unwrap_or(0) as i64;
                    let new_avg = (old * record.success_count as i64 + ms as i64)
                        / (record.success_count as i64 + 1);
                    record.response_time_ms = Some(new_avg as i32);
                }
                record.success_count += 1;

                let status = record.status_enum();
                if matches!(status, Some(ProxyStatus::Failed) | Some(ProxyStatus::Inactive))
                    && self.roll.roll() < config.health.recovery_probability
                {
                    info!(proxy_id = record.id, "Probabilistic recovery, reactivating proxy");
                    record.status = ProxyStatus::Active.as_str().to_string();
                    record.error_count = 0;
                    revive = true;
                }
            } else {
                record.error_count += 1;
                if record.error_count >= config.health.error_threshold {
                    record.status = ProxyStatus::Failed.as_str().to_string();
                } else if record.error_count >= config.health.degrade_threshold {
                    record.status = ProxyStatus::Inactive.as_str().to_string();
                }
            }
        }

        if revive {
            // Persist the revival off the request path.
            let store = self.store.clone();
            let breaker = self.breaker.clone();
            let proxy_id = entry.proxy_id;
            tokio::spawn(async move {
                if let Err(e) = breaker.call(store.reset_errors(Some(proxy_id))).await {
                    warn!(proxy_id, error = %e, "Failed to persist proxy revival");
                }
            });
        }
    }

    /// Selectable candidates from the current view
    pub fn selectable(&self) -> Vec<ProxyRecord> {
        let threshold = self.config.load().health.error_threshold;
        self.view
            .iter()
            .filter(|r| r.is_selectable(threshold))
            .map(|r| r.clone())
            .collect()
    }

    /// One record from the view
    pub fn get(&self, proxy_id: i32) -> Option<ProxyRecord> {
        self.view.get(&proxy_id).map(|r| r.clone())
    }

    /// Per-status totals from the view
    pub fn counts(&self) -> ProxyCounts {
        let mut counts = ProxyCounts::default();
        for record in self.view.iter() {
            match record.status_enum() {
                Some(ProxyStatus::Active) => counts.active += 1,
                Some(ProxyStatus::Inactive) => counts.inactive += 1,
                Some(ProxyStatus::Testing) => counts.testing += 1,
                Some(ProxyStatus::Failed) => counts.failed += 1,
                None => {}
            }
        }
        counts
    }

    /// Success fraction across the current reporting window (falls back to
    /// the last completed window when nothing has been reported yet)
    pub fn recent_success_rate(&self) -> f64 {
        let total = self.window_total.load(Ordering::Relaxed);
        if total == 0 {
            return f64::from_bits(self.last_rate_bits.load(Ordering::Relaxed));
        }
        self.window_success.load(Ordering::Relaxed) as f64 / total as f64
    }

    /// Reports accepted but not yet flushed to the store, whether still
    /// queued or sitting in the worker's retry buffer after a failed flush
    pub fn pending_reports(&self) -> usize {
        let queued = self.report_tx.max_capacity() - self.report_tx.capacity();
        queued + self.flush_backlog.load(Ordering::Relaxed)
    }

    /// Called by the flush worker whenever its retry buffer changes size.
    pub(crate) fn set_flush_backlog(&self, len: usize) {
        self.flush_backlog.store(len, Ordering::Relaxed);
    }

    /// Called by the flush worker after each batch: closes the current
    /// success-rate window.
    pub(crate) fn rotate_window(&self) {
        let total = self.window_total.swap(0, Ordering::Relaxed);
        let success = self.window_success.swap(0, Ordering::Relaxed);
        if total > 0 {
            let rate = success as f64 / total as f64;
            self.last_rate_bits.store(rate.to_bits(), Ordering::Relaxed);
        }
    }
}
