//! Durable CRUD for proxy records and usage logs
//!
//! The [`ProxyStore`] trait is the seam between the resilience layer and the
//! backing database. The store performs no retries of its own; every call
//! from the rest of the subsystem goes through the circuit breaker.

mod memory;
mod postgres;

pub use memory::MemoryProxyStore;
pub use postgres::PgProxyStore;

use async_trait::async_trait;
use std::collections::HashMap;

use crate::error::Result;
use crate::models::{CreateProxyRequest, ProxyCounts, ProxyRecord, UsageLogEntry};

/// Status transition thresholds applied on usage writes
#[derive(Debug, Clone, Copy)]
pub struct HealthThresholds {
    /// error_count at which a proxy becomes failed
    pub error_threshold: i32,
    /// error_count at which a proxy is degraded to inactive
    pub degrade_threshold: i32,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            error_threshold: 3,
            degrade_threshold: 2,
        }
    }
}

/// Storage backend for proxy records and their usage log
#[async_trait]
pub trait ProxyStore: Send + Sync {
    /// Fetch selectable candidates: status=active, error_count below the
    /// failure threshold, excluding `exclude_ids`, ordered least-recently-used
    /// (never-used first), ties broken by lowest error_count. An empty vec is
    /// a valid answer, not an error.
    async fn fetch_candidates(&self, limit: i64, exclude_ids: &[i32]) -> Result<Vec<ProxyRecord>>;

    /// Insert one usage log row and atomically update the owning record's
    /// counters, timestamps, running-average response time, and status.
    async fn record_usage(&self, entry: &UsageLogEntry) -> Result<()>;

    /// Batch variant: all log rows are inserted, and counter updates are
    /// coalesced to one write per proxy.
    async fn record_usage_batch(&self, entries: &[UsageLogEntry]) -> Result<()>;

    /// Clear error_count (and reactivate) for one proxy, or for all when
    /// `proxy_id` is `None`. Returns the number of rows touched. Idempotent.
    async fn reset_errors(&self, proxy_id: Option<i32>) -> Result<u64>;

    /// Per-status totals for monitoring
    async fn count_by_status(&self) -> Result<ProxyCounts>;

    /// Insert a new proxy record (validated at this boundary)
    async fn create(&self, req: &CreateProxyRequest) -> Result<ProxyRecord>;

    /// Get one record by id
    async fn get_by_id(&self, id: i32) -> Result<Option<ProxyRecord>>;
}

/// Coalesced per-proxy counter changes from a batch of usage entries
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UsageDelta {
    pub successes: i32,
    pub errors: i32,
    /// Sum of response times across successful entries, for the running average
    pub response_time_total: i64,
    pub timed_samples: i32,
}

/// Fold a batch of entries into one delta per proxy.
///
/// This is what keeps write amplification bounded under high concurrency:
/// many in-memory reports for the same proxy become a single UPDATE.
pub fn coalesce_usage(entries: &[UsageLogEntry]) -> HashMap<i32, UsageDelta> {
    let mut deltas: HashMap<i32, UsageDelta> = HashMap::new();

    for entry in entries {
        let delta = deltas.entry(entry.proxy_id).or_default();
        if entry.success {
            delta.successes += 1;
            if let Some(ms) = entry.response_time_ms {
                delta.response_time_total += ms as i64;
                delta.timed_samples += 1;
            }
        } else {
            delta.errors += 1;
        }
    }

    deltas
}
