use serde::Serialize;

/// Per-status proxy totals from the live health view
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProxyCounts {
    pub active: u64,
    pub inactive: u64,
    pub testing: u64,
    pub failed: u64,
}

impl ProxyCounts {
    pub fn total(&self) -> u64 {
        self.active + self.inactive + self.testing + self.failed
    }
}

/// Database connection pool utilization
#[derive(Debug, Clone, Copy, Serialize)]
pub struct PoolUtilization {
    pub size: u32,
    pub idle: u32,
}

/// Snapshot handed to monitoring endpoints
#[derive(Debug, Clone, Serialize)]
pub struct ServiceStats {
    pub breaker_state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pool: Option<PoolUtilization>,
    pub proxy_counts: ProxyCounts,
    /// Success fraction over the recent reporting window, in [0, 1]
    pub recent_success_rate: f64,
    /// Usage reports not yet flushed to the store
    pub pending_reports: usize,
}
