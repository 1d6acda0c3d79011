//! Data model types shared across the pool

mod proxy;
mod stats;
mod usage;

pub use proxy::{
    BulkCreateProxiesRequest, CreateProxyRequest, ImportReport, ProxyProtocol, ProxyRecord,
    ProxyStatus,
};
pub use stats::{PoolUtilization, ProxyCounts, ServiceStats};
pub use usage::{ProxyOutcome, UsageLogEntry};
