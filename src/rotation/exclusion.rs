//! Time-bounded denylist of recently failed proxies

use dashmap::DashMap;
use std::time::Duration;
use tokio::time::Instant;

/// Process-wide set of proxy ids excluded from selection until expiry
///
/// Prevents a proxy that just failed from being reselected within the same
/// request wave. Entries are purged lazily on lookup.
pub struct ExclusionSet {
    entries: DashMap<i32, Instant>,
}

impl ExclusionSet {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Exclude a proxy for `ttl`
    pub fn insert(&self, proxy_id: i32, ttl: Duration) {
        self.entries.insert(proxy_id, Instant::now() + ttl);
    }

    /// Whether a proxy is currently excluded
    pub fn contains(&self, proxy_id: i32) -> bool {
        let expiry = match self.entries.get(&proxy_id) {
            Some(entry) => *entry,
            None => return false,
        };
        if expiry > Instant::now() {
            true
        } else {
            self.entries.remove(&proxy_id);
            false
        }
    }

    /// Drop all expired entries and return the number still excluded
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        self.entries.retain(|_, expiry| *expiry > now);
        self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.purge_expired()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ExclusionSet {
    fn default() -> Self {
        Self::new()
    }
}
