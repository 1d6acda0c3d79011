//! Round-robin proxy selection strategy

use std::sync::atomic::{AtomicUsize, Ordering};

use super::ProxyPicker;
use crate::models::ProxyRecord;

/// Selects proxies in round-robin order
///
/// Uses an atomic cursor for lock-free index tracking. The candidate list is
/// walked in id order so the cycle stays stable while the pool membership
/// does not change.
pub struct RoundRobinPicker {
    cursor: AtomicUsize,
}

impl RoundRobinPicker {
    pub fn new() -> Self {
        Self {
            cursor: AtomicUsize::new(0),
        }
    }
}

impl Default for RoundRobinPicker {
    fn default() -> Self {
        Self::new()
    }
}

impl ProxyPicker for RoundRobinPicker {
    fn pick(&self, candidates: &[ProxyRecord]) -> Option<ProxyRecord> {
        if candidates.is_empty() {
            return None;
        }

        let mut ordered: Vec<&ProxyRecord> = candidates.iter().collect();
        ordered.sort_by_key(|p| p.id);

        let idx = self.cursor.fetch_add(1, Ordering::Relaxed) % ordered.len();
        Some(ordered[idx].clone())
    }

    fn strategy_name(&self) -> &'static str {
        "round_robin"
    }
}
