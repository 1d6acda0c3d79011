//! Least-recently-used proxy selection strategy

use super::ProxyPicker;
use crate::models::ProxyRecord;

/// Selects the proxy that was used longest ago
///
/// Never-used proxies come first; ties are broken by lowest error_count,
/// then by id for determinism.
pub struct LeastRecentlyUsedPicker;

impl LeastRecentlyUsedPicker {
    pub fn new() -> Self {
        Self
    }
}

impl Default for LeastRecentlyUsedPicker {
    fn default() -> Self {
        Self::new()
    }
}

impl ProxyPicker for LeastRecentlyUsedPicker {
    fn pick(&self, candidates: &[ProxyRecord]) -> Option<ProxyRecord> {
        candidates
            .iter()
            .min_by(|a, b| {
                a.last_used
                    .cmp(&b.last_used)
                    .then(a.error_count.cmp(&b.error_count))
                    .then(a.id.cmp(&b.id))
            })
            .cloned()
    }

    fn strategy_name(&self) -> &'static str {
        "least_recently_used"
    }
}
