//! Proxy selection over the live health view

use std::sync::Arc;

use tracing::debug;

use crate::config::SharedConfig;
use crate::health::HealthTracker;
use crate::models::{ProxyRecord, UsageLogEntry};
use crate::rotation::{ExclusionSet, ProxyPicker};

/// Chooses proxies for outbound requests and feeds outcomes back into the
/// health view
///
/// Selection never touches the database: candidates come from the tracker's
/// in-memory view, filtered against the exclusion set and any per-request
/// exclusions, then ordered by the configured picker.
pub struct ProxySelector {
    tracker: Arc<HealthTracker>,
    exclusions: ExclusionSet,
    picker: Box<dyn ProxyPicker>,
    config: SharedConfig,
}

impl ProxySelector {
    pub fn new(
        tracker: Arc<HealthTracker>,
        picker: Box<dyn ProxyPicker>,
        config: SharedConfig,
    ) -> Self {
        Self {
            tracker,
            exclusions: ExclusionSet::new(),
            picker,
            config,
        }
    }

    /// Select a proxy, skipping excluded ids and `also_exclude`
    ///
    /// Returns `None` when no eligible proxy remains, even if excluded
    /// proxies are still active; the caller decides whether to fall back
    /// to a direct request.
    pub fn select(&self, also_exclude: &[i32]) -> Option<ProxyRecord> {
        let candidates: Vec<ProxyRecord> = self
            .tracker
            .selectable()
            .into_iter()
            .filter(|r| !self.exclusions.contains(r.id) && !also_exclude.contains(&r.id))
            .collect();

        let chosen = self.picker.pick(&candidates);
        match &chosen {
            Some(proxy) => debug!(
                proxy_id = proxy.id,
                strategy = self.picker.strategy_name(),
                candidates = candidates.len(),
                "Selected proxy"
            ),
            None => debug!(
                strategy = self.picker.strategy_name(),
                excluded = self.exclusions.len(),
                "No eligible proxy"
            ),
        }
        chosen
    }

    /// Report a successful use of a proxy
    pub async fn mark_success(&self, entry: UsageLogEntry) {
        self.tracker.report(entry).await;
    }

    /// Report a failed use of a proxy and exclude it for the configured TTL
    pub async fn mark_failed(&self, entry: UsageLogEntry) {
        self.exclusions
            .insert(entry.proxy_id, self.config.load().exclusion_ttl());
        self.tracker.report(entry).await;
    }

    pub fn strategy_name(&self) -> &'static str {
        self.picker.strategy_name()
    }

    pub fn excluded_count(&self) -> usize {
        self.exclusions.len()
    }
}
