use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

use super::{coalesce_usage, HealthThresholds, ProxyStore};
use crate::error::{Result, TrawlError};
use crate::models::{CreateProxyRequest, ProxyCounts, ProxyRecord, ProxyStatus, UsageLogEntry};

/// In-memory implementation of [`ProxyStore`]
///
/// Applies the same counter/status transition rules as the Postgres store.
/// Used as the injectable fake in tests and for running without a database.
pub struct MemoryProxyStore {
    records: DashMap<i32, ProxyRecord>,
    log: Mutex<Vec<UsageLogEntry>>,
    next_id: AtomicI32,
    thresholds: HealthThresholds,
    /// When set, every call fails with a transient connection error.
    failing: AtomicBool,
}

impl MemoryProxyStore {
    pub fn new(thresholds: HealthThresholds) -> Self {
        Self {
            records: DashMap::new(),
            log: Mutex::new(Vec::new()),
            next_id: AtomicI32::new(1),
            thresholds,
            failing: AtomicBool::new(false),
        }
    }

    /// Simulate store outage: all subsequent calls fail as transient errors.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Insert a record directly, bypassing validation (test setup)
    pub fn insert_record(&self, record: ProxyRecord) {
        self.next_id.fetch_max(record.id + 1, Ordering::SeqCst);
        self.records.insert(record.id, record);
    }

    /// Snapshot of all usage log entries written so far
    pub fn usage_log(&self) -> Vec<UsageLogEntry> {
        self.log.lock().clone()
    }

    /// Current state of one record (test assertions)
    pub fn record(&self, id: i32) -> Option<ProxyRecord> {
        self.records.get(&id).map(|r| r.clone())
    }

    fn check_available(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(TrawlError::DatabaseConnection(
                "simulated store outage".into(),
            ));
        }
        Ok(())
    }
}

impl Default for MemoryProxyStore {
    fn default() -> Self {
        Self::new(HealthThresholds::default())
    }
}

#[async_trait]
impl ProxyStore for MemoryProxyStore {
    async fn fetch_candidates(&self, limit: i64, exclude_ids: &[i32]) -> Result<Vec<ProxyRecord>> {
        self.check_available()?;

        let mut candidates: Vec<ProxyRecord> = self
            .records
            .iter()
            .filter(|r| {
                r.status == ProxyStatus::Active.as_str()
                    && r.error_count < self.thresholds.error_threshold
                    && !exclude_ids.contains(&r.id)
            })
            .map(|r| r.clone())
            .collect();

        // Least-recently-used first, never-used before everything, then by
        // error_count, then id for determinism.
        candidates.sort_by(|a, b| {
            a.last_used
                .cmp(&b.last_used)
                .then(a.error_count.cmp(&b.error_count))
                .then(a.id.cmp(&b.id))
        });
        candidates.truncate(limit.max(0) as usize);

        Ok(candidates)
    }

    async fn record_usage(&self, entry: &UsageLogEntry) -> Result<()> {
        self.record_usage_batch(std::slice::from_ref(entry)).await
    }

    async fn record_usage_batch(&self, entries: &[UsageLogEntry]) -> Result<()> {
        self.check_available()?;

        if entries.is_empty() {
            return Ok(());
        }

        self.log.lock().extend_from_slice(entries);

        for (proxy_id, delta) in coalesce_usage(entries) {
            if let Some(mut record) = self.records.get_mut(&proxy_id) {
                if delta.timed_samples > 0 {
                    let old_avg = record.response_time_ms.unwrap_or(0) as i64;
                    let new_avg = (old_avg * record.success_count as i64
                        + delta.response_time_total)
                        / (record.success_count + delta.timed_samples) as i64;
                    record.response_time_ms = Some(new_avg as i32);
                }

                record.success_count += delta.successes;
                let new_errors = record.error_count + delta.errors;
                record.error_count = new_errors;
                if new_errors >= self.thresholds.error_threshold {
                    record.status = ProxyStatus::Failed.as_str().to_string();
                } else if new_errors >= self.thresholds.degrade_threshold {
                    record.status = ProxyStatus::Inactive.as_str().to_string();
                }
                record.last_used = Some(Utc::now());
                record.updated_at = Utc::now();
            }
        }

        Ok(())
    }

    async fn reset_errors(&self, proxy_id: Option<i32>) -> Result<u64> {
        self.check_available()?;

        let mut count = 0u64;
        match proxy_id {
            Some(id) => {
                if let Some(mut record) = self.records.get_mut(&id) {
                    record.error_count = 0;
                    record.status = ProxyStatus::Active.as_str().to_string();
                    record.last_tested = Some(Utc::now());
                    record.updated_at = Utc::now();
                    count = 1;
                }
            }
            None => {
                for mut record in self.records.iter_mut() {
                    record.error_count = 0;
                    record.status = ProxyStatus::Active.as_str().to_string();
                    record.last_tested = Some(Utc::now());
                    record.updated_at = Utc::now();
                    count += 1;
                }
            }
        }

        Ok(count)
    }

    async fn count_by_status(&self) -> Result<ProxyCounts> {
        self.check_available()?;

        let mut counts = ProxyCounts::default();
        for record in self.records.iter() {
            match ProxyStatus::from_str(&record.status) {
                Some(ProxyStatus::Active) => counts.active += 1,
                Some(ProxyStatus::Inactive) => counts.inactive += 1,
                Some(ProxyStatus::Testing) => counts.testing += 1,
                Some(ProxyStatus::Failed) => counts.failed += 1,
                None => {}
            }
        }

        Ok(counts)
    }

    async fn create(&self, req: &CreateProxyRequest) -> Result<ProxyRecord> {
        self.check_available()?;
        req.validate()?;

        // Enforce the (address, port, username) uniqueness invariant.
        let duplicate = self.records.iter().any(|r| {
            r.address == req.address && r.port == req.port && r.username == req.username
        });
        if duplicate {
            return Err(TrawlError::Validation(format!(
                "proxy {}:{} already exists",
                req.address, req.port
            )));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let now = Utc::now();
        let record = ProxyRecord {
            id,
            address: req.address.clone(),
            port: req.port,
            username: req.username.clone(),
            password: req.password.clone(),
            protocol: req.protocol.clone(),
            country: req.country.clone(),
            region: req.region.clone(),
            provider: req.provider.clone(),
            status: ProxyStatus::Active.as_str().to_string(),
            error_count: 0,
            success_count: 0,
            response_time_ms: None,
            last_used: None,
            last_tested: None,
            notes: req.notes.clone(),
            tags: req.tags.clone(),
            created_at: now,
            updated_at: now,
        };

        self.records.insert(id, record.clone());
        Ok(record)
    }

    async fn get_by_id(&self, id: i32) -> Result<Option<ProxyRecord>> {
        self.check_available()?;
        Ok(self.records.get(&id).map(|r| r.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ProxyOutcome;

    fn entry(proxy_id: i32, outcome: &ProxyOutcome) -> UsageLogEntry {
        UsageLogEntry::from_outcome(proxy_id, "https://example.com", "GET", outcome)
    }

    fn success(ms: i32) -> ProxyOutcome {
        ProxyOutcome::Success {
            status_code: 200,
            response_time_ms: ms,
        }
    }

    fn failure() -> ProxyOutcome {
        ProxyOutcome::Failure {
            reason: "refused".into(),
        }
    }

    #[tokio::test]
    async fn test_create_assigns_ids_and_rejects_duplicates() {
        let store = MemoryProxyStore::default();

        let a = store
            .create(&CreateProxyRequest::new("10.0.0.1", 8080, "http"))
            .await
            .unwrap();
        let b = store
            .create(&CreateProxyRequest::new("10.0.0.2", 8080, "http"))
            .await
            .unwrap();
        assert_ne!(a.id, b.id);

        let err = store
            .create(&CreateProxyRequest::new("10.0.0.1", 8080, "http"))
            .await
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[tokio::test]
    async fn test_fetch_candidates_filters_and_orders() {
        let store = MemoryProxyStore::default();
        for i in 1..=3 {
            store
                .create(&CreateProxyRequest::new(format!("10.0.0.{i}"), 8080, "http"))
                .await
                .unwrap();
        }

        // Use proxy 1 so it becomes the most recently used
        store
            .record_usage(&entry(1, &success(100)))
            .await
            .unwrap();

        let candidates = store.fetch_candidates(10, &[]).await.unwrap();
        assert_eq!(candidates.len(), 3);
        // Never-used proxies come first
        assert_eq!(candidates[0].id, 2);
        assert_eq!(candidates[1].id, 3);
        assert_eq!(candidates[2].id, 1);

        let candidates = store.fetch_candidates(10, &[2]).await.unwrap();
        assert!(!candidates.iter().any(|c| c.id == 2));

        let candidates = store.fetch_candidates(1, &[]).await.unwrap();
        assert_eq!(candidates.len(), 1);
    }

    #[tokio::test]
    async fn test_usage_drives_status_transitions() {
        let store = MemoryProxyStore::default();
        let proxy = store
            .create(&CreateProxyRequest::new("10.0.0.1", 8080, "http"))
            .await
            .unwrap();

        store
            .record_usage(&entry(proxy.id, &failure()))
            .await
            .unwrap();
        assert_eq!(store.record(proxy.id).unwrap().status, "active");

        store
            .record_usage(&entry(proxy.id, &failure()))
            .await
            .unwrap();
        assert_eq!(store.record(proxy.id).unwrap().status, "inactive");

        store
            .record_usage(&entry(proxy.id, &failure()))
            .await
            .unwrap();
        let record = store.record(proxy.id).unwrap();
        assert_eq!(record.status, "failed");
        assert_eq!(record.error_count, 3);

        // Failed proxies are never candidates
        let candidates = store.fetch_candidates(10, &[]).await.unwrap();
        assert!(candidates.is_empty());
    }

    #[tokio::test]
    async fn test_batch_coalesces_counters() {
        let store = MemoryProxyStore::default();
        let proxy = store
            .create(&CreateProxyRequest::new("10.0.0.1", 8080, "http"))
            .await
            .unwrap();

        let mut entries = Vec::new();
        for _ in 0..10 {
            entries.push(entry(proxy.id, &success(100)));
        }
        for _ in 0..2 {
            entries.push(entry(proxy.id, &failure()));
        }
        store.record_usage_batch(&entries).await.unwrap();

        let record = store.record(proxy.id).unwrap();
        assert_eq!(record.success_count, 10);
        assert_eq!(record.error_count, 2);
        assert_eq!(record.response_time_ms, Some(100));
        assert_eq!(store.usage_log().len(), 12);
    }

    #[tokio::test]
    async fn test_running_average_response_time() {
        let store = MemoryProxyStore::default();
        let proxy = store
            .create(&CreateProxyRequest::new("10.0.0.1", 8080, "http"))
            .await
            .unwrap();

        store
            .record_usage(&entry(proxy.id, &success(100)))
            .await
            .unwrap();
        store
            .record_usage(&entry(proxy.id, &success(300)))
            .await
            .unwrap();

        assert_eq!(store.record(proxy.id).unwrap().response_time_ms, Some(200));
    }

    #[tokio::test]
    async fn test_reset_errors_is_idempotent() {
        let store = MemoryProxyStore::default();
        for i in 1..=3 {
            let proxy = store
                .create(&CreateProxyRequest::new(format!("10.0.0.{i}"), 8080, "http"))
                .await
                .unwrap();
            for _ in 0..3 {
                store
                    .record_usage(&entry(proxy.id, &failure()))
                    .await
                    .unwrap();
            }
        }

        let count = store.reset_errors(None).await.unwrap();
        assert_eq!(count, 3);
        for i in 1..=3 {
            let record = store.record(i).unwrap();
            assert_eq!(record.error_count, 0);
            assert_eq!(record.status, "active");
        }

        // Safe to call again
        let count = store.reset_errors(None).await.unwrap();
        assert_eq!(count, 3);
    }

    #[tokio::test]
    async fn test_counters_monotonic_between_resets() {
        let store = MemoryProxyStore::default();
        let proxy = store
            .create(&CreateProxyRequest::new("10.0.0.1", 8080, "http"))
            .await
            .unwrap();

        let mut last_success = 0;
        let mut last_error = 0;
        for i in 0..20 {
            let outcome = if i % 3 == 0 { failure() } else { success(50) };
            store
                .record_usage(&entry(proxy.id, &outcome))
                .await
                .unwrap();

            let record = store.record(proxy.id).unwrap();
            assert!(record.success_count >= last_success);
            assert!(record.error_count >= last_error);
            last_success = record.success_count;
            last_error = record.error_count;
        }
    }

    #[tokio::test]
    async fn test_failing_mode_surfaces_transient_error() {
        let store = MemoryProxyStore::default();
        store.set_failing(true);

        let err = store.fetch_candidates(10, &[]).await.unwrap_err();
        assert!(err.is_transient());

        store.set_failing(false);
        assert!(store.fetch_candidates(10, &[]).await.is_ok());
    }
}
