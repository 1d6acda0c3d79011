use async_trait::async_trait;
use sqlx::PgPool;
use tracing::{debug, info};

use super::{coalesce_usage, HealthThresholds, ProxyStore};
use crate::error::Result;
use crate::models::{CreateProxyRequest, ProxyCounts, ProxyRecord, UsageLogEntry};

const PROXY_COLUMNS: &str = r#"
    id, address, port, username, password, protocol, country, region, provider,
    status, error_count, success_count, response_time_ms, last_used, last_tested,
    notes, tags, created_at, updated_at
"#;

/// Postgres-backed proxy store
#[derive(Clone)]
pub struct PgProxyStore {
    pool: PgPool,
    thresholds: HealthThresholds,
}

impl PgProxyStore {
    pub fn new(pool: PgPool, thresholds: HealthThresholds) -> Self {
        Self { pool, thresholds }
    }
}

#[async_trait]
impl ProxyStore for PgProxyStore {
    async fn fetch_candidates(&self, limit: i64, exclude_ids: &[i32]) -> Result<Vec<ProxyRecord>> {
        let query = format!(
            r#"
            SELECT {PROXY_COLUMNS}
            FROM proxies
            WHERE status = 'active'
              AND error_count < $1
              AND NOT (id = ANY($2))
            ORDER BY last_used ASC NULLS FIRST, error_count ASC
            LIMIT $3
            "#
        );

        let proxies = sqlx::query_as::<_, ProxyRecord>(&query)
            .bind(self.thresholds.error_threshold)
            .bind(exclude_ids)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        debug!(
            count = proxies.len(),
            excluded = exclude_ids.len(),
            "Fetched proxy candidates"
        );
        Ok(proxies)
    }

    async fn record_usage(&self, entry: &UsageLogEntry) -> Result<()> {
        self.record_usage_batch(std::slice::from_ref(entry)).await
    }

    async fn record_usage_batch(&self, entries: &[UsageLogEntry]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;

        for entry in entries {
            sqlx::query(
                r#"
                INSERT INTO proxy_usage_log
                    (proxy_id, target_url, method, success, status_code,
                     response_time_ms, error_message, timestamp)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(entry.proxy_id)
            .bind(&entry.target_url)
            .bind(&entry.method)
            .bind(entry.success)
            .bind(entry.status_code)
            .bind(entry.response_time_ms)
            .bind(&entry.error_message)
            .bind(entry.timestamp)
            .execute(&mut *tx)
            .await?;
        }

        // One counter update per proxy regardless of how many entries landed
        // for it in this batch.
        for (proxy_id, delta) in coalesce_usage(entries) {
            sqlx::query(
                r#"
                UPDATE proxies
                SET success_count = success_count + $2,
                    error_count = error_count + $3,
                    response_time_ms = CASE
                        WHEN $4 > 0 THEN
                            ((COALESCE(response_time_ms, 0)::bigint * success_count + $5)
                             / (success_count + $4))::integer
                        ELSE response_time_ms
                    END,
                    last_used = NOW(),
                    status = CASE
                        WHEN error_count + $3 >= $6 THEN 'failed'
                        WHEN error_count + $3 >= $7 THEN 'inactive'
                        ELSE status
                    END,
                    updated_at = NOW()
                WHERE id = $1
                "#,
            )
            .bind(proxy_id)
            .bind(delta.successes)
            .bind(delta.errors)
            .bind(delta.timed_samples)
            .bind(delta.response_time_total)
            .bind(self.thresholds.error_threshold)
            .bind(self.thresholds.degrade_threshold)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        debug!(entries = entries.len(), "Recorded proxy usage batch");
        Ok(())
    }

    async fn reset_errors(&self, proxy_id: Option<i32>) -> Result<u64> {
        let result = match proxy_id {
            Some(id) => {
                sqlx::query(
                    r#"
                    UPDATE proxies
                    SET error_count = 0,
                        status = 'active',
                        last_tested = NOW(),
                        updated_at = NOW()
                    WHERE id = $1
                    "#,
                )
                .bind(id)
                .execute(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    r#"
                    UPDATE proxies
                    SET error_count = 0,
                        status = 'active',
                        last_tested = NOW(),
                        updated_at = NOW()
                    "#,
                )
                .execute(&self.pool)
                .await?
            }
        };

        let count = result.rows_affected();
        info!(count, proxy_id = ?proxy_id, "Reset proxy error counts");
        Ok(count)
    }

    async fn count_by_status(&self) -> Result<ProxyCounts> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM proxies GROUP BY status")
                .fetch_all(&self.pool)
                .await?;

        let mut counts = ProxyCounts::default();
        for (status, count) in rows {
            let count = count as u64;
            match status.as_str() {
                "active" => counts.active = count,
                "inactive" => counts.inactive = count,
                "testing" => counts.testing = count,
                "failed" => counts.failed = count,
                _ => {}
            }
        }

        Ok(counts)
    }

    async fn create(&self, req: &CreateProxyRequest) -> Result<ProxyRecord> {
        req.validate()?;

        let query = format!(
            r#"
            INSERT INTO proxies
                (address, port, username, password, protocol, country, region,
                 provider, notes, tags)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING {PROXY_COLUMNS}
            "#
        );

        let proxy = sqlx::query_as::<_, ProxyRecord>(&query)
            .bind(&req.address)
            .bind(req.port)
            .bind(&req.username)
            .bind(&req.password)
            .bind(&req.protocol)
            .bind(&req.country)
            .bind(&req.region)
            .bind(&req.provider)
            .bind(&req.notes)
            .bind(&req.tags)
            .fetch_one(&self.pool)
            .await?;

        info!(id = proxy.id, address = %proxy.address, port = proxy.port, "Created proxy");
        Ok(proxy)
    }

    async fn get_by_id(&self, id: i32) -> Result<Option<ProxyRecord>> {
        let query = format!(
            r#"
            SELECT {PROXY_COLUMNS}
            FROM proxies
            WHERE id = $1
            "#
        );

        let proxy = sqlx::query_as::<_, ProxyRecord>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(proxy)
    }
}
