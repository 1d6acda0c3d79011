use crate::error::{Result, TrawlError};
use sqlx::PgPool;
use tracing::info;

/// Run all database migrations
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    // Create migrations table if not exists
    create_migrations_table(pool).await?;

    // Run each migration in order
    let migrations = get_migrations();

    for (version, name, sql) in migrations {
        if !is_migration_applied(pool, version).await? {
            info!(version = version, name = name, "Applying migration");

            sqlx::query(sql)
                .execute(pool)
                .await
                .map_err(TrawlError::Database)?;

            record_migration(pool, version, name).await?;

            info!(version = version, name = name, "Migration applied successfully");
        }
    }

    Ok(())
}

/// Create the migrations tracking table
async fn create_migrations_table(pool: &PgPool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            name VARCHAR(255) NOT NULL,
            applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(TrawlError::Database)?;

    Ok(())
}

/// Check if a migration has been applied
async fn is_migration_applied(pool: &PgPool, version: i32) -> Result<bool> {
    let count = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM schema_migrations WHERE version = $1",
    )
    .bind(version)
    .fetch_one(pool)
    .await
    .map_err(TrawlError::Database)?;

    Ok(count > 0)
}

/// Record an applied migration
async fn record_migration(pool: &PgPool, version: i32, name: &str) -> Result<()> {
    sqlx::query("INSERT INTO schema_migrations (version, name) VALUES ($1, $2)")
        .bind(version)
        .bind(name)
        .execute(pool)
        .await
        .map_err(TrawlError::Database)?;

    Ok(())
}

/// All migrations in order: (version, name, sql)
fn get_migrations() -> Vec<(i32, &'static str, &'static str)> {
    vec![
        (
            1,
            "create_proxies_table",
            r#"
            CREATE TABLE IF NOT EXISTS proxies (
                id SERIAL PRIMARY KEY,
                address VARCHAR(255) NOT NULL,
                port INTEGER NOT NULL CHECK (port >= 1 AND port <= 65535),
                username VARCHAR(255),
                password VARCHAR(255),
                protocol VARCHAR(16) NOT NULL DEFAULT 'http'
                    CHECK (protocol IN ('http', 'https', 'socks4', 'socks5')),
                country VARCHAR(64),
                region VARCHAR(64),
                provider VARCHAR(128),
                status VARCHAR(16) NOT NULL DEFAULT 'active'
                    CHECK (status IN ('active', 'inactive', 'testing', 'failed')),
                error_count INTEGER NOT NULL DEFAULT 0 CHECK (error_count >= 0),
                success_count INTEGER NOT NULL DEFAULT 0 CHECK (success_count >= 0),
                response_time_ms INTEGER,
                last_used TIMESTAMPTZ,
                last_tested TIMESTAMPTZ,
                notes TEXT,
                tags TEXT[] NOT NULL DEFAULT '{}',
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                CONSTRAINT proxies_identity_unique UNIQUE (address, port, username)
            )
            "#,
        ),
        (
            2,
            "create_proxy_usage_log_table",
            r#"
            CREATE TABLE IF NOT EXISTS proxy_usage_log (
                id BIGSERIAL PRIMARY KEY,
                proxy_id INTEGER NOT NULL REFERENCES proxies(id) ON DELETE CASCADE,
                target_url TEXT NOT NULL,
                method VARCHAR(16) NOT NULL,
                success BOOLEAN NOT NULL,
                status_code INTEGER,
                response_time_ms INTEGER,
                error_message TEXT,
                timestamp TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        ),
        (
            3,
            "create_proxy_indexes",
            r#"
            CREATE INDEX IF NOT EXISTS idx_proxies_selection
                ON proxies (status, error_count, last_used);
            CREATE INDEX IF NOT EXISTS idx_usage_log_proxy_time
                ON proxy_usage_log (proxy_id, timestamp DESC)
            "#,
        ),
    ]
}
