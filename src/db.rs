//! Database module - PostgreSQL connection and schema

use sqlx::{postgres::PgPoolOptions, PgPool};

/// Create database connection pool
pub async fn create_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await
}

/// Whether the correlation history table is already present
pub async fn schema_present(pool: &PgPool) -> Result<bool, sqlx::Error> {
    sqlx::query_scalar::<_, bool>("SELECT to_regclass('correlation_history') IS NOT NULL")
        .fetch_one(pool)
        .await
}

/// Apply the schema (every statement is idempotent)
pub async fn apply_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::raw_sql(SCHEMA_SQL).execute(pool).await?;

    tracing::info!("Correlation schema applied successfully");
    Ok(())
}

/// Database schema SQL
pub const SCHEMA_SQL: &str = r#"
-- Correlation history (one row per finding pair, orphans have an empty side)
CREATE TABLE IF NOT EXISTS correlation_history (
    id UUID PRIMARY KEY,
    finding1 TEXT NOT NULL DEFAULT '',
    finding2 TEXT NOT NULL DEFAULT '',
    log_type TEXT NOT NULL,
    corr_rules TEXT[] NOT NULL DEFAULT '{}',
    event_timestamp BIGINT NOT NULL,
    counter BIGINT NOT NULL DEFAULT 0,
    corr_vector REAL[] NOT NULL,
    score_timestamp BIGINT NOT NULL,
    root BOOLEAN NOT NULL DEFAULT false,
    created_at TIMESTAMPTZ DEFAULT NOW()
);

-- Score anchors (highest score_timestamp is authoritative)
CREATE TABLE IF NOT EXISTS score_anchors (
    id UUID PRIMARY KEY,
    score_timestamp BIGINT NOT NULL,
    root BOOLEAN NOT NULL DEFAULT false,
    created_at TIMESTAMPTZ DEFAULT NOW()
);

-- Correlation alerts
CREATE TABLE IF NOT EXISTS correlation_alerts (
    id UUID PRIMARY KEY,
    correlation_rule_id TEXT NOT NULL,
    correlation_rule_name TEXT NOT NULL,
    finding_ids TEXT[] NOT NULL,
    state VARCHAR(20) NOT NULL DEFAULT 'ACTIVE',
    severity VARCHAR(20) NOT NULL,
    start_time TIMESTAMPTZ NOT NULL,
    acknowledged_at TIMESTAMPTZ
);

-- Indexes
CREATE INDEX IF NOT EXISTS idx_history_finding1 ON correlation_history(finding1);
CREATE INDEX IF NOT EXISTS idx_history_finding2 ON correlation_history(finding2);
CREATE UNIQUE INDEX IF NOT EXISTS idx_history_pair ON correlation_history
    ((LEAST(finding1, finding2)), (GREATEST(finding1, finding2)))
    WHERE finding1 <> '' AND finding2 <> '';
CREATE INDEX IF NOT EXISTS idx_history_timestamp ON correlation_history(event_timestamp);
CREATE INDEX IF NOT EXISTS idx_anchors_score ON score_anchors(score_timestamp);
CREATE INDEX IF NOT EXISTS idx_alerts_rule ON correlation_alerts(correlation_rule_id, start_time);
"#;
