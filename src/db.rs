//! Database module - PostgreSQL connection and schema

use sqlx::{postgres::PgPoolOptions, PgPool};

/// Create database connection pool
pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}

/// Run database migrations
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    // Simple protocol: the schema is several statements in one string
    sqlx::raw_sql(SCHEMA_SQL)
        .execute(pool)
        .await?;

    tracing::info!("Database schema applied successfully");
    Ok(())
}

/// Database schema SQL
const SCHEMA_SQL: &str = r#"
-- Log records (rows are inserted by the ingestion path)
CREATE TABLE IF NOT EXISTS logs (
    id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
    ts TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    host VARCHAR(255) NOT NULL,
    app VARCHAR(255) NOT NULL,
    severity VARCHAR(16) NOT NULL,
    msg TEXT NOT NULL,
    is_anomaly BOOLEAN,
    anomaly_score DOUBLE PRECISION,
    claimed_by VARCHAR(128),
    claimed_at TIMESTAMPTZ,
    CONSTRAINT logs_score_flag_pair CHECK ((is_anomaly IS NULL) = (anomaly_score IS NULL))
);

ALTER TABLE logs ADD COLUMN IF NOT EXISTS claimed_by VARCHAR(128);
ALTER TABLE logs ADD COLUMN IF NOT EXISTS claimed_at TIMESTAMPTZ;

-- Alert rules
CREATE TABLE IF NOT EXISTS alerts (
    id SERIAL PRIMARY KEY,
    name VARCHAR(255) NOT NULL,
    description TEXT,
    severity VARCHAR(16) NOT NULL,
    query TEXT NOT NULL,
    is_active BOOLEAN NOT NULL DEFAULT true,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    last_triggered TIMESTAMPTZ
);

-- Indexes
CREATE INDEX IF NOT EXISTS idx_logs_ts ON logs(ts);
CREATE INDEX IF NOT EXISTS idx_logs_unscored ON logs(ts) WHERE anomaly_score IS NULL;
CREATE INDEX IF NOT EXISTS idx_logs_host_app ON logs(host, app);
CREATE INDEX IF NOT EXISTS idx_logs_anomalies ON logs(ts) WHERE is_anomaly = true;
CREATE INDEX IF NOT EXISTS idx_alerts_active ON alerts(is_active);
"#;
