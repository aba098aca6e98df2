//! PostgreSQL-backed Record Store

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::{ClaimRequest, RecordStore};
use crate::error::StoreError;
use crate::models::{AlertRule, LogRecord, LOG_COLUMNS};
use crate::scoring::Score;

/// Candidate rows are locked with SKIP LOCKED so a concurrent claimer moves
/// on to other rows instead of waiting and then double-claiming. The window
/// only bounds fresh rows: an expired claim is re-admitted however old the
/// record is, since it was inside the window when first claimed.
const CLAIM_SQL: &str = r#"
WITH candidates AS (
    SELECT id FROM logs
    WHERE anomaly_score IS NULL
      AND (claimed_at IS NULL OR claimed_at < NOW() - make_interval(secs => $2))
      AND ($3::timestamptz IS NULL OR ts >= $3 OR claimed_at IS NOT NULL)
    ORDER BY ts
    LIMIT $4
    FOR UPDATE SKIP LOCKED
)
UPDATE logs
SET claimed_by = $1, claimed_at = NOW()
FROM candidates
WHERE logs.id = candidates.id
RETURNING logs.id, logs.ts, logs.host, logs.app, logs.severity, logs.msg,
          logs.is_anomaly, logs.anomaly_score
"#;

#[derive(Clone)]
pub struct PgRecordStore {
    pool: PgPool,
}

impl PgRecordStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RecordStore for PgRecordStore {
    async fn claim_unscored(&self, request: &ClaimRequest) -> Result<Vec<LogRecord>, StoreError> {
        let mut claimed = sqlx::query_as::<_, LogRecord>(CLAIM_SQL)
            .bind(&request.worker_id)
            .bind(request.lease.as_secs_f64())
            .bind(request.since)
            .bind(request.limit)
            .fetch_all(&self.pool)
            .await?;

        // RETURNING does not preserve the CTE's ordering
        claimed.sort_by(|a, b| a.ts.cmp(&b.ts).then_with(|| a.id.cmp(&b.id)));
        Ok(claimed)
    }

    async fn record_score(&self, id: Uuid, worker_id: &str, score: Score) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE logs
            SET anomaly_score = $1, is_anomaly = $2, claimed_by = NULL, claimed_at = NULL
            WHERE id = $3 AND claimed_by = $4 AND anomaly_score IS NULL
            "#
        )
        .bind(score.value)
        .bind(score.is_anomaly)
        .bind(id)
        .bind(worker_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn release_claim(&self, id: Uuid, worker_id: &str) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE logs
            SET claimed_by = NULL, claimed_at = NULL
            WHERE id = $1 AND claimed_by = $2 AND anomaly_score IS NULL
            "#
        )
        .bind(id)
        .bind(worker_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn recent_messages(&self, limit: i64) -> Result<Vec<String>, StoreError> {
        let messages = sqlx::query_scalar::<_, String>(
            "SELECT msg FROM logs ORDER BY ts DESC LIMIT $1"
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(messages)
    }

    async fn find_matching(&self, pattern: &str, limit: i64) -> Result<Vec<LogRecord>, StoreError> {
        let records = sqlx::query_as::<_, LogRecord>(&format!(
            "SELECT {LOG_COLUMNS} FROM logs WHERE msg ~ $1 ORDER BY ts DESC LIMIT $2"
        ))
        .bind(pattern)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn active_alert_rules(&self) -> Result<Vec<AlertRule>, StoreError> {
        Ok(AlertRule::list_active(&self.pool).await?)
    }

    async fn mark_alert_triggered(&self, rule_id: i32, at: DateTime<Utc>) -> Result<(), StoreError> {
        Ok(AlertRule::mark_triggered(&self.pool, rule_id, at).await?)
    }
}
