//! Alert rule model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;
use validator::{Validate, ValidationError};

use super::Severity;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AlertRule {
    pub id: i32,
    pub name: String,
    pub description: Option<String>,
    /// Least severe level that can trigger this rule
    pub severity: String,
    /// Regular expression matched against the message
    pub query: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub last_triggered: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateAlertRule {
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    pub description: Option<String>,
    pub severity: Severity,
    #[validate(length(min = 1, max = 1024), custom(function = "validate_pattern"))]
    pub query: String,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct UpdateAlertRule {
    #[validate(length(min = 1, max = 255))]
    pub name: Option<String>,
    pub description: Option<String>,
    pub severity: Option<Severity>,
    #[validate(length(min = 1, max = 1024), custom(function = "validate_pattern"))]
    pub query: Option<String>,
    pub is_active: Option<bool>,
}

/// Pushed on the `alerts` topic when a scored record trips a rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertNotification {
    pub alert_id: i32,
    pub alert_name: String,
    pub severity: String,
    pub log_id: Uuid,
    pub triggered_at: DateTime<Utc>,
}

fn default_active() -> bool {
    true
}

fn validate_pattern(pattern: &str) -> Result<(), ValidationError> {
    regex::Regex::new(pattern)
        .map(|_| ())
        .map_err(|_| ValidationError::new("invalid_regex"))
}

impl AlertRule {
    pub async fn create(pool: &PgPool, data: CreateAlertRule) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, AlertRule>(
            r#"
            INSERT INTO alerts (name, description, severity, query, is_active)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#
        )
        .bind(&data.name)
        .bind(&data.description)
        .bind(data.severity.as_str())
        .bind(&data.query)
        .bind(data.is_active)
        .fetch_one(pool)
        .await
    }

    pub async fn find_by_id(pool: &PgPool, id: i32) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, AlertRule>("SELECT * FROM alerts WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    pub async fn list(pool: &PgPool) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, AlertRule>("SELECT * FROM alerts ORDER BY created_at DESC")
            .fetch_all(pool)
            .await
    }

    pub async fn list_active(pool: &PgPool) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, AlertRule>("SELECT * FROM alerts WHERE is_active = true ORDER BY id")
            .fetch_all(pool)
            .await
    }

    /// Partial update; absent fields keep their stored value
    pub async fn update(pool: &PgPool, id: i32, data: UpdateAlertRule) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, AlertRule>(
            r#"
            UPDATE alerts SET
                name = COALESCE($2, name),
                description = COALESCE($3, description),
                severity = COALESCE($4, severity),
                query = COALESCE($5, query),
                is_active = COALESCE($6, is_active)
            WHERE id = $1
            RETURNING *
            "#
        )
        .bind(id)
        .bind(&data.name)
        .bind(&data.description)
        .bind(data.severity.map(|s| s.as_str()))
        .bind(&data.query)
        .bind(data.is_active)
        .fetch_optional(pool)
        .await
    }

    pub async fn delete(pool: &PgPool, id: i32) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM alerts WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn mark_triggered(pool: &PgPool, id: i32, at: DateTime<Utc>) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE alerts SET last_triggered = $2 WHERE id = $1")
            .bind(id)
            .bind(at)
            .execute(pool)
            .await?;

        Ok(())
    }
}
