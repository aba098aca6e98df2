//! Log record model

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool, Row};
use uuid::Uuid;
use validator::Validate;

use crate::store::filter::LogFilter;

/// Columns selected whenever a full record is returned. The claim columns
/// are bookkeeping for the scoring worker and never leave the store.
pub const LOG_COLUMNS: &str = "id, ts, host, app, severity, msg, is_anomaly, anomaly_score";

/// Syslog severity, most severe first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Emergency,
    Alert,
    Critical,
    Error,
    Warning,
    Notice,
    Info,
    Debug,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown severity '{0}'")]
pub struct UnknownSeverity(pub String);

impl Severity {
    pub const ALL: [Severity; 8] = [
        Severity::Emergency,
        Severity::Alert,
        Severity::Critical,
        Severity::Error,
        Severity::Warning,
        Severity::Notice,
        Severity::Info,
        Severity::Debug,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Emergency => "emergency",
            Severity::Alert => "alert",
            Severity::Critical => "critical",
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Notice => "notice",
            Severity::Info => "info",
            Severity::Debug => "debug",
        }
    }

    /// Numeric syslog level (0 = emergency, 7 = debug)
    pub fn level(&self) -> u8 {
        *self as u8
    }

    /// True when `self` is at least as severe as `floor`
    pub fn meets(&self, floor: Severity) -> bool {
        *self <= floor
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = UnknownSeverity;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        Severity::ALL
            .iter()
            .copied()
            .find(|sev| sev.as_str() == normalized)
            .ok_or_else(|| UnknownSeverity(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct LogRecord {
    pub id: Uuid,
    pub ts: DateTime<Utc>,
    pub host: String,
    pub app: String,
    pub severity: String,
    pub msg: String,
    pub is_anomaly: Option<bool>,
    pub anomaly_score: Option<f64>,
}

/// Search request body. Every field narrows the result set.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct LogSearch {
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    #[validate(length(min = 1, max = 255))]
    pub host: Option<String>,
    #[validate(length(min = 1, max = 255))]
    pub app: Option<String>,
    pub severity: Option<Severity>,
    #[validate(length(min = 1, max = 1024))]
    pub message: Option<String>,
    #[serde(default)]
    pub use_regex: bool,
    #[serde(default)]
    pub anomalies_only: bool,
    #[validate(range(min = 1, max = 1000))]
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct CountBucket {
    pub name: String,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogStats {
    pub total_logs: i64,
    pub hosts: Vec<CountBucket>,
    pub applications: Vec<CountBucket>,
    pub severity_distribution: Vec<CountBucket>,
    pub anomaly_count: i64,
}

/// Activity around a point in time
#[derive(Debug, Clone, Default, Serialize, FromRow)]
pub struct WindowStats {
    pub total_logs: i64,
    pub anomaly_count: i64,
    pub distinct_hosts: i64,
    pub distinct_apps: i64,
}

impl LogRecord {
    /// Parsed severity, if the stored text is one of the known levels
    pub fn severity(&self) -> Result<Severity, UnknownSeverity> {
        self.severity.parse()
    }

    pub async fn search(pool: &PgPool, filter: &LogFilter) -> Result<Vec<Self>, sqlx::Error> {
        let mut query = filter.select_query();
        query.build_query_as::<LogRecord>().fetch_all(pool).await
    }

    pub async fn recent_anomalies(pool: &PgPool, limit: i64) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, LogRecord>(&format!(
            "SELECT {LOG_COLUMNS} FROM logs WHERE is_anomaly = true ORDER BY ts DESC LIMIT $1"
        ))
        .bind(limit)
        .fetch_all(pool)
        .await
    }

    pub async fn find_anomaly(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, LogRecord>(&format!(
            "SELECT {LOG_COLUMNS} FROM logs WHERE id = $1 AND is_anomaly = true"
        ))
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    /// Other anomalies from the same host and app within a day either side
    pub async fn similar_anomalies(pool: &PgPool, anomaly: &LogRecord) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, LogRecord>(&format!(
            r#"
            SELECT {LOG_COLUMNS} FROM logs
            WHERE host = $1 AND app = $2 AND is_anomaly = true
              AND ts BETWEEN $3 AND $4
              AND id != $5
            ORDER BY anomaly_score DESC
            LIMIT 5
            "#
        ))
        .bind(&anomaly.host)
        .bind(&anomaly.app)
        .bind(anomaly.ts - Duration::hours(24))
        .bind(anomaly.ts + Duration::hours(24))
        .bind(anomaly.id)
        .fetch_all(pool)
        .await
    }

    pub async fn window_stats(pool: &PgPool, around: DateTime<Utc>) -> Result<WindowStats, sqlx::Error> {
        sqlx::query_as::<_, WindowStats>(
            r#"
            SELECT
                COUNT(*) AS total_logs,
                COUNT(*) FILTER (WHERE is_anomaly = true) AS anomaly_count,
                COUNT(DISTINCT host) AS distinct_hosts,
                COUNT(DISTINCT app) AS distinct_apps
            FROM logs
            WHERE ts BETWEEN $1 AND $2
            "#
        )
        .bind(around - Duration::minutes(15))
        .bind(around + Duration::minutes(15))
        .fetch_one(pool)
        .await
    }

    pub async fn stats(pool: &PgPool) -> Result<LogStats, sqlx::Error> {
        let totals = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS total,
                COUNT(*) FILTER (WHERE is_anomaly = true) AS anomalies
            FROM logs
            "#
        )
        .fetch_one(pool)
        .await?;

        let hosts = sqlx::query_as::<_, CountBucket>(
            "SELECT host AS name, COUNT(*) AS count FROM logs GROUP BY host ORDER BY count DESC LIMIT 10"
        )
        .fetch_all(pool)
        .await?;

        let applications = sqlx::query_as::<_, CountBucket>(
            "SELECT app AS name, COUNT(*) AS count FROM logs GROUP BY app ORDER BY count DESC LIMIT 10"
        )
        .fetch_all(pool)
        .await?;

        let mut severity_distribution = sqlx::query_as::<_, CountBucket>(
            "SELECT severity AS name, COUNT(*) AS count FROM logs GROUP BY severity"
        )
        .fetch_all(pool)
        .await?;
        sort_by_severity(&mut severity_distribution);

        Ok(LogStats {
            total_logs: totals.get("total"),
            hosts,
            applications,
            severity_distribution,
            anomaly_count: totals.get("anomalies"),
        })
    }
}

/// Order buckets emergency → debug, unknown labels last
fn sort_by_severity(buckets: &mut [CountBucket]) {
    buckets.sort_by_key(|b| {
        b.name
            .parse::<Severity>()
            .map(|s| s.level() as usize)
            .unwrap_or(Severity::ALL.len())
    });
}
