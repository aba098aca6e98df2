//! Anomaly event payloads and explanations

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use super::{LogRecord, WindowStats};

/// Payload published on the `new_anomaly` topic. Mirrors the scored record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyEvent {
    pub id: Uuid,
    pub ts: DateTime<Utc>,
    pub host: String,
    pub app: String,
    pub severity: String,
    pub msg: String,
    pub anomaly_score: f64,
    pub is_anomaly: bool,
}

impl AnomalyEvent {
    pub fn from_record(record: &LogRecord, score: f64) -> Self {
        Self {
            id: record.id,
            ts: record.ts,
            host: record.host.clone(),
            app: record.app.clone(),
            severity: record.severity.clone(),
            msg: record.msg.clone(),
            anomaly_score: score,
            is_anomaly: true,
        }
    }
}

/// Query string of `GET /api/v1/anomalies/recent`
#[derive(Debug, Default, Deserialize, Validate)]
pub struct RecentAnomalies {
    #[validate(range(min = 1, max = 100))]
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnomalyExplanation {
    pub anomaly: LogRecord,
    pub similar_anomalies: Vec<LogRecord>,
    pub stats: WindowStats,
    pub explanation: String,
}

impl AnomalyExplanation {
    pub fn build(anomaly: LogRecord, similar_anomalies: Vec<LogRecord>, stats: WindowStats) -> Self {
        let explanation = explain(&anomaly, &similar_anomalies, &stats);
        Self {
            anomaly,
            similar_anomalies,
            stats,
            explanation,
        }
    }
}

/// Human-readable summary of why a record is interesting
pub fn explain(anomaly: &LogRecord, similar: &[LogRecord], stats: &WindowStats) -> String {
    let message = anomaly.msg.to_lowercase();
    let mentions = |words: &[&str]| words.iter().any(|w| message.contains(w));
    let mut parts = Vec::new();

    if message.contains("cpu") && mentions(&["high", "usage", "load"]) {
        parts.push(format!("This anomaly indicates high CPU usage on {}.", anomaly.host));
    } else if message.contains("memory") && mentions(&["high", "usage", "allocation"]) {
        parts.push(format!("This anomaly indicates high memory usage on {}.", anomaly.host));
    } else if message.contains("disk") {
        parts.push(format!("This anomaly indicates disk space issues on {}.", anomaly.host));
    } else if mentions(&["database", "db"]) {
        parts.push(format!("This anomaly indicates database issues in the {} application.", anomaly.app));
    } else if mentions(&["timeout", "connection"]) {
        parts.push(format!(
            "This anomaly indicates connection or timeout issues in the {} application.",
            anomaly.app
        ));
    } else if mentions(&["error", "exception"]) {
        parts.push(format!("This anomaly indicates an application error in {}.", anomaly.app));
    }

    if !similar.is_empty() {
        parts.push(format!(
            "There are {} similar anomalies detected in the past 24 hours from the same host/application.",
            similar.len()
        ));
    }

    let anomaly_pct = if stats.total_logs > 0 {
        stats.anomaly_count as f64 / stats.total_logs as f64 * 100.0
    } else {
        0.0
    };
    parts.push(format!(
        "During the 30-minute window around this event, {:.1}% of logs were flagged as anomalies.",
        anomaly_pct
    ));

    let score = anomaly.anomaly_score.unwrap_or_default();
    parts.push(
        if score > 0.9 {
            "This is a critical anomaly that requires immediate attention."
        } else if score > 0.7 {
            "This is a significant anomaly that should be investigated promptly."
        } else {
            "This is a moderate anomaly that should be monitored."
        }
        .to_string(),
    );

    parts.join(" ")
}
