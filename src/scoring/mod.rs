//! Deterministic anomaly scoring
//!
//! A record's score is its severity weight plus the weight of every lexicon
//! keyword found in the lowercased message, capped at 1.0. Weights are kept
//! in hundredths so the threshold comparison is exact.

use crate::models::{LogRecord, Severity, UnknownSeverity};

pub mod alerts;
pub mod worker;

pub use worker::ScoringWorker;

/// Scores strictly above this are anomalies (hundredths)
const THRESHOLD: u32 = 50;

/// Cap (hundredths)
const MAX_SCORE: u32 = 100;

/// Keyword lexicon, weights in hundredths
pub const KEYWORD_WEIGHTS: &[(&str, u32)] = &[
    ("error", 20),
    ("failed", 20),
    ("exception", 30),
    ("timeout", 25),
    ("critical", 30),
    ("crash", 35),
    ("unavailable", 30),
    ("refused", 25),
    ("denied", 20),
    ("exceeded", 20),
    ("overflow", 30),
    ("deadlock", 40),
    ("corrupt", 40),
];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Score {
    /// In `[0.0, 1.0]`
    pub value: f64,
    pub is_anomaly: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum ScoringError {
    #[error(transparent)]
    Severity(#[from] UnknownSeverity),
}

impl Score {
    fn from_hundredths(raw: u32) -> Self {
        let capped = raw.min(MAX_SCORE);
        Self {
            value: f64::from(capped) / 100.0,
            is_anomaly: capped > THRESHOLD,
        }
    }
}

fn severity_weight(severity: Severity) -> u32 {
    match severity {
        Severity::Emergency | Severity::Alert | Severity::Critical => 40,
        Severity::Error => 30,
        Severity::Warning => 10,
        Severity::Notice | Severity::Info | Severity::Debug => 0,
    }
}

fn keyword_weight(message: &str) -> u32 {
    let message = message.to_lowercase();
    KEYWORD_WEIGHTS
        .iter()
        .filter(|(keyword, _)| message.contains(keyword))
        .map(|(_, weight)| weight)
        .sum()
}

/// Score a single record. Fails only when the stored severity is not one of
/// the eight syslog levels.
pub fn score(record: &LogRecord) -> Result<Score, ScoringError> {
    let severity = record.severity()?;
    Ok(Score::from_hundredths(
        severity_weight(severity) + keyword_weight(&record.msg),
    ))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use uuid::Uuid;

    pub(crate) fn record(severity: &str, msg: &str) -> LogRecord {
        record_at(Utc::now(), severity, msg)
    }

    pub(crate) fn record_at(ts: DateTime<Utc>, severity: &str, msg: &str) -> LogRecord {
        LogRecord {
            id: Uuid::new_v4(),
            ts,
            host: "web01".into(),
            app: "nginx".into(),
            severity: severity.into(),
            msg: msg.into(),
            is_anomaly: None,
            anomaly_score: None,
        }
    }

    #[test]
    fn test_critical_deadlock_is_anomaly() {
        let s = score(&record("critical", "database deadlock detected")).unwrap();
        assert_eq!(s.value, 0.8);
        assert!(s.is_anomaly);
    }

    #[test]
    fn test_info_login_is_clean() {
        let s = score(&record("info", "user logged in")).unwrap();
        assert_eq!(s.value, 0.0);
        assert!(!s.is_anomaly);
    }

    #[test]
    fn test_score_is_capped() {
        let s = score(&record(
            "emergency",
            "CRASH: deadlock caused corrupt state, exception overflow",
        ))
        .unwrap();
        assert_eq!(s.value, 1.0);
        assert!(s.is_anomaly);
    }

    #[test]
    fn test_threshold_is_strict() {
        // 0.1 + 0.2 + 0.2 lands exactly on the threshold
        let s = score(&record("warning", "login failed: access denied")).unwrap();
        assert_eq!(s.value, 0.5);
        assert!(!s.is_anomaly);

        let s = score(&record("error", "upstream timeout")).unwrap();
        assert_eq!(s.value, 0.55);
        assert!(s.is_anomaly);
    }

    #[test]
    fn test_keywords_are_case_insensitive() {
        assert_eq!(keyword_weight("Connection REFUSED"), 25);
        // "error" and "exception" both hit
        assert_eq!(keyword_weight("ErrorException thrown"), 50);
    }

    #[test]
    fn test_unknown_severity_is_rejected() {
        let err = score(&record("fatal", "boom")).unwrap_err();
        assert!(err.to_string().contains("fatal"));
    }

    #[test]
    fn test_flag_matches_score() {
        for sev in Severity::ALL {
            for msg in ["ok", "timeout", "deadlock", "failed exception crash"] {
                let s = score(&record(sev.as_str(), msg)).unwrap();
                assert_eq!(s.is_anomaly, s.value > 0.5, "{sev} / {msg}");
                assert!((0.0..=1.0).contains(&s.value));
            }
        }
    }
}
