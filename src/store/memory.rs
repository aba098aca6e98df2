//! In-memory Record Store for tests. Claim semantics match the PostgreSQL
//! store: selection and marking happen under one lock.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use regex::Regex;
use uuid::Uuid;

use super::{ClaimRequest, RecordStore};
use crate::error::StoreError;
use crate::models::{AlertRule, LogRecord};
use crate::scoring::Score;

struct Row {
    record: LogRecord,
    claimed_by: Option<String>,
    claimed_at: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct Inner {
    rows: Vec<Row>,
    rules: Vec<AlertRule>,
    /// Every successful score write as (record id, worker id)
    score_writes: Vec<(Uuid, String)>,
    triggered: Vec<(i32, DateTime<Utc>)>,
    fail_claims: bool,
    fail_patterns: Vec<String>,
    /// Claims moved to another worker just before the owner's score write
    takeovers: Vec<(Uuid, String)>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, record: LogRecord) {
        self.inner.lock().rows.push(Row {
            record,
            claimed_by: None,
            claimed_at: None,
        });
    }

    /// Insert a record that another worker claimed at `at`
    pub fn insert_claimed(&self, record: LogRecord, worker_id: &str, at: DateTime<Utc>) {
        self.inner.lock().rows.push(Row {
            record,
            claimed_by: Some(worker_id.to_string()),
            claimed_at: Some(at),
        });
    }

    pub fn insert_rule(&self, rule: AlertRule) {
        self.inner.lock().rules.push(rule);
    }

    pub fn get(&self, id: Uuid) -> Option<LogRecord> {
        self.inner
            .lock()
            .rows
            .iter()
            .find(|r| r.record.id == id)
            .map(|r| r.record.clone())
    }

    pub fn records(&self) -> Vec<LogRecord> {
        self.inner.lock().rows.iter().map(|r| r.record.clone()).collect()
    }

    pub fn claimed_by(&self, id: Uuid) -> Option<String> {
        self.inner
            .lock()
            .rows
            .iter()
            .find(|r| r.record.id == id)
            .and_then(|r| r.claimed_by.clone())
    }

    pub fn score_writes(&self) -> Vec<(Uuid, String)> {
        self.inner.lock().score_writes.clone()
    }

    pub fn triggered(&self) -> Vec<(i32, DateTime<Utc>)> {
        self.inner.lock().triggered.clone()
    }

    /// Hand `id` to `worker_id` when the current owner tries to write its
    /// score, as if the lease had expired mid-batch
    pub fn take_over_before_write(&self, id: Uuid, worker_id: &str) {
        self.inner.lock().takeovers.push((id, worker_id.to_string()));
    }

    pub fn fail_claims(&self, fail: bool) {
        self.inner.lock().fail_claims = fail;
    }

    /// Make `find_matching` fail for this exact pattern
    pub fn fail_pattern(&self, pattern: &str) {
        self.inner.lock().fail_patterns.push(pattern.to_string());
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn claim_unscored(&self, request: &ClaimRequest) -> Result<Vec<LogRecord>, StoreError> {
        tokio::task::yield_now().await;

        let mut inner = self.inner.lock();
        if inner.fail_claims {
            return Err(StoreError::Unavailable("connection refused".into()));
        }

        let now = Utc::now();
        // None when the lease is too long to ever expire
        let expired_before = chrono::Duration::from_std(request.lease)
            .ok()
            .and_then(|lease| now.checked_sub_signed(lease));

        let mut eligible: Vec<&mut Row> = inner
            .rows
            .iter_mut()
            .filter(|r| r.record.anomaly_score.is_none())
            .filter(|r| match (r.claimed_at, expired_before) {
                (None, _) => true,
                (Some(at), Some(cutoff)) => at < cutoff,
                (Some(_), None) => false,
            })
            .filter(|r| {
                r.claimed_at.is_some() || request.since.map_or(true, |since| r.record.ts >= since)
            })
            .collect();
        eligible.sort_by_key(|r| r.record.ts);

        let claimed = eligible
            .into_iter()
            .take(request.limit.max(0) as usize)
            .map(|row| {
                row.claimed_by = Some(request.worker_id.clone());
                row.claimed_at = Some(now);
                row.record.clone()
            })
            .collect();

        Ok(claimed)
    }

    async fn record_score(&self, id: Uuid, worker_id: &str, score: Score) -> Result<bool, StoreError> {
        tokio::task::yield_now().await;

        let mut inner = self.inner.lock();
        let takeover = inner
            .takeovers
            .iter()
            .position(|(target, _)| *target == id)
            .map(|at| inner.takeovers.remove(at));

        let Some(row) = inner.rows.iter_mut().find(|r| r.record.id == id) else {
            return Ok(false);
        };
        if let Some((_, thief)) = takeover {
            row.claimed_by = Some(thief);
            row.claimed_at = Some(Utc::now());
        }
        if row.claimed_by.as_deref() != Some(worker_id) || row.record.anomaly_score.is_some() {
            return Ok(false);
        }

        row.record.anomaly_score = Some(score.value);
        row.record.is_anomaly = Some(score.is_anomaly);
        row.claimed_by = None;
        row.claimed_at = None;
        inner.score_writes.push((id, worker_id.to_string()));
        Ok(true)
    }

    async fn release_claim(&self, id: Uuid, worker_id: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        if let Some(row) = inner.rows.iter_mut().find(|r| r.record.id == id) {
            if row.claimed_by.as_deref() == Some(worker_id) && row.record.anomaly_score.is_none() {
                row.claimed_by = None;
                row.claimed_at = None;
            }
        }
        Ok(())
    }

    async fn recent_messages(&self, limit: i64) -> Result<Vec<String>, StoreError> {
        let inner = self.inner.lock();
        let mut rows: Vec<&LogRecord> = inner.rows.iter().map(|r| &r.record).collect();
        rows.sort_by(|a, b| b.ts.cmp(&a.ts));
        Ok(rows
            .into_iter()
            .take(limit.max(0) as usize)
            .map(|r| r.msg.clone())
            .collect())
    }

    async fn find_matching(&self, pattern: &str, limit: i64) -> Result<Vec<LogRecord>, StoreError> {
        let inner = self.inner.lock();
        if inner.fail_patterns.iter().any(|p| p == pattern) {
            return Err(StoreError::Unavailable("statement timeout".into()));
        }

        let re = Regex::new(pattern)
            .map_err(|e| StoreError::Unavailable(format!("invalid regular expression: {e}")))?;

        let mut matches: Vec<LogRecord> = inner
            .rows
            .iter()
            .filter(|r| re.is_match(&r.record.msg))
            .map(|r| r.record.clone())
            .collect();
        matches.sort_by(|a, b| b.ts.cmp(&a.ts));
        matches.truncate(limit.max(0) as usize);
        Ok(matches)
    }

    async fn active_alert_rules(&self) -> Result<Vec<AlertRule>, StoreError> {
        Ok(self
            .inner
            .lock()
            .rules
            .iter()
            .filter(|r| r.is_active)
            .cloned()
            .collect())
    }

    async fn mark_alert_triggered(&self, rule_id: i32, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        if let Some(rule) = inner.rules.iter_mut().find(|r| r.id == rule_id) {
            rule.last_triggered = Some(at);
        }
        inner.triggered.push((rule_id, at));
        Ok(())
    }
}
