//! Record Store boundary
//!
//! The scoring worker and pattern miner only see the [`RecordStore`] trait.
//! HTTP handlers that merely read rows go through the model methods on the
//! pool directly, like every other handler.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{AlertRule, LogRecord};
use crate::scoring::Score;

pub mod filter;
pub mod postgres;
#[cfg(test)]
pub mod memory;

pub use postgres::PgRecordStore;

/// One claim round for a scoring worker
#[derive(Debug, Clone)]
pub struct ClaimRequest {
    /// Written into `claimed_by`; the score write is conditional on it
    pub worker_id: String,
    pub limit: i64,
    /// Ignore records older than this
    pub since: Option<DateTime<Utc>>,
    /// Claims older than this belong to a dead worker and may be taken over
    pub lease: Duration,
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Atomically claim up to `limit` unscored records for `worker_id`.
    ///
    /// Selection and marking happen in one conditional update, so two
    /// workers never receive the same record while a claim is live.
    /// Records are returned in timestamp order, oldest first.
    async fn claim_unscored(&self, request: &ClaimRequest) -> Result<Vec<LogRecord>, StoreError>;

    /// Persist score and flag together and clear the claim.
    ///
    /// Returns `false` without writing when the record is no longer claimed
    /// by `worker_id` or was already scored.
    async fn record_score(&self, id: Uuid, worker_id: &str, score: Score) -> Result<bool, StoreError>;

    /// Give a claimed record back unscored
    async fn release_claim(&self, id: Uuid, worker_id: &str) -> Result<(), StoreError>;

    /// Messages of the `limit` most recent records, newest first
    async fn recent_messages(&self, limit: i64) -> Result<Vec<String>, StoreError>;

    /// Most recent records whose message matches `pattern` (a regex)
    async fn find_matching(&self, pattern: &str, limit: i64) -> Result<Vec<LogRecord>, StoreError>;

    async fn active_alert_rules(&self) -> Result<Vec<AlertRule>, StoreError>;

    async fn mark_alert_triggered(&self, rule_id: i32, at: DateTime<Utc>) -> Result<(), StoreError>;
}
