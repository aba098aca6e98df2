//! Periodic scoring worker
//!
//! Each cycle claims a batch of unscored records, scores them in timestamp
//! order, persists each score with a write that only succeeds while the claim
//! is still ours, and publishes anomalies once the write is durable.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::Utc;
use futures::FutureExt;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use super::alerts::AlertEvaluator;
use crate::config::ScoringConfig;
use crate::error::StoreError;
use crate::events::{publish_json, topics, EventPublisher};
use crate::fanout::FanoutManager;
use crate::models::{AnomalyEvent, LogRecord};
use crate::store::{ClaimRequest, RecordStore};

/// Outcome counts of one cycle
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    pub claimed: usize,
    pub scored: usize,
    pub anomalies: usize,
    /// Released unscored after a per-record failure, or lost to another worker
    pub skipped: usize,
    pub alerts: usize,
}

pub struct ScoringWorker {
    store: Arc<dyn RecordStore>,
    bus: Arc<dyn EventPublisher>,
    fanout: Arc<FanoutManager>,
    config: ScoringConfig,
}

impl ScoringWorker {
    pub fn new(
        store: Arc<dyn RecordStore>,
        bus: Arc<dyn EventPublisher>,
        fanout: Arc<FanoutManager>,
        config: ScoringConfig,
    ) -> Self {
        Self {
            store,
            bus,
            fanout,
            config,
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.config.worker_id
    }

    /// Run cycles on the configured interval until `shutdown` flips.
    /// A failed or panicking cycle is logged and the next one runs as usual.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            "Scoring worker {} started (interval {:?}, batch {})",
            self.config.worker_id,
            self.config.interval,
            self.config.batch_size
        );

        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => break,
            }
            if *shutdown.borrow() {
                break;
            }

            match AssertUnwindSafe(self.run_cycle()).catch_unwind().await {
                Ok(Ok(report)) if report.claimed > 0 => {
                    tracing::info!(
                        "Scored {} of {} claimed records ({} anomalies, {} skipped, {} alerts)",
                        report.scored,
                        report.claimed,
                        report.anomalies,
                        report.skipped,
                        report.alerts
                    );
                }
                Ok(Ok(_)) => tracing::trace!("No unscored records"),
                Ok(Err(e)) => tracing::error!("Scoring cycle failed: {}", e),
                Err(_) => tracing::error!("Scoring cycle panicked, continuing with next cycle"),
            }
        }

        tracing::info!("Scoring worker {} stopped", self.config.worker_id);
    }

    /// One claim/score/publish pass. Only a failed claim aborts the cycle;
    /// everything after that is handled per record.
    pub async fn run_cycle(&self) -> Result<CycleReport, StoreError> {
        let evaluator = match self.store.active_alert_rules().await {
            Ok(rules) => AlertEvaluator::compile(rules),
            Err(e) => {
                tracing::warn!("Could not load alert rules, evaluating none this cycle: {}", e);
                AlertEvaluator::default()
            }
        };

        let now = Utc::now();
        let since = self
            .config
            .window
            .and_then(|window| chrono::Duration::from_std(window).ok())
            .and_then(|window| now.checked_sub_signed(window));

        let request = ClaimRequest {
            worker_id: self.config.worker_id.clone(),
            limit: self.config.batch_size,
            since,
            lease: self.config.claim_timeout,
        };

        let mut batch = self.store.claim_unscored(&request).await?;
        batch.sort_by(|a, b| a.ts.cmp(&b.ts).then(a.id.cmp(&b.id)));

        let mut report = CycleReport {
            claimed: batch.len(),
            ..CycleReport::default()
        };

        for record in &batch {
            self.process(record, &evaluator, &mut report).await;
        }

        Ok(report)
    }

    async fn process(&self, record: &LogRecord, evaluator: &AlertEvaluator, report: &mut CycleReport) {
        let worker_id = self.worker_id();

        let score = match super::score(record) {
            Ok(score) => score,
            Err(e) => {
                tracing::warn!("Skipping record {}: {}", record.id, e);
                self.release(record);
                report.skipped += 1;
                return;
            }
        };

        match self.store.record_score(record.id, worker_id, score).await {
            Ok(true) => report.scored += 1,
            Ok(false) => {
                tracing::debug!("Record {} was taken over or already scored", record.id);
                report.skipped += 1;
                return;
            }
            Err(e) => {
                tracing::warn!("Failed to persist score for {}: {}", record.id, e);
                self.release(record);
                report.skipped += 1;
                return;
            }
        }

        if score.is_anomaly {
            report.anomalies += 1;
            let event = AnomalyEvent::from_record(record, score.value);
            // The score is already committed; a lost notification is not retried
            if let Err(e) = publish_json(self.bus.as_ref(), topics::NEW_ANOMALY, &event).await {
                tracing::error!("Failed to publish anomaly {}: {}", record.id, e);
            }
        }

        for alert in evaluator.evaluate(record, Utc::now()) {
            report.alerts += 1;
            tracing::info!("Alert '{}' triggered by record {}", alert.alert_name, record.id);

            match serde_json::to_string(&alert) {
                Ok(payload) => {
                    self.fanout.publish(topics::ALERTS, payload);
                }
                Err(e) => tracing::error!("Failed to serialize alert {}: {}", alert.alert_id, e),
            }
            if let Err(e) = self
                .store
                .mark_alert_triggered(alert.alert_id, alert.triggered_at)
                .await
            {
                tracing::warn!("Failed to update last_triggered for alert {}: {}", alert.alert_id, e);
            }
        }
    }

    /// Best effort; an unreleased claim expires after the lease anyway
    fn release(&self, record: &LogRecord) {
        let store = self.store.clone();
        let worker_id = self.config.worker_id.clone();
        let id = record.id;
        tokio::spawn(async move {
            if let Err(e) = store.release_claim(id, &worker_id).await {
                tracing::warn!("Failed to release claim on {}: {}", id, e);
            }
        });
    }
}
