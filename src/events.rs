//! Event Bus producer side (PostgreSQL NOTIFY)

use async_trait::async_trait;
use serde::Serialize;
use sqlx::PgPool;

/// Topic names shared by producers, the fan-out manager and WebSocket routes
pub mod topics {
    /// Raw records, notified by the ingestion path
    pub const NEW_LOG: &str = "new_log";
    /// Records the scoring worker classified as anomalous
    pub const NEW_ANOMALY: &str = "new_anomaly";
    /// Alert rule hits; published in-process only
    pub const ALERTS: &str = "alerts";

    /// Topics carried by the Event Bus and bridged by an upstream listener
    pub const BUS_FED: [&str; 2] = [NEW_LOG, NEW_ANOMALY];
}

#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("notify failed: {0}")]
    Publish(#[from] sqlx::Error),

    #[error("payload serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, topic: &str, payload: &str) -> Result<(), BusError>;
}

/// Serialize `event` and publish it on `topic`
pub async fn publish_json<T: Serialize + Sync>(
    publisher: &dyn EventPublisher,
    topic: &str,
    event: &T,
) -> Result<(), BusError> {
    let payload = serde_json::to_string(event)?;
    publisher.publish(topic, &payload).await
}

/// Publishes with `pg_notify`, one pooled connection per call
#[derive(Clone)]
pub struct PgEventBus {
    pool: PgPool,
}

impl PgEventBus {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EventPublisher for PgEventBus {
    async fn publish(&self, topic: &str, payload: &str) -> Result<(), BusError> {
        sqlx::query("SELECT pg_notify($1, $2)")
            .bind(topic)
            .bind(payload)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}
