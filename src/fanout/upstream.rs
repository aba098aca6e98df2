//! Upstream listeners bridging Event Bus notifications into the fan-out relay

use std::time::Duration;

use sqlx::postgres::PgListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const INITIAL_BACKOFF: Duration = Duration::from_millis(500);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// One raw payload received for a topic
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub topic: String,
    pub payload: String,
}

/// Owns a listener task and aborts it when dropped
#[derive(Debug)]
pub struct ListenerHandle(JoinHandle<()>);

impl ListenerHandle {
    pub fn new(task: JoinHandle<()>) -> Self {
        Self(task)
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Source of externally triggered topics
pub trait Upstream: Send + Sync {
    /// Whether `topic` is fed by this upstream
    fn feeds(&self, topic: &str) -> bool;

    /// Start forwarding raw payloads for `topic` into `sink`
    fn listen(&self, topic: &str, sink: mpsc::Sender<Notification>) -> ListenerHandle;
}

/// LISTEN on PostgreSQL channels. Each listener opens its own connection
/// so waiting on notifications never pins a connection from the store pool.
pub struct PgUpstream {
    database_url: String,
    topics: Vec<String>,
}

impl PgUpstream {
    pub fn new(database_url: impl Into<String>, topics: &[&str]) -> Self {
        Self {
            database_url: database_url.into(),
            topics: topics.iter().map(|t| t.to_string()).collect(),
        }
    }
}

impl Upstream for PgUpstream {
    fn feeds(&self, topic: &str) -> bool {
        self.topics.iter().any(|t| t == topic)
    }

    fn listen(&self, topic: &str, sink: mpsc::Sender<Notification>) -> ListenerHandle {
        let url = self.database_url.clone();
        let topic = topic.to_string();
        ListenerHandle::new(tokio::spawn(listen_loop(url, topic, sink)))
    }
}

async fn listen_loop(url: String, topic: String, sink: mpsc::Sender<Notification>) {
    let mut backoff = INITIAL_BACKOFF;

    loop {
        match forward(&url, &topic, &sink).await {
            Ok(()) => {
                tracing::debug!("Relay closed, listener for '{}' exiting", topic);
                return;
            }
            Err(e) => {
                tracing::warn!("Listener for '{}' failed: {}; retrying in {:?}", topic, e, backoff);
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(MAX_BACKOFF);
            }
        }
    }
}

/// Returns `Ok` only when the relay has gone away
async fn forward(url: &str, topic: &str, sink: &mpsc::Sender<Notification>) -> Result<(), sqlx::Error> {
    let mut listener = PgListener::connect(url).await?;
    listener.listen(topic).await?;
    tracing::info!("Listening for notifications on '{}'", topic);

    loop {
        let notification = listener.recv().await?;
        let forwarded = Notification {
            topic: topic.to_string(),
            payload: notification.payload().to_string(),
        };
        if sink.send(forwarded).await.is_err() {
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pg_upstream_feeds_configured_topics() {
        let upstream = PgUpstream::new("postgres://localhost/test", &["new_log", "new_anomaly"]);
        assert!(upstream.feeds("new_anomaly"));
        assert!(!upstream.feeds("alerts"));
    }

    #[tokio::test]
    async fn test_handle_drop_aborts_task() {
        let (probe_tx, probe_rx) = tokio::sync::oneshot::channel::<()>();
        let handle = ListenerHandle::new(tokio::spawn(async move {
            let _probe = probe_tx;
            std::future::pending::<()>().await;
        }));

        drop(handle);
        let outcome = tokio::time::timeout(Duration::from_secs(1), probe_rx).await;
        // Sender dropped with the aborted future
        assert!(matches!(outcome, Ok(Err(_))));
    }
}
