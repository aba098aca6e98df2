//! Fan-out Manager
//!
//! Keeps a subscriber registry per topic and delivers every payload published
//! on a topic to each live subscriber. Topics fed by the Event Bus get exactly
//! one upstream listener, started with the first subscriber and aborted when
//! the last one leaves. Listeners never deliver directly: they push onto a
//! relay channel that a single task drains into [`FanoutManager::publish`].

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

pub mod upstream;

pub use upstream::{ListenerHandle, Notification, PgUpstream, Upstream};

const RELAY_CAPACITY: usize = 1024;

pub type SubscriberId = u64;

struct Topic {
    subscribers: HashMap<SubscriberId, mpsc::Sender<Arc<str>>>,
    /// Aborts the upstream listener when the topic is pruned
    _listener: Option<ListenerHandle>,
}

pub struct FanoutManager {
    topics: Mutex<HashMap<String, Topic>>,
    upstream: Option<Arc<dyn Upstream>>,
    relay: mpsc::Sender<Notification>,
    buffer: usize,
    next_id: AtomicU64,
}

impl FanoutManager {
    /// Create the manager and spawn its relay task. `buffer` bounds each
    /// subscriber's queue; a subscriber that falls that far behind is dropped.
    pub fn start(upstream: Option<Arc<dyn Upstream>>, buffer: usize) -> Arc<Self> {
        let (relay_tx, relay_rx) = mpsc::channel(RELAY_CAPACITY);
        let manager = Arc::new(Self {
            topics: Mutex::new(HashMap::new()),
            upstream,
            relay: relay_tx,
            buffer: buffer.max(1),
            next_id: AtomicU64::new(1),
        });

        tokio::spawn(relay(Arc::downgrade(&manager), relay_rx));
        manager
    }

    pub fn subscribe(self: &Arc<Self>, topic: &str) -> Subscription {
        let (tx, rx) = mpsc::channel(self.buffer);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let count = {
            let mut topics = self.topics.lock();
            let entry = topics.entry(topic.to_string()).or_insert_with(|| Topic {
                subscribers: HashMap::new(),
                _listener: self.start_listener(topic),
            });
            entry.subscribers.insert(id, tx);
            entry.subscribers.len()
        };

        tracing::debug!("Subscriber {} joined '{}' ({} total)", id, topic, count);

        Subscription {
            id,
            topic: topic.to_string(),
            receiver: rx,
            manager: Arc::downgrade(self),
        }
    }

    fn start_listener(&self, topic: &str) -> Option<ListenerHandle> {
        let upstream = self.upstream.as_ref()?;
        if !upstream.feeds(topic) {
            return None;
        }
        tracing::info!("Starting upstream listener for '{}'", topic);
        Some(upstream.listen(topic, self.relay.clone()))
    }

    /// Remove a subscriber. Unknown ids and topics are ignored.
    pub fn unsubscribe(&self, id: SubscriberId, topic: &str) {
        let mut topics = self.topics.lock();
        let Some(entry) = topics.get_mut(topic) else {
            return;
        };

        if entry.subscribers.remove(&id).is_some() {
            tracing::debug!("Subscriber {} left '{}'", id, topic);
        }
        if entry.subscribers.is_empty() {
            topics.remove(topic);
            tracing::debug!("Topic '{}' has no subscribers, pruned", topic);
        }
    }

    /// Deliver `payload` to every subscriber of `topic` and return how many
    /// accepted it. Subscribers whose queue is closed or full are removed;
    /// delivery to the rest continues.
    pub fn publish(&self, topic: &str, payload: impl Into<Arc<str>>) -> usize {
        let payload = payload.into();
        let mut topics = self.topics.lock();
        let Some(entry) = topics.get_mut(topic) else {
            return 0;
        };

        let mut delivered = 0;
        entry.subscribers.retain(|id, tx| match tx.try_send(payload.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(TrySendError::Closed(_)) => {
                tracing::debug!("Subscriber {} on '{}' is gone, removing", id, topic);
                false
            }
            Err(TrySendError::Full(_)) => {
                tracing::warn!("Subscriber {} on '{}' fell behind, disconnecting", id, topic);
                false
            }
        });

        if entry.subscribers.is_empty() {
            topics.remove(topic);
        }

        delivered
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .lock()
            .get(topic)
            .map_or(0, |entry| entry.subscribers.len())
    }

    /// Subscriber count per topic with at least one subscriber
    pub fn topic_stats(&self) -> BTreeMap<String, usize> {
        self.topics
            .lock()
            .iter()
            .map(|(name, entry)| (name.clone(), entry.subscribers.len()))
            .collect()
    }
}

async fn relay(manager: Weak<FanoutManager>, mut notifications: mpsc::Receiver<Notification>) {
    while let Some(notification) = notifications.recv().await {
        let Some(manager) = manager.upgrade() else {
            break;
        };
        let delivered = manager.publish(&notification.topic, notification.payload);
        tracing::trace!("Relayed '{}' to {} subscribers", notification.topic, delivered);
    }
}

/// A live subscription. Dropping it unsubscribes.
pub struct Subscription {
    id: SubscriberId,
    topic: String,
    receiver: mpsc::Receiver<Arc<str>>,
    manager: Weak<FanoutManager>,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Next payload; `None` once the manager has dropped this subscriber
    pub async fn recv(&mut self) -> Option<Arc<str>> {
        self.receiver.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(manager) = self.manager.upgrade() {
            manager.unsubscribe(self.id, &self.topic);
        }
    }
}
