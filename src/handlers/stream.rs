//! WebSocket streams
//!
//! Each connection joins one topic for its whole lifetime and receives every
//! payload published there as a text frame. Client frames are read only to
//! notice a close.

use axum::extract::ws::{Message, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::watch;

use crate::events::topics;
use crate::fanout::Subscription;
use crate::AppState;

pub async fn logs(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    upgrade(ws, state, topics::NEW_LOG)
}

pub async fn anomalies(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    upgrade(ws, state, topics::NEW_ANOMALY)
}

pub async fn alerts(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    upgrade(ws, state, topics::ALERTS)
}

fn upgrade(ws: WebSocketUpgrade, state: AppState, topic: &'static str) -> Response {
    ws.on_upgrade(move |socket| async move {
        let subscription = state.fanout.subscribe(topic);
        tracing::info!("WebSocket client {} connected to '{}'", subscription.id(), topic);

        let (sender, receiver) = socket.split();
        serve_subscriber(sender, receiver, subscription, state.shutdown.clone()).await;
    })
}

/// Pump payloads to one client until it leaves, a send fails, the manager
/// drops it, or the process shuts down. The subscription is released on return.
pub async fn serve_subscriber<Tx, Rx, E>(
    mut sender: Tx,
    mut receiver: Rx,
    mut subscription: Subscription,
    mut shutdown: watch::Receiver<bool>,
) where
    Tx: Sink<Message> + Unpin,
    Rx: Stream<Item = Result<Message, E>> + Unpin,
    E: std::fmt::Display,
{
    let id = subscription.id();

    loop {
        if *shutdown.borrow() {
            let _ = sender.send(Message::Close(None)).await;
            break;
        }

        tokio::select! {
            inbound = receiver.next() => match inbound {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!("WebSocket client {} read error: {}", id, e);
                    break;
                }
            },
            outbound = subscription.recv() => match outbound {
                Some(payload) => {
                    if sender.send(Message::Text(payload.to_string())).await.is_err() {
                        break;
                    }
                }
                // Removed by the manager after falling behind
                None => break,
            },
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }

    tracing::info!("WebSocket client {} disconnected from '{}'", id, subscription.topic());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fanout::FanoutManager;
    use futures::channel::mpsc;
    use std::time::Duration;

    type Inbound = Result<Message, axum::Error>;

    struct Client {
        frames: mpsc::UnboundedReceiver<Message>,
        input: mpsc::UnboundedSender<Inbound>,
        task: tokio::task::JoinHandle<()>,
    }

    fn connect(fanout: &std::sync::Arc<FanoutManager>, topic: &str, shutdown: watch::Receiver<bool>) -> Client {
        let (frame_tx, frames) = mpsc::unbounded::<Message>();
        let (input, inbound) = mpsc::unbounded::<Inbound>();
        let subscription = fanout.subscribe(topic);
        let task = tokio::spawn(serve_subscriber(frame_tx, inbound, subscription, shutdown));
        Client { frames, input, task }
    }

    async fn finished(task: tokio::task::JoinHandle<()>) {
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("connection loop did not end")
            .unwrap();
    }

    #[tokio::test]
    async fn test_payloads_become_text_frames() {
        let fanout = FanoutManager::start(None, 8);
        let (_tx, rx) = watch::channel(false);
        let mut client = connect(&fanout, topics::NEW_ANOMALY, rx);

        // Keepalives are ignored
        tokio_test::assert_ok!(client.input.unbounded_send(Ok(Message::Ping(vec![2]))));
        assert_eq!(fanout.publish(topics::NEW_ANOMALY, r#"{"id":"a"}"#), 1);

        let frame = tokio::time::timeout(Duration::from_secs(1), client.frames.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(frame, Message::Text(r#"{"id":"a"}"#.to_string()));

        client.input.unbounded_send(Ok(Message::Close(None))).unwrap();
        finished(client.task).await;
        assert_eq!(fanout.subscriber_count(topics::NEW_ANOMALY), 0);
    }

    #[tokio::test]
    async fn test_client_hangup_releases_subscription() {
        let fanout = FanoutManager::start(None, 8);
        let (tx, rx) = watch::channel(false);
        let client = connect(&fanout, topics::ALERTS, rx);
        let other = connect(&fanout, topics::ALERTS, tx.subscribe());
        assert_eq!(fanout.subscriber_count(topics::ALERTS), 2);

        drop(client.input);
        finished(client.task).await;
        assert_eq!(fanout.subscriber_count(topics::ALERTS), 1);

        drop(other.input);
        finished(other.task).await;
        assert!(fanout.topic_stats().is_empty());
    }

    #[tokio::test]
    async fn test_send_failure_ends_loop() {
        let fanout = FanoutManager::start(None, 8);
        let (_tx, rx) = watch::channel(false);
        let client = connect(&fanout, topics::NEW_LOG, rx);

        drop(client.frames);
        tokio::task::yield_now().await;
        fanout.publish(topics::NEW_LOG, "x");
        finished(client.task).await;
        assert_eq!(fanout.subscriber_count(topics::NEW_LOG), 0);
    }

    #[tokio::test]
    async fn test_shutdown_sends_close() {
        let fanout = FanoutManager::start(None, 8);
        let (tx, rx) = watch::channel(false);
        let mut client = connect(&fanout, topics::NEW_LOG, rx);

        tx.send(true).unwrap();
        finished(client.task).await;

        let frame = client.frames.next().await.unwrap();
        assert_eq!(frame, Message::Close(None));
        assert_eq!(fanout.subscriber_count(topics::NEW_LOG), 0);
    }
}
