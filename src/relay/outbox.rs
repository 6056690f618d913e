//! Serialized write path for one connection.
//!
//! The socket sink is owned by a single writer task ([`write_loop`]). Every
//! producer (all forwarders of a session) holds an [`Outbox`] clone and sends
//! whole [`Message`]s over a bounded channel, so frames can never interleave.

use std::fmt::Display;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::extract::ws;
use futures::{Sink, SinkExt};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::protocol::{Message, MessageKind};
use crate::state::RelayStats;

/// The writer task is gone; the connection can no longer be written to.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("connection closed")]
pub struct OutboxClosed;

/// Cloneable write capability for one connection.
#[derive(Clone)]
pub struct Outbox {
    tx: mpsc::Sender<Message>,
    stats: Arc<RelayStats>,
}

impl Outbox {
    /// Create an outbox and the receiving end the writer task drains.
    #[must_use]
    pub fn channel(capacity: usize, stats: Arc<RelayStats>) -> (Self, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx, stats }, rx)
    }

    /// Queue `msg` for the writer, waiting if the buffer is full.
    pub async fn send(&self, msg: Message) -> Result<(), OutboxClosed> {
        let kind = msg.kind;
        self.tx.send(msg).await.map_err(|_| OutboxClosed)?;
        let counter = match kind {
            MessageKind::AiDelta => &self.stats.deltas_sent,
            MessageKind::AiDone => &self.stats.done_sent,
            MessageKind::Error => &self.stats.errors_sent,
            MessageKind::UserMessage | MessageKind::Unknown => return Ok(()),
        };
        counter.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

/// Drain `rx` into the socket sink until every [`Outbox`] is dropped.
///
/// A failed socket write cancels `cancel` so the session and its forwarders
/// stop, then drops the receiver so further sends fail.
pub async fn write_loop<S>(mut sink: S, mut rx: mpsc::Receiver<Message>, cancel: CancellationToken)
where
    S: Sink<ws::Message> + Unpin,
    S::Error: Display,
{
    while let Some(msg) = rx.recv().await {
        let text = match msg.to_json() {
            Ok(t) => t,
            Err(e) => {
                error!("WS send: failed to serialize message: {e}");
                continue;
            }
        };
        if let Err(e) = sink.send(ws::Message::Text(text.into())).await {
            debug!("WS send failed: {e}");
            cancel.cancel();
            return;
        }
    }
    let _ = sink.close().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::channel::mpsc as fmpsc;
    use futures::StreamExt;

    #[tokio::test]
    async fn writes_messages_in_order_as_json_text() {
        let stats = Arc::new(RelayStats::default());
        let (outbox, rx) = Outbox::channel(8, stats.clone());
        let (sink_tx, sink_rx) = fmpsc::unbounded::<ws::Message>();
        let cancel = CancellationToken::new();
        let writer = tokio::spawn(write_loop(sink_tx, rx, cancel.clone()));

        outbox.send(Message::delta("a")).await.unwrap();
        outbox.send(Message::delta("b")).await.unwrap();
        outbox.send(Message::done()).await.unwrap();
        drop(outbox);
        writer.await.unwrap();

        let frames: Vec<String> = sink_rx
            .map(|m| match m {
                ws::Message::Text(t) => t.as_str().to_string(),
                other => panic!("unexpected frame {other:?}"),
            })
            .collect()
            .await;
        assert_eq!(
            frames,
            vec![
                r#"{"type":"ai_delta","payload":"a"}"#,
                r#"{"type":"ai_delta","payload":"b"}"#,
                r#"{"type":"ai_done","payload":""}"#,
            ]
        );
        assert!(!cancel.is_cancelled());
        assert_eq!(stats.deltas_sent.load(Ordering::Relaxed), 2);
        assert_eq!(stats.done_sent.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn failed_socket_write_cancels_and_closes_outbox() {
        let (outbox, rx) = Outbox::channel(8, Arc::new(RelayStats::default()));
        let (sink_tx, sink_rx) = fmpsc::unbounded::<ws::Message>();
        drop(sink_rx);
        let cancel = CancellationToken::new();
        let writer = tokio::spawn(write_loop(sink_tx, rx, cancel.clone()));

        outbox.send(Message::delta("lost")).await.unwrap();
        writer.await.unwrap();

        assert!(cancel.is_cancelled());
        assert_eq!(outbox.send(Message::done()).await, Err(OutboxClosed));
    }
}
