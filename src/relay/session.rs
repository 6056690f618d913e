//! Relay Session: the read loop that owns one client connection.
//!
//! ```text
//!   Open ──(user_message)──▶ spawn forwarder, keep reading
//!    │  ──(other kind)─────▶ ignore, keep reading
//!    │
//!    └─(close / read error / bad frame / writer gone)──▶ Closing (terminal)
//! ```
//!
//! Forwarders run in a per-session [`JoinSet`] and share the session's
//! [`CancellationToken`]. On Closing the token is cancelled, forwarders get
//! `shutdown_grace` to finish, and whatever is left is aborted. No forwarder
//! survives [`RelaySession::run`].

use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws;
use futures::{Stream, StreamExt};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::forwarder::{self, ForwardError, ForwardOutcome};
use super::outbox::Outbox;
use crate::protocol::{decode_frame, DecodeError, Inbound, Message, MessageKind};
use crate::state::{Gauge, RelayStats};
use crate::upstream::{CompletionProvider, CompletionRequest};

/// Per-session knobs, derived from config.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// System message prepended to every prompt.
    pub system_prompt: String,
    /// Maximum concurrent forwarders; 0 means unbounded.
    pub max_forwarders: usize,
    /// Time forwarders get to stop after teardown starts.
    pub shutdown_grace: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            system_prompt: "You are a helpful assistant.".to_string(),
            max_forwarders: 0,
            shutdown_grace: Duration::from_secs(2),
        }
    }
}

/// Why a session ended.
#[derive(Debug)]
pub enum SessionEnd {
    /// Close frame or end of the inbound stream.
    RemoteClosed,
    /// The transport reported a read error.
    TransportError(String),
    /// An inbound frame was not a valid message.
    ProtocolError(DecodeError),
    /// The writer failed, so the connection is unusable.
    WriterClosed,
}

impl Display for SessionEnd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RemoteClosed => f.write_str("remote closed"),
            Self::TransportError(e) => write!(f, "read error: {e}"),
            Self::ProtocolError(e) => write!(f, "{e}"),
            Self::WriterClosed => f.write_str("write failed"),
        }
    }
}

/// One client connection's read loop and its forwarders.
pub struct RelaySession {
    id: String,
    provider: Arc<dyn CompletionProvider>,
    settings: SessionSettings,
    stats: Arc<RelayStats>,
    forwarders: JoinSet<ForwardOutcome>,
}

impl RelaySession {
    pub fn new(
        id: impl Into<String>,
        provider: Arc<dyn CompletionProvider>,
        settings: SessionSettings,
        stats: Arc<RelayStats>,
    ) -> Self {
        Self {
            id: id.into(),
            provider,
            settings,
            stats,
            forwarders: JoinSet::new(),
        }
    }

    /// Read `inbound` until a terminal condition, dispatching messages.
    ///
    /// `outbox` is this connection's write capability; `cancel` is shared with
    /// the writer task, which cancels it when a socket write fails. The outbox
    /// is dropped before returning, along with every forwarder's clone.
    pub async fn run<S, E>(
        mut self,
        mut inbound: S,
        outbox: Outbox,
        cancel: CancellationToken,
    ) -> SessionEnd
    where
        S: Stream<Item = Result<ws::Message, E>> + Unpin,
        E: Display,
    {
        let _active = self.stats.enter(Gauge::Sessions);
        info!("Session {}: opened", self.id);

        let end = loop {
            tokio::select! {
                () = cancel.cancelled() => break SessionEnd::WriterClosed,
                Some(joined) = self.forwarders.join_next(), if !self.forwarders.is_empty() => {
                    self.reap(joined);
                }
                frame = inbound.next() => {
                    let frame = match frame {
                        None => break SessionEnd::RemoteClosed,
                        Some(Err(e)) => break SessionEnd::TransportError(e.to_string()),
                        Some(Ok(frame)) => frame,
                    };
                    match decode_frame(frame) {
                        Ok(Inbound::Message(msg)) => self.dispatch(msg, &outbox, &cancel).await,
                        Ok(Inbound::Control) => {}
                        Ok(Inbound::Close) => break SessionEnd::RemoteClosed,
                        Err(e) => break SessionEnd::ProtocolError(e),
                    }
                }
            }
        };

        info!("Session {}: closing ({end})", self.id);
        drop(outbox);
        self.teardown(&cancel).await;
        end
    }

    async fn dispatch(&mut self, msg: Message, outbox: &Outbox, cancel: &CancellationToken) {
        if msg.kind != MessageKind::UserMessage {
            debug!("Session {}: ignoring {} message", self.id, msg.kind.as_str());
            return;
        }

        let cap = self.settings.max_forwarders;
        if cap > 0 && self.forwarders.len() >= cap {
            // Finished-but-unreaped tasks still count; reap them first.
            while let Some(joined) = self.forwarders.try_join_next() {
                self.reap(joined);
            }
            if self.forwarders.len() >= cap {
                // A full outbox must not hold the read loop past cancellation.
                tokio::select! {
                    _ = forwarder::reject(outbox, ForwardError::Busy) => {}
                    () = cancel.cancelled() => {}
                }
                return;
            }
        }

        let request = CompletionRequest {
            system_prompt: self.settings.system_prompt.clone(),
            user_prompt: msg.payload,
        };
        let provider = Arc::clone(&self.provider);
        let outbox = outbox.clone();
        let cancel = cancel.clone();
        let guard = self.stats.enter(Gauge::Forwarders);
        let session_id = self.id.clone();
        self.forwarders.spawn(async move {
            let _guard = guard;
            debug!("Session {session_id}: forwarder started");
            forwarder::forward(provider.as_ref(), request, &outbox, &cancel).await
        });
    }

    fn reap(&self, joined: Result<ForwardOutcome, tokio::task::JoinError>) {
        match joined {
            Ok(outcome) => debug!("Session {}: forwarder finished: {outcome:?}", self.id),
            Err(e) if e.is_panic() => error!("Session {}: forwarder panicked: {e}", self.id),
            Err(_) => {}
        }
    }

    async fn teardown(&mut self, cancel: &CancellationToken) {
        cancel.cancel();
        if self.forwarders.is_empty() {
            return;
        }
        let grace = self.settings.shutdown_grace;
        let forwarders = &mut self.forwarders;
        let drained = tokio::time::timeout(grace, async {
            while let Some(joined) = forwarders.join_next().await {
                if let Err(e) = joined {
                    if e.is_panic() {
                        error!("forwarder panicked during teardown: {e}");
                    }
                }
            }
        })
        .await;
        if drained.is_err() {
            info!(
                "Session {}: aborting {} forwarder(s) after {grace:?}",
                self.id,
                self.forwarders.len()
            );
            self.forwarders.shutdown().await;
        }
    }
}
