//! Stream Forwarder: drives one upstream completion and relays it.
//!
//! Exactly one terminator is written per request while the connection is up:
//! `ai_done` after a clean end-of-stream, or a single `error`. Fragments are
//! written in upstream order, one `ai_delta` per non-empty fragment.

use futures::StreamExt;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::outbox::Outbox;
use crate::protocol::Message;
use crate::upstream::{CompletionProvider, CompletionRequest, UpstreamError};

/// Client-visible forwarding failures. `Display` is the `error` payload.
#[derive(Debug, Error)]
pub enum ForwardError {
    /// The upstream refused or never answered the submission.
    #[error("Stream error: {0}")]
    Submission(#[source] UpstreamError),
    /// The upstream failed after the stream had started.
    #[error("Recv error: {0}")]
    Stream(#[source] UpstreamError),
    /// The session already runs its maximum number of forwarders.
    #[error("Busy: a response is already streaming on this connection")]
    Busy,
}

/// How a forwarder finished.
#[derive(Debug)]
pub enum ForwardOutcome {
    /// `ai_done` was written after `fragments` deltas.
    Completed { fragments: usize },
    /// An `error` message was written.
    Failed(ForwardError),
    /// A write failed; nothing further was written.
    ClientGone,
    /// The session was torn down while waiting on upstream.
    Cancelled,
}

/// Run `request` against `provider`, relaying into `outbox` until a terminator
/// is written, a write fails, or `cancel` fires.
///
/// The upstream stream is owned by this call and dropped on every exit path.
pub async fn forward(
    provider: &dyn CompletionProvider,
    request: CompletionRequest,
    outbox: &Outbox,
    cancel: &CancellationToken,
) -> ForwardOutcome {
    let submitted = tokio::select! {
        () = cancel.cancelled() => return ForwardOutcome::Cancelled,
        res = provider.submit(&request) => res,
    };
    let mut stream = match submitted {
        Ok(stream) => stream,
        Err(e) => return fail(outbox, ForwardError::Submission(e)).await,
    };

    let mut fragments = 0usize;
    loop {
        let next = tokio::select! {
            () = cancel.cancelled() => return ForwardOutcome::Cancelled,
            next = stream.next() => next,
        };
        match next {
            Some(Ok(increment)) => {
                for fragment in increment.fragments {
                    if fragment.is_empty() {
                        continue;
                    }
                    if outbox.send(Message::delta(fragment)).await.is_err() {
                        debug!("Forwarder: client gone after {fragments} fragments");
                        return ForwardOutcome::ClientGone;
                    }
                    fragments += 1;
                }
            }
            Some(Err(e)) => return fail(outbox, ForwardError::Stream(e)).await,
            None => {
                return match outbox.send(Message::done()).await {
                    Ok(()) => ForwardOutcome::Completed { fragments },
                    Err(_) => ForwardOutcome::ClientGone,
                };
            }
        }
    }
}

/// Reply to a request that will not be forwarded at all.
pub async fn reject(outbox: &Outbox, err: ForwardError) -> ForwardOutcome {
    fail(outbox, err).await
}

async fn fail(outbox: &Outbox, err: ForwardError) -> ForwardOutcome {
    warn!("Forwarder: {err}");
    match outbox.send(Message::error(err.to_string())).await {
        Ok(()) => ForwardOutcome::Failed(err),
        Err(_) => ForwardOutcome::ClientGone,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use futures::stream::{self, BoxStream};
    use tokio::sync::mpsc;

    use super::*;
    use crate::protocol::MessageKind;
    use crate::state::RelayStats;
    use crate::upstream::{Increment, IncrementStream};

    /// Provider that replays a fixed script and records requests.
    struct Scripted {
        script: Mutex<Option<Result<Vec<Result<Increment, UpstreamError>>, UpstreamError>>>,
        seen: Mutex<Vec<CompletionRequest>>,
        dropped: Arc<AtomicBool>,
        pending_forever: bool,
    }

    impl Scripted {
        fn new(script: Result<Vec<Result<Increment, UpstreamError>>, UpstreamError>) -> Self {
            Self {
                script: Mutex::new(Some(script)),
                seen: Mutex::new(Vec::new()),
                dropped: Arc::new(AtomicBool::new(false)),
                pending_forever: false,
            }
        }
    }

    struct DropFlag(Arc<AtomicBool>);

    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl CompletionProvider for Scripted {
        async fn submit(
            &self,
            request: &CompletionRequest,
        ) -> Result<IncrementStream, UpstreamError> {
            self.seen.lock().unwrap().push(request.clone());
            let items = self.script.lock().unwrap().take().expect("submitted twice")?;
            let flag = DropFlag(self.dropped.clone());
            let tail: BoxStream<'static, Result<Increment, UpstreamError>> = if self.pending_forever {
                stream::pending().boxed()
            } else {
                stream::empty().boxed()
            };
            Ok(stream::iter(items)
                .chain(tail)
                .map(move |item| {
                    let _keep = &flag;
                    item
                })
                .boxed())
        }

        fn model(&self) -> &str {
            "scripted"
        }
    }

    fn request(prompt: &str) -> CompletionRequest {
        CompletionRequest {
            system_prompt: "You are a helpful assistant.".into(),
            user_prompt: prompt.into(),
        }
    }

    fn outbox() -> (Outbox, mpsc::Receiver<Message>) {
        Outbox::channel(64, Arc::new(RelayStats::default()))
    }

    fn drain(rx: &mut mpsc::Receiver<Message>) -> Vec<Message> {
        let mut out = Vec::new();
        while let Ok(m) = rx.try_recv() {
            out.push(m);
        }
        out
    }

    #[tokio::test]
    async fn relays_fragments_then_done() {
        let provider = Scripted::new(Ok(vec![
            Ok(Increment::text("Hel")),
            Ok(Increment::default()),
            Ok(Increment::text("lo!")),
        ]));
        let (outbox, mut rx) = outbox();
        let outcome = forward(&provider, request("hi"), &outbox, &CancellationToken::new()).await;

        assert!(matches!(outcome, ForwardOutcome::Completed { fragments: 2 }));
        assert_eq!(
            drain(&mut rx),
            vec![Message::delta("Hel"), Message::delta("lo!"), Message::done()]
        );
        let seen = provider.seen.lock().unwrap();
        assert_eq!(seen[0].system_prompt, "You are a helpful assistant.");
        assert_eq!(seen[0].user_prompt, "hi");
        assert!(provider.dropped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn empty_fragments_are_skipped() {
        let provider = Scripted::new(Ok(vec![Ok(Increment {
            fragments: vec![String::new(), "x".into(), String::new()],
        })]));
        let (outbox, mut rx) = outbox();
        forward(&provider, request("p"), &outbox, &CancellationToken::new()).await;
        assert_eq!(drain(&mut rx), vec![Message::delta("x"), Message::done()]);
    }

    #[tokio::test]
    async fn concatenated_deltas_equal_full_text() {
        let parts = ["The ", "quick ", "brown ", "fox."];
        let provider = Scripted::new(Ok(parts.iter().map(|p| Ok(Increment::text(*p))).collect()));
        let (outbox, mut rx) = outbox();
        forward(&provider, request("p"), &outbox, &CancellationToken::new()).await;
        let text: String = drain(&mut rx)
            .into_iter()
            .filter(|m| m.kind == MessageKind::AiDelta)
            .map(|m| m.payload)
            .collect();
        assert_eq!(text, parts.concat());
    }

    #[tokio::test]
    async fn submission_failure_writes_single_error() {
        let provider = Scripted::new(Err(UpstreamError::Api {
            status: Some(429),
            message: "quota exceeded".into(),
        }));
        let (outbox, mut rx) = outbox();
        let outcome = forward(&provider, request("hi"), &outbox, &CancellationToken::new()).await;

        assert!(matches!(
            outcome,
            ForwardOutcome::Failed(ForwardError::Submission(_))
        ));
        assert_eq!(
            drain(&mut rx),
            vec![Message::error("Stream error: quota exceeded")]
        );
    }

    #[tokio::test]
    async fn mid_stream_failure_writes_delta_then_error_without_done() {
        let provider = Scripted::new(Ok(vec![
            Ok(Increment::text("partial")),
            Err(UpstreamError::Transport("reset by peer".into())),
        ]));
        let (outbox, mut rx) = outbox();
        let outcome = forward(&provider, request("hi"), &outbox, &CancellationToken::new()).await;

        assert!(matches!(outcome, ForwardOutcome::Failed(ForwardError::Stream(_))));
        let msgs = drain(&mut rx);
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0], Message::delta("partial"));
        assert_eq!(msgs[1].kind, MessageKind::Error);
        assert_eq!(msgs[1].payload, "Recv error: connection lost: reset by peer");
        assert!(provider.dropped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn closed_outbox_stops_forwarding_and_releases_stream() {
        let provider = Scripted::new(Ok(vec![
            Ok(Increment::text("a")),
            Ok(Increment::text("b")),
        ]));
        let (outbox, rx) = outbox();
        drop(rx);
        let outcome = forward(&provider, request("hi"), &outbox, &CancellationToken::new()).await;

        assert!(matches!(outcome, ForwardOutcome::ClientGone));
        assert!(provider.dropped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn cancellation_interrupts_a_stalled_stream() {
        let mut provider = Scripted::new(Ok(vec![Ok(Increment::text("a"))]));
        provider.pending_forever = true;
        let (outbox, mut rx) = outbox();
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            trigger.cancel();
        });
        let outcome = forward(&provider, request("hi"), &outbox, &cancel).await;

        assert!(matches!(outcome, ForwardOutcome::Cancelled));
        assert_eq!(drain(&mut rx), vec![Message::delta("a")]);
        assert!(provider.dropped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn busy_rejection_renders_error() {
        let (outbox, mut rx) = outbox();
        let outcome = reject(&outbox, ForwardError::Busy).await;
        assert!(matches!(outcome, ForwardOutcome::Failed(ForwardError::Busy)));
        let msgs = drain(&mut rx);
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].kind, MessageKind::Error);
    }
}
