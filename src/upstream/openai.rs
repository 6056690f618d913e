//! OpenAI-compatible `/chat/completions` streaming client.
//!
//! Works against any server that speaks the OpenAI streaming dialect
//! (`stream: true`, SSE body, `data: [DONE]` terminator).

use std::time::Duration;

use async_trait::async_trait;
use axum::body::Bytes;
use eventsource_stream::{EventStreamError, Eventsource};
use futures::stream::{self, BoxStream, StreamExt};
use serde::Serialize;
use tracing::debug;

use super::sse::{parse_chunk, ApiErrorEnvelope, DONE_MARKER};
use super::{CompletionProvider, CompletionRequest, IncrementStream, UpstreamError};
use crate::config::UpstreamConfig;

/// Streaming chat-completion client for one API endpoint and model.
pub struct OpenAiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    stream: bool,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

impl OpenAiClient {
    /// Build a client from the `[upstream]` config section.
    ///
    /// Only the connect phase has a timeout; a response stream may run as long
    /// as the upstream keeps it open.
    pub fn new(config: &UpstreamConfig, api_key: String) -> Result<Self, UpstreamError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()
            .map_err(UpstreamError::Client)?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            model: config.model.clone(),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

#[async_trait]
impl CompletionProvider for OpenAiClient {
    async fn submit(&self, request: &CompletionRequest) -> Result<IncrementStream, UpstreamError> {
        let body = ChatRequest {
            model: &self.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: &request.system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: &request.user_prompt,
                },
            ],
            stream: true,
        };

        let resp = self
            .http
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(UpstreamError::Request)?;

        let status = resp.status();
        if !status.is_success() {
            let text = match resp.text().await {
                Ok(text) => text,
                Err(e) => {
                    debug!("Upstream error body unreadable ({status}): {e}");
                    String::new()
                }
            };
            return Err(api_error(status.as_u16(), &text));
        }

        debug!("Upstream stream opened ({status})");
        Ok(increments(resp.bytes_stream().boxed()))
    }

    fn model(&self) -> &str {
        &self.model
    }
}

/// Map a non-success response body to an [`UpstreamError::Api`].
fn api_error(status: u16, body: &str) -> UpstreamError {
    let message = match serde_json::from_str::<ApiErrorEnvelope>(body) {
        Ok(env) if !env.error.message.is_empty() => env.error.message,
        _ if body.trim().is_empty() => format!("upstream returned HTTP {status}"),
        _ => body.trim().to_string(),
    };
    UpstreamError::Api {
        status: Some(status),
        message,
    }
}

/// Adapt an SSE response body into an [`IncrementStream`].
///
/// The stream ends after `[DONE]`, after the body ends, or right after the
/// first error item.
fn increments(body: BoxStream<'static, reqwest::Result<Bytes>>) -> IncrementStream {
    let events = Box::pin(body.eventsource());
    stream::unfold((events, false), |(mut events, finished)| async move {
        if finished {
            return None;
        }
        loop {
            let item = match events.next().await {
                // EOF without [DONE] counts as a normal end.
                None => return None,
                Some(Ok(event)) if event.data == DONE_MARKER => return None,
                Some(Ok(event)) if event.data.is_empty() => continue,
                Some(Ok(event)) => parse_chunk(&event.data),
                Some(Err(EventStreamError::Transport(e))) => {
                    Err(UpstreamError::Transport(e.to_string()))
                }
                Some(Err(e)) => Err(UpstreamError::Decode(e.to_string())),
            };
            let failed = item.is_err();
            return Some((item, (events, failed)));
        }
    })
    .boxed()
}
