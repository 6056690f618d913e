//! Upstream streaming completion capability.
//!
//! The relay only needs one thing from an LLM backend: submit a prompt and get
//! back a lazy sequence of text increments. [`CompletionProvider`] is that
//! seam; [`openai::OpenAiClient`] is the production implementation.
//!
//! An [`IncrementStream`] ends (`None`) on the upstream's end-of-stream marker.
//! An `Err` item is a mid-stream failure and is always the last item.
//! Dropping the stream releases the underlying HTTP connection.

pub mod error;
pub mod openai;
pub mod sse;

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

pub use error::UpstreamError;
pub use openai::OpenAiClient;

/// One prompt to complete. Streaming is implied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionRequest {
    pub system_prompt: String,
    pub user_prompt: String,
}

/// One unit pulled from the upstream stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Increment {
    /// Newly generated text, possibly none (role-only or finish chunks).
    pub fragments: Vec<String>,
}

impl Increment {
    #[must_use]
    pub fn text(fragment: impl Into<String>) -> Self {
        Self {
            fragments: vec![fragment.into()],
        }
    }
}

/// Lazy, finite, non-restartable sequence of increments.
pub type IncrementStream = Pin<Box<dyn Stream<Item = Result<Increment, UpstreamError>> + Send>>;

/// Anything that can stream a chat completion.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Submit `request` and return the response stream.
    ///
    /// An `Err` here means the stream never started.
    async fn submit(&self, request: &CompletionRequest) -> Result<IncrementStream, UpstreamError>;

    /// Model name reported by `/api/health`.
    fn model(&self) -> &str;
}
