//! Upstream failure taxonomy.

use thiserror::Error;

/// Why an upstream submission or stream failed.
///
/// `Display` is what ends up in the client-visible `error` payload, after the
/// forwarder's prefix.
#[derive(Debug, Error)]
pub enum UpstreamError {
    /// The HTTP client could not be built.
    #[error("HTTP client setup failed: {0}")]
    Client(#[source] reqwest::Error),

    /// The request never got a response.
    #[error("request failed: {0}")]
    Request(#[source] reqwest::Error),

    /// The API answered with an error, either as a non-success status or as an
    /// in-band error object inside the stream.
    #[error("{message}")]
    Api { status: Option<u16>, message: String },

    /// Reading the response body failed mid-stream.
    #[error("connection lost: {0}")]
    Transport(String),

    /// A stream chunk could not be parsed.
    #[error("malformed stream chunk: {0}")]
    Decode(String),
}

impl UpstreamError {
    /// HTTP status for API errors that came with one.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => *status,
            Self::Request(e) | Self::Client(e) => e.status().map(|s| s.as_u16()),
            Self::Transport(_) | Self::Decode(_) => None,
        }
    }
}
