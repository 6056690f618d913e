//! Chat-completion stream payloads.
//!
//! Event framing is handled by `eventsource-stream`; this module only turns
//! the `data` of one event into an [`Increment`].

use serde::Deserialize;

use super::{Increment, UpstreamError};

/// Terminator sent as the data of the last event.
pub const DONE_MARKER: &str = "[DONE]";

#[derive(Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    error: Option<ApiErrorBody>,
}

#[derive(Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Delta,
}

#[derive(Deserialize, Default)]
struct Delta {
    content: Option<String>,
}

/// `{"error": {"message": ...}}` as returned by OpenAI-compatible APIs.
#[derive(Deserialize)]
pub(crate) struct ApiErrorBody {
    #[serde(default)]
    pub message: String,
}

#[derive(Deserialize)]
pub(crate) struct ApiErrorEnvelope {
    pub error: ApiErrorBody,
}

/// Turn one event's JSON data into an [`Increment`].
///
/// Only the first choice is relayed.
pub fn parse_chunk(data: &str) -> Result<Increment, UpstreamError> {
    let chunk: StreamChunk =
        serde_json::from_str(data).map_err(|e| UpstreamError::Decode(e.to_string()))?;
    if let Some(err) = chunk.error {
        return Err(UpstreamError::Api {
            status: None,
            message: err.message,
        });
    }
    let fragments = chunk
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta.content)
        .into_iter()
        .collect();
    Ok(Increment { fragments })
}
