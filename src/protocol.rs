//! Wire messages exchanged with the browser over the WebSocket.
//!
//! Every frame in either direction is a JSON object with exactly two
//! meaningful fields:
//!
//! ```json
//! { "type": "user_message" | "ai_delta" | "ai_done" | "error", "payload": "<text>" }
//! ```
//!
//! | Type           | Direction        | Payload                          |
//! |----------------|------------------|----------------------------------|
//! | `user_message` | client → server  | prompt text                      |
//! | `ai_delta`     | server → client  | one non-empty generated fragment |
//! | `ai_done`      | server → client  | empty                            |
//! | `error`        | server → client  | human-readable diagnostic        |
//!
//! Unknown `type` values decode to [`MessageKind::Unknown`] and are ignored by
//! the session rather than rejected.

use axum::extract::ws;
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

/// The `type` tag of a [`Message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    UserMessage,
    AiDelta,
    AiDone,
    Error,
    /// Any tag this server does not understand, including a missing one.
    #[default]
    #[serde(other)]
    Unknown,
}

impl MessageKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::UserMessage => "user_message",
            Self::AiDelta => "ai_delta",
            Self::AiDone => "ai_done",
            Self::Error => "error",
            Self::Unknown => "unknown",
        }
    }
}

/// One frame of the relay protocol.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "type", default)]
    pub kind: MessageKind,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub payload: String,
}

impl Message {
    #[cfg(test)]
    pub fn user(prompt: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::UserMessage,
            payload: prompt.into(),
        }
    }

    #[must_use]
    pub fn delta(fragment: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::AiDelta,
            payload: fragment.into(),
        }
    }

    #[must_use]
    pub fn done() -> Self {
        Self {
            kind: MessageKind::AiDone,
            payload: String::new(),
        }
    }

    #[must_use]
    pub fn error(text: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::Error,
            payload: text.into(),
        }
    }

    /// Serialize to the JSON text sent in a WebSocket text frame.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

/// What a single inbound WebSocket frame amounts to.
#[derive(Debug, PartialEq, Eq)]
pub enum Inbound {
    /// A decoded protocol message (of any kind, including unknown).
    Message(Message),
    /// Ping/pong, handled by the transport.
    Control,
    /// The peer sent a close frame.
    Close,
}

/// An inbound data frame that is not a valid protocol message.
#[derive(Debug, Error)]
#[error("invalid message: {0}")]
pub struct DecodeError(#[from] serde_json::Error);

/// Classify and decode one inbound frame.
///
/// Text and binary frames are both parsed as JSON. A bare `null` decodes as an
/// empty message of unknown kind.
pub fn decode_frame(frame: ws::Message) -> Result<Inbound, DecodeError> {
    match frame {
        ws::Message::Text(text) => parse_message(text.as_str().as_bytes()),
        ws::Message::Binary(bytes) => parse_message(&bytes),
        ws::Message::Ping(_) | ws::Message::Pong(_) => Ok(Inbound::Control),
        ws::Message::Close(_) => Ok(Inbound::Close),
    }
}

fn parse_message(json: &[u8]) -> Result<Inbound, DecodeError> {
    let msg: Option<Message> = serde_json::from_slice(json)?;
    Ok(Inbound::Message(msg.unwrap_or_default()))
}
