//! The per-connection streaming relay.
//!
//! - [`session`] — Relay Session: read loop and forwarder tracking
//! - [`forwarder`] — Stream Forwarder: one upstream completion → `ai_*` messages
//! - [`outbox`] — serialized write path shared by a session's forwarders

pub mod forwarder;
pub mod outbox;
pub mod session;

pub use forwarder::{forward, ForwardError, ForwardOutcome};
pub use outbox::{write_loop, Outbox, OutboxClosed};
pub use session::{RelaySession, SessionEnd, SessionSettings};
