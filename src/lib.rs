#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]

//! # chatrelay
//!
//! Streams chat completions from an OpenAI-compatible API to browser clients
//! over a persistent WebSocket.
//!
//! ## API surface
//!
//! | Method | Path          | Description                                 |
//! |--------|---------------|---------------------------------------------|
//! | GET    | `/api/health` | Liveness probe and relay counters           |
//! | GET    | `/ws`         | WebSocket relay (path set by `ws_path`)     |
//! | GET    | `/*`          | Static assets from `static_dir`, if enabled |
//!
//! ## Architecture
//!
//! ```text
//! main.rs          — entry point, clap subcommands, graceful shutdown
//! config.rs        — TOML + env-var configuration
//! state.rs         — AppState, relay counters
//! protocol.rs      — {"type", "payload"} wire messages
//! routes/
//!   health.rs      — GET /api/health
//! ws/
//!   mod.rs         — WebSocket upgrade, socket split, writer task
//! relay/
//!   session.rs     — per-connection read loop, forwarder JoinSet
//!   forwarder.rs   — one upstream stream → ai_delta / ai_done / error
//!   outbox.rs      — single-writer channel to the socket
//! upstream/
//!   mod.rs         — CompletionProvider trait, Increment stream
//!   openai.rs      — /chat/completions streaming client
//!   sse.rs         — chat-completion chunk decoding
//! ```

pub mod config;
pub mod protocol;
pub mod relay;
pub mod routes;
pub mod state;
pub mod upstream;
pub mod ws;

use axum::{routing::get, Router};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

pub use config::Config;
pub use protocol::{Message, MessageKind};
pub use state::AppState;
pub use upstream::{CompletionProvider, OpenAiClient};

/// Build the full HTTP router for `state`.
pub fn router(state: AppState) -> Router {
    let mut app = Router::new()
        .route("/api/health", get(routes::health::health))
        .route(&state.config.server.ws_path, get(ws::ws_upgrade));

    if let Some(dir) = state.config.server.static_root() {
        app = app.fallback_service(ServeDir::new(dir));
    }

    app.layer(TraceLayer::new_for_http()).with_state(state)
}
