//! HTTP route handlers.
//!
//! The WebSocket endpoint lives in [`crate::ws`]; static assets are served by
//! the router's fallback (see [`crate::router`]).

pub mod health;
