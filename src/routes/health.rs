//! Unauthenticated health-check endpoint.

use std::sync::atomic::Ordering;

use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::AppState;

/// `GET /api/health` — liveness probe.
///
/// Returns status, uptime, version, upstream model and relay counters.
pub async fn health(State(state): State<AppState>) -> Json<Value> {
    let uptime = state.start_time.elapsed().as_secs();
    let s = &state.stats;

    Json(json!({
        "status": "ok",
        "uptime_secs": uptime,
        "version": env!("CARGO_PKG_VERSION"),
        "model": state.provider.model(),
        "sessions": {
            "active": s.sessions_active.load(Ordering::Relaxed),
            "total": s.sessions_total.load(Ordering::Relaxed),
        },
        "forwarders": {
            "active": s.forwarders_active.load(Ordering::Relaxed),
            "total": s.forwarders_total.load(Ordering::Relaxed),
        },
        "messages": {
            "deltas": s.deltas_sent.load(Ordering::Relaxed),
            "done": s.done_sent.load(Ordering::Relaxed),
            "errors": s.errors_sent.load(Ordering::Relaxed),
        },
    }))
}
