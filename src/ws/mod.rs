//! WebSocket Connection Listener.
//!
//! ## Connection lifecycle
//!
//! 1. Client connects to `GET <ws_path>` (default `/ws`). Requests that are not
//!    valid upgrades are logged and rejected; nothing is retried.
//! 2. The socket is split. The sink goes to a writer task fed by an
//!    [`Outbox`]; the stream goes to a fresh [`RelaySession`].
//! 3. When the session ends, its forwarders are already stopped. The writer
//!    drains what is queued and closes the socket.
//!
//! Connections share nothing mutable except the relay counters.

use axum::{
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, WebSocket},
        State, WebSocketUpgrade,
    },
    response::{IntoResponse, Response},
};
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::relay::{write_loop, Outbox, RelaySession};
use crate::AppState;

/// `GET /ws` — WebSocket upgrade handler.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => {
            warn!("Upgrade error: {rejection}");
            return rejection.into_response();
        }
    };

    ws.on_failed_upgrade(|e: axum::Error| warn!("Upgrade error: {e}"))
        .on_upgrade(move |socket| handle_ws(socket, state))
}

/// Run one relay session over an upgraded socket.
async fn handle_ws(socket: WebSocket, state: AppState) {
    let session_id = Uuid::new_v4().to_string();
    let (ws_sink, ws_stream) = socket.split();

    let cancel = CancellationToken::new();
    let (outbox, rx) = Outbox::channel(state.config.server.outbox_capacity, state.stats.clone());

    // Task: sole writer for this socket
    let mut send_task = tokio::spawn(write_loop(ws_sink, rx, cancel.clone()));

    let session = RelaySession::new(
        session_id.clone(),
        state.provider.clone(),
        state.session_settings(),
        state.stats.clone(),
    );
    let end = session.run(ws_stream, outbox, cancel).await;

    // Every outbox is dropped now; give the writer a moment to flush.
    let grace = state.config.server.shutdown_grace();
    if tokio::time::timeout(grace, &mut send_task).await.is_err() {
        warn!("Session {session_id}: writer did not drain in {grace:?}, dropping connection");
        send_task.abort();
    }

    info!("Session {session_id}: closed ({end})");
}
