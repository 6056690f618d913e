//! Shared application state passed to every handler via Axum's `State` extractor.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::config::Config;
use crate::relay::SessionSettings;
use crate::upstream::CompletionProvider;

/// Shared application state for the relay server.
#[derive(Clone)]
pub struct AppState {
    /// Immutable configuration loaded at startup.
    pub config: Arc<Config>,
    /// Upstream completion capability shared by every session.
    pub provider: Arc<dyn CompletionProvider>,
    /// Relay counters reported by `/api/health`.
    pub stats: Arc<RelayStats>,
    /// Monotonic instant when the server started (for uptime calculation).
    pub start_time: Instant,
}

impl AppState {
    pub fn new(config: Config, provider: Arc<dyn CompletionProvider>) -> Self {
        Self {
            config: Arc::new(config),
            provider,
            stats: Arc::new(RelayStats::default()),
            start_time: Instant::now(),
        }
    }

    /// Per-session settings derived from the `[server]` and `[upstream]` sections.
    #[must_use]
    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            system_prompt: self.config.upstream.system_prompt.clone(),
            max_forwarders: self.config.server.max_forwarders_per_session,
            shutdown_grace: self.config.server.shutdown_grace(),
        }
    }
}

/// Which gauge an [`ActiveGuard`] holds.
#[derive(Clone, Copy, Debug)]
pub enum Gauge {
    Sessions,
    Forwarders,
}

/// Relay counters. Lock-free; read with `Relaxed` ordering for reporting only.
#[derive(Debug, Default)]
pub struct RelayStats {
    pub sessions_active: AtomicU64,
    pub sessions_total: AtomicU64,
    pub forwarders_active: AtomicU64,
    pub forwarders_total: AtomicU64,
    pub deltas_sent: AtomicU64,
    pub done_sent: AtomicU64,
    pub errors_sent: AtomicU64,
}

impl RelayStats {
    /// Bump the active and total counters for `gauge`. The active count drops
    /// again when the returned guard is dropped, including when its task is
    /// aborted.
    #[must_use]
    pub fn enter(self: &Arc<Self>, gauge: Gauge) -> ActiveGuard {
        let (active, total) = self.counters(gauge);
        active.fetch_add(1, Ordering::Relaxed);
        total.fetch_add(1, Ordering::Relaxed);
        ActiveGuard {
            stats: Arc::clone(self),
            gauge,
        }
    }

    fn counters(&self, gauge: Gauge) -> (&AtomicU64, &AtomicU64) {
        match gauge {
            Gauge::Sessions => (&self.sessions_active, &self.sessions_total),
            Gauge::Forwarders => (&self.forwarders_active, &self.forwarders_total),
        }
    }
}

/// Decrements an active gauge on drop.
#[derive(Debug)]
pub struct ActiveGuard {
    stats: Arc<RelayStats>,
    gauge: Gauge,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        let (active, _) = self.stats.counters(self.gauge);
        active.fetch_sub(1, Ordering::Relaxed);
    }
}
