#![deny(clippy::all)]
#![warn(clippy::pedantic)]

//! `chatrelay` binary.
//!
//! ## Subcommands
//!
//! - `chatrelay serve` (default) — run the HTTP/WS server
//! - `chatrelay check-config` — load and validate configuration, then exit

use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tracing::{error, info};

use chatrelay::{AppState, Config, OpenAiClient};

/// WebSocket relay for streaming chat completions.
#[derive(Parser)]
#[command(name = "chatrelay", version)]
struct Cli {
    /// Path to TOML config file.
    #[arg(long, global = true)]
    config: Option<String>,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP/WS server (default when no subcommand given).
    Serve,
    /// Validate configuration and print the effective settings.
    CheckConfig,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match Config::load(cli.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("chatrelay: {e}");
            return ExitCode::FAILURE;
        }
    };

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::CheckConfig => {
            print_config(&config);
            ExitCode::SUCCESS
        }
        Commands::Serve => run_server(config).await,
    }
}

fn print_config(config: &Config) {
    println!("listen         = {}", config.server.listen);
    println!("ws_path        = {}", config.server.ws_path);
    println!("static_dir     = {}", config.server.static_dir);
    println!(
        "max_forwarders = {}",
        config.server.max_forwarders_per_session
    );
    println!("base_url       = {}", config.upstream.base_url);
    println!("model          = {}", config.upstream.model);
    println!("system_prompt  = {:?}", config.upstream.system_prompt);
    println!("log level      = {}", config.logging.level);
}

async fn run_server(config: Config) -> ExitCode {
    // Initialize tracing
    let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| config.logging.level.clone());
    tracing_subscriber::fmt().with_env_filter(log_filter).init();

    info!("chatrelay v{} starting", env!("CARGO_PKG_VERSION"));

    let api_key = match config.api_key() {
        Ok(key) => key.to_string(),
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };
    let provider = match OpenAiClient::new(&config.upstream, api_key) {
        Ok(p) => p,
        Err(e) => {
            error!("Failed to create upstream client: {e}");
            return ExitCode::FAILURE;
        }
    };
    info!(
        "Upstream: {} (model {})",
        config.upstream.base_url, config.upstream.model
    );

    let state = AppState::new(config, Arc::new(provider));
    let app = chatrelay::router(state.clone());

    let listener = match TcpListener::bind(&state.config.server.listen).await {
        Ok(l) => l,
        Err(e) => {
            error!("Failed to bind {}: {e}", state.config.server.listen);
            return ExitCode::FAILURE;
        }
    };
    info!(
        "Server running at {} (ws: {})",
        state.config.server.listen, state.config.server.ws_path
    );
    if let Some(dir) = state.config.server.static_root() {
        info!("Serving static files from {}", dir.display());
    }

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!("Server error: {e}");
        return ExitCode::FAILURE;
    }

    info!("Goodbye");
    ExitCode::SUCCESS
}

/// Resolves on SIGINT, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for SIGINT: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    () = ctrl_c => info!("Received SIGINT"),
                    _ = sigterm.recv() => info!("Received SIGTERM"),
                }
            }
            Err(e) => {
                error!("Failed to register SIGTERM: {e}");
                ctrl_c.await;
                info!("Received SIGINT");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await;
        info!("Received SIGINT");
    }
}
