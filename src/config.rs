//! Configuration loading and defaults.
//!
//! Configuration is resolved in order of precedence (highest wins):
//!
//! 1. **Environment variables** — `OPENAI_API_KEY`, `OPENAI_BASE_URL`,
//!    `OPENAI_MODEL`, `CHATRELAY_LISTEN`, `CHATRELAY_STATIC_DIR`
//! 2. **Config file** — path via `--config <path>`, or `chatrelay.toml` in CWD
//! 3. **Compiled defaults** — see each field's default value below
//!
//! The TOML file mirrors the struct hierarchy:
//!
//! ```toml
//! [server]
//! listen = "0.0.0.0:8080"
//! ws_path = "/ws"
//! static_dir = "./web"              # "" disables static file serving
//! max_forwarders_per_session = 0    # 0 = unbounded
//! shutdown_grace_ms = 2000
//! outbox_capacity = 256
//!
//! [upstream]
//! base_url = "https://api.openai.com/v1"
//! model = "gpt-3.5-turbo"
//! system_prompt = "You are a helpful assistant."
//! connect_timeout_secs = 10
//!
//! [logging]
//! level = "info"
//! ```
//!
//! The upstream API key is required. It normally comes from `OPENAI_API_KEY`;
//! `upstream.api_key` in the file is accepted as well.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

/// Config file looked up in the working directory when `--config` is absent.
pub const DEFAULT_CONFIG_FILE: &str = "chatrelay.toml";

/// Top-level configuration, deserialized from TOML.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Listener and per-connection settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Socket address to bind (default `0.0.0.0:8080`).
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Path of the WebSocket endpoint (default `/ws`).
    #[serde(default = "default_ws_path")]
    pub ws_path: String,
    /// Directory served for every other path (default `./web`). Empty disables.
    #[serde(default = "default_static_dir")]
    pub static_dir: String,
    /// Cap on concurrently streaming requests per connection (default 0 = no cap).
    #[serde(default)]
    pub max_forwarders_per_session: usize,
    /// How long a closing session waits for its forwarders before aborting them.
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
    /// Outbound messages buffered per connection before writers wait (default 256).
    #[serde(default = "default_outbox_capacity")]
    pub outbox_capacity: usize,
}

/// Upstream completion API settings.
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
    /// API root, without the `/chat/completions` suffix.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Instruction sent as the system message ahead of every prompt.
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Bearer credential. Override with `OPENAI_API_KEY`.
    #[serde(default)]
    pub api_key: Option<String>,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// tracing filter level (default `info`). Overridden by `RUST_LOG` env var.
    #[serde(default = "default_log_level")]
    pub level: String,
}

/// Fatal startup configuration problems.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("OPENAI_API_KEY env var is required")]
    MissingApiKey,
    #[error("server.ws_path must start with '/': {0:?}")]
    InvalidWsPath(String),
}

fn default_listen() -> String {
    "0.0.0.0:8080".to_string()
}
fn default_ws_path() -> String {
    "/ws".to_string()
}
fn default_static_dir() -> String {
    "./web".to_string()
}
fn default_shutdown_grace_ms() -> u64 {
    2000
}
fn default_outbox_capacity() -> usize {
    256
}
fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_model() -> String {
    "gpt-3.5-turbo".to_string()
}
fn default_system_prompt() -> String {
    "You are a helpful assistant.".to_string()
}
fn default_connect_timeout_secs() -> u64 {
    10
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            ws_path: default_ws_path(),
            static_dir: default_static_dir(),
            max_forwarders_per_session: 0,
            shutdown_grace_ms: default_shutdown_grace_ms(),
            outbox_capacity: default_outbox_capacity(),
        }
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            system_prompt: default_system_prompt(),
            connect_timeout_secs: default_connect_timeout_secs(),
            api_key: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl ServerConfig {
    #[must_use]
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    /// Static asset root, if serving is enabled.
    #[must_use]
    pub fn static_root(&self) -> Option<&Path> {
        if self.static_dir.trim().is_empty() {
            None
        } else {
            Some(Path::new(&self.static_dir))
        }
    }
}

impl Config {
    /// Load configuration with the precedence chain: env vars > file > defaults.
    ///
    /// If `path` is `Some`, reads that file. Otherwise looks for
    /// `chatrelay.toml` in the current directory, falling back to compiled
    /// defaults. Fails if no API key ends up configured.
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) => Self::from_file(Path::new(p))?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => Config::default(),
        };
        config.apply_env(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML config file without applying env overrides.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply env var overrides using `lookup` to read variables.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(key) = lookup("OPENAI_API_KEY") {
            self.upstream.api_key = Some(key);
        }
        if let Some(url) = lookup("OPENAI_BASE_URL") {
            self.upstream.base_url = url;
        }
        if let Some(model) = lookup("OPENAI_MODEL") {
            self.upstream.model = model;
        }
        if let Some(listen) = lookup("CHATRELAY_LISTEN") {
            self.server.listen = listen;
        }
        if let Some(dir) = lookup("CHATRELAY_STATIC_DIR") {
            self.server.static_dir = dir;
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !self.server.ws_path.starts_with('/') {
            return Err(ConfigError::InvalidWsPath(self.server.ws_path.clone()));
        }
        self.api_key().map(|_| ())
    }

    /// The upstream API key; empty counts as missing.
    pub fn api_key(&self) -> Result<&str, ConfigError> {
        match self.upstream.api_key.as_deref() {
            Some(key) if !key.trim().is_empty() => Ok(key),
            _ => Err(ConfigError::MissingApiKey),
        }
    }
}
