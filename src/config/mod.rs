//! Configuration loading.
//!
//! Loads from `./whatsapp-mcp.toml` (or `$WHATSAPP_MCP_CONFIG`).
//! Precedence: env vars > config file > defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{info, warn};

use crate::tools::adapter::DEFAULT_MAX_UPLOAD_BYTES;
use crate::whatsapp::client::{BridgeTimeouts, DEFAULT_BASE_URL, DEFAULT_USER_ID};

/// Env var naming the config file.
pub const CONFIG_PATH_ENV: &str = "WHATSAPP_MCP_CONFIG";

/// Config file used when [`CONFIG_PATH_ENV`] is unset.
pub const DEFAULT_CONFIG_FILE: &str = "whatsapp-mcp.toml";

// ── Top-level config ────────────────────────────────────────────

/// Where a loaded configuration came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    /// Read from this file.
    File(PathBuf),
    /// No file at the default location; built-in defaults.
    Defaults,
}

/// Outcome of [`Config::load`].
///
/// Loading happens before any subscriber is installed, so what would be
/// logged is kept here and reported by [`LoadedConfig::log_summary`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedConfig {
    /// The effective configuration.
    pub config: Config,
    /// Where the file layer came from.
    pub source: ConfigSource,
    /// Env vars whose values could not be parsed and were ignored.
    pub ignored_overrides: Vec<String>,
}

impl LoadedConfig {
    /// Log where the configuration came from and any ignored overrides.
    pub fn log_summary(&self) {
        match &self.source {
            ConfigSource::File(path) => info!(path = %path.display(), "loaded config from file"),
            ConfigSource::Defaults => info!("no config file found, using defaults"),
        }
        for var in &self.ignored_overrides {
            warn!(var = %var, "ignoring invalid env override");
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// WhatsApp bridge connection (`[bridge]`).
    pub bridge: BridgeConfig,
    /// Timeout and retry policy (`[dispatch]`).
    pub dispatch: DispatchConfig,
    /// Media uploads, downloads and transcoding (`[media]`).
    pub media: MediaConfig,
    /// Log output (`[logging]`).
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration with precedence: env vars > TOML file > defaults.
    ///
    /// `explicit_path` (from the command line) wins over the env var. A
    /// missing file at the default location yields defaults; a missing file
    /// that was asked for explicitly is an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(explicit_path: Option<&Path>) -> Result<LoadedConfig> {
        let env = |key: &str| std::env::var(key).ok();
        let (path, required) = match explicit_path {
            Some(p) => (p.to_path_buf(), true),
            None => Self::config_path_with(env),
        };
        let (mut config, source) = Self::load_from_file(&path, required)?;
        let ignored_overrides = config.apply_overrides(env);
        Ok(LoadedConfig {
            config,
            source,
            ignored_overrides,
        })
    }

    fn load_from_file(path: &Path, required: bool) -> Result<(Self, ConfigSource)> {
        match std::fs::read_to_string(path) {
            Ok(contents) => {
                let config = Self::from_toml(&contents)
                    .with_context(|| format!("invalid config file {}", path.display()))?;
                Ok((config, ConfigSource::File(path.to_path_buf())))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && !required => {
                Ok((Self::default(), ConfigSource::Defaults))
            }
            Err(e) => Err(anyhow::anyhow!(
                "failed to read config file {}: {e}",
                path.display()
            )),
        }
    }

    /// Resolve the config file path with a custom env resolver.
    ///
    /// The flag is `true` when the path came from the environment and must
    /// therefore exist.
    pub fn config_path_with(env: impl Fn(&str) -> Option<String>) -> (PathBuf, bool) {
        match env(CONFIG_PATH_ENV) {
            Some(p) => (PathBuf::from(p), true),
            None => (PathBuf::from(DEFAULT_CONFIG_FILE), false),
        }
    }

    /// Apply environment variable overrides and return the names of those
    /// whose values were invalid and ignored.
    ///
    /// Takes a resolver function so tests need not touch the process env.
    pub fn apply_overrides(&mut self, env: impl Fn(&str) -> Option<String>) -> Vec<String> {
        let mut ignored = Vec::new();

        // Bridge.
        if let Some(v) = env("WHATSAPP_API_BASE_URL") {
            self.bridge.base_url = v;
        }
        if let Some(v) = env("WHATSAPP_USER_ID") {
            self.bridge.user_id = v;
        }

        // Dispatch.
        if let Some(v) = env("WHATSAPP_MCP_CALL_TIMEOUT_SECS") {
            match v.parse() {
                Ok(n) => self.dispatch.call_timeout_secs = n,
                Err(_) => ignored.push("WHATSAPP_MCP_CALL_TIMEOUT_SECS".to_owned()),
            }
        }

        // Media.
        if let Some(v) = env("WHATSAPP_MCP_DOWNLOAD_DIR") {
            self.media.download_dir = PathBuf::from(v);
        }
        if let Some(v) = env("WHATSAPP_MCP_FFMPEG") {
            self.media.ffmpeg_path = v;
        }

        // Logging.
        if let Some(v) = env("WHATSAPP_MCP_LOG_DIR") {
            self.logging.log_dir = Some(PathBuf::from(v));
        }
        ignored
    }

    /// Parse a TOML string into config.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is malformed or a section has unknown
    /// fields.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: Config = toml::from_str(toml_str).context("failed to parse config TOML")?;
        Ok(config)
    }
}

// ── Bridge ──────────────────────────────────────────────────────

/// Where the WhatsApp bridge listens.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BridgeConfig {
    /// Base URL of the bridge REST API.
    pub base_url: String,
    /// Account the bridge should act as.
    pub user_id: String,
    /// TCP connect timeout.
    pub connect_timeout_secs: u64,
    /// Whole-request timeout.
    pub request_timeout_secs: u64,
}

impl BridgeConfig {
    /// HTTP timeouts for the bridge client.
    pub fn timeouts(&self) -> BridgeTimeouts {
        BridgeTimeouts {
            connect: Duration::from_secs(self.connect_timeout_secs),
            request: Duration::from_secs(self.request_timeout_secs),
        }
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            user_id: DEFAULT_USER_ID.to_string(),
            connect_timeout_secs: 5,
            request_timeout_secs: 30,
        }
    }
}

// ── Dispatch ────────────────────────────────────────────────────

/// Per-call timeout and read retry.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DispatchConfig {
    /// Budget for each attempt at a client call.
    pub call_timeout_secs: u64,
    /// Pause before retrying a read after a transport error.
    pub read_retry_backoff_ms: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            call_timeout_secs: 45,
            read_retry_backoff_ms: 250,
        }
    }
}

// ── Media ───────────────────────────────────────────────────────

/// Media handling.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MediaConfig {
    /// Directory receiving downloaded attachments.
    pub download_dir: PathBuf,
    /// Largest file the send tools will upload.
    pub max_upload_bytes: u64,
    /// ffmpeg binary. Empty disables voice note conversion.
    pub ffmpeg_path: String,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            download_dir: default_download_dir(),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            ffmpeg_path: "ffmpeg".to_string(),
        }
    }
}

/// `<data dir>/downloads` for this application, or `./downloads` when the
/// platform has no home directory.
pub fn default_download_dir() -> PathBuf {
    directories::ProjectDirs::from("", "", "whatsapp-mcp")
        .map(|dirs| dirs.data_dir().join("downloads"))
        .unwrap_or_else(|| PathBuf::from("downloads"))
}

// ── Logging ─────────────────────────────────────────────────────

/// Log output.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset.
    pub level: String,
    /// Directory for JSON log files. Console only when unset.
    pub log_dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_dir: None,
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────
