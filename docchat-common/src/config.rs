//! Configuration management for docchat services.
//!
//! Configuration lives in a single JSON file at `~/.docchat/config.json`.
//!
//! # Configuration Priority
//!
//! 1. Environment variables
//! 2. Explicit config file values
//! 3. Default values
//!
//! # Environment Variable Mapping
//!
//! - `DOCCHAT_HOST` → server.host
//! - `DOCCHAT_PORT` → server.port
//! - `GOOGLE_CLIENT_ID` → auth.client_id
//! - `DOCCHAT_DB_PATH` → history.db_path
//! - `DOCCHAT_FLUSH_INTERVAL_SECS` → history.flush_interval_secs
//! - `DOCCHAT_LOG_LEVEL` → observability.log_level
//! - `DOCCHAT_LOG_FORMAT` → observability.log_format

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Get the configuration directory path.
pub fn config_dir() -> PathBuf {
    directories::UserDirs::new().map_or_else(
        || PathBuf::from(".docchat"),
        |dirs| dirs.home_dir().join(".docchat"),
    )
}

/// Get the configuration file path.
pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

// ============================================================================
// Root
// ============================================================================

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default)]
    pub history: HistoryConfig,

    #[serde(default)]
    pub assembler: AssemblerConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Load configuration from the default path.
    ///
    /// A missing file is not an error; defaults are used instead.
    pub fn load() -> Result<Self> {
        let path = config_path();
        if !path.exists() {
            tracing::info!("Config file not found, using defaults");
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))
    }

    /// Load configuration with environment variable overrides applied.
    pub fn load_with_env() -> Result<Self> {
        let mut config = Self::load()?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary lookup (environment in production, a map in tests).
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("DOCCHAT_HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("DOCCHAT_PORT").and_then(|p| p.parse().ok()) {
            self.server.port = port;
        }
        if let Some(client_id) = lookup("GOOGLE_CLIENT_ID") {
            self.auth.client_id = client_id;
        }
        if let Some(db_path) = lookup("DOCCHAT_DB_PATH") {
            self.history.db_path = Some(PathBuf::from(db_path));
        }
        if let Some(secs) = lookup("DOCCHAT_FLUSH_INTERVAL_SECS").and_then(|s| s.parse().ok()) {
            self.history.flush_interval_secs = secs;
        }
        if let Some(level) = lookup("DOCCHAT_LOG_LEVEL") {
            self.observability.log_level = level;
        }
        if let Some(format) = lookup("DOCCHAT_LOG_FORMAT") {
            self.observability.log_format = format;
        }
    }
}

// ============================================================================
// Server
// ============================================================================

/// HTTP listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (default: 127.0.0.1)
    #[serde(default = "default_host")]
    pub host: String,

    /// Listen port (default: 10004)
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".into()
}

fn default_port() -> u16 {
    10004
}

// ============================================================================
// Auth
// ============================================================================

/// Identity provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Registered OAuth client identifier; tokens must carry it as audience.
    #[serde(default)]
    pub client_id: String,

    /// Access-token introspection endpoint.
    #[serde(default = "default_tokeninfo_url")]
    pub tokeninfo_url: String,

    /// Published signing keys for identity tokens (JWKS).
    #[serde(default = "default_jwks_url")]
    pub jwks_url: String,

    /// Accepted `iss` values for identity tokens.
    #[serde(default = "default_issuers")]
    pub issuers: Vec<String>,

    /// Timeout for each provider call.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// How long fetched signing keys are reused before refetching.
    #[serde(default = "default_jwks_cache_ttl")]
    pub jwks_cache_ttl_secs: u64,

    /// Minimum age of the cached keys before an unknown key id may trigger a refetch.
    #[serde(default = "default_jwks_refetch_cooldown")]
    pub jwks_refetch_cooldown_secs: u64,
}

impl AuthConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn jwks_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.jwks_cache_ttl_secs)
    }

    pub fn jwks_refetch_cooldown(&self) -> Duration {
        Duration::from_secs(self.jwks_refetch_cooldown_secs)
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            tokeninfo_url: default_tokeninfo_url(),
            jwks_url: default_jwks_url(),
            issuers: default_issuers(),
            request_timeout_secs: default_request_timeout(),
            jwks_cache_ttl_secs: default_jwks_cache_ttl(),
            jwks_refetch_cooldown_secs: default_jwks_refetch_cooldown(),
        }
    }
}

fn default_tokeninfo_url() -> String {
    "https://oauth2.googleapis.com/tokeninfo".into()
}

fn default_jwks_url() -> String {
    "https://www.googleapis.com/oauth2/v3/certs".into()
}

fn default_issuers() -> Vec<String> {
    vec![
        "accounts.google.com".into(),
        "https://accounts.google.com".into(),
    ]
}

fn default_request_timeout() -> u64 {
    10
}

fn default_jwks_cache_ttl() -> u64 {
    3600
}

fn default_jwks_refetch_cooldown() -> u64 {
    60
}

// ============================================================================
// History
// ============================================================================

/// Which durable store backs conversation history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryBackend {
    #[default]
    Sqlite,
    /// In-process store; history does not survive a restart.
    Memory,
}

/// Conversation history and write-back cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    #[serde(default)]
    pub backend: HistoryBackend,

    /// SQLite database path (default: `~/.docchat/history.db`)
    #[serde(default)]
    pub db_path: Option<PathBuf>,

    /// Interval between background flushes of dirty conversations.
    #[serde(default = "default_flush_interval")]
    pub flush_interval_secs: u64,

    /// Cap on resident conversations. `None` keeps every conversation resident.
    #[serde(default)]
    pub max_resident_sessions: Option<usize>,
}

impl HistoryConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs)
    }

    /// Resolved database path.
    pub fn db_path(&self) -> PathBuf {
        self.db_path
            .clone()
            .unwrap_or_else(|| config_dir().join("history.db"))
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            backend: HistoryBackend::default(),
            db_path: None,
            flush_interval_secs: default_flush_interval(),
            max_resident_sessions: None,
        }
    }
}

fn default_flush_interval() -> u64 {
    30
}

// ============================================================================
// Assembler
// ============================================================================

/// Context window assembly configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssemblerConfig {
    /// Model whose tokenizer measures history (default: gpt-4)
    #[serde(default = "default_model")]
    pub model: String,

    /// Token budget for prior conversation (default: 2000)
    #[serde(default = "default_max_context_tokens")]
    pub max_context_tokens: usize,
}

impl Default for AssemblerConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            max_context_tokens: default_max_context_tokens(),
        }
    }
}

fn default_model() -> String {
    "gpt-4".into()
}

fn default_max_context_tokens() -> usize {
    2000
}

// ============================================================================
// Observability
// ============================================================================

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level", alias = "level")]
    pub log_level: String,

    /// Log format (json, pretty)
    #[serde(default = "default_log_format", alias = "format")]
    pub log_format: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "pretty".into()
}
