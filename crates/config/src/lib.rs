//! Configuration loading, validation, and management for Mnemo.
//!
//! Loads configuration from `~/.mnemo/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.mnemo/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Application name sessions are stored under
    #[serde(default = "default_app_name")]
    pub app_name: String,

    /// API key (can be overridden per-provider)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Default LLM provider
    #[serde(default = "default_provider")]
    pub default_provider: String,

    /// Model used by the agent runtime for replies
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Default temperature
    #[serde(default = "default_temperature")]
    pub default_temperature: f32,

    /// Default max tokens per LLM response
    #[serde(default = "default_max_tokens")]
    pub default_max_tokens: u32,

    /// Summarization and context budgeting
    #[serde(default)]
    pub memory: MemoryConfig,

    /// Session retention and background reclamation
    #[serde(default)]
    pub retention: RetentionConfig,

    /// Session store backend
    #[serde(default)]
    pub store: StoreConfig,

    /// Gateway configuration
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Provider-specific configurations
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
}

fn default_app_name() -> String {
    "mnemo".into()
}
fn default_provider() -> String {
    "openrouter".into()
}
fn default_model() -> String {
    "google/gemini-2.0-flash-001".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    4096
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("app_name", &self.app_name)
            .field("api_key", &redact(&self.api_key))
            .field("default_provider", &self.default_provider)
            .field("default_model", &self.default_model)
            .field("default_temperature", &self.default_temperature)
            .field("default_max_tokens", &self.default_max_tokens)
            .field("memory", &self.memory)
            .field("retention", &self.retention)
            .field("store", &self.store)
            .field("gateway", &self.gateway)
            .field("providers", &self.providers)
            .finish()
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("default_model", &self.default_model)
            .finish()
    }
}

/// Smallest memory-context ceiling, in characters, that still leaves room
/// for the truncation marker plus some summary text.
pub const MIN_CONTEXT_CHARS: usize = 64;

/// Compaction and context-injection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Compact once both the total and the unsummarized event counts reach this
    #[serde(default = "default_summarization_threshold")]
    pub summarization_threshold: usize,

    /// Newest events always left raw
    #[serde(default = "default_keep_recent_events")]
    pub keep_recent_events: usize,

    /// Characters per estimated token
    #[serde(default = "default_chars_per_token")]
    pub chars_per_token: usize,

    /// Ceiling for the injected memory context, in estimated tokens
    #[serde(default = "default_max_context_tokens")]
    pub max_context_tokens: usize,

    /// Model used for summarization calls (fast + cheap)
    #[serde(default = "default_summarization_model")]
    pub summarization_model: String,

    /// Upper bound on a single summarization call
    #[serde(default = "default_summarization_timeout")]
    pub summarization_timeout_secs: u64,
}

fn default_summarization_threshold() -> usize {
    40
}
fn default_keep_recent_events() -> usize {
    10
}
fn default_chars_per_token() -> usize {
    4
}
fn default_max_context_tokens() -> usize {
    8000
}
fn default_summarization_model() -> String {
    "google/gemini-2.0-flash-001".into()
}
fn default_summarization_timeout() -> u64 {
    30
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            summarization_threshold: default_summarization_threshold(),
            keep_recent_events: default_keep_recent_events(),
            chars_per_token: default_chars_per_token(),
            max_context_tokens: default_max_context_tokens(),
            summarization_model: default_summarization_model(),
            summarization_timeout_secs: default_summarization_timeout(),
        }
    }
}

/// Retention horizon and reaper schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Whether the background reaper runs under `serve`
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Sessions idle for longer than this are finalized and deleted
    #[serde(default = "default_ttl_days")]
    pub ttl_days: u32,

    /// Time between sweeps
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Delay before the first sweep after startup
    #[serde(default = "default_startup_delay")]
    pub startup_delay_secs: u64,

    /// Upper bound on finalize + delete for one session
    #[serde(default = "default_item_timeout")]
    pub item_timeout_secs: u64,
}

fn default_ttl_days() -> u32 {
    90
}
fn default_sweep_interval() -> u64 {
    86_400
}
fn default_startup_delay() -> u64 {
    60
}
fn default_item_timeout() -> u64 {
    120
}
fn default_true() -> bool {
    true
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_days: default_ttl_days(),
            sweep_interval_secs: default_sweep_interval(),
            startup_delay_secs: default_startup_delay(),
            item_timeout_secs: default_item_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// "sqlite" or "in_memory"
    #[serde(default = "default_store_backend")]
    pub backend: String,

    /// SQLite database path (defaults to `~/.mnemo/sessions.sqlite`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

fn default_store_backend() -> String {
    "sqlite".into()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_store_backend(),
            path: None,
        }
    }
}

impl StoreConfig {
    /// The SQLite path to open, falling back to the config directory.
    pub fn resolved_path(&self) -> String {
        self.path.clone().unwrap_or_else(|| {
            AppConfig::config_dir()
                .join("sessions.sqlite")
                .to_string_lossy()
                .into_owned()
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,

    /// Bearer token required for `/v1/admin` routes; unset leaves them open
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_token: Option<String>,
}

fn default_port() -> u16 {
    42618
}
fn default_host() -> String {
    "127.0.0.1".into()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            admin_token: None,
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
}

impl AppConfig {
    /// Load configuration from the default path (~/.mnemo/config.toml).
    ///
    /// Also checks environment variables:
    /// - `MNEMO_API_KEY` (highest priority), `OPENROUTER_API_KEY`, `OPENAI_API_KEY`
    /// - `MNEMO_PROVIDER`, `MNEMO_MODEL`, `MNEMO_STORE_PATH`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;

        // Environment variable overrides (highest priority)
        if config.api_key.is_none() {
            config.api_key = std::env::var("MNEMO_API_KEY")
                .ok()
                .or_else(|| std::env::var("OPENROUTER_API_KEY").ok())
                .or_else(|| std::env::var("OPENAI_API_KEY").ok());
        }

        if let Ok(provider) = std::env::var("MNEMO_PROVIDER") {
            config.default_provider = provider;
        }

        if let Ok(model) = std::env::var("MNEMO_MODEL") {
            config.default_model = model;
        }

        if let Ok(path) = std::env::var("MNEMO_STORE_PATH") {
            config.store.path = Some(path);
        }

        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".mnemo")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_temperature < 0.0 || self.default_temperature > 2.0 {
            return Err(ConfigError::ValidationError(
                "default_temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.memory.summarization_threshold == 0 {
            return Err(ConfigError::ValidationError(
                "memory.summarization_threshold must be > 0".into(),
            ));
        }

        if self.memory.chars_per_token == 0 {
            return Err(ConfigError::ValidationError(
                "memory.chars_per_token must be > 0".into(),
            ));
        }

        if self.memory.max_context_tokens.saturating_mul(self.memory.chars_per_token)
            < MIN_CONTEXT_CHARS
        {
            return Err(ConfigError::ValidationError(format!(
                "memory.max_context_tokens * memory.chars_per_token must be >= {MIN_CONTEXT_CHARS}"
            )));
        }

        if self.memory.summarization_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "memory.summarization_timeout_secs must be > 0".into(),
            ));
        }

        if self.retention.ttl_days == 0 {
            return Err(ConfigError::ValidationError(
                "retention.ttl_days must be > 0".into(),
            ));
        }

        if self.retention.sweep_interval_secs == 0 {
            return Err(ConfigError::ValidationError(
                "retention.sweep_interval_secs must be > 0".into(),
            ));
        }

        if self.retention.item_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "retention.item_timeout_secs must be > 0".into(),
            ));
        }

        match self.store.backend.as_str() {
            "sqlite" | "in_memory" => {}
            other => {
                return Err(ConfigError::ValidationError(format!(
                    "store.backend must be \"sqlite\" or \"in_memory\", got \"{other}\""
                )));
            }
        }

        if self.memory.keep_recent_events >= self.memory.summarization_threshold {
            tracing::warn!(
                keep_recent = self.memory.keep_recent_events,
                threshold = self.memory.summarization_threshold,
                first_compaction_at = self.memory.keep_recent_events + 1,
                "keep_recent_events >= summarization_threshold; compaction waits until keep_recent_events + 1 events"
            );
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Generate a default config TOML string (for `config init`).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            app_name: default_app_name(),
            api_key: None,
            default_provider: default_provider(),
            default_model: default_model(),
            default_temperature: default_temperature(),
            default_max_tokens: default_max_tokens(),
            memory: MemoryConfig::default(),
            retention: RetentionConfig::default(),
            store: StoreConfig::default(),
            gateway: GatewayConfig::default(),
            providers: HashMap::new(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
