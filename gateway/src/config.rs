//! Gateway configuration.
//!
//! Loads settings from `gateway.toml` with environment variable overrides.
//!
//! # Configuration Hierarchy
//!
//! Configuration is loaded in this priority order (highest wins):
//! 1. Command-line flags (`--port`, applied in `main.rs`)
//! 2. Environment variables (e.g., `BRIDGE_URL`, `STREAM_CHANNEL_ID`)
//! 3. TOML file (`gateway.toml` by default)
//! 4. Built-in defaults
//!
//! # Sections
//!
//! | Section | Purpose |
//! |---------|---------|
//! | `server` | Bind address, port, public base URL for watch-page links |
//! | `telegram` | Bridge URL and key, storage channels, bot username |
//! | `cache` | Local disk cache location and limits |
//! | `tuning` | Chunk size, metadata cache size, retry backoff, bridge timeouts |
//!
//! # Example
//!
//! ```toml
//! [server]
//! port = 8080
//! public_url = "https://media.example.org"
//!
//! [telegram]
//! bridge_url = "http://127.0.0.1:8081"
//! stream_channel_id = -1001234567890
//! bot_username = "my_storage_bot"
//!
//! [cache]
//! dir = "data/cache"
//! max_total_bytes = 53687091200
//!
//! [tuning]
//! chunk_size = 1048576
//! ```

use anyhow::{Result, bail};
use common::is_valid_chunk_size;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

// ============================================================================
// Constants
// ============================================================================

/// Default config file looked up when `--config` is not given
pub const DEFAULT_CONFIG_PATH: &str = "gateway.toml";

/// Upper bound on a remote-requested flood wait before the single retry.
/// Longer waits surface as 503 instead of parking the request.
pub const MAX_RETRY_AFTER_SECS: u64 = 30;

/// Buffer size used when streaming cached files from disk
pub const DISK_READ_BUFFER_SIZE: usize = 256 * 1024;

/// Read an env var, parse it, and apply it to `target`. Logs a warning on parse failure.
fn env_parse<T: std::str::FromStr>(var: &str, target: &mut T) {
    if let Ok(val) = std::env::var(var) {
        match val.parse() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env = var,
                value = %val,
                expected_type = std::any::type_name::<T>(),
                "Invalid env var value, using default"
            ),
        }
    }
}

/// Parse an env var into an `Option<T>` field. Empty values are ignored.
fn env_parse_opt<T: std::str::FromStr>(var: &str, target: &mut Option<T>) {
    if let Ok(val) = std::env::var(var) {
        let trimmed = val.trim();
        if trimmed.is_empty() {
            return;
        }
        match trimmed.parse() {
            Ok(parsed) => *target = Some(parsed),
            Err(_) => warn!(
                env = var,
                value = %val,
                expected_type = std::any::type_name::<T>(),
                "Invalid env var value, ignoring"
            ),
        }
    }
}

fn env_bool(var: &str, target: &mut bool) {
    if let Ok(val) = std::env::var(var) {
        *target = val != "0" && val.to_lowercase() != "false";
    }
}

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct GatewayConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub tuning: TuningConfig,
}

/// HTTP listener configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Base URL used for the stream/download links on the watch page.
    /// When unset the page links are relative to the current host.
    pub public_url: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            public_url: None,
        }
    }
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}

/// Remote store configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TelegramConfig {
    /// Base URL of the MTProto bridge service
    #[serde(default = "default_bridge_url")]
    pub bridge_url: String,

    /// Bearer token for the bridge (optional)
    pub bridge_api_key: Option<String>,

    /// Channel holding the streamable copies of stored files
    pub stream_channel_id: Option<i64>,

    /// Owner database channel, used when no stream channel is set
    pub owner_db_channel_id: Option<i64>,

    /// Bot username used by `/get/{id}` and the health response
    pub bot_username: Option<String>,

    /// File the bot writes its username to on login.
    /// Read on demand when `bot_username` is not set.
    pub bot_username_file: Option<PathBuf>,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bridge_url: default_bridge_url(),
            bridge_api_key: None,
            stream_channel_id: None,
            owner_db_channel_id: None,
            bot_username: None,
            bot_username_file: None,
        }
    }
}

fn default_bridge_url() -> String {
    "http://127.0.0.1:8081".to_string()
}

/// Local disk cache configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_enabled")]
    pub enabled: bool,

    /// Directory holding one file per handle plus in-progress `.temp` files
    #[serde(default = "default_cache_dir")]
    pub dir: PathBuf,

    /// Files larger than this are streamed without caching (0 = no limit)
    #[serde(default)]
    pub max_file_bytes: u64,

    /// Total size the background sweep trims the cache down to (0 = unlimited)
    #[serde(default)]
    pub max_total_bytes: u64,

    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_cache_enabled(),
            dir: default_cache_dir(),
            max_file_bytes: 0,
            max_total_bytes: 0,
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

fn default_cache_enabled() -> bool {
    true
}
fn default_cache_dir() -> PathBuf {
    PathBuf::from("data/cache")
}
fn default_sweep_interval() -> u64 {
    300
}

/// Streaming and remote-call tuning knobs
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TuningConfig {
    /// Remote read window. Must be a multiple of 4096 that divides 1 MiB.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,

    /// Bounded LRU size for resolved file metadata
    #[serde(default = "default_metadata_cache_entries")]
    pub metadata_cache_entries: usize,

    /// Delay before the single retry of a transient remote failure
    #[serde(default = "default_transient_backoff_ms")]
    pub transient_backoff_ms: u64,

    #[serde(default = "default_bridge_connect_timeout")]
    pub bridge_connect_timeout_secs: u64,

    /// Per-call timeout for bridge requests (one chunk or one lookup)
    #[serde(default = "default_bridge_request_timeout")]
    pub bridge_request_timeout_secs: u64,
}

impl Default for TuningConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            metadata_cache_entries: default_metadata_cache_entries(),
            transient_backoff_ms: default_transient_backoff_ms(),
            bridge_connect_timeout_secs: default_bridge_connect_timeout(),
            bridge_request_timeout_secs: default_bridge_request_timeout(),
        }
    }
}

fn default_chunk_size() -> u64 {
    common::MAX_CHUNK_SIZE
}
fn default_metadata_cache_entries() -> usize {
    10_000
}
fn default_transient_backoff_ms() -> u64 {
    1_000
}
fn default_bridge_connect_timeout() -> u64 {
    10
}
fn default_bridge_request_timeout() -> u64 {
    60
}

impl TuningConfig {
    pub fn transient_backoff(&self) -> Duration {
        Duration::from_millis(self.transient_backoff_ms)
    }
}

impl GatewayConfig {
    /// Load configuration from file with environment variable overrides
    pub fn load(path: Option<&str>) -> Result<Self> {
        let config_path = path.unwrap_or(DEFAULT_CONFIG_PATH);

        let mut config = if Path::new(config_path).exists() {
            let content = std::fs::read_to_string(config_path)?;
            toml::from_str(&content)?
        } else {
            warn!(config_path = %config_path, "No config file found, using defaults/env vars");
            GatewayConfig::default()
        };

        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self) {
        // Server overrides
        if let Ok(val) = std::env::var("BIND_ADDRESS") {
            self.server.bind_address = val;
        }
        env_parse("PORT", &mut self.server.port);
        env_parse_opt("PUBLIC_URL", &mut self.server.public_url);

        // Telegram overrides
        if let Ok(val) = std::env::var("BRIDGE_URL") {
            self.telegram.bridge_url = val;
        }
        env_parse_opt("BRIDGE_API_KEY", &mut self.telegram.bridge_api_key);
        env_parse_opt("STREAM_CHANNEL_ID", &mut self.telegram.stream_channel_id);
        env_parse_opt("OWNER_DB_CHANNEL_ID", &mut self.telegram.owner_db_channel_id);
        env_parse_opt("BOT_USERNAME", &mut self.telegram.bot_username);
        env_parse_opt("BOT_USERNAME_FILE", &mut self.telegram.bot_username_file);

        // Cache overrides
        env_bool("CACHE_ENABLED", &mut self.cache.enabled);
        if let Ok(val) = std::env::var("CACHE_DIR") {
            self.cache.dir = PathBuf::from(val);
        }
        env_parse("CACHE_MAX_FILE_BYTES", &mut self.cache.max_file_bytes);
        env_parse("CACHE_MAX_TOTAL_BYTES", &mut self.cache.max_total_bytes);
        env_parse(
            "CACHE_SWEEP_INTERVAL_SECS",
            &mut self.cache.sweep_interval_secs,
        );

        // Tuning overrides
        env_parse("GATEWAY_CHUNK_SIZE", &mut self.tuning.chunk_size);
        env_parse(
            "GATEWAY_METADATA_CACHE_ENTRIES",
            &mut self.tuning.metadata_cache_entries,
        );
        env_parse(
            "GATEWAY_TRANSIENT_BACKOFF_MS",
            &mut self.tuning.transient_backoff_ms,
        );
        env_parse(
            "BRIDGE_CONNECT_TIMEOUT_SECS",
            &mut self.tuning.bridge_connect_timeout_secs,
        );
        env_parse(
            "BRIDGE_REQUEST_TIMEOUT_SECS",
            &mut self.tuning.bridge_request_timeout_secs,
        );
    }

    pub fn validate(&self) -> Result<()> {
        if !is_valid_chunk_size(self.tuning.chunk_size) {
            bail!(
                "tuning.chunk_size = {} must be a multiple of 4096 that divides 1048576",
                self.tuning.chunk_size
            );
        }
        if self.tuning.metadata_cache_entries == 0 {
            bail!("tuning.metadata_cache_entries must be at least 1");
        }
        if self.cache.enabled && self.cache.sweep_interval_secs == 0 {
            bail!("cache.sweep_interval_secs must be at least 1");
        }
        Ok(())
    }

    /// Channel holding stored media: stream channel first, owner DB channel second.
    pub fn storage_channel(&self) -> Option<i64> {
        self.telegram
            .stream_channel_id
            .or(self.telegram.owner_db_channel_id)
    }
}
