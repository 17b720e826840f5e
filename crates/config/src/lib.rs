//! Configuration loading, validation, and management for Gridiron.
//!
//! Loads configuration from `~/.gridiron/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.gridiron/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Multi-tier cache tuning.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Circuit-breaker tuning, applied per dependency.
    #[serde(default)]
    pub breaker: BreakerConfig,

    /// Per-user rate limiter tuning.
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Worker pool sizing and retry policy.
    #[serde(default)]
    pub pool: PoolConfig,

    /// Per-role token budgets.
    #[serde(default)]
    pub roles: RolesConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum entries held uncompressed in the hot tier.
    #[serde(default = "default_l1_max_entries")]
    pub l1_max_entries: usize,

    /// Byte budget for the compressed tier.
    #[serde(default = "default_l2_max_bytes")]
    pub l2_max_bytes: usize,

    /// TTL for speculatively staged entries, in seconds.
    #[serde(default = "default_l3_ttl_secs")]
    pub l3_ttl_secs: u64,

    /// Default TTL for regular entries, in seconds.
    #[serde(default = "default_entry_ttl_secs")]
    pub entry_ttl_secs: u64,

    /// Number of independent shards per tier.
    #[serde(default = "default_shards")]
    pub shards: usize,

    /// Interval between background reconcile sweeps, in seconds.
    #[serde(default = "default_reconcile_secs")]
    pub reconcile_interval_secs: u64,
}

fn default_l1_max_entries() -> usize {
    512
}
fn default_l2_max_bytes() -> usize {
    16 * 1024 * 1024
}
fn default_l3_ttl_secs() -> u64 {
    30
}
fn default_entry_ttl_secs() -> u64 {
    600
}
fn default_shards() -> usize {
    16
}
fn default_reconcile_secs() -> u64 {
    15
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            l1_max_entries: default_l1_max_entries(),
            l2_max_bytes: default_l2_max_bytes(),
            l3_ttl_secs: default_l3_ttl_secs(),
            entry_ttl_secs: default_entry_ttl_secs(),
            shards: default_shards(),
            reconcile_interval_secs: default_reconcile_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Consecutive failures within the window before the circuit opens.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Sliding window for counting failures, in seconds.
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    /// Cooldown before the circuit goes half-open, in milliseconds.
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,

    /// Cooldown growth factor applied when a trial call fails.
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,

    /// Ceiling for the grown cooldown, in milliseconds.
    #[serde(default = "default_max_cooldown_ms")]
    pub max_cooldown_ms: u64,
}

fn default_failure_threshold() -> u32 {
    5
}
fn default_window_secs() -> u64 {
    60
}
fn default_cooldown_ms() -> u64 {
    5_000
}
fn default_backoff_factor() -> f64 {
    2.0
}
fn default_max_cooldown_ms() -> u64 {
    120_000
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            window_secs: default_window_secs(),
            cooldown_ms: default_cooldown_ms(),
            backoff_factor: default_backoff_factor(),
            max_cooldown_ms: default_max_cooldown_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Token bucket capacity per user.
    #[serde(default = "default_bucket_capacity")]
    pub capacity: u32,

    /// Tokens added per second.
    #[serde(default = "default_refill_per_sec")]
    pub refill_per_sec: f64,

    /// Maximum queued waiters per user before rejecting.
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,

    /// How long a queued waiter may wait before rejection, in milliseconds.
    #[serde(default = "default_max_wait_ms")]
    pub max_wait_ms: u64,
}

fn default_bucket_capacity() -> u32 {
    10
}
fn default_refill_per_sec() -> f64 {
    2.0
}
fn default_queue_depth() -> usize {
    32
}
fn default_max_wait_ms() -> u64 {
    5_000
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            capacity: default_bucket_capacity(),
            refill_per_sec: default_refill_per_sec(),
            queue_depth: default_queue_depth(),
            max_wait_ms: default_max_wait_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Floor for the floating pool size.
    #[serde(default = "default_min_workers")]
    pub min_workers: usize,

    /// Ceiling for the floating pool size.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Per-task deadline, in milliseconds.
    #[serde(default = "default_task_timeout_ms")]
    pub task_timeout_ms: u64,

    /// Maximum attempts per task (1 = no retries).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base delay for exponential retry backoff, in milliseconds.
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,

    /// How often the sizer samples the load signal, in milliseconds.
    #[serde(default = "default_sample_interval_ms")]
    pub sample_interval_ms: u64,

    /// Minimum time between scale-downs, in milliseconds.
    #[serde(default = "default_scale_down_cooldown_ms")]
    pub scale_down_cooldown_ms: u64,
}

fn default_min_workers() -> usize {
    2
}
fn default_max_workers() -> usize {
    16
}
fn default_task_timeout_ms() -> u64 {
    10_000
}
fn default_max_attempts() -> u32 {
    3
}
fn default_retry_base_ms() -> u64 {
    100
}
fn default_sample_interval_ms() -> u64 {
    500
}
fn default_scale_down_cooldown_ms() -> u64 {
    30_000
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_workers: default_min_workers(),
            max_workers: default_max_workers(),
            task_timeout_ms: default_task_timeout_ms(),
            max_attempts: default_max_attempts(),
            retry_base_ms: default_retry_base_ms(),
            sample_interval_ms: default_sample_interval_ms(),
            scale_down_cooldown_ms: default_scale_down_cooldown_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RolesConfig {
    #[serde(default = "default_production_budget")]
    pub production_token_budget: usize,

    #[serde(default = "default_analyst_budget")]
    pub analyst_token_budget: usize,

    #[serde(default = "default_scientist_budget")]
    pub data_scientist_token_budget: usize,
}

fn default_production_budget() -> usize {
    2048
}
fn default_analyst_budget() -> usize {
    4096
}
fn default_scientist_budget() -> usize {
    8192
}

impl Default for RolesConfig {
    fn default() -> Self {
        Self {
            production_token_budget: default_production_budget(),
            analyst_token_budget: default_analyst_budget(),
            data_scientist_token_budget: default_scientist_budget(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.gridiron/config.toml).
    ///
    /// Environment overrides:
    /// - `GRIDIRON_MAX_WORKERS`
    /// - `GRIDIRON_L1_MAX_ENTRIES`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;

        if let Ok(raw) = std::env::var("GRIDIRON_MAX_WORKERS") {
            config.pool.max_workers = raw.parse().map_err(|_| {
                ConfigError::ValidationError(format!("GRIDIRON_MAX_WORKERS is not a number: {raw}"))
            })?;
        }
        if let Ok(raw) = std::env::var("GRIDIRON_L1_MAX_ENTRIES") {
            config.cache.l1_max_entries = raw.parse().map_err(|_| {
                ConfigError::ValidationError(format!(
                    "GRIDIRON_L1_MAX_ENTRIES is not a number: {raw}"
                ))
            })?;
        }

        config.validate()?;
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
        dirs_home().join(".gridiron")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pool.min_workers == 0 {
            return Err(ConfigError::ValidationError(
                "pool.min_workers must be at least 1".into(),
            ));
        }
        if self.pool.max_workers < self.pool.min_workers {
            return Err(ConfigError::ValidationError(
                "pool.max_workers must be >= pool.min_workers".into(),
            ));
        }
        if self.pool.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "pool.max_attempts must be at least 1".into(),
            ));
        }
        if self.breaker.failure_threshold == 0 {
            return Err(ConfigError::ValidationError(
                "breaker.failure_threshold must be at least 1".into(),
            ));
        }
        if self.breaker.backoff_factor < 1.0 {
            return Err(ConfigError::ValidationError(
                "breaker.backoff_factor must be >= 1.0".into(),
            ));
        }
        if self.rate_limit.capacity == 0 {
            return Err(ConfigError::ValidationError(
                "rate_limit.capacity must be at least 1".into(),
            ));
        }
        if self.rate_limit.refill_per_sec <= 0.0 {
            return Err(ConfigError::ValidationError(
                "rate_limit.refill_per_sec must be positive".into(),
            ));
        }
        if self.cache.shards == 0 {
            return Err(ConfigError::ValidationError(
                "cache.shards must be at least 1".into(),
            ));
        }
        if self.roles.production_token_budget == 0
            || self.roles.analyst_token_budget == 0
            || self.roles.data_scientist_token_budget == 0
        {
            return Err(ConfigError::ValidationError(
                "role token budgets must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            breaker: BreakerConfig::default(),
            rate_limit: RateLimitConfig::default(),
            pool: PoolConfig::default(),
            roles: RolesConfig::default(),
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
