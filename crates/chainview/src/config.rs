//! Runtime configuration.
//!
//! Loaded from a JSON file; every section has defaults so an empty object is a valid config.

use crate::retry::RetryPolicy;
use alloy::primitives::Address;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// On-chain name registry reads. Without it, names resolve from observed events only.
    pub rpc: Option<RpcConfig>,
    pub watcher: WatcherConfig,
    pub retry: RetryConfig,
    /// Names that never resolve, whatever the registry says.
    pub blacklist: Vec<String>,
    /// Directory for per-chain watermark files. None keeps watermarks in memory.
    pub watermark_dir: Option<PathBuf>,
}

impl Config {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.watcher.batch_size == 0 {
            return Err(ConfigError::Invalid("watcher.batch_size must be > 0".into()));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid("retry.max_attempts must be > 0".into()));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(ConfigError::Invalid(
                "retry.base_delay_ms must not exceed retry.max_delay_ms".into(),
            ));
        }
        if let Some(rpc) = &self.rpc {
            rpc.registry()?;
        }
        Ok(())
    }
}

/// JSON-RPC endpoint and name registry contract.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcConfig {
    /// HTTP RPC URL (eth_call).
    pub http_url: String,
    /// Name registry contract address, 0x-prefixed hex.
    pub registry_address: String,
    /// Per-call timeout.
    #[serde(default = "default_rpc_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_rpc_timeout_ms() -> u64 {
    10_000
}

impl RpcConfig {
    pub fn registry(&self) -> Result<Address, ConfigError> {
        self.registry_address
            .parse()
            .map_err(|e| ConfigError::Invalid(format!("rpc.registry_address: {e}")))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Watcher batching and polling.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    /// Max events read from a source per request.
    pub batch_size: usize,
    /// Sleep between polls once caught up.
    pub poll_interval_ms: u64,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            batch_size: 500,
            poll_interval_ms: 2_000,
        }
    }
}

impl WatcherConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Retry backoff for RPC and event source reads.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Upper bound of random jitter added to each delay. 0 disables jitter.
    pub jitter_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 100,
            max_delay_ms: 2_000,
            jitter_ms: 0,
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(c: &RetryConfig) -> Self {
        RetryPolicy {
            max_attempts: c.max_attempts,
            base_delay: Duration::from_millis(c.base_delay_ms),
            max_delay: Duration::from_millis(c.max_delay_ms),
            jitter: Duration::from_millis(c.jitter_ms),
        }
    }
}
