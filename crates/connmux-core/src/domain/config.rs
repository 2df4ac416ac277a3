//! Pool configuration
//!
//! Deserializable from the product's settings file, overridable from the
//! environment, and buildable in code.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default maximum number of cached entries
pub const DEFAULT_CAPACITY: usize = 100;

/// Default bound on a single connect attempt
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 30_000;

/// Default HTTP timeout for the token endpoint
pub const DEFAULT_REFRESH_TIMEOUT_MS: u64 = 30_000;

/// Default broadcast buffer for pool events
pub const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;

const ENV_CAPACITY: &str = "CONNMUX_POOL_CAPACITY";
const ENV_CONNECT_TIMEOUT: &str = "CONNMUX_CONNECT_TIMEOUT_MS";
const ENV_REFRESH_TIMEOUT: &str = "CONNMUX_REFRESH_TIMEOUT_MS";
const ENV_EVENT_CAPACITY: &str = "CONNMUX_EVENT_CHANNEL_CAPACITY";

/// Configuration errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} must be an unsigned integer, got {value:?}")]
    InvalidEnv { name: &'static str, value: String },

    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

/// Session pool configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Maximum number of entries (live sessions plus in-flight establishments)
    pub capacity: usize,
    /// Bound on each connect attempt, in milliseconds
    pub connect_timeout_ms: u64,
    /// HTTP timeout of the token endpoint call, in milliseconds
    pub refresh_timeout_ms: u64,
    /// Broadcast buffer for pool events
    pub event_channel_capacity: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            refresh_timeout_ms: DEFAULT_REFRESH_TIMEOUT_MS,
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
        }
    }
}

impl PoolConfig {
    /// Defaults overlaid with `CONNMUX_*` environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().overlay(|name| std::env::var(name).ok())
    }

    /// Overlay values from an arbitrary lookup (env, settings map)
    pub fn overlay<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = parse_var(&lookup, ENV_CAPACITY)? {
            self.capacity = v as usize;
        }
        if let Some(v) = parse_var(&lookup, ENV_CONNECT_TIMEOUT)? {
            self.connect_timeout_ms = v;
        }
        if let Some(v) = parse_var(&lookup, ENV_REFRESH_TIMEOUT)? {
            self.refresh_timeout_ms = v;
        }
        if let Some(v) = parse_var(&lookup, ENV_EVENT_CAPACITY)? {
            self.event_channel_capacity = v as usize;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = whole_millis(timeout);
        self
    }

    pub fn with_refresh_timeout(mut self, timeout: Duration) -> Self {
        self.refresh_timeout_ms = whole_millis(timeout);
        self
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn refresh_timeout(&self) -> Duration {
        Duration::from_millis(self.refresh_timeout_ms)
    }

    /// Reject values the pool cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.capacity == 0 {
            return Err(ConfigError::Zero("capacity"));
        }
        if self.connect_timeout_ms == 0 {
            return Err(ConfigError::Zero("connect_timeout_ms"));
        }
        if self.refresh_timeout_ms == 0 {
            return Err(ConfigError::Zero("refresh_timeout_ms"));
        }
        if self.event_channel_capacity == 0 {
            return Err(ConfigError::Zero("event_channel_capacity"));
        }
        Ok(())
    }
}

/// Milliseconds in `timeout`, rounded up so a non-zero duration never
/// becomes zero
fn whole_millis(timeout: Duration) -> u64 {
    let millis = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
    if millis == 0 && !timeout.is_zero() {
        1
    } else {
        millis
    }
}

fn parse_var<F>(lookup: &F, name: &'static str) -> Result<Option<u64>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv { name, value: raw }),
    }
}
