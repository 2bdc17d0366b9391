//! Configuration handling.
//!
//! This module provides the pool options shared by every engine and the CLI/env
//! configuration of the demo server binary. Database settings themselves are read
//! from the environment by [`crate::db::EngineRegistry`].

use clap::Parser;
use std::time::Duration;

pub const DEFAULT_HTTP_HOST: &str = "127.0.0.1";
pub const DEFAULT_HTTP_PORT: u16 = 8080;
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;

/// Namespace marker of named engine settings: `app__<key>__<setting>`.
pub const DEFAULT_ENV_NAMESPACE: &str = "app";
/// Prefix of engine settings: `database_url`, `app__<key>__database_url`.
pub const DEFAULT_SETTING_PREFIX: &str = "database_";
/// Prefix still accepted when a setting is missing under the primary prefix:
/// `sqlalchemy_url`, `app__<key>__sqlalchemy_url`.
pub const FALLBACK_SETTING_PREFIX: &str = "sqlalchemy_";

// Pool configuration defaults
pub const DEFAULT_POOL_SIZE: u32 = 10;
pub const DEFAULT_POOL_SIZE_SQLITE: u32 = 1;
pub const DEFAULT_MIN_CONNECTIONS: u32 = 0;
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 600;
pub const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 30;

/// Connection pool configuration options parsed from engine settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PoolOptions {
    /// Connections kept in the pool (default: 10 for MySQL/PostgreSQL, 1 for SQLite)
    pub pool_size: Option<u32>,
    /// Extra connections allowed on top of `pool_size` (default: 0)
    pub max_overflow: Option<u32>,
    /// Minimum idle connections in pool (default: 0)
    pub min_connections: Option<u32>,
    /// Connection acquire timeout in seconds (default: 30)
    pub pool_timeout_secs: Option<u64>,
    /// Maximum connection lifetime in seconds (default: unlimited)
    pub pool_recycle_secs: Option<u64>,
    /// Idle timeout in seconds (default: 600)
    pub idle_timeout_secs: Option<u64>,
    /// Whether to ping connections before use (default: true)
    pub pool_pre_ping: Option<bool>,
}

impl PoolOptions {
    /// Get the maximum number of connections, overflow included.
    pub fn max_connections_or_default(&self, is_sqlite: bool) -> u32 {
        let base = self.pool_size.unwrap_or(if is_sqlite {
            DEFAULT_POOL_SIZE_SQLITE
        } else {
            DEFAULT_POOL_SIZE
        });
        base.saturating_add(self.max_overflow.unwrap_or(0))
    }

    /// Get min_connections with default value.
    pub fn min_connections_or_default(&self) -> u32 {
        self.min_connections.unwrap_or(DEFAULT_MIN_CONNECTIONS)
    }

    pub fn acquire_timeout_or_default(&self) -> Duration {
        Duration::from_secs(
            self.pool_timeout_secs
                .unwrap_or(DEFAULT_ACQUIRE_TIMEOUT_SECS),
        )
    }

    pub fn idle_timeout_or_default(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs.unwrap_or(DEFAULT_IDLE_TIMEOUT_SECS))
    }

    pub fn max_lifetime(&self) -> Option<Duration> {
        self.pool_recycle_secs.map(Duration::from_secs)
    }

    /// Get pool_pre_ping with default value.
    pub fn pre_ping_or_default(&self) -> bool {
        self.pool_pre_ping.unwrap_or(true)
    }

    /// Validate pool options and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.pool_size == Some(0) {
            return Err("pool_size must be greater than 0".to_string());
        }
        if let (Some(min), Some(size)) = (self.min_connections, self.pool_size) {
            let max = size.saturating_add(self.max_overflow.unwrap_or(0));
            if min > max {
                return Err(format!(
                    "min_connections ({}) cannot exceed pool_size + max_overflow ({})",
                    min, max
                ));
            }
        }
        if self.pool_timeout_secs == Some(0) {
            return Err("pool_timeout must be greater than 0".to_string());
        }
        Ok(())
    }
}

/// Configuration for the demo server binary.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "axum-db-session",
    about = "HTTP server with request-scoped database sessions for every configured engine",
    version,
    author
)]
pub struct Config {
    /// HTTP host to bind to
    #[arg(long, default_value = DEFAULT_HTTP_HOST, env = "APP_HTTP_HOST")]
    pub http_host: String,

    /// HTTP port to bind to
    #[arg(long, default_value_t = DEFAULT_HTTP_PORT, env = "APP_HTTP_PORT")]
    pub http_port: u16,

    /// Namespace marker for named engines (`<namespace>__<key>__<setting>`)
    #[arg(long, default_value = DEFAULT_ENV_NAMESPACE, env = "APP_ENV_NAMESPACE")]
    pub env_namespace: String,

    /// Prefix of engine settings (`<prefix>url`, `<prefix>pool_size`, ...)
    #[arg(long, default_value = DEFAULT_SETTING_PREFIX, env = "APP_SETTING_PREFIX")]
    pub setting_prefix: String,

    /// Seconds to wait for in-flight requests after a shutdown signal
    #[arg(
        long,
        default_value_t = DEFAULT_SHUTDOWN_TIMEOUT_SECS,
        env = "APP_SHUTDOWN_TIMEOUT"
    )]
    pub shutdown_timeout: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "APP_LOG_LEVEL")]
    pub log_level: String,

    /// Enable JSON logging format
    #[arg(long, env = "APP_JSON_LOGS")]
    pub json_logs: bool,
}

impl Config {
    pub fn shutdown_timeout_duration(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout)
    }
}

impl Default for Config {
    /// Same values as running with no flags and no environment.
    fn default() -> Self {
        Self {
            http_host: DEFAULT_HTTP_HOST.to_string(),
            http_port: DEFAULT_HTTP_PORT,
            env_namespace: DEFAULT_ENV_NAMESPACE.to_string(),
            setting_prefix: DEFAULT_SETTING_PREFIX.to_string(),
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT_SECS,
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}
