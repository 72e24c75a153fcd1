//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use campus_shared::constants::{DEFAULT_HTTP_PORT, MAX_ATTACHMENT_SIZE};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP + WebSocket server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:5000`
    pub http_addr: SocketAddr,

    /// Path of the SQLite database file.
    /// Env: `DATABASE_PATH`
    /// Default: `./campus.db`
    pub database_path: PathBuf,

    /// Maximum decoded size of a file or voice attachment, in bytes.
    /// Env: `MAX_ATTACHMENT_BYTES`
    /// Default: 5 MiB
    pub max_attachment_bytes: usize,

    /// Outbound queue length per connection. Events for a connection whose
    /// queue is full are dropped.
    /// Env: `SEND_QUEUE_CAPACITY`
    /// Default: `256`
    pub send_queue_capacity: usize,

    /// Upper bound on a single message-store call.
    /// Env: `STORE_TIMEOUT_MS`
    /// Default: 5 s
    pub store_timeout: Duration,

    /// Age after which an unanswered ringing call no longer blocks a new one.
    /// Env: `RING_TIMEOUT_SECS`
    /// Default: 60 s
    pub ring_timeout: Duration,

    /// Interval between WebSocket pings.
    /// Env: `HEARTBEAT_SECS`
    /// Default: 30 s
    pub heartbeat_interval: Duration,

    /// Sustained HTTP requests per second allowed per client IP.
    /// Env: `RATE_LIMIT_PER_SEC`
    /// Default: `10`
    pub rate_limit_per_sec: f64,

    /// HTTP burst allowance per client IP.
    /// Env: `RATE_LIMIT_BURST`
    /// Default: `30`
    pub rate_limit_burst: f64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            database_path: PathBuf::from("./campus.db"),
            max_attachment_bytes: MAX_ATTACHMENT_SIZE,
            send_queue_capacity: 256,
            store_timeout: Duration::from_millis(5_000),
            ring_timeout: Duration::from_secs(60),
            heartbeat_interval: Duration::from_secs(30),
            rate_limit_per_sec: 10.0,
            rate_limit_burst: 30.0,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup.
    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = lookup("HTTP_ADDR") {
            match addr.parse::<SocketAddr>() {
                Ok(parsed) => config.http_addr = parsed,
                Err(_) => tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default"),
            }
        }

        if let Some(path) = lookup("DATABASE_PATH") {
            config.database_path = PathBuf::from(path);
        }

        if let Some(n) = parse_number::<usize>(&lookup, "MAX_ATTACHMENT_BYTES") {
            config.max_attachment_bytes = n;
        }

        if let Some(n) = parse_number::<usize>(&lookup, "SEND_QUEUE_CAPACITY") {
            if n > 0 {
                config.send_queue_capacity = n;
            } else {
                tracing::warn!("SEND_QUEUE_CAPACITY must be positive, using default");
            }
        }

        if let Some(ms) = parse_number::<u64>(&lookup, "STORE_TIMEOUT_MS") {
            config.store_timeout = Duration::from_millis(ms);
        }

        if let Some(secs) = parse_number::<u64>(&lookup, "RING_TIMEOUT_SECS") {
            if secs > 0 {
                config.ring_timeout = Duration::from_secs(secs);
            } else {
                tracing::warn!("RING_TIMEOUT_SECS must be positive, using default");
            }
        }

        if let Some(secs) = parse_number::<u64>(&lookup, "HEARTBEAT_SECS") {
            if secs > 0 {
                config.heartbeat_interval = Duration::from_secs(secs);
            } else {
                tracing::warn!("HEARTBEAT_SECS must be positive, using default");
            }
        }

        if let Some(rate) = parse_number::<f64>(&lookup, "RATE_LIMIT_PER_SEC") {
            config.rate_limit_per_sec = rate;
        }

        if let Some(burst) = parse_number::<f64>(&lookup, "RATE_LIMIT_BURST") {
            config.rate_limit_burst = burst;
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }
}

fn parse_number<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "Invalid numeric setting, using default");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.http_addr, ([0, 0, 0, 0], 5000).into());
        assert_eq!(config.max_attachment_bytes, 5 * 1024 * 1024);
        assert_eq!(config.ring_timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_overrides() {
        let config = ServerConfig::from_lookup(lookup_from(&[
            ("HTTP_ADDR", "127.0.0.1:9000"),
            ("DATABASE_PATH", "/var/lib/campus/campus.db"),
            ("STORE_TIMEOUT_MS", "250"),
            ("RING_TIMEOUT_SECS", "15"),
        ]));
        assert_eq!(config.http_addr, ([127, 0, 0, 1], 9000).into());
        assert_eq!(config.database_path, PathBuf::from("/var/lib/campus/campus.db"));
        assert_eq!(config.store_timeout, Duration::from_millis(250));
        assert_eq!(config.ring_timeout, Duration::from_secs(15));
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = ServerConfig::from_lookup(lookup_from(&[
            ("HTTP_ADDR", "not-an-addr"),
            ("SEND_QUEUE_CAPACITY", "0"),
            ("HEARTBEAT_SECS", "soon"),
        ]));
        let defaults = ServerConfig::default();
        assert_eq!(config.http_addr, defaults.http_addr);
        assert_eq!(config.send_queue_capacity, defaults.send_queue_capacity);
        assert_eq!(config.heartbeat_interval, defaults.heartbeat_interval);
    }

    #[test]
    fn test_zero_ring_timeout_is_rejected() {
        let config = ServerConfig::from_lookup(lookup_from(&[("RING_TIMEOUT_SECS", "0")]));
        assert_eq!(config.ring_timeout, ServerConfig::default().ring_timeout);
    }
}
