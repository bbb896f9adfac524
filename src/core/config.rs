/*!
 * Endpoint Configuration
 *
 * Polling cadence, buffer capacity and cache retention for an endpoint.
 */

use super::limits::{
    DEFAULT_HANDSHAKE_INTERVAL, DEFAULT_POLL_INTERVAL, DEFAULT_RESULT_CACHE_CAPACITY,
    SHM_HEADER_SIZE, SHM_REGION_SIZE,
};
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

/// Configuration shared by transports and endpoints
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointConfig {
    /// Sleep between readiness checks in `wait` (default: 10ms)
    pub poll_interval: Duration,

    /// Sleep between checks while the shared-memory peer is absent (default: 100ms)
    pub handshake_interval: Duration,

    /// Size of each shared-memory region including its header (default: 10MB)
    pub shm_capacity: usize,

    /// Local call results kept for reference substitution (default: 4096)
    pub result_cache_capacity: usize,
}

impl EndpointConfig {
    /// Create default configuration
    pub fn new() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            handshake_interval: DEFAULT_HANDSHAKE_INTERVAL,
            shm_capacity: SHM_REGION_SIZE,
            result_cache_capacity: DEFAULT_RESULT_CACHE_CAPACITY,
        }
    }

    /// Create configuration from environment variables
    ///
    /// Environment variables:
    /// - CSRPC_POLL_INTERVAL_MS
    /// - CSRPC_HANDSHAKE_INTERVAL_MS
    /// - CSRPC_SHM_CAPACITY (bytes, must match the peer)
    /// - CSRPC_RESULT_CACHE_CAPACITY
    pub fn from_env() -> Self {
        let defaults = Self::new();
        Self {
            poll_interval: env_parse::<u64>("CSRPC_POLL_INTERVAL_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.poll_interval),
            handshake_interval: env_parse::<u64>("CSRPC_HANDSHAKE_INTERVAL_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.handshake_interval),
            shm_capacity: env_parse::<usize>("CSRPC_SHM_CAPACITY")
                .filter(|&c| {
                    let ok = c > SHM_HEADER_SIZE;
                    if !ok {
                        warn!(capacity = c, "CSRPC_SHM_CAPACITY too small, using default");
                    }
                    ok
                })
                .unwrap_or(defaults.shm_capacity),
            result_cache_capacity: env_parse::<usize>("CSRPC_RESULT_CACHE_CAPACITY")
                .unwrap_or(defaults.result_cache_capacity),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_handshake_interval(mut self, interval: Duration) -> Self {
        self.handshake_interval = interval;
        self
    }

    pub fn with_shm_capacity(mut self, capacity: usize) -> Self {
        self.shm_capacity = capacity.max(SHM_HEADER_SIZE + 1);
        self
    }

    pub fn with_result_cache_capacity(mut self, capacity: usize) -> Self {
        self.result_cache_capacity = capacity;
        self
    }
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self::new()
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(key, value = %raw, "Ignoring unparsable configuration value");
            None
        }
    }
}
