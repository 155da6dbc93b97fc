// ============================================================================
// Read Cache and Idempotency Configuration
// ============================================================================

use crate::constants::*;
use std::time::Duration;

/// Client-side read cache settings
#[derive(Clone, Debug)]
pub struct CacheConfig {
    /// When false the cache is constructed in disabled (no-op) mode
    pub enabled: bool,
    pub ttl_secs: u64,
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: DEFAULT_CACHE_TTL_SECS,
            max_entries: DEFAULT_CACHE_MAX_ENTRIES,
        }
    }
}

impl CacheConfig {
    pub(crate) fn from_env() -> Self {
        Self {
            enabled: std::env::var("ISLAND_CACHE_ENABLED")
                .unwrap_or_else(|_| "true".to_string())
                .parse()
                .unwrap_or(true),
            ttl_secs: std::env::var("ISLAND_CACHE_TTL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_CACHE_TTL_SECS),
            max_entries: std::env::var("ISLAND_CACHE_MAX_ENTRIES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_CACHE_MAX_ENTRIES),
        }
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// Answering-side idempotency record settings
#[derive(Clone, Debug)]
pub struct IdempotencyConfig {
    pub ttl_secs: u64,
    /// Redis key prefix: "idem:{op}:{actor}:{digest}"
    pub key_prefix: String,
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            ttl_secs: DEFAULT_IDEMPOTENCY_TTL_SECS,
            key_prefix: DEFAULT_IDEMPOTENCY_KEY_PREFIX.to_string(),
        }
    }
}

impl IdempotencyConfig {
    pub(crate) fn from_env() -> Self {
        Self {
            ttl_secs: std::env::var("ISLAND_IDEMPOTENCY_TTL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_IDEMPOTENCY_TTL_SECS),
            key_prefix: std::env::var("ISLAND_IDEMPOTENCY_KEY_PREFIX")
                .unwrap_or_else(|_| DEFAULT_IDEMPOTENCY_KEY_PREFIX.to_string()),
        }
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}
