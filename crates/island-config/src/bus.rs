// ============================================================================
// Bus Configuration
// ============================================================================
// Signing secret, channel namespace and request/response timing.

use crate::constants::*;
use anyhow::Result;
use std::time::Duration;

#[derive(Clone)]
pub struct BusConfig {
    /// Shared HMAC secret; every process on the bus must use the same value
    pub secret: Vec<u8>,
    /// Channel namespace prefix, fixed for the lifetime of a connection
    pub prefix: String,
    /// Maximum time a caller waits for a correlated reply
    pub response_timeout_ms: u64,
    /// Serialized `data` larger than this is gzip-compressed
    pub compression_threshold_bytes: usize,
    /// Actor stamped on requests issued without an acting principal
    pub system_actor: String,
    /// Pause before resubscribing after the subscription drops
    pub reconnect_delay_ms: u64,
}

// The secret never reaches logs
impl std::fmt::Debug for BusConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusConfig")
            .field("secret", &"<redacted>")
            .field("prefix", &self.prefix)
            .field("response_timeout_ms", &self.response_timeout_ms)
            .field(
                "compression_threshold_bytes",
                &self.compression_threshold_bytes,
            )
            .field("system_actor", &self.system_actor)
            .field("reconnect_delay_ms", &self.reconnect_delay_ms)
            .finish()
    }
}

impl BusConfig {
    /// Build a config with defaults for everything except secret and prefix
    pub fn new(secret: impl Into<Vec<u8>>, prefix: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            prefix: prefix.into(),
            response_timeout_ms: DEFAULT_RESPONSE_TIMEOUT_MS,
            compression_threshold_bytes: DEFAULT_COMPRESSION_THRESHOLD_BYTES,
            system_actor: DEFAULT_SYSTEM_ACTOR.to_string(),
            reconnect_delay_ms: DEFAULT_RECONNECT_DELAY_MS,
        }
    }

    pub(crate) fn from_env() -> Result<Self> {
        let secret = std::env::var("ISLAND_BUS_SECRET").unwrap_or_default();
        if secret.is_empty() {
            anyhow::bail!("ISLAND_BUS_SECRET must be set");
        }
        if secret.len() < RECOMMENDED_SECRET_LEN {
            tracing::warn!(
                key_size = secret.len(),
                "ISLAND_BUS_SECRET should be at least 32 bytes"
            );
        }

        let prefix = std::env::var("ISLAND_BUS_PREFIX")
            .unwrap_or_else(|_| DEFAULT_CHANNEL_PREFIX.to_string());
        validate_prefix(&prefix)?;

        Ok(Self {
            secret: secret.into_bytes(),
            prefix,
            response_timeout_ms: std::env::var("ISLAND_BUS_RESPONSE_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_RESPONSE_TIMEOUT_MS),
            compression_threshold_bytes: std::env::var("ISLAND_BUS_COMPRESSION_THRESHOLD")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_COMPRESSION_THRESHOLD_BYTES),
            system_actor: std::env::var("ISLAND_BUS_SYSTEM_ACTOR")
                .unwrap_or_else(|_| DEFAULT_SYSTEM_ACTOR.to_string()),
            reconnect_delay_ms: std::env::var("ISLAND_BUS_RECONNECT_DELAY_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_RECONNECT_DELAY_MS),
        })
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

/// A prefix is a plain dotted namespace: no glob characters, no empty segments
pub(crate) fn validate_prefix(prefix: &str) -> Result<()> {
    if prefix.is_empty() {
        anyhow::bail!("ISLAND_BUS_PREFIX must not be empty");
    }
    if prefix.contains(['*', '?', '[', ']']) {
        anyhow::bail!("ISLAND_BUS_PREFIX must not contain glob characters: {}", prefix);
    }
    if prefix.split('.').any(str::is_empty) {
        anyhow::bail!("ISLAND_BUS_PREFIX must not contain empty segments: {}", prefix);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_prefix() {
        assert!(validate_prefix("islands").is_ok());
        assert!(validate_prefix("prod.islands").is_ok());
        assert!(validate_prefix("").is_err());
        assert!(validate_prefix("isl*").is_err());
        assert!(validate_prefix("a..b").is_err());
        assert!(validate_prefix("trailing.").is_err());
    }

    #[test]
    fn test_debug_redacts_secret() {
        let config = BusConfig::new("super-secret-value", "islands");
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("super-secret-value"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn test_defaults() {
        let config = BusConfig::new("s", "islands");
        assert_eq!(config.response_timeout(), Duration::from_millis(5000));
        assert_eq!(config.system_actor, "system");
    }
}
