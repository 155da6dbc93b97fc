// ============================================================================
// Configuration Constants
// ============================================================================

// Channel namespace
pub(crate) const DEFAULT_CHANNEL_PREFIX: &str = "islands";
pub(crate) const DEFAULT_SYSTEM_ACTOR: &str = "system";

// Request/response timing (in milliseconds)
pub(crate) const DEFAULT_RESPONSE_TIMEOUT_MS: u64 = 5000;
pub(crate) const DEFAULT_RECONNECT_DELAY_MS: u64 = 1000;

// Payloads larger than this are gzip-compressed before signing (in bytes)
pub(crate) const DEFAULT_COMPRESSION_THRESHOLD_BYTES: usize = 4096;

// Read cache
pub(crate) const DEFAULT_CACHE_TTL_SECS: u64 = 30;
pub(crate) const DEFAULT_CACHE_MAX_ENTRIES: usize = 1024;

// Idempotency records outlive any sane client retry window
pub(crate) const DEFAULT_IDEMPOTENCY_TTL_SECS: u64 = 600;
pub(crate) const DEFAULT_IDEMPOTENCY_KEY_PREFIX: &str = "idem:";

// HMAC-SHA256 keys shorter than the digest size are accepted but reported
pub const RECOMMENDED_SECRET_LEN: usize = 32;
