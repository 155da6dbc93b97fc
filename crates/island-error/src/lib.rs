// ============================================================================
// Island Error - Bus error taxonomy
// ============================================================================
//
// Errors split into two families:
// - Boundary errors (Decode, Auth): raised while reading frames off the bus.
//   They are logged and dropped by the listener and never reach a caller.
// - Waiter errors (Timeout, Internal, ShuttingDown, TransportLost): resolve
//   exactly one pending request (or all of them on shutdown / link loss).
//
// Business failures are NOT errors here: they travel inside a successfully
// transported envelope (`ok = false` plus an `error` object).
//
// ============================================================================

use thiserror::Error;

pub type RpcResult<T> = Result<T, BusError>;

/// Error type shared by every island-bus component
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    // ===== Boundary Errors =====
    #[error("Malformed frame: {0}")]
    Decode(String),

    #[error("Signature rejected: {0}")]
    Auth(String),

    // ===== Waiter Errors =====
    #[error("No reply for request {request_id} within the response window")]
    Timeout { request_id: String },

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Bus is shutting down")]
    ShuttingDown,

    #[error("Subscription lost: {0}")]
    TransportLost(String),

    // ===== Infrastructure Errors =====
    #[error("Redis error: {0}")]
    Redis(String),

    #[error("JSON error: {0}")]
    Json(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl BusError {
    /// Error code for programmatic error handling
    pub fn error_code(&self) -> &'static str {
        match self {
            BusError::Decode(_) => "DECODE_ERROR",
            BusError::Auth(_) => "AUTH_ERROR",
            BusError::Timeout { .. } => "TIMEOUT",
            BusError::Internal(_) => "INTERNAL_ERROR",
            BusError::ShuttingDown => "SHUTTING_DOWN",
            BusError::TransportLost(_) => "TRANSPORT_LOST",
            BusError::Redis(_) => "REDIS_ERROR",
            BusError::Json(_) => "JSON_ERROR",
            BusError::Config(_) => "CONFIG_ERROR",
        }
    }

    /// Whether a caller may reasonably retry the same operation.
    ///
    /// The transport never retries on its own; this only informs callers.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BusError::Timeout { .. } | BusError::TransportLost(_) | BusError::Redis(_)
        )
    }

    /// True for errors that are absorbed at the listener boundary
    pub fn is_boundary(&self) -> bool {
        matches!(self, BusError::Decode(_) | BusError::Auth(_))
    }

    /// Log this error with appropriate level and context
    pub fn log(&self) {
        let code = self.error_code();

        match self {
            BusError::Decode(_) | BusError::Auth(_) => {
                tracing::warn!(error = %self, error_code = %code, "Dropped inbound frame");
            }
            BusError::Timeout { .. } | BusError::ShuttingDown => {
                tracing::debug!(error = %self, error_code = %code, "Request ended without reply");
            }
            _ => {
                tracing::error!(error = %self, error_code = %code, "Bus error occurred");
            }
        }
    }
}

// ============================================================================
// Conversion from common error types
// ============================================================================

impl From<redis::RedisError> for BusError {
    fn from(err: redis::RedisError) -> Self {
        BusError::Redis(err.to_string())
    }
}

impl From<serde_json::Error> for BusError {
    fn from(err: serde_json::Error) -> Self {
        BusError::Json(err.to_string())
    }
}

// ============================================================================
// Helper functions for creating common errors
// ============================================================================

impl BusError {
    /// Create a decode error
    pub fn decode(msg: impl Into<String>) -> Self {
        BusError::Decode(msg.into())
    }

    /// Create an authentication error
    pub fn auth(msg: impl Into<String>) -> Self {
        BusError::Auth(msg.into())
    }

    /// Create a timeout error for a request id
    pub fn timeout(request_id: impl Into<String>) -> Self {
        BusError::Timeout {
            request_id: request_id.into(),
        }
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        BusError::Internal(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        BusError::Config(msg.into())
    }
}
