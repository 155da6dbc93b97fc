// ============================================================================
// Transport - fire-and-forget publish/subscribe seam
// ============================================================================
//
// The bus core only needs two things from a transport:
// - publish bytes to a channel (short-lived, on a pooled connection)
// - pattern-subscribe and pull frames (on its own dedicated connection)
//
// Implementations:
// - redis.rs  - Redis PUBLISH / PSUBSCRIBE
// - memory.rs - in-process broadcast bus (tests, local demos)
//
// ============================================================================

mod memory;
mod redis;

pub use self::memory::MemoryBus;
pub use self::redis::RedisBus;

use async_trait::async_trait;
use island_error::RpcResult;

/// One inbound message: the concrete channel it arrived on plus raw bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub channel: String,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(channel: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            channel: channel.into(),
            payload: payload.into(),
        }
    }
}

#[async_trait]
pub trait Bus: Send + Sync {
    async fn publish(&self, channel: &str, payload: Vec<u8>) -> RpcResult<()>;

    /// Open a subscription on `patterns` (Redis glob syntax)
    async fn subscribe(&self, patterns: &[String]) -> RpcResult<Box<dyn Subscription>>;
}

#[async_trait]
pub trait Subscription: Send {
    /// Next frame, or `None` once the underlying connection is gone
    async fn next_frame(&mut self) -> Option<Frame>;

    async fn unsubscribe(&mut self) -> RpcResult<()>;
}
