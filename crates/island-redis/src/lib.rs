//! # Island Redis
//!
//! Low-level Redis client used by the island bus.
//!
//! ## Design Principles
//!
//! - **No business logic** - Pure infrastructure layer
//! - **No dependencies** on other island-* crates
//! - **Two connection kinds** - a managed multiplexed connection for commands
//!   and publishing, and dedicated pub/sub connections for subscribing
//!
//! ## Features
//!
//! - Connection management with automatic reconnection
//! - Key-value operations with expiry
//! - Publish
//! - Pattern subscriptions
//!
//! ## Example
//!
//! ```rust,no_run
//! use island_redis::RedisClient;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut client = RedisClient::connect("redis://localhost:6379").await?;
//!
//!     client.set_ex("key", b"value".to_vec(), 3600).await?;
//!     let value: Option<Vec<u8>> = client.get("key").await?;
//!
//!     client.publish("islands.evt.member.added", b"{}".to_vec()).await?;
//!     Ok(())
//! }
//! ```

mod client;
mod pubsub;

pub use client::RedisClient;
pub use pubsub::PatternSubscription;

// Re-export commonly used types
pub use redis::RedisError;

/// Result type for Redis operations
pub type Result<T> = std::result::Result<T, RedisError>;
