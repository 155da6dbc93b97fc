//! # Island Bus
//!
//! Signed request/response RPC and event notifications for island (guild)
//! game servers, carried over Redis pub/sub.
//!
//! - [`IslandClient`] sends requests and awaits correlated replies, keeps a
//!   read cache and hands event notifications to the host's primary context
//! - [`Responder`] answers requests on the other side of the bus, guarding
//!   write operations with the [`IdempotencyStore`]
//!
//! Every envelope is HMAC-SHA256 signed over its canonical JSON form; frames
//! that fail verification are dropped before anything looks at their id.
//!
//! ```rust,no_run
//! use island_bus::{IslandClient, RedisBus};
//! use island_config::Config;
//! use std::sync::Arc;
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let config = Config::from_env()?;
//! let bus = RedisBus::connect(&config.redis_url).await?;
//! let client = IslandClient::start(&config.bus, &config.cache, Arc::new(bus), None);
//!
//! let reply = client
//!     .send("island.get", Some("U1"), |req| req.put("islandId", "ISL1"))
//!     .await?;
//! println!("{}", String::from_utf8_lossy(&reply.to_wire()));
//!
//! client.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod channels;
pub mod client;
pub mod dispatcher;
pub mod envelope;
pub mod events;
pub mod host;
pub mod idempotency;
pub mod listener;
pub mod pending;
pub mod responder;
pub mod signer;
pub mod transport;
pub mod utils;

pub use cache::ReadCache;
pub use channels::ChannelNamer;
pub use client::IslandClient;
pub use dispatcher::Dispatcher;
pub use envelope::{Envelope, ErrorInfo};
pub use events::{EventCategory, IslandEvent};
pub use host::{EventSink, HostQueue, PrimaryContext, primary_context};
pub use idempotency::{
    IdempotencyBackend, IdempotencyKey, IdempotencyStore, MemoryIdempotencyBackend,
};
pub use listener::{FrameOutcome, Listener};
pub use pending::{PendingRegistry, PendingReply};
pub use responder::{OperationHandler, Reply, Responder};
pub use signer::MessageSigner;
pub use transport::{Bus, Frame, MemoryBus, RedisBus, Subscription};

pub use island_error::{BusError, RpcResult};
