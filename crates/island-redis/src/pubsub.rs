//! Pattern subscriptions on a dedicated pub/sub connection

use crate::{RedisClient, Result};
use futures_util::StreamExt;
use redis::aio::PubSub;

/// A PSUBSCRIBE'd connection
///
/// Owns its own connection: a connection in subscribe mode cannot issue
/// regular commands, so publishing must go through [`RedisClient::publish`].
pub struct PatternSubscription {
    pubsub: PubSub,
    patterns: Vec<String>,
}

impl PatternSubscription {
    /// Receive the next message as (channel, payload)
    ///
    /// Returns `None` when the connection is closed.
    pub async fn next_message(&mut self) -> Option<(String, Vec<u8>)> {
        let mut stream = std::pin::pin!(self.pubsub.on_message());
        let msg = stream.next().await?;
        Some((
            msg.get_channel_name().to_string(),
            msg.get_payload_bytes().to_vec(),
        ))
    }

    /// PUNSUBSCRIBE from every pattern this subscription holds
    pub async fn punsubscribe(&mut self) -> Result<()> {
        for pattern in &self.patterns {
            self.pubsub.punsubscribe(pattern).await?;
        }
        Ok(())
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }
}

impl RedisClient {
    /// Open a dedicated pub/sub connection and PSUBSCRIBE to `patterns`
    pub async fn psubscribe(&self, patterns: &[String]) -> Result<PatternSubscription> {
        let mut pubsub = self.client().get_async_pubsub().await?;
        for pattern in patterns {
            pubsub.psubscribe(pattern).await?;
        }
        Ok(PatternSubscription {
            pubsub,
            patterns: patterns.to_vec(),
        })
    }
}
