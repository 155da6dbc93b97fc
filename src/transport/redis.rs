use super::{Bus, Frame, Subscription};
use async_trait::async_trait;
use island_error::RpcResult;
use island_redis::{PatternSubscription, RedisClient};

/// Redis-backed bus
///
/// Publishing shares the client's managed connection; every subscription
/// opens a dedicated pub/sub connection, so a publish issued while handling
/// a received frame can never deadlock on the subscribed connection.
#[derive(Clone)]
pub struct RedisBus {
    client: RedisClient,
}

impl RedisBus {
    pub fn new(client: RedisClient) -> Self {
        Self { client }
    }

    pub async fn connect(url: &str) -> RpcResult<Self> {
        Ok(Self::new(RedisClient::connect(url).await?))
    }

    pub fn client(&self) -> &RedisClient {
        &self.client
    }
}

#[async_trait]
impl Bus for RedisBus {
    async fn publish(&self, channel: &str, payload: Vec<u8>) -> RpcResult<()> {
        let mut client = self.client.clone();
        let receivers = client.publish(channel, payload).await?;
        tracing::trace!(channel = %channel, receivers, "Published frame");
        Ok(())
    }

    async fn subscribe(&self, patterns: &[String]) -> RpcResult<Box<dyn Subscription>> {
        let subscription = self.client.psubscribe(patterns).await?;
        Ok(Box::new(RedisSubscription { inner: subscription }))
    }
}

struct RedisSubscription {
    inner: PatternSubscription,
}

#[async_trait]
impl Subscription for RedisSubscription {
    async fn next_frame(&mut self) -> Option<Frame> {
        let (channel, payload) = self.inner.next_message().await?;
        Some(Frame { channel, payload })
    }

    async fn unsubscribe(&mut self) -> RpcResult<()> {
        self.inner.punsubscribe().await?;
        Ok(())
    }
}
