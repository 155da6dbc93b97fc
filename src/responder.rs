// ============================================================================
// Responder - answering side of the island bus
// ============================================================================
//
// Subscribes <prefix>.req.*, authenticates each request and hands it to an
// `OperationHandler`. Business logic lives entirely in the handler; this
// module only owns the transport contract:
//
// - reply on <prefix>.resp.<id> with the request's id and operation echoed
// - write operations (handler names discriminant fields) consult the
//   idempotency store first and record successful replies afterwards
// - events go out signed on <prefix>.evt.<eventType>
//
// Unauthenticated or malformed requests are dropped without a reply; the
// caller sees a timeout, never a hint about why. So are authentic frames
// replayed onto another request channel: the envelope's signed `op` decides
// both the handler and the idempotency key, and it must match the channel.
//
// ============================================================================

use crate::channels::{ChannelNamer, validate_name};
use crate::envelope::{Envelope, ErrorInfo};
use crate::idempotency::IdempotencyStore;
use crate::signer::MessageSigner;
use crate::transport::{Bus, Frame};
use async_trait::async_trait;
use island_config::BusConfig;
use island_error::RpcResult;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Handler outcome for one request
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Ok(Map<String, Value>),
    Failed(ErrorInfo),
}

impl Reply {
    pub fn ok(data: Map<String, Value>) -> Self {
        Reply::Ok(data)
    }

    pub fn empty() -> Self {
        Reply::Ok(Map::new())
    }

    pub fn error(code: impl Into<String>, message: impl Into<String>, retryable: bool) -> Self {
        Reply::Failed(ErrorInfo::new(code, message, retryable))
    }
}

#[async_trait]
pub trait OperationHandler: Send + Sync {
    /// Execute one verified, inflated request
    async fn handle(&self, request: &Envelope) -> Reply;

    /// Data fields that discriminate repeated executions of a write operation.
    ///
    /// `None` marks `operation` as a read; reads bypass the idempotency store.
    fn idempotency_fields(&self, _operation: &str) -> Option<&[&str]> {
        None
    }
}

pub struct Responder {
    bus: Arc<dyn Bus>,
    handler: Arc<dyn OperationHandler>,
    idempotency: Option<IdempotencyStore>,
    signer: MessageSigner,
    channels: ChannelNamer,
    compression_threshold: usize,
    reconnect_delay: Duration,
}

impl Responder {
    pub fn new(config: &BusConfig, bus: Arc<dyn Bus>, handler: Arc<dyn OperationHandler>) -> Self {
        Self {
            bus,
            handler,
            idempotency: None,
            signer: MessageSigner::new(config.secret.clone()),
            channels: ChannelNamer::new(config.prefix.clone()),
            compression_threshold: config.compression_threshold_bytes,
            reconnect_delay: config.reconnect_delay(),
        }
    }

    pub fn with_idempotency(mut self, store: IdempotencyStore) -> Self {
        self.idempotency = Some(store);
        self
    }

    /// Serve requests until `cancel` fires. Each request runs on its own task.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let patterns = vec![self.channels.request_pattern()];

        loop {
            let subscribed = tokio::select! {
                _ = cancel.cancelled() => break,
                subscribed = self.bus.subscribe(&patterns) => subscribed,
            };
            let mut subscription = match subscribed {
                Ok(subscription) => subscription,
                Err(e) => {
                    error!(error = %e, "Responder failed to subscribe, retrying");
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(self.reconnect_delay) => continue,
                    }
                }
            };
            info!(patterns = ?patterns, "Responder subscribed");

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        if let Err(e) = subscription.unsubscribe().await {
                            warn!(error = %e, "Failed to unsubscribe cleanly");
                        }
                        info!("Responder stopped");
                        return;
                    }
                    frame = subscription.next_frame() => match frame {
                        Some(frame) => {
                            let responder = Arc::clone(&self);
                            tokio::spawn(async move {
                                responder.handle_frame(frame).await;
                            });
                        }
                        None => break,
                    },
                }
            }

            warn!(
                delay_ms = self.reconnect_delay.as_millis() as u64,
                "Responder subscription lost, reconnecting"
            );
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.reconnect_delay) => {}
            }
        }
        info!("Responder stopped");
    }

    /// Answer one request frame. Returns the reply that was published, if any.
    pub async fn handle_frame(&self, frame: Frame) -> Option<Envelope> {
        let channel_operation = self.channels.operation_of(&frame.channel)?;

        let mut request = match Envelope::parse(&frame.payload) {
            Ok(request) => request,
            Err(e) => {
                e.log();
                return None;
            }
        };
        if let Err(e) = self.signer.verify_envelope(&request) {
            e.log();
            return None;
        }
        // The channel is unsigned; only the envelope's own op is trusted, and
        // it must agree with where the frame was published
        let operation = match request.operation() {
            Some(operation) if operation == channel_operation && !request.is_response() => {
                operation.to_string()
            }
            _ => {
                warn!(
                    channel = %frame.channel,
                    request_id = %request.id(),
                    operation = ?request.operation(),
                    "Dropping verified frame published on the wrong request channel"
                );
                island_metrics::FRAMES_DROPPED_TOTAL
                    .with_label_values(&["kind"])
                    .inc();
                return None;
            }
        };
        if let Err(e) = request.inflate() {
            e.log();
            return None;
        }

        let reply = self.answer(&operation, &request).await;
        match self.publish_reply(&request, reply.clone()).await {
            Ok(()) => Some(reply),
            Err(e) => {
                warn!(
                    request_id = %request.id(),
                    operation = %operation,
                    error = %e,
                    "Failed to publish reply"
                );
                None
            }
        }
    }

    async fn answer(&self, operation: &str, request: &Envelope) -> Envelope {
        let key = match (&self.idempotency, self.handler.idempotency_fields(operation)) {
            (Some(store), Some(fields)) => Some((store, store.key_for(request, fields))),
            _ => None,
        };

        if let Some((store, key)) = &key {
            if let Some(mut stored) = store.fetch(key).await {
                island_metrics::IDEMPOTENCY_HITS_TOTAL.inc();
                debug!(
                    request_id = %request.id(),
                    operation = %operation,
                    "Replaying stored reply for repeated write"
                );
                stored.readdress(request.id());
                return stored;
            }
        }

        let mut reply = Envelope::reply_to(request);
        match self.handler.handle(request).await {
            Reply::Ok(data) => reply.set_data(data),
            Reply::Failed(error) => reply.set_error(error),
        }

        // Only successful writes are recorded; failures may be retried
        if let Some((store, key)) = &key {
            if reply.ok() == Some(true) {
                store.store(key, &reply).await;
            }
        }
        reply
    }

    async fn publish_reply(&self, request: &Envelope, mut reply: Envelope) -> RpcResult<()> {
        reply.compress_data(self.compression_threshold)?;
        self.signer.sign_envelope(&mut reply)?;
        self.bus
            .publish(&self.channels.response(request.id()), reply.to_wire())
            .await
    }

    /// Publish a signed event notification on <prefix>.evt.<event_type>
    pub async fn publish_event(&self, event_type: &str, data: Map<String, Value>) -> RpcResult<()> {
        validate_name(event_type)?;
        let mut event = Envelope::new_event(event_type, data);
        event.compress_data(self.compression_threshold)?;
        self.signer.sign_envelope(&mut event)?;

        self.bus
            .publish(&self.channels.event(event_type), event.to_wire())
            .await?;
        debug!(event_type = %event_type, event_id = %event.id(), "Event published");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::idempotency::MemoryIdempotencyBackend;
    use crate::transport::{MemoryBus, Subscription};
    use island_config::IdempotencyConfig;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const SECRET: &[u8] = b"responder-test-secret-32-bytes!!";

    /// Deposits into an island bank; `bank.deposit` is a write
    #[derive(Default)]
    struct BankHandler {
        executions: AtomicUsize,
    }

    #[async_trait]
    impl OperationHandler for BankHandler {
        async fn handle(&self, request: &Envelope) -> Reply {
            let executed = self.executions.fetch_add(1, Ordering::SeqCst) + 1;
            match request.operation() {
                Some("bank.deposit") => {
                    let mut data = Map::new();
                    data.insert("executions".into(), json!(executed));
                    Reply::ok(data)
                }
                _ => Reply::error("UNKNOWN_OPERATION", "no such operation", false),
            }
        }

        fn idempotency_fields(&self, operation: &str) -> Option<&[&str]> {
            match operation {
                "bank.deposit" => Some(&["islandId", "amount", "nonce"]),
                _ => None,
            }
        }
    }

    fn signed_request(operation: &str, actor: &str, data: Value) -> Frame {
        let mut request = Envelope::new_request(operation);
        request.set_actor(actor);
        if let Value::Object(map) = data {
            request.set_data(map);
        }
        MessageSigner::new(SECRET).sign_envelope(&mut request).unwrap();
        Frame::new(format!("islands.req.{}", operation), request.to_wire())
    }

    async fn setup() -> (Responder, Arc<BankHandler>, Box<dyn Subscription>) {
        let bus = MemoryBus::new();
        let replies = bus
            .subscribe(&["islands.resp.*".to_string(), "islands.evt.*".to_string()])
            .await
            .unwrap();
        let handler = Arc::new(BankHandler::default());
        let store = IdempotencyStore::new(
            &IdempotencyConfig::default(),
            Arc::new(MemoryIdempotencyBackend::new()),
        );
        let responder = Responder::new(
            &BusConfig::new(SECRET.to_vec(), "islands"),
            Arc::new(bus),
            handler.clone(),
        )
        .with_idempotency(store);
        (responder, handler, replies)
    }

    #[tokio::test]
    async fn test_reply_is_signed_and_correlated() {
        let (responder, _handler, mut replies) = setup().await;
        let frame = signed_request("bank.deposit", "U1", json!({"islandId": "ISL1", "amount": 5, "nonce": "a"}));
        let request = Envelope::parse(&frame.payload).unwrap();

        responder.handle_frame(frame).await.unwrap();

        let published = replies.next_frame().await.unwrap();
        assert_eq!(published.channel, format!("islands.resp.{}", request.id()));
        let reply = Envelope::parse(&published.payload).unwrap();
        assert_eq!(reply.id(), request.id());
        assert_eq!(reply.operation(), Some("bank.deposit"));
        assert_eq!(reply.ok(), Some(true));
        assert!(MessageSigner::new(SECRET).verify_envelope(&reply).is_ok());
    }

    #[tokio::test]
    async fn test_business_failure_is_reply_not_silence() {
        let (responder, _handler, _replies) = setup().await;

        let reply = responder
            .handle_frame(signed_request("island.explode", "U1", json!({})))
            .await
            .unwrap();
        assert_eq!(reply.ok(), Some(false));
        assert_eq!(reply.business_error().unwrap().code, "UNKNOWN_OPERATION");
    }

    #[tokio::test]
    async fn test_repeated_write_replays_stored_reply() {
        let (responder, handler, _replies) = setup().await;
        let data = json!({"islandId": "ISL1", "amount": 5, "nonce": "a"});

        let first_frame = signed_request("bank.deposit", "U1", data.clone());
        let first = responder.handle_frame(first_frame).await.unwrap();

        let retry_frame = signed_request("bank.deposit", "U1", data);
        let retry_id = Envelope::parse(&retry_frame.payload).unwrap().id().to_string();
        let second = responder.handle_frame(retry_frame).await.unwrap();

        assert_eq!(handler.executions.load(Ordering::SeqCst), 1);
        assert_eq!(second.id(), retry_id);
        assert_eq!(second.data(), first.data());
    }

    #[tokio::test]
    async fn test_different_actor_executes_again() {
        let (responder, handler, _replies) = setup().await;
        let data = json!({"islandId": "ISL1", "amount": 5, "nonce": "a"});

        responder.handle_frame(signed_request("bank.deposit", "U1", data.clone())).await;
        responder.handle_frame(signed_request("bank.deposit", "U2", data)).await;

        assert_eq!(handler.executions.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_write_replayed_on_read_channel_is_dropped() {
        let (responder, handler, _replies) = setup().await;
        let deposit = signed_request("bank.deposit", "U1", json!({"islandId": "ISL1", "amount": 5, "nonce": "a"}));
        responder.handle_frame(deposit.clone()).await.unwrap();

        let replayed = Frame::new("islands.req.island.get", deposit.payload);
        assert!(responder.handle_frame(replayed.clone()).await.is_none());
        assert!(responder.handle_frame(replayed).await.is_none());

        assert_eq!(handler.executions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_reply_copied_onto_request_channel_is_dropped() {
        let (responder, handler, _replies) = setup().await;
        let frame = signed_request("bank.deposit", "U1", json!({"islandId": "ISL1", "amount": 5, "nonce": "a"}));
        let request = Envelope::parse(&frame.payload).unwrap();

        let mut reply = Envelope::reply_to(&request);
        MessageSigner::new(SECRET).sign_envelope(&mut reply).unwrap();
        let copied = Frame::new("islands.req.bank.deposit", reply.to_wire());

        assert!(responder.handle_frame(copied).await.is_none());
        assert_eq!(handler.executions.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unsigned_request_gets_no_reply() {
        let (responder, handler, _replies) = setup().await;
        let mut request = Envelope::new_request("bank.deposit");
        request.set_actor("U1");
        let frame = Frame::new("islands.req.bank.deposit", request.to_wire());

        assert!(responder.handle_frame(frame).await.is_none());
        assert_eq!(handler.executions.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_publish_event() {
        let (responder, _handler, mut replies) = setup().await;
        let mut data = Map::new();
        data.insert("islandId".into(), json!("ISL1"));

        responder.publish_event("island.updated", data).await.unwrap();

        let frame = replies.next_frame().await.unwrap();
        assert_eq!(frame.channel, "islands.evt.island.updated");
        let event = Envelope::parse(&frame.payload).unwrap();
        assert!(MessageSigner::new(SECRET).verify_envelope(&event).is_ok());
        assert_eq!(event.data_str("islandId"), Some("ISL1"));

        assert!(responder.publish_event("evt.spoof", Map::new()).await.is_err());
    }
}
