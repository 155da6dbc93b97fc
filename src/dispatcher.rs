// ============================================================================
// Request Dispatcher
// ============================================================================
//
// Turns (operation, actor, customizer) into a signed request on the bus:
//
// 1. Build envelope, stamp actor (or the system actor), apply the customizer
// 2. Register the waiter, before anything is published, so a fast reply can
//    never arrive ahead of its registration
// 3. Validate the channel segment, compress `data` above the threshold, sign
// 4. Publish to <prefix>.req.<op>
//
// Failures in steps 3-4 resolve the returned reply with `Internal`; nothing
// is raised synchronously, so callers have a single failure channel.
//
// ============================================================================

use crate::channels::{ChannelNamer, validate_name};
use crate::envelope::Envelope;
use crate::pending::{PendingRegistry, PendingReply};
use crate::signer::MessageSigner;
use crate::transport::Bus;
use island_config::BusConfig;
use island_error::{BusError, RpcResult};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

pub struct Dispatcher {
    bus: Arc<dyn Bus>,
    registry: Arc<PendingRegistry>,
    signer: MessageSigner,
    channels: ChannelNamer,
    timeout: Duration,
    compression_threshold: usize,
    system_actor: String,
}

impl Dispatcher {
    pub fn new(config: &BusConfig, bus: Arc<dyn Bus>, registry: Arc<PendingRegistry>) -> Self {
        Self {
            bus,
            registry,
            signer: MessageSigner::new(config.secret.clone()),
            channels: ChannelNamer::new(config.prefix.clone()),
            timeout: config.response_timeout(),
            compression_threshold: config.compression_threshold_bytes,
            system_actor: config.system_actor.clone(),
        }
    }

    pub fn registry(&self) -> &Arc<PendingRegistry> {
        &self.registry
    }

    /// Publish a request and return the awaitable reply without waiting on it.
    ///
    /// The returned reply resolves with the correlated envelope (including
    /// business failures, `ok = false`), or with `Timeout`, `Internal`,
    /// `ShuttingDown` or `TransportLost`.
    pub async fn dispatch<F>(&self, operation: &str, actor: Option<&str>, customize: F) -> PendingReply
    where
        F: FnOnce(&mut Envelope),
    {
        let mut envelope = Envelope::new_request(operation);
        envelope.set_actor(actor.unwrap_or(&self.system_actor));
        customize(&mut envelope);

        let id = envelope.id().to_string();
        let reply = self.registry.register(&id, self.timeout);
        if !self.registry.contains(&id) {
            // Already resolved (registry closed); nothing to publish
            return reply;
        }

        match self.publish(operation, envelope).await {
            Ok(()) => {
                island_metrics::REQUESTS_SENT_TOTAL
                    .with_label_values(&[operation])
                    .inc();
                debug!(request_id = %id, operation = %operation, "Request published");
            }
            Err(e) => {
                warn!(
                    request_id = %id,
                    operation = %operation,
                    error = %e,
                    "Failed to publish request"
                );
                let cause = match e {
                    BusError::Internal(_) => e,
                    other => BusError::internal(other.to_string()),
                };
                self.registry.fail(&id, cause);
            }
        }

        reply
    }

    /// Dispatch and wait for the outcome
    pub async fn send<F>(&self, operation: &str, actor: Option<&str>, customize: F) -> RpcResult<Envelope>
    where
        F: FnOnce(&mut Envelope),
    {
        let started = Instant::now();
        let outcome = self.dispatch(operation, actor, customize).await.await;

        island_metrics::REPLIES_TOTAL
            .with_label_values(&[outcome_label(&outcome)])
            .inc();
        if outcome.is_ok() {
            island_metrics::REQUEST_DURATION_SECONDS
                .with_label_values(&[operation])
                .observe(started.elapsed().as_secs_f64());
        }
        outcome
    }

    async fn publish(&self, operation: &str, mut envelope: Envelope) -> RpcResult<()> {
        validate_name(operation)?;
        envelope.compress_data(self.compression_threshold)?;
        self.signer.sign_envelope(&mut envelope)?;

        self.bus
            .publish(&self.channels.request(operation), envelope.to_wire())
            .await
    }
}

fn outcome_label(outcome: &RpcResult<Envelope>) -> &'static str {
    match outcome {
        Ok(reply) if reply.business_error().is_some() => "business_error",
        Ok(_) => "ok",
        Err(BusError::Timeout { .. }) => "timeout",
        Err(BusError::ShuttingDown) => "shutting_down",
        Err(BusError::TransportLost(_)) => "transport_lost",
        Err(_) => "internal",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MemoryBus, Subscription};

    const SECRET: &[u8] = b"dispatcher-test-secret-32-bytes!";

    fn config() -> BusConfig {
        let mut config = BusConfig::new(SECRET.to_vec(), "islands");
        config.response_timeout_ms = 200;
        config.compression_threshold_bytes = 256;
        config
    }

    async fn setup() -> (MemoryBus, Dispatcher, Box<dyn Subscription>) {
        let bus = MemoryBus::new();
        let requests = bus.subscribe(&["islands.req.*".to_string()]).await.unwrap();
        let dispatcher = Dispatcher::new(&config(), Arc::new(bus.clone()), PendingRegistry::new());
        (bus, dispatcher, requests)
    }

    #[tokio::test]
    async fn test_dispatch_publishes_signed_request() {
        let (_bus, dispatcher, mut requests) = setup().await;

        let pending = dispatcher
            .dispatch("island.get", Some("U1"), |env| env.put("islandId", "ISL1"))
            .await;

        let frame = requests.next_frame().await.unwrap();
        assert_eq!(frame.channel, "islands.req.island.get");

        let request = Envelope::parse(&frame.payload).unwrap();
        assert_eq!(request.id(), pending.id());
        assert_eq!(request.operation(), Some("island.get"));
        assert_eq!(request.actor(), Some("U1"));
        assert_eq!(request.data_str("islandId"), Some("ISL1"));
        assert!(MessageSigner::new(SECRET).verify_envelope(&request).is_ok());
        assert!(dispatcher.registry().contains(pending.id()));
    }

    #[tokio::test]
    async fn test_missing_actor_uses_system_actor() {
        let (_bus, dispatcher, mut requests) = setup().await;

        dispatcher.dispatch("island.list", None, |_| {}).await;

        let request = Envelope::parse(&requests.next_frame().await.unwrap().payload).unwrap();
        assert_eq!(request.actor(), Some("system"));
    }

    #[tokio::test]
    async fn test_large_payload_is_compressed_and_signed_compressed() {
        let (_bus, dispatcher, mut requests) = setup().await;

        let blob = "x".repeat(1024);
        dispatcher
            .dispatch("island.update", Some("U1"), |env| env.put("description", blob.clone()))
            .await;

        let mut request = Envelope::parse(&requests.next_frame().await.unwrap().payload).unwrap();
        assert!(request.is_compressed());
        assert!(MessageSigner::new(SECRET).verify_envelope(&request).is_ok());

        request.inflate().unwrap();
        assert_eq!(request.data_str("description"), Some(blob.as_str()));
    }

    #[tokio::test]
    async fn test_publish_failure_resolves_with_internal() {
        let (bus, dispatcher, _requests) = setup().await;
        bus.set_refuse_publish(true);

        let pending = dispatcher.dispatch("island.get", Some("U1"), |_| {}).await;
        let id = pending.id().to_string();

        assert!(matches!(pending.await, Err(BusError::Internal(_))));
        assert!(!dispatcher.registry().contains(&id));
    }

    #[tokio::test]
    async fn test_invalid_operation_resolves_with_internal() {
        let (_bus, dispatcher, _requests) = setup().await;

        let outcome = dispatcher.send("req.*", Some("U1"), |_| {}).await;
        assert!(matches!(outcome, Err(BusError::Internal(_))));
    }

    #[tokio::test]
    async fn test_closed_registry_skips_publish() {
        let (_bus, dispatcher, mut requests) = setup().await;
        dispatcher.registry().close();

        let outcome = dispatcher.send("island.get", Some("U1"), |_| {}).await;
        assert_eq!(outcome, Err(BusError::ShuttingDown));
        assert!(
            tokio::time::timeout(Duration::from_millis(20), requests.next_frame())
                .await
                .is_err()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_unanswered_request_times_out() {
        let (_bus, dispatcher, _requests) = setup().await;

        let outcome = dispatcher.send("island.get", Some("U1"), |_| {}).await;
        assert!(matches!(outcome, Err(BusError::Timeout { .. })));
    }

    #[test]
    fn test_outcome_labels() {
        let request = Envelope::new_request("island.get");
        let mut failed = Envelope::reply_to(&request);
        failed.set_error(crate::envelope::ErrorInfo::new("NOT_FOUND", "no island", false));

        assert_eq!(outcome_label(&Ok(Envelope::reply_to(&request))), "ok");
        assert_eq!(outcome_label(&Ok(failed)), "business_error");
        assert_eq!(outcome_label(&Err(BusError::timeout("x"))), "timeout");
        assert_eq!(outcome_label(&Err(BusError::ShuttingDown)), "shutting_down");
    }
}
