// ============================================================================
// Subscription Listener
// ============================================================================
//
// Background task owning the client-side subscription (<prefix>.resp.* and
// <prefix>.evt.*). Per frame:
//
//   route by channel -> parse -> verify -> inflate -> kind check -> complete | fan out
//
// Nothing unverified is ever correlated: a frame that fails parsing or
// signature verification is dropped before the registry sees its id. A
// verified frame must also match its namespace: only responses (`ok` set)
// complete waiters, and an event's `op` must equal its channel's event type.
//
// Lifecycle:
// - cancellation: unsubscribe, exit
// - stream ends without cancellation: fail every waiter with TransportLost,
//   wait the reconnect delay, resubscribe
// - the loop panics: fail every waiter with Internal so no caller hangs
//
// ============================================================================

use crate::cache::ReadCache;
use crate::channels::ChannelNamer;
use crate::envelope::Envelope;
use crate::host::PrimaryContext;
use crate::pending::PendingRegistry;
use crate::signer::MessageSigner;
use crate::transport::{Bus, Frame, Subscription};
use island_config::BusConfig;
use island_error::BusError;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// What happened to one inbound frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameOutcome {
    /// A waiter was resolved with the reply
    Completed,
    /// Verified reply for an id nobody is waiting on (late or duplicate)
    Unmatched,
    /// Verified event, cache invalidated and handed to the host
    Event(String),
    /// Dropped at the boundary; the reason doubles as the metric label
    Dropped(&'static str),
}

pub struct Listener {
    registry: Arc<PendingRegistry>,
    signer: MessageSigner,
    channels: ChannelNamer,
    cache: Arc<ReadCache>,
    primary: Option<PrimaryContext>,
    reconnect_delay: Duration,
}

impl Listener {
    pub fn new(
        config: &BusConfig,
        registry: Arc<PendingRegistry>,
        cache: Arc<ReadCache>,
        primary: Option<PrimaryContext>,
    ) -> Self {
        Self {
            registry,
            signer: MessageSigner::new(config.secret.clone()),
            channels: ChannelNamer::new(config.prefix.clone()),
            cache,
            primary,
            reconnect_delay: config.reconnect_delay(),
        }
    }

    /// Process one frame. Never fails; every problem is logged and dropped.
    pub fn handle_frame(&self, frame: Frame) -> FrameOutcome {
        let outcome = self.route(frame);
        if let FrameOutcome::Dropped(reason) = outcome {
            island_metrics::FRAMES_DROPPED_TOTAL
                .with_label_values(&[reason])
                .inc();
        }
        outcome
    }

    fn route(&self, frame: Frame) -> FrameOutcome {
        let is_response = self.channels.is_response_channel(&frame.channel);
        let event_type = self
            .channels
            .event_type_of(&frame.channel)
            .map(str::to_string);
        if !is_response && event_type.is_none() {
            debug!(channel = %frame.channel, "Dropping frame on unroutable channel");
            return FrameOutcome::Dropped("unroutable");
        }

        let mut envelope = match Envelope::parse(&frame.payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                e.log();
                return FrameOutcome::Dropped("decode");
            }
        };
        if let Err(e) = self.signer.verify_envelope(&envelope) {
            warn!(
                channel = %frame.channel,
                request_id = %envelope.id(),
                error = %e,
                "Dropping frame with invalid signature"
            );
            return FrameOutcome::Dropped("auth");
        }
        if let Err(e) = envelope.inflate() {
            e.log();
            return FrameOutcome::Dropped("decode");
        }

        // A verified frame can still be replayed onto the wrong namespace:
        // replies must carry `ok`, events must not and must name their channel
        let wrong_kind = match &event_type {
            None => !envelope.is_response(),
            Some(event_type) => {
                envelope.is_response() || envelope.operation() != Some(event_type.as_str())
            }
        };
        if wrong_kind {
            warn!(
                channel = %frame.channel,
                request_id = %envelope.id(),
                operation = ?envelope.operation(),
                "Dropping verified frame published on the wrong channel"
            );
            return FrameOutcome::Dropped("kind");
        }

        match event_type {
            None => {
                let id = envelope.id().to_string();
                if self.registry.complete(&id, envelope) {
                    FrameOutcome::Completed
                } else {
                    FrameOutcome::Unmatched
                }
            }
            Some(event_type) => {
                self.cache.invalidate_by_event(&event_type, &envelope);
                if let Some(primary) = &self.primary {
                    if !primary.deliver(&event_type, &envelope) {
                        debug!(event_type = %event_type, "Host queue is gone, event not delivered");
                    }
                }
                island_metrics::EVENTS_RECEIVED_TOTAL
                    .with_label_values(&[event_type.as_str()])
                    .inc();
                FrameOutcome::Event(event_type)
            }
        }
    }

    /// Run the receive loop on a background task until `cancel` fires
    pub fn spawn(self, bus: Arc<dyn Bus>, cancel: CancellationToken) -> JoinHandle<()> {
        let registry = Arc::clone(&self.registry);
        tokio::spawn(async move {
            let worker = tokio::spawn(self.run(bus, cancel));
            if let Err(e) = worker.await {
                if e.is_panic() {
                    error!("Listener task panicked, failing outstanding requests");
                    registry.fail_all(BusError::internal("listener task panicked"));
                }
            }
        })
    }

    async fn run(self, bus: Arc<dyn Bus>, cancel: CancellationToken) {
        let patterns = self.channels.client_patterns();

        loop {
            let subscribed = tokio::select! {
                _ = cancel.cancelled() => break,
                subscribed = bus.subscribe(&patterns) => subscribed,
            };
            let mut subscription = match subscribed {
                Ok(subscription) => subscription,
                Err(e) => {
                    error!(
                        error = %e,
                        delay_ms = self.reconnect_delay.as_millis() as u64,
                        "Failed to subscribe, retrying"
                    );
                    if self.pause(&cancel).await {
                        break;
                    }
                    continue;
                }
            };
            info!(patterns = ?patterns, "Subscribed to island bus");

            if self.pump(subscription.as_mut(), &cancel).await {
                if let Err(e) = subscription.unsubscribe().await {
                    warn!(error = %e, "Failed to unsubscribe cleanly");
                }
                break;
            }

            // Stream ended without cancellation
            let failed = self
                .registry
                .fail_all(BusError::TransportLost("subscription stream ended".to_string()));
            warn!(
                failed_waiters = failed,
                delay_ms = self.reconnect_delay.as_millis() as u64,
                "Subscription lost, reconnecting"
            );
            if self.pause(&cancel).await {
                break;
            }
        }

        info!("Listener stopped");
    }

    /// Feed frames to `handle_frame` until the stream ends (false) or
    /// cancellation is requested (true)
    async fn pump(&self, subscription: &mut dyn Subscription, cancel: &CancellationToken) -> bool {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return true,
                frame = subscription.next_frame() => match frame {
                    Some(frame) => {
                        self.handle_frame(frame);
                    }
                    None => return false,
                },
            }
        }
    }

    /// Sleep the reconnect delay; true if cancelled meanwhile
    async fn pause(&self, cancel: &CancellationToken) -> bool {
        tokio::select! {
            _ = cancel.cancelled() => true,
            _ = tokio::time::sleep(self.reconnect_delay) => false,
        }
    }
}
