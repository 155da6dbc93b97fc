// ============================================================================
// Host Handoff
// ============================================================================
//
// The embedding host runs gameplay on one primary, single-threaded context.
// The listener runs elsewhere and must never call host APIs directly, so
// event delivery is split in two:
//
// 1. listener side: `PrimaryContext::deliver` enqueues the event's wire bytes
//    (a deep copy, nothing shared with the listener's envelope)
// 2. host side:     `HostQueue::drain` runs from the host tick, re-decodes
//    each delivery on the primary context and hands it to an `EventSink`
//
// ============================================================================

use crate::envelope::Envelope;
use crate::events::IslandEvent;
use tokio::sync::mpsc;
use tracing::warn;

/// Receives decoded events on the host's primary context
pub trait EventSink {
    fn on_event(&mut self, event: IslandEvent);
}

impl<F: FnMut(IslandEvent)> EventSink for F {
    fn on_event(&mut self, event: IslandEvent) {
        self(event)
    }
}

#[derive(Debug)]
struct EventDelivery {
    event_type: String,
    wire: Vec<u8>,
}

/// Listener-side handle; cheap to clone and safe to move across threads
#[derive(Clone, Debug)]
pub struct PrimaryContext {
    tx: mpsc::UnboundedSender<EventDelivery>,
}

/// Host-side end of the handoff, owned by the primary context
#[derive(Debug)]
pub struct HostQueue {
    rx: mpsc::UnboundedReceiver<EventDelivery>,
}

pub fn primary_context() -> (PrimaryContext, HostQueue) {
    let (tx, rx) = mpsc::unbounded_channel();
    (PrimaryContext { tx }, HostQueue { rx })
}

impl PrimaryContext {
    /// Queue `envelope` for delivery on the primary context.
    ///
    /// Returns false when the host side has been dropped.
    pub fn deliver(&self, event_type: &str, envelope: &Envelope) -> bool {
        self.tx
            .send(EventDelivery {
                event_type: event_type.to_string(),
                wire: envelope.to_wire(),
            })
            .is_ok()
    }
}

impl HostQueue {
    /// Deliver everything queued so far to `sink`. Never blocks.
    ///
    /// Returns the number of events handed to the sink.
    pub fn drain(&mut self, sink: &mut dyn EventSink) -> usize {
        let mut delivered = 0;
        while let Ok(delivery) = self.rx.try_recv() {
            let decoded = Envelope::parse(&delivery.wire)
                .and_then(|envelope| IslandEvent::decode(&delivery.event_type, &envelope));
            match decoded {
                Ok(event) => {
                    sink.on_event(event);
                    delivered += 1;
                }
                Err(e) => {
                    warn!(
                        error = %e,
                        event_type = %delivery.event_type,
                        "Dropping event that does not decode on the primary context"
                    );
                }
            }
        }
        delivered
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}
