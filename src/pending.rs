// ============================================================================
// Pending-Request Registry
// ============================================================================
//
// Correlates asynchronous replies with the caller waiting for them.
//
// Per id:  Registered --complete--> Completed
//          Registered --timer-----> TimedOut
// Both transitions remove the entry through DashMap::remove, so a reply and
// a timeout racing on the same id resolve the waiter exactly once. Anything
// arriving for an id that is no longer registered is dropped silently.
//
// Lifecycle: constructed at startup, `close` at shutdown. The registry is
// an explicit object shared via Arc, never a process-wide static.
//
// ============================================================================

use crate::envelope::Envelope;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use island_error::{BusError, RpcResult};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tracing::{debug, info};

struct Waiter {
    tx: oneshot::Sender<RpcResult<Envelope>>,
    timer: Option<AbortHandle>,
}

impl Waiter {
    fn resolve(self, outcome: RpcResult<Envelope>) {
        if let Some(timer) = self.timer {
            timer.abort();
        }
        // The caller may have stopped waiting; nothing to do then
        let _ = self.tx.send(outcome);
    }
}

#[derive(Default)]
pub struct PendingRegistry {
    waiters: DashMap<String, Waiter>,
    closed: AtomicBool,
}

impl PendingRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a waiter for `id` that times out after `timeout`.
    ///
    /// Must be called from within a Tokio runtime (the timeout is a spawned
    /// timer task). A duplicate id or a closed registry yields an awaitable
    /// that is already resolved with the corresponding error.
    pub fn register(self: &Arc<Self>, id: &str, timeout: Duration) -> PendingReply {
        let (tx, rx) = oneshot::channel();
        let reply = PendingReply {
            id: id.to_string(),
            rx,
        };

        if self.is_closed() {
            let _ = tx.send(Err(BusError::ShuttingDown));
            return reply;
        }

        match self.waiters.entry(id.to_string()) {
            Entry::Occupied(_) => {
                let _ = tx.send(Err(BusError::internal(format!(
                    "request id {} is already in flight",
                    id
                ))));
                return reply;
            }
            Entry::Vacant(slot) => {
                slot.insert(Waiter { tx, timer: None });
            }
        }

        // Spawned after insertion so a zero timeout still finds the entry
        let registry = Arc::downgrade(self);
        let timer_id = id.to_string();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            expire(registry, &timer_id);
        });
        if let Some(mut waiter) = self.waiters.get_mut(id) {
            waiter.timer = Some(timer.abort_handle());
        }

        // close() may have drained the map between the check above and the insert
        if self.is_closed() {
            self.fail(id, BusError::ShuttingDown);
        }

        reply
    }

    /// Resolve the waiter for `id` with a transported reply.
    ///
    /// Returns false (and does nothing) when no waiter exists: late replies,
    /// duplicate replies and replies meant for another process all land here.
    pub fn complete(&self, id: &str, envelope: Envelope) -> bool {
        match self.waiters.remove(id) {
            Some((_, waiter)) => {
                waiter.resolve(Ok(envelope));
                true
            }
            None => {
                debug!(request_id = %id, "Reply for unknown or finished request dropped");
                false
            }
        }
    }

    /// Resolve the waiter for `id` with a failure
    pub fn fail(&self, id: &str, cause: BusError) -> bool {
        match self.waiters.remove(id) {
            Some((_, waiter)) => {
                waiter.resolve(Err(cause));
                true
            }
            None => false,
        }
    }

    /// Remove and fail every outstanding waiter with `cause`.
    ///
    /// Returns how many waiters were resolved.
    pub fn fail_all(&self, cause: BusError) -> usize {
        let ids: Vec<String> = self.waiters.iter().map(|entry| entry.key().clone()).collect();
        ids.into_iter()
            .filter(|id| self.fail(id, cause.clone()))
            .count()
    }

    /// Refuse new registrations and fail everything outstanding with `ShuttingDown`
    pub fn close(&self) -> usize {
        self.closed.store(true, Ordering::SeqCst);
        let failed = self.fail_all(BusError::ShuttingDown);
        info!(failed_waiters = failed, "Pending-request registry closed");
        failed
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.waiters.contains_key(id)
    }

    pub fn pending_count(&self) -> usize {
        self.waiters.len()
    }
}

fn expire(registry: Weak<PendingRegistry>, id: &str) {
    let Some(registry) = registry.upgrade() else {
        return;
    };
    if let Some((_, waiter)) = registry.waiters.remove(id) {
        debug!(request_id = %id, "Request timed out");
        // The timer is this task; no need to abort it
        let _ = waiter.tx.send(Err(BusError::timeout(id)));
    }
}

/// Awaitable outcome of one registered request
pub struct PendingReply {
    id: String,
    rx: oneshot::Receiver<RpcResult<Envelope>>,
}

impl PendingReply {
    /// Correlation id this reply is waiting on
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Future for PendingReply {
    type Output = RpcResult<Envelope>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            // Sender dropped without resolving: the registry itself went away
            Poll::Ready(Err(_)) => Poll::Ready(Err(BusError::ShuttingDown)),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl std::fmt::Debug for PendingReply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingReply").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reply_for(id: &str) -> Envelope {
        let mut request = Envelope::new_request("island.get");
        request.put("islandId", "ISL1");
        let mut reply = Envelope::reply_to(&request);
        reply.readdress(id);
        reply
    }

    #[tokio::test]
    async fn test_complete_resolves_waiter() {
        let registry = PendingRegistry::new();
        let pending = registry.register("req-1", Duration::from_secs(5));
        assert!(registry.contains("req-1"));

        let reply = reply_for("req-1");
        assert!(registry.complete("req-1", reply.clone()));

        assert_eq!(pending.await.unwrap(), reply);
        assert_eq!(registry.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_second_complete_is_noop() {
        let registry = PendingRegistry::new();
        let pending = registry.register("req-1", Duration::from_secs(5));

        assert!(registry.complete("req-1", reply_for("req-1")));
        assert!(!registry.complete("req-1", reply_for("req-1")));
        assert!(pending.await.is_ok());
    }

    #[tokio::test]
    async fn test_complete_unknown_id_is_noop() {
        let registry = PendingRegistry::new();
        assert!(!registry.complete("never-registered", reply_for("never-registered")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_resolves_with_timeout_error() {
        let registry = PendingRegistry::new();
        let started = tokio::time::Instant::now();
        let pending = registry.register("req-1", Duration::from_millis(50));

        let outcome = pending.await;
        assert!(started.elapsed() >= Duration::from_millis(50));
        assert_eq!(outcome, Err(BusError::timeout("req-1")));

        // No longer completable
        assert!(!registry.contains("req-1"));
        assert!(!registry.complete("req-1", reply_for("req-1")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_completion_cancels_timeout() {
        let registry = PendingRegistry::new();
        let pending = registry.register("req-1", Duration::from_millis(50));
        assert!(registry.complete("req-1", reply_for("req-1")));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(pending.await.is_ok());
    }

    #[tokio::test]
    async fn test_completion_targets_only_matching_id() {
        let registry = PendingRegistry::new();
        let mut first = registry.register("req-1", Duration::from_secs(5));
        let second = registry.register("req-2", Duration::from_secs(5));

        registry.complete("req-2", reply_for("req-2"));
        assert_eq!(second.await.unwrap().id(), "req-2");

        // First is still outstanding
        assert!(registry.contains("req-1"));
        assert!(
            tokio::time::timeout(Duration::from_millis(20), &mut first)
                .await
                .is_err()
        );

        registry.complete("req-1", reply_for("req-1"));
        assert_eq!(first.await.unwrap().id(), "req-1");
    }

    #[tokio::test]
    async fn test_duplicate_registration_rejected() {
        let registry = PendingRegistry::new();
        let _first = registry.register("req-1", Duration::from_secs(5));
        let second = registry.register("req-1", Duration::from_secs(5));

        assert!(matches!(second.await, Err(BusError::Internal(_))));
        assert_eq!(registry.pending_count(), 1);
    }

    #[tokio::test]
    async fn test_fail_all_resolves_every_waiter_once() {
        let registry = PendingRegistry::new();
        let a = registry.register("a", Duration::from_secs(5));
        let b = registry.register("b", Duration::from_secs(5));

        let cause = BusError::TransportLost("connection reset".into());
        assert_eq!(registry.fail_all(cause.clone()), 2);
        assert_eq!(registry.fail_all(cause.clone()), 0);

        assert_eq!(a.await, Err(cause.clone()));
        assert_eq!(b.await, Err(cause));
        // fail_all alone does not close the registry
        assert!(!registry.is_closed());
    }

    #[tokio::test]
    async fn test_close_rejects_new_registrations() {
        let registry = PendingRegistry::new();
        let outstanding = registry.register("a", Duration::from_secs(5));

        assert_eq!(registry.close(), 1);
        assert_eq!(outstanding.await, Err(BusError::ShuttingDown));

        let late = registry.register("b", Duration::from_secs(5));
        assert_eq!(late.await, Err(BusError::ShuttingDown));
        assert_eq!(registry.pending_count(), 0);
    }
}
