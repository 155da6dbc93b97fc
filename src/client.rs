// ============================================================================
// Island Client
// ============================================================================
//
// Client-side facade wiring the pending-request registry, dispatcher,
// listener and read cache over one bus.
//
// Startup:   registry -> cache -> listener task -> dispatcher
// Shutdown:  cancel listener -> fail outstanding waiters (ShuttingDown)
//            -> wait for the listener -> clear cache
//
// ============================================================================

use crate::cache::ReadCache;
use crate::dispatcher::Dispatcher;
use crate::envelope::Envelope;
use crate::host::PrimaryContext;
use crate::listener::Listener;
use crate::pending::{PendingRegistry, PendingReply};
use crate::transport::Bus;
use island_config::{BusConfig, CacheConfig};
use island_error::RpcResult;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub struct IslandClient {
    dispatcher: Dispatcher,
    registry: Arc<PendingRegistry>,
    cache: Arc<ReadCache>,
    cancel: CancellationToken,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl IslandClient {
    /// Wire everything up and spawn the listener. Must run inside a Tokio runtime.
    pub fn start(
        bus_config: &BusConfig,
        cache_config: &CacheConfig,
        bus: Arc<dyn Bus>,
        primary: Option<PrimaryContext>,
    ) -> Self {
        let registry = PendingRegistry::new();
        let cache = Arc::new(ReadCache::new(cache_config));
        let cancel = CancellationToken::new();

        let listener = Listener::new(bus_config, Arc::clone(&registry), Arc::clone(&cache), primary)
            .spawn(Arc::clone(&bus), cancel.clone());
        let dispatcher = Dispatcher::new(bus_config, bus, Arc::clone(&registry));

        info!(
            prefix = %bus_config.prefix,
            cache_enabled = cache.is_enabled(),
            "Island client started"
        );

        Self {
            dispatcher,
            registry,
            cache,
            cancel,
            listener: Mutex::new(Some(listener)),
        }
    }

    /// Send `operation` and wait for its reply.
    ///
    /// A business failure is an `Ok` envelope with `ok = false`; check
    /// [`Envelope::business_error`].
    pub async fn send<F>(&self, operation: &str, actor: Option<&str>, customize: F) -> RpcResult<Envelope>
    where
        F: FnOnce(&mut Envelope),
    {
        self.dispatcher.send(operation, actor, customize).await
    }

    /// Publish `operation` and return the awaitable reply
    pub async fn dispatch<F>(&self, operation: &str, actor: Option<&str>, customize: F) -> PendingReply
    where
        F: FnOnce(&mut Envelope),
    {
        self.dispatcher.dispatch(operation, actor, customize).await
    }

    /// Serve `cache_key` from the read cache, or send `operation` and cache
    /// the reply's `data` when it succeeded.
    ///
    /// A cache hit yields a synthetic `ok` reply carrying the cached data.
    pub async fn read_through<F>(
        &self,
        cache_key: &str,
        operation: &str,
        actor: Option<&str>,
        customize: F,
    ) -> RpcResult<Envelope>
    where
        F: FnOnce(&mut Envelope),
    {
        if let Some(Value::Object(data)) = self.cache.get(cache_key) {
            debug!(cache_key = %cache_key, operation = %operation, "Read served from cache");
            let mut reply = Envelope::reply_to(&Envelope::new_request(operation));
            reply.set_data(data);
            return Ok(reply);
        }

        let reply = self.send(operation, actor, customize).await?;
        if reply.ok() == Some(true) {
            self.cache
                .put(cache_key, Value::Object(reply.data().clone()));
        }
        Ok(reply)
    }

    pub fn cache(&self) -> &ReadCache {
        &self.cache
    }

    pub fn registry(&self) -> &Arc<PendingRegistry> {
        &self.registry
    }

    /// Stop the listener and fail every outstanding request. Safe to call twice.
    pub async fn shutdown(&self) {
        let handle = self.listener.lock().take();
        let Some(handle) = handle else {
            return;
        };

        self.cancel.cancel();
        let failed = self.registry.close();
        if let Err(e) = handle.await {
            warn!(error = %e, "Listener task ended abnormally");
        }
        self.cache.invalidate_all();

        info!(failed_waiters = failed, "Island client shut down");
    }
}

impl Drop for IslandClient {
    fn drop(&mut self) {
        // Dropped without shutdown(): at least stop the listener and free waiters
        if !self.cancel.is_cancelled() {
            self.cancel.cancel();
            self.registry.close();
        }
    }
}
