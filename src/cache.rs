// ============================================================================
// Read Cache
// ============================================================================
//
// Client-side snapshot cache for read replies, bounded by entry count (LRU)
// and a per-entry TTL. Entries are written after a successful read and
// evicted on TTL, on size pressure, or when an event notification says the
// cached view is stale.
//
// Disabled mode turns every operation into a no-op so callers never branch
// on whether caching is configured.
//
// ============================================================================

use crate::envelope::Envelope;
use crate::events::EventCategory;
use island_config::CacheConfig;
use lru::LruCache;
use parking_lot::Mutex;
use serde_json::Value;
use std::num::NonZeroUsize;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Semantic cache keys shared by readers and the invalidation policy
pub mod keys {
    pub fn members(island_id: &str) -> String {
        format!("members:{}", island_id)
    }

    pub fn island(island_id: &str) -> String {
        format!("island:{}", island_id)
    }
}

struct CacheEntry {
    value: Value,
    inserted_at: Instant,
}

pub struct ReadCache {
    entries: Option<Mutex<LruCache<String, CacheEntry>>>,
    ttl: Duration,
}

impl ReadCache {
    pub fn new(config: &CacheConfig) -> Self {
        if !config.enabled {
            return Self::disabled();
        }
        match NonZeroUsize::new(config.max_entries) {
            Some(capacity) => Self {
                entries: Some(Mutex::new(LruCache::new(capacity))),
                ttl: config.ttl(),
            },
            None => Self::disabled(),
        }
    }

    pub fn disabled() -> Self {
        Self {
            entries: None,
            ttl: Duration::ZERO,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.entries.is_some()
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        let entries = self.entries.as_ref()?;
        let mut entries = entries.lock();

        let fresh = match entries.get(key) {
            Some(entry) => entry.inserted_at.elapsed() < self.ttl,
            None => {
                island_metrics::CACHE_LOOKUPS_TOTAL
                    .with_label_values(&["miss"])
                    .inc();
                return None;
            }
        };
        if !fresh {
            entries.pop(key);
            island_metrics::CACHE_LOOKUPS_TOTAL
                .with_label_values(&["miss"])
                .inc();
            return None;
        }

        island_metrics::CACHE_LOOKUPS_TOTAL
            .with_label_values(&["hit"])
            .inc();
        entries.get(key).map(|entry| entry.value.clone())
    }

    pub fn put(&self, key: impl Into<String>, value: Value) {
        if let Some(entries) = &self.entries {
            entries.lock().put(
                key.into(),
                CacheEntry {
                    value,
                    inserted_at: Instant::now(),
                },
            );
        }
    }

    pub fn invalidate(&self, key: &str) {
        if let Some(entries) = &self.entries {
            entries.lock().pop(key);
        }
    }

    pub fn invalidate_all(&self) {
        if let Some(entries) = &self.entries {
            entries.lock().clear();
        }
    }

    /// Number of stored entries, including ones past their TTL not yet evicted
    pub fn len(&self) -> usize {
        self.entries.as_ref().map_or(0, |entries| entries.lock().len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop whatever the event `event_type` makes stale.
    ///
    /// - Membership / island-state events: the island's `members:` and
    ///   `island:` keys when the payload names an `islandId`, otherwise
    ///   everything.
    /// - Invitation events: everything.
    /// - Anything else: nothing.
    pub fn invalidate_by_event(&self, event_type: &str, envelope: &Envelope) {
        if !self.is_enabled() {
            return;
        }
        match EventCategory::of(event_type) {
            EventCategory::Membership | EventCategory::IslandState => {
                match envelope.data_str("islandId") {
                    Some(island_id) => {
                        self.invalidate(&keys::members(island_id));
                        self.invalidate(&keys::island(island_id));
                        debug!(event_type = %event_type, island_id = %island_id, "Invalidated island cache entries");
                    }
                    None => {
                        self.invalidate_all();
                        debug!(event_type = %event_type, "Event without islandId, cleared read cache");
                    }
                }
            }
            EventCategory::Invitation => {
                self.invalidate_all();
                debug!(event_type = %event_type, "Invitation event, cleared read cache");
            }
            EventCategory::Other => {}
        }
    }
}
