// ============================================================================
// Idempotency Store
// ============================================================================
//
// Answering-side record of replies to write operations, so a request
// redelivered by a retrying client returns the first reply instead of
// executing twice.
//
// Key format: {key_prefix}{operation}:{actor}:{sha256 of discriminant fields}
//
// Both directions are fail-open: a storage error on fetch reads as a miss,
// a storage error on store is logged and swallowed. The record is a guard,
// never the source of truth.
//
// ============================================================================

use crate::envelope::Envelope;
use async_trait::async_trait;
use dashmap::DashMap;
use island_config::IdempotencyConfig;
use island_error::RpcResult;
use island_redis::RedisClient;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Key-value storage with expiry backing the idempotency store
#[async_trait]
pub trait IdempotencyBackend: Send + Sync {
    async fn get(&self, key: &str) -> RpcResult<Option<Vec<u8>>>;

    async fn set_ex(&self, key: &str, value: Vec<u8>, ttl: Duration) -> RpcResult<()>;
}

#[async_trait]
impl IdempotencyBackend for RedisClient {
    async fn get(&self, key: &str) -> RpcResult<Option<Vec<u8>>> {
        let mut client = self.clone();
        Ok(RedisClient::get::<Vec<u8>>(&mut client, key).await?)
    }

    async fn set_ex(&self, key: &str, value: Vec<u8>, ttl: Duration) -> RpcResult<()> {
        let mut client = self.clone();
        // SETEX rejects a zero expiry
        let seconds = ttl.as_secs().max(1);
        Ok(RedisClient::set_ex(&mut client, key, value, seconds).await?)
    }
}

/// Process-local backend for tests and single-process deployments
#[derive(Default)]
pub struct MemoryIdempotencyBackend {
    records: DashMap<String, (Vec<u8>, Instant)>,
}

impl MemoryIdempotencyBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl IdempotencyBackend for MemoryIdempotencyBackend {
    async fn get(&self, key: &str) -> RpcResult<Option<Vec<u8>>> {
        // remove_if takes the shard write lock, so an expired record is
        // never handed out after the check
        let expired = self
            .records
            .remove_if(key, |_, (_, expires_at)| Instant::now() >= *expires_at)
            .is_some();
        if expired {
            return Ok(None);
        }
        Ok(self.records.get(key).map(|record| record.0.clone()))
    }

    async fn set_ex(&self, key: &str, value: Vec<u8>, ttl: Duration) -> RpcResult<()> {
        self.records
            .insert(key.to_string(), (value, Instant::now() + ttl));
        Ok(())
    }
}

/// Composite key identifying one logical write
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    /// Build a key from operation, actor and the operation's discriminant parts
    pub fn new(prefix: &str, operation: &str, actor: &str, parts: &[&str]) -> Self {
        let mut hasher = Sha256::new();
        for part in parts {
            hasher.update(part.as_bytes());
            // Separator keeps ["ab", "c"] and ["a", "bc"] apart
            hasher.update([0u8]);
        }
        let digest = hex::encode(hasher.finalize());

        Self(format!("{}{}:{}:{}", prefix, operation, actor, digest))
    }

    /// Key for `request`, using the listed `data` fields as discriminants.
    ///
    /// A missing field contributes `null`, so two requests differing only in
    /// whether a field is present get different keys.
    pub fn for_request(prefix: &str, request: &Envelope, fields: &[&str]) -> Self {
        let values: Vec<String> = fields
            .iter()
            .map(|field| {
                request
                    .data()
                    .get(*field)
                    .map_or_else(|| Value::Null.to_string(), Value::to_string)
            })
            .collect();
        let parts: Vec<&str> = values.iter().map(String::as_str).collect();

        Self::new(
            prefix,
            request.operation().unwrap_or_default(),
            request.actor().unwrap_or_default(),
            &parts,
        )
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Hash segment only; the full key embeds the actor id and stays out of logs
    fn digest(&self) -> &str {
        self.0.rsplit_once(':').map_or(self.0.as_str(), |(_, digest)| digest)
    }
}

impl std::fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone)]
pub struct IdempotencyStore {
    backend: Arc<dyn IdempotencyBackend>,
    key_prefix: String,
    ttl: Duration,
}

impl IdempotencyStore {
    pub fn new(config: &IdempotencyConfig, backend: Arc<dyn IdempotencyBackend>) -> Self {
        Self {
            backend,
            key_prefix: config.key_prefix.clone(),
            ttl: config.ttl(),
        }
    }

    pub fn key_for(&self, request: &Envelope, fields: &[&str]) -> IdempotencyKey {
        IdempotencyKey::for_request(&self.key_prefix, request, fields)
    }

    /// Previously stored reply for `key`; `None` on miss or storage error
    pub async fn fetch(&self, key: &IdempotencyKey) -> Option<Envelope> {
        let bytes = match self.backend.get(key.as_str()).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(e) => {
                warn!(key_digest = %key.digest(), error = %e, "Idempotency lookup failed, treating as miss");
                return None;
            }
        };
        match Envelope::parse(&bytes) {
            Ok(envelope) => {
                debug!(key_digest = %key.digest(), "Idempotency record found");
                Some(envelope)
            }
            Err(e) => {
                warn!(key_digest = %key.digest(), error = %e, "Stored idempotency record is unreadable, ignoring");
                None
            }
        }
    }

    /// Persist `reply` under `key` with the configured TTL (best-effort)
    pub async fn store(&self, key: &IdempotencyKey, reply: &Envelope) {
        self.store_with_ttl(key, reply, self.ttl).await
    }

    pub async fn store_with_ttl(&self, key: &IdempotencyKey, reply: &Envelope, ttl: Duration) {
        if let Err(e) = self
            .backend
            .set_ex(key.as_str(), reply.to_wire(), ttl)
            .await
        {
            warn!(key_digest = %key.digest(), error = %e, "Failed to store idempotency record");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use island_error::BusError;

    struct BrokenBackend;

    #[async_trait]
    impl IdempotencyBackend for BrokenBackend {
        async fn get(&self, _key: &str) -> RpcResult<Option<Vec<u8>>> {
            Err(BusError::Redis("connection refused".into()))
        }

        async fn set_ex(&self, _key: &str, _value: Vec<u8>, _ttl: Duration) -> RpcResult<()> {
            Err(BusError::Redis("connection refused".into()))
        }
    }

    fn store() -> IdempotencyStore {
        IdempotencyStore::new(
            &IdempotencyConfig::default(),
            Arc::new(MemoryIdempotencyBackend::new()),
        )
    }

    fn transfer_request(amount: i64) -> Envelope {
        let mut request = Envelope::new_request("bank.deposit");
        request.set_actor("U1");
        request.put("islandId", "ISL1");
        request.put("amount", amount);
        request.put("nonce", "n-1");
        request
    }

    #[test]
    fn test_key_format() {
        let key = IdempotencyKey::new("idem:", "bank.deposit", "U1", &["ISL1", "100"]);
        let (head, digest) = key.as_str().rsplit_once(':').unwrap();

        assert_eq!(head, "idem:bank.deposit:U1");
        assert_eq!(digest.len(), 64);
    }

    #[test]
    fn test_key_depends_on_selected_fields_only() {
        let fields = ["islandId", "amount"];
        let a = IdempotencyKey::for_request("idem:", &transfer_request(100), &fields);
        let b = IdempotencyKey::for_request("idem:", &transfer_request(100), &fields);
        let c = IdempotencyKey::for_request("idem:", &transfer_request(250), &fields);

        // Different request ids, same discriminants
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_key_parts_are_separated() {
        let a = IdempotencyKey::new("idem:", "op", "U1", &["ab", "c"]);
        let b = IdempotencyKey::new("idem:", "op", "U1", &["a", "bc"]);
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_store_then_fetch_returns_reply_unchanged() {
        let store = store();
        let request = transfer_request(100);
        let key = store.key_for(&request, &["islandId", "amount"]);

        let mut reply = Envelope::reply_to(&request);
        reply.put("balance", 1100);
        store.store(&key, &reply).await;

        assert_eq!(store.fetch(&key).await, Some(reply));
    }

    #[tokio::test]
    async fn test_unknown_key_is_none() {
        let store = store();
        let key = IdempotencyKey::new("idem:", "bank.deposit", "U1", &["nothing"]);
        assert_eq!(store.fetch(&key).await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_record_expires() {
        let store = store();
        let request = transfer_request(100);
        let key = store.key_for(&request, &["amount"]);
        store
            .store_with_ttl(&key, &Envelope::reply_to(&request), Duration::from_secs(1))
            .await;

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(store.fetch(&key).await, None);
    }

    #[tokio::test]
    async fn test_storage_errors_fail_open() {
        let store = IdempotencyStore::new(&IdempotencyConfig::default(), Arc::new(BrokenBackend));
        let request = transfer_request(100);
        let key = store.key_for(&request, &["amount"]);

        store.store(&key, &Envelope::reply_to(&request)).await;
        assert_eq!(store.fetch(&key).await, None);
    }

    #[tokio::test]
    #[ignore] // Requires Redis
    async fn test_redis_backend_round_trip() {
        let client = RedisClient::connect("redis://127.0.0.1:6379").await.unwrap();
        let store = IdempotencyStore::new(&IdempotencyConfig::default(), Arc::new(client));
        let request = transfer_request(100);
        let key = store.key_for(&request, &["islandId", "amount", "nonce"]);

        let reply = Envelope::reply_to(&request);
        store.store(&key, &reply).await;
        assert_eq!(store.fetch(&key).await, Some(reply));
    }
}
