// ============================================================================
// Envelope - the only wire entity on the island bus
// ============================================================================
//
// Wire format (JSON object, field names fixed for interoperability):
//
//   { "ver": "1", "id": "<uuid>", "ts": <epoch-ms>,
//     "op": "<operation>", "actor": "<id>",
//     "data": { ... },
//     "ok": <bool>, "error": { "code", "message", "retryable" },
//     "sig": "<base64 HMAC-SHA256>" }
//
// Canonical form = every field except "sig", object keys sorted at every
// depth, compact separators, UTF-8. Absent optional fields are omitted (never
// written as null) so that two implementations agree on the signed bytes.
//
// A request and its response share the same `id`.
//
// ============================================================================

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use island_error::{BusError, RpcResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::io::{Read, Write};
use uuid::Uuid;

/// Protocol version stamped on every envelope this crate creates
pub const PROTOCOL_VERSION: u32 = 1;

/// Data key holding the base64 gzip of the original `data` object
pub const COMPRESSED_DATA_FIELD: &str = "_gz";

/// Structured failure carried by a response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
    #[serde(default)]
    pub retryable: bool,
}

impl ErrorInfo {
    pub fn new(code: impl Into<String>, message: impl Into<String>, retryable: bool) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            retryable,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "ver")]
    version: String,
    id: String,
    #[serde(rename = "ts")]
    timestamp: i64,
    #[serde(rename = "op", default, skip_serializing_if = "Option::is_none")]
    operation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    actor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ok: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<ErrorInfo>,
    #[serde(rename = "sig", default, skip_serializing_if = "Option::is_none")]
    signature: Option<String>,
}

impl Envelope {
    // ============================================================================
    // Construction
    // ============================================================================

    /// New request for `operation` with a fresh id, current timestamp and empty data
    pub fn new_request(operation: impl Into<String>) -> Self {
        Self {
            version: PROTOCOL_VERSION.to_string(),
            id: Uuid::new_v4().to_string(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            operation: Some(operation.into()),
            actor: None,
            data: Some(Map::new()),
            ok: None,
            error: None,
            signature: None,
        }
    }

    /// New event notification; the operation field carries the event type
    pub fn new_event(event_type: impl Into<String>, data: Map<String, Value>) -> Self {
        let mut envelope = Self::new_request(event_type);
        envelope.data = Some(data);
        envelope
    }

    /// Response correlated to `request`: same id, operation and actor echoed
    pub fn reply_to(request: &Envelope) -> Self {
        Self {
            version: PROTOCOL_VERSION.to_string(),
            id: request.id.clone(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            operation: request.operation.clone(),
            actor: request.actor.clone(),
            data: Some(Map::new()),
            ok: Some(true),
            error: None,
            signature: None,
        }
    }

    /// Decode wire bytes. Malformed input is a `Decode` error, never a panic.
    pub fn parse(bytes: &[u8]) -> RpcResult<Self> {
        let envelope: Envelope = serde_json::from_slice(bytes)
            .map_err(|e| BusError::decode(format!("invalid envelope JSON: {}", e)))?;

        if envelope.id.is_empty() {
            return Err(BusError::decode("envelope id is empty"));
        }
        if envelope.version.parse::<u32>().is_err() {
            return Err(BusError::decode(format!(
                "envelope version is not an integer: {:?}",
                envelope.version
            )));
        }

        Ok(envelope)
    }

    // ============================================================================
    // Accessors
    // ============================================================================

    pub fn version(&self) -> u32 {
        self.version.parse().unwrap_or(0)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Creation time in epoch milliseconds
    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn operation(&self) -> Option<&str> {
        self.operation.as_deref()
    }

    pub fn actor(&self) -> Option<&str> {
        self.actor.as_deref()
    }

    /// Payload map; an envelope without data reads as empty
    pub fn data(&self) -> &Map<String, Value> {
        static EMPTY: once_cell::sync::Lazy<Map<String, Value>> =
            once_cell::sync::Lazy::new(Map::new);
        self.data.as_ref().unwrap_or(&EMPTY)
    }

    /// String value of a data field, if present and a string
    pub fn data_str(&self, key: &str) -> Option<&str> {
        self.data().get(key).and_then(Value::as_str)
    }

    pub fn ok(&self) -> Option<bool> {
        self.ok
    }

    pub fn error(&self) -> Option<&ErrorInfo> {
        self.error.as_ref()
    }

    pub fn signature(&self) -> Option<&str> {
        self.signature.as_deref()
    }

    /// Business failure carried by a transported response, if any
    pub fn business_error(&self) -> Option<&ErrorInfo> {
        if self.ok == Some(false) {
            self.error.as_ref()
        } else {
            None
        }
    }

    /// Responses carry `ok`; requests and events never do
    pub fn is_response(&self) -> bool {
        self.ok.is_some()
    }

    // ============================================================================
    // Mutators
    // ============================================================================

    pub fn set_actor(&mut self, actor: impl Into<String>) {
        self.actor = Some(actor.into());
    }

    pub fn clear_actor(&mut self) {
        self.actor = None;
    }

    /// Insert one data field
    pub fn put(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.data_mut().insert(key.into(), value.into());
    }

    pub fn data_mut(&mut self) -> &mut Map<String, Value> {
        self.data.get_or_insert_with(Map::new)
    }

    pub fn set_data(&mut self, data: Map<String, Value>) {
        self.data = Some(data);
    }

    pub fn set_ok(&mut self, ok: bool) {
        self.ok = Some(ok);
        if ok {
            self.error = None;
        }
    }

    /// Mark as a business failure
    pub fn set_error(&mut self, error: ErrorInfo) {
        self.ok = Some(false);
        self.error = Some(error);
    }

    pub(crate) fn set_signature(&mut self, signature: String) {
        self.signature = Some(signature);
    }

    /// Re-address this envelope to another correlation id, dropping the stale signature
    pub(crate) fn readdress(&mut self, id: &str) {
        self.id = id.to_string();
        self.timestamp = chrono::Utc::now().timestamp_millis();
        self.signature = None;
    }

    // ============================================================================
    // Serialization
    // ============================================================================

    /// Deterministic bytes covered by the signature (everything but "sig")
    pub fn canonical_bytes(&self) -> Vec<u8> {
        self.to_json(false).to_string().into_bytes()
    }

    /// Canonical form plus signature
    pub fn to_wire(&self) -> Vec<u8> {
        self.to_json(true).to_string().into_bytes()
    }

    fn to_json(&self, with_signature: bool) -> Value {
        let mut map = Map::new();
        map.insert("ver".into(), Value::String(self.version.clone()));
        map.insert("id".into(), Value::String(self.id.clone()));
        map.insert("ts".into(), Value::from(self.timestamp));
        if let Some(op) = &self.operation {
            map.insert("op".into(), Value::String(op.clone()));
        }
        if let Some(actor) = &self.actor {
            map.insert("actor".into(), Value::String(actor.clone()));
        }
        if let Some(data) = &self.data {
            map.insert("data".into(), Value::Object(data.clone()));
        }
        if let Some(ok) = self.ok {
            map.insert("ok".into(), Value::Bool(ok));
        }
        if let Some(error) = &self.error {
            let mut err = Map::new();
            err.insert("code".into(), Value::String(error.code.clone()));
            err.insert("message".into(), Value::String(error.message.clone()));
            err.insert("retryable".into(), Value::Bool(error.retryable));
            map.insert("error".into(), Value::Object(err));
        }
        if with_signature {
            if let Some(sig) = &self.signature {
                map.insert("sig".into(), Value::String(sig.clone()));
            }
        }
        sorted(Value::Object(map))
    }

    // ============================================================================
    // Compression
    // ============================================================================

    pub fn is_compressed(&self) -> bool {
        matches!(
            self.data.as_ref(),
            Some(data) if data.len() == 1 && data.get(COMPRESSED_DATA_FIELD).is_some_and(Value::is_string)
        )
    }

    /// Gzip `data` when its serialized size exceeds `threshold` bytes.
    ///
    /// Must run before signing. Returns whether the payload was compressed.
    pub fn compress_data(&mut self, threshold: usize) -> RpcResult<bool> {
        let Some(data) = &self.data else {
            return Ok(false);
        };
        let raw = Value::Object(data.clone()).to_string();
        if raw.len() <= threshold {
            return Ok(false);
        }

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(raw.as_bytes())
            .map_err(|e| BusError::internal(format!("gzip failed: {}", e)))?;
        let compressed = encoder
            .finish()
            .map_err(|e| BusError::internal(format!("gzip failed: {}", e)))?;

        let mut packed = Map::new();
        packed.insert(
            COMPRESSED_DATA_FIELD.to_string(),
            Value::String(BASE64.encode(compressed)),
        );
        self.data = Some(packed);
        Ok(true)
    }

    /// Restore a compressed `data` object in place. Must run after verification.
    pub fn inflate(&mut self) -> RpcResult<()> {
        if !self.is_compressed() {
            return Ok(());
        }
        let encoded = self
            .data_str(COMPRESSED_DATA_FIELD)
            .ok_or_else(|| BusError::decode("compressed payload missing"))?;
        let compressed = BASE64
            .decode(encoded)
            .map_err(|e| BusError::decode(format!("compressed payload is not base64: {}", e)))?;

        let mut raw = Vec::new();
        GzDecoder::new(compressed.as_slice())
            .read_to_end(&mut raw)
            .map_err(|e| BusError::decode(format!("compressed payload is not gzip: {}", e)))?;

        match serde_json::from_slice::<Value>(&raw) {
            Ok(Value::Object(map)) => {
                self.data = Some(map);
                Ok(())
            }
            Ok(_) => Err(BusError::decode("compressed payload is not a JSON object")),
            Err(e) => Err(BusError::decode(format!(
                "compressed payload is not JSON: {}",
                e
            ))),
        }
    }
}

/// Rebuild objects with keys in ascending order at every depth
fn sorted(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Object(entries.into_iter().map(|(k, v)| (k, sorted(v))).collect())
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sorted).collect()),
        other => other,
    }
}
