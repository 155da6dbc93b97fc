use crate::envelope::Envelope;
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use hmac::{Hmac, Mac};
use island_error::{BusError, RpcResult};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Computes the HMAC-SHA256 tag of canonical envelope bytes
///
/// # Arguments
/// * `secret` - Shared bus secret (should be at least 32 bytes)
/// * `canonical` - Output of [`Envelope::canonical_bytes`]
///
/// # Returns
/// Standard base64 of the 32-byte tag
pub fn sign(secret: &[u8], canonical: &[u8]) -> RpcResult<String> {
    let mut mac = HmacSha256::new_from_slice(secret)
        .map_err(|e| BusError::internal(format!("invalid HMAC key: {}", e)))?;
    mac.update(canonical);
    Ok(BASE64.encode(mac.finalize().into_bytes()))
}

/// Validates a base64 signature against canonical envelope bytes
///
/// # Security Note
/// The decoded tag is compared in constant time. A signature that is not
/// valid base64 or has the wrong length is simply a mismatch.
pub fn verify(secret: &[u8], canonical: &[u8], signature: &str) -> bool {
    let Ok(provided) = BASE64.decode(signature) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret) else {
        return false;
    };
    mac.update(canonical);
    let computed = mac.finalize().into_bytes();

    computed.as_slice().ct_eq(provided.as_slice()).into()
}

/// Signs and verifies envelopes with the process-wide bus secret
#[derive(Clone)]
pub struct MessageSigner {
    secret: Vec<u8>,
}

impl MessageSigner {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Stamp `envelope` with a signature over its current canonical form
    pub fn sign_envelope(&self, envelope: &mut Envelope) -> RpcResult<()> {
        let signature = sign(&self.secret, &envelope.canonical_bytes())?;
        envelope.set_signature(signature);
        Ok(())
    }

    /// `Auth` error when the signature is missing or does not match
    pub fn verify_envelope(&self, envelope: &Envelope) -> RpcResult<()> {
        let Some(signature) = envelope.signature() else {
            return Err(BusError::auth(format!(
                "envelope {} carries no signature",
                envelope.id()
            )));
        };
        if verify(&self.secret, &envelope.canonical_bytes(), signature) {
            Ok(())
        } else {
            Err(BusError::auth(format!(
                "signature mismatch for envelope {}",
                envelope.id()
            )))
        }
    }
}

impl std::fmt::Debug for MessageSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageSigner").finish_non_exhaustive()
    }
}
