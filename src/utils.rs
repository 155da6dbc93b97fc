use sha2::{Digest, Sha256};

/// Short salted fingerprint of an actor or island id.
///
/// Log lines carry this instead of the raw id, so records for one actor can
/// still be grouped without the id itself leaving the process. The salt comes
/// from `LoggingConfig`; changing it breaks correlation with older logs.
pub fn log_safe_id(id: &str, salt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(id.as_bytes());
    let hash = hasher.finalize();

    hex::encode(&hash[..4])
}
