//! Payload hashing for duplicate suppression.

use crate::error::CoreResult;
use sha2::{Digest, Sha256};
use syncq_sync_protocol::EventPayload;

/// Hex SHA-256 of arbitrary bytes.
pub fn content_hash(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut hex = String::with_capacity(64);
    for byte in digest {
        hex.push_str(&format!("{byte:02x}"));
    }
    hex
}

/// Hash identifying a payload's content, ignoring when it was captured.
pub fn payload_hash(payload: &EventPayload) -> CoreResult<String> {
    Ok(content_hash(&payload.digest_input()?))
}
