//! API key generation and verification.
//!
//! Keys are 32 random bytes shown once as 64 hex characters. The hub
//! stores only a per-node random salt and `HMAC-SHA256(salt, key)`;
//! verification recomputes the MAC and compares in constant time.

use crate::error::{ServerError, ServerResult};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

const KEY_BYTES: usize = 32;
const SALT_BYTES: usize = 16;

/// A stored API key digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyDigest {
    /// Random per-key salt.
    pub salt: Vec<u8>,
    /// HMAC of the key under the salt.
    pub hash: Vec<u8>,
}

/// Issues and checks node API keys.
#[derive(Debug, Clone, Copy, Default)]
pub struct ApiKeyHasher;

impl ApiKeyHasher {
    /// Creates a hasher.
    pub fn new() -> Self {
        Self
    }

    /// Generates a fresh key and its digest.
    ///
    /// The plaintext is returned to the caller exactly once.
    pub fn issue(&self) -> ServerResult<(String, KeyDigest)> {
        let mut rng = rand::thread_rng();
        let mut key = [0u8; KEY_BYTES];
        rng.fill_bytes(&mut key);
        let mut salt = vec![0u8; SALT_BYTES];
        rng.fill_bytes(&mut salt);

        let plaintext = to_hex(&key);
        let hash = mac(&salt, &plaintext)?.finalize().into_bytes().to_vec();
        Ok((plaintext, KeyDigest { salt, hash }))
    }

    /// Returns true if `candidate` matches the digest.
    pub fn verify(&self, candidate: &str, digest: &KeyDigest) -> bool {
        match mac(&digest.salt, candidate) {
            Ok(mac) => mac.verify_slice(&digest.hash).is_ok(),
            Err(_) => false,
        }
    }
}

/// Compares a registration secret without leaking timing.
pub fn secret_matches(candidate: &str, expected: &str) -> bool {
    const DOMAIN: &[u8] = b"syncq-registration";
    let Ok(expected) = mac(DOMAIN, expected) else {
        return false;
    };
    let expected = expected.finalize().into_bytes();
    match mac(DOMAIN, candidate) {
        Ok(mac) => mac.verify_slice(&expected).is_ok(),
        Err(_) => false,
    }
}

fn mac(salt: &[u8], key: &str) -> ServerResult<HmacSha256> {
    let mut mac = HmacSha256::new_from_slice(salt)
        .map_err(|e| ServerError::Internal(format!("hmac key: {e}")))?;
    mac.update(key.as_bytes());
    Ok(mac)
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
