//! Delivery signing
//!
//! Each subscription carries a 32-byte secret, hex-encoded at generation.
//! The hex string itself keys the MAC on both sides: it is what the
//! receiver was handed at registration. Signatures are lowercase hex of
//! HMAC-SHA256 over the exact payload bytes that go on the wire.

use agentpay_types::{AgentPayError, Result};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Generate a fresh subscription secret: 32 random bytes, hex-encoded
pub fn generate_secret() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Compute the lowercase-hex HMAC-SHA256 signature of a payload
pub fn sign_payload(secret: &str, payload: &[u8]) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| AgentPayError::invalid_input("secret", "invalid HMAC key"))?;
    mac.update(payload);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Recompute the signature and compare in constant time
pub fn verify_signature(secret: &str, payload: &[u8], candidate: &str) -> Result<bool> {
    let expected = sign_payload(secret, payload)?;
    if expected.len() != candidate.len() {
        return Ok(false);
    }
    Ok(expected.as_bytes().ct_eq(candidate.as_bytes()).into())
}
