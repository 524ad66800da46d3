//! HMAC-SHA256 request signing
//!
//! Signatures are `base64(HMAC-SHA256(key, raw_body))` carried in the
//! `X-Signature` header, computed over the raw bytes (never re-serialized JSON).

use base64::{Engine as _, engine::general_purpose::STANDARD};
use hmac::{Hmac, KeyInit, Mac};
use sha2::Sha256;

use crate::{Error, Result};

/// Header carrying the body signature
pub const SIGNATURE_HEADER: &str = "X-Signature";

type HmacSha256 = Hmac<Sha256>;

fn mac(key: &str) -> Result<HmacSha256> {
    HmacSha256::new_from_slice(key.as_bytes())
        .map_err(|e| Error::Config(format!("Invalid signing key: {e}")))
}

/// Sign a raw body
pub fn sign(key: &str, body: &[u8]) -> Result<String> {
    let mut mac = mac(key)?;
    mac.update(body);
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

/// Verify a signature produced by [`sign`]
///
/// Comparison is constant-time. Any decoding failure is reported as
/// `SignatureInvalid`.
pub fn verify(key: &str, body: &[u8], signature: &str) -> Result<()> {
    let expected = STANDARD
        .decode(signature.trim())
        .map_err(|_| Error::SignatureInvalid)?;

    let mut mac = mac(key)?;
    mac.update(body);
    mac.verify_slice(&expected).map_err(|_| Error::SignatureInvalid)
}
