//! Key-Authorization helper (spec §2, §4.2, §4.4, §4.3).
//!
//! Grounded on `AcmeClient::compute_key_authorization`/`jwk` in the teacher's
//! `acme/client.rs`: canonical JSON of the JWK fields, SHA-256'd, base64url
//! encoded with no padding.

use std::collections::BTreeMap;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use ring::digest::{Context, SHA256};

use crate::types::TOKEN_LEN_BYTES;

/// Generates a fresh challenge token: 32 random bytes, base64url, no padding.
///
/// Property 1: the result is always exactly 43 characters and round-trips.
#[must_use]
pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_LEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// An EC P-256 JWK, the only key type the teacher's ACME client generates
/// and the shape `jwk_thumbprint` expects.
#[derive(Debug, Clone)]
pub struct Jwk {
    pub kty: String,
    pub crv: String,
    pub x: String,
    pub y: String,
}

/// RFC 7638 JWK thumbprint: SHA-256 of the canonical (lexically sorted keys,
/// no whitespace) JSON member representation, base64url encoded.
#[must_use]
pub fn jwk_thumbprint(jwk: &Jwk) -> String {
    let mut map = BTreeMap::new();
    map.insert("crv", jwk.crv.as_str());
    map.insert("kty", jwk.kty.as_str());
    map.insert("x", jwk.x.as_str());
    map.insert("y", jwk.y.as_str());
    let canonical = serde_json::to_string(&map).expect("BTreeMap<&str, &str> always serializes");

    let mut ctx = Context::new(&SHA256);
    ctx.update(canonical.as_bytes());
    URL_SAFE_NO_PAD.encode(ctx.finish().as_ref())
}

/// Property 2: `expected_key_authorization = token "." base64url(SHA-256(jwk_thumbprint))`.
#[must_use]
pub fn key_authorization(token: &str, jwk: &Jwk) -> String {
    format!("{token}.{}", jwk_thumbprint(jwk))
}

/// SHA-256 of a key authorization string, used directly by DNS-01 and
/// TLS-ALPN-01 (spec §4.4, §4.3) — *not* base64url-encoded here, callers
/// decide their own wire encoding.
#[must_use]
pub fn key_authorization_digest(key_authorization: &str) -> [u8; 32] {
    let mut ctx = Context::new(&SHA256);
    ctx.update(key_authorization.as_bytes());
    let digest = ctx.finish();
    let mut out = [0u8; 32];
    out.copy_from_slice(digest.as_ref());
    out
}

/// Base64url(no padding) of [`key_authorization_digest`], the form DNS-01
/// publishes in its TXT record (spec §4.4).
#[must_use]
pub fn dns01_digest_b64(key_authorization: &str) -> String {
    URL_SAFE_NO_PAD.encode(key_authorization_digest(key_authorization))
}
