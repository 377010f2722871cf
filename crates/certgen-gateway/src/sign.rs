//! Request signing.
//!
//! The gateway authenticates requests with
//! `HMAC-SHA256(secret, "{METHOD}\n{PATH}\n{UNIX_TS}")` in hex, carried in
//! `X-Access-Key` / `X-Signature` / `X-Timestamp` headers. The signed path
//! never includes a `/public` prefix, even when the effective URL does.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Hex HMAC-SHA256 over the canonical string for `method`/`path` at
/// `timestamp` (unix seconds, as sent in `X-Timestamp`).
#[must_use]
pub fn sign(secret: &str, method: &str, path: &str, timestamp: &str) -> String {
    let string_to_sign = format!("{method}\n{path}\n{timestamp}");
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts any key length");
    mac.update(string_to_sign.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}
