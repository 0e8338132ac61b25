use base64::Engine;
use sha2::{Digest, Sha256};

/// Parse `body` as JSON and re-serialize with sorted keys (§4.1, GLOSSARY).
/// `serde_json::Value`'s default `Map` is a `BTreeMap`, so serialization is
/// already key-sorted; this function exists to name the operation and to be
/// the single place that would change if that stopped being true.
///
/// Returns `Err` if `body` is not valid JSON — callers store the raw body
/// with `record_type = non_json` in that case (§4.1, §4.3 step 5).
pub fn canonicalize(body: &str) -> Result<String, serde_json::Error> {
    let value: serde_json::Value = serde_json::from_str(body)?;
    serde_json::to_string(&value)
}

/// Canonicalization is idempotent (L3): canonicalizing an already-canonical
/// string reproduces it byte-for-byte.
pub fn is_canonical(body: &str) -> bool {
    canonicalize(body).map(|c| c == body).unwrap_or(false)
}

/// SHA-256 hex digest used as an acceleration hint for equality checks
/// (§4.3). Equality itself must never rely on the hash alone — only on a
/// full string comparison of canonicalized bodies.
pub fn content_hash(canonical_body: &str) -> String {
    let digest = Sha256::digest(canonical_body.as_bytes());
    hex::encode(digest)
}

/// At-rest encoding toggle (§6 `use_base64`, legacy compatibility).
/// Canonicalization always happens before encoding.
pub fn encode_for_storage(canonical_body: &str, use_base64: bool) -> String {
    if use_base64 {
        base64::engine::general_purpose::STANDARD.encode(canonical_body.as_bytes())
    } else {
        canonical_body.to_string()
    }
}

pub fn decode_from_storage(stored: &str, use_base64: bool) -> anyhow::Result<String> {
    if use_base64 {
        let bytes = base64::engine::general_purpose::STANDARD.decode(stored)?;
        Ok(String::from_utf8(bytes)?)
    } else {
        Ok(stored.to_string())
    }
}
