//! Content-addressed hashing for render arguments and request identity.
//!
//! All hashes are computed over the canonical JSON form of a value. The
//! default `serde_json::Map` is ordered by key, so serializing a value
//! produces the same bytes regardless of the order its fields were built in.

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Prefix marking a fingerprint as assigned by this crawl, as opposed to a
/// key issued by the render service.
pub const LOCAL_FINGERPRINT_PREFIX: &str = "LOCAL+";

/// Compute the content hash of a JSON value.
pub fn json_hash(value: &Value) -> String {
    seeded_hash("", value)
}

/// Compute the content hash of a JSON value, seeded with an existing
/// identity string. Used to fold render options into a request fingerprint.
pub fn seeded_hash(seed: &str, value: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(seed.as_bytes());
    hasher.update(value.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

/// Fingerprint for a cacheable argument value.
pub fn local_fingerprint(value: &Value) -> String {
    format!("{}{}", LOCAL_FINGERPRINT_PREFIX, json_hash(value))
}
