//! Deterministic request fingerprints.
//!
//! A fingerprint is the SHA-256 of the feature name, the user id and the
//! canonical JSON of the payload. Canonical JSON sorts object keys at every
//! depth and keeps array order, so two payloads that are equal as sets of
//! key/value pairs always hash the same.
//!
//! Callers strip volatile fields (timestamps, request ids) from the payload
//! before fingerprinting; otherwise every request is unique.

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::Result;

/// Fingerprint of `(feature, user_id, payload)` as lowercase hex.
///
/// Fields are length-prefixed so that `("ab", "c")` and `("a", "bc")` differ,
/// and an absent user is distinct from an empty user id.
pub fn fingerprint(feature: &str, user_id: Option<&str>, payload: &Value) -> String {
    let canonical = canonical_json(payload);

    let mut hasher = Sha256::new();
    update_field(&mut hasher, feature.as_bytes());
    match user_id {
        Some(user) => {
            hasher.update([1u8]);
            update_field(&mut hasher, user.as_bytes());
        }
        None => hasher.update([0u8]),
    }
    update_field(&mut hasher, canonical.as_bytes());
    hex::encode(hasher.finalize())
}

/// [`fingerprint`] for any serializable payload.
pub fn fingerprint_of<T: Serialize + ?Sized>(
    feature: &str,
    user_id: Option<&str>,
    payload: &T,
) -> Result<String> {
    let value = serde_json::to_value(payload)?;
    Ok(fingerprint(feature, user_id, &value))
}

/// Compact JSON with object keys sorted recursively.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key.as_str()], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

fn update_field(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}
