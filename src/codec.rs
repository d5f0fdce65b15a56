//! Reversible obfuscation codec for persisted values
//!
//! Values are serialized to JSON, XORed byte-wise against a repeating
//! key, and base64-encoded. This is an obfuscation layer only, with no
//! cryptographic strength; it exists so the legacy on-disk scheme stays
//! readable. Decoding is total: any malformed input yields `None`, which
//! callers must treat as "no prior data", never as a hard failure.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Key used by the legacy persisted scheme
pub const DEFAULT_KEY: &str = "weather-chat-app";

/// Encode a serializable value into the obfuscated text form
///
/// Returns `None` if the value cannot be serialized to JSON.
///
/// # Examples
///
/// ```
/// use nimbus::codec;
///
/// let encoded = codec::encode(&"hello", codec::DEFAULT_KEY).unwrap();
/// let decoded: String = codec::decode(&encoded, codec::DEFAULT_KEY).unwrap();
/// assert_eq!(decoded, "hello");
/// ```
pub fn encode<T: Serialize>(value: &T, key: &str) -> Option<String> {
    let json = match serde_json::to_string(value) {
        Ok(json) => json,
        Err(e) => {
            tracing::warn!("failed to serialize value for encoding: {}", e);
            return None;
        }
    };
    Some(STANDARD.encode(xor_bytes(json.as_bytes(), key.as_bytes())))
}

/// Decode a value previously produced by [`encode`]
///
/// Any failure along the way (invalid base64, non-UTF8 plaintext after
/// the XOR, malformed JSON) returns `None` rather than an error.
pub fn decode<T: DeserializeOwned>(encoded: &str, key: &str) -> Option<T> {
    let raw = STANDARD.decode(encoded).ok()?;
    let plain = String::from_utf8(xor_bytes(&raw, key.as_bytes())).ok()?;
    serde_json::from_str(&plain).ok()
}

/// XOR `data` against the repeating `key`
///
/// An empty key leaves the data unchanged rather than dividing by zero.
fn xor_bytes(data: &[u8], key: &[u8]) -> Vec<u8> {
    if key.is_empty() {
        return data.to_vec();
    }
    data.iter()
        .enumerate()
        .map(|(i, byte)| byte ^ key[i % key.len()])
        .collect()
}
