//! Props payload codec.
//!
//! The backend stores props as MessagePack. The client decodes a payload
//! once into a structured value and hands it on without looking inside.

use serde::Serialize;
use serde_json::Value;

/// Decodes one MessagePack value from the start of `bytes`.
///
/// Anything after the first complete value (such as the store's reply
/// terminator) is ignored.
pub fn decode(bytes: &[u8]) -> Result<Value, rmp_serde::decode::Error> {
    let mut reader = bytes;
    rmp_serde::from_read(&mut reader)
}

/// Encodes a value the way the backend does, with maps keyed by name.
pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, rmp_serde::encode::Error> {
    rmp_serde::to_vec_named(value)
}
