//! Value encoding for topics, messages, keys and values.
//!
//! Binary wire types use MessagePack with named struct fields, matching the
//! replication frames, so records stay readable after fields are reordered.
//! Text wire types use JSON. Equality of map values is defined on the encoded
//! bytes, not on `PartialEq`.

use crate::error::{EngineError, Result};
use crate::types::WireType;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Encode a value with the given wire type.
pub fn encode<T: Serialize + ?Sized>(wire: WireType, value: &T) -> Result<Vec<u8>> {
    if wire.is_binary() {
        Ok(rmp_serde::to_vec_named(value)?)
    } else {
        Ok(serde_json::to_vec(value)?)
    }
}

/// Decode a value written by [`encode`] with the same wire type.
pub fn decode<T: DeserializeOwned>(wire: WireType, bytes: &[u8]) -> Result<T> {
    if wire.is_binary() {
        Ok(rmp_serde::from_slice(bytes)?)
    } else {
        serde_json::from_slice(bytes).map_err(|e| EngineError::Deserialization(e.to_string()))
    }
}

/// Binary form used for map key routing and value comparison.
pub fn to_bytes<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    encode(WireType::Binary, value)
}

/// Byte-level equality of two values.
///
/// A value that fails to encode is never equal to anything.
pub fn bytes_equal<A: Serialize + ?Sized, B: Serialize + ?Sized>(a: &A, b: &B) -> bool {
    match (to_bytes(a), to_bytes(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}
