//! JSON encoding of stored values

use crate::{SatogramError, SatogramResult};
use serde::{de::DeserializeOwned, Serialize};

/// Encode a value for storage
pub fn encode<T: Serialize>(value: &T) -> SatogramResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| SatogramError::Codec(e.to_string()))
}

/// Decode a stored value
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> SatogramResult<T> {
    serde_json::from_slice(bytes).map_err(|e| SatogramError::Codec(e.to_string()))
}
