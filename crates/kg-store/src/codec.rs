//! Row encoding for the RocksDB column families. Grounded on
//! `codegraph_graph::storage`'s `SerializableCodeNode`/`SerializableEdge`
//! bincode rows, adapted to bincode 2's `serde` compatibility module since
//! our domain types (`chrono::DateTime`, `uuid::Uuid`, `serde_json::Map`)
//! already derive `serde::Serialize`/`Deserialize` rather than
//! `bincode::Encode`/`Decode`.

use kg_core::error::CoreError;

pub fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>, CoreError> {
    bincode::serde::encode_to_vec(value, bincode::config::standard())
        .map_err(|e| CoreError::StorageUnavailableError(format!("row encode failed: {e}")))
}

pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T, CoreError> {
    bincode::serde::decode_from_slice(bytes, bincode::config::standard())
        .map(|(value, _)| value)
        .map_err(|e| CoreError::StorageUnavailableError(format!("row decode failed: {e}")))
}
