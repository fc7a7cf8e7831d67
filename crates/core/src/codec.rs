//! JSON codec for stored records.
//!
//! Jobs and messages travel as self-describing JSON objects, so producers and
//! consumers on different versions interoperate as long as field names match.

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::CodecError;

/// Serialize a record to its stored byte form.
pub fn encode<T: Serialize + ?Sized>(record: &'static str, value: &T) -> Result<Vec<u8>, CodecError> {
    serde_json::to_vec(value).map_err(|e| CodecError::Encode {
        record,
        reason: e.to_string(),
    })
}

/// Deserialize a record from its stored byte form.
pub fn decode<T: DeserializeOwned>(record: &'static str, bytes: &[u8]) -> Result<T, CodecError> {
    serde_json::from_slice(bytes).map_err(|e| CodecError::Decode {
        record,
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_reports_the_record_name() {
        let err = decode::<serde_json::Value>("job", b"{not json").unwrap_err();
        match err {
            CodecError::Decode { record, .. } => assert_eq!(record, "job"),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
