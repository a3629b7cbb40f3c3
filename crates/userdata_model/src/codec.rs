//! CBOR encoding helpers.

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors raised while encoding or decoding CBOR.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Value could not be serialized.
    #[error("encode failed: {0}")]
    Encode(String),

    /// Bytes could not be deserialized into the requested type.
    #[error("decode failed: {0}")]
    Decode(String),

    /// Decoded value was structurally valid but violated a field rule.
    #[error("invalid {field}: {reason}")]
    InvalidField {
        /// Offending field.
        field: &'static str,
        /// Why it was rejected.
        reason: String,
    },
}

/// Encodes a value to CBOR bytes.
pub fn to_cbor<T: Serialize>(value: &T) -> CodecResult<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::ser::into_writer(value, &mut buf).map_err(|e| CodecError::Encode(e.to_string()))?;
    Ok(buf)
}

/// Decodes a value from CBOR bytes.
pub fn from_cbor<T: DeserializeOwned>(bytes: &[u8]) -> CodecResult<T> {
    ciborium::de::from_reader(bytes).map_err(|e| CodecError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        urn: String,
        position: u32,
    }

    #[test]
    fn garbage_is_a_decode_error() {
        let result: CodecResult<Sample> = from_cbor(&[0xFF, 0x00, 0x13]);
        assert!(matches!(result, Err(CodecError::Decode(_))));
    }

    #[test]
    fn struct_survives_encoding() {
        let sample = Sample {
            urn: "urn:rts:video:1".into(),
            position: 3,
        };
        let bytes = to_cbor(&sample).unwrap();
        assert_eq!(from_cbor::<Sample>(&bytes).unwrap(), sample);
    }
}
