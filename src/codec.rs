//! Pluggable payload encoding
//!
//! The cache itself treats payloads as opaque bytes. Callers that want typed
//! payloads pick a [`Codec`]; [`JsonCodec`] is the stock implementation.

use serde::{Serialize, de::DeserializeOwned};

use crate::CacheError;

/// Encode/decode strategy for record payloads
pub trait Codec: Send + Sync + 'static {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, CacheError>;

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CacheError>;
}

/// serde_json based codec
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, CacheError> {
        Ok(serde_json::to_vec(value)?)
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CacheError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Creds {
        registration_id: u32,
        identity: String,
    }

    #[test]
    fn test_json_codec() {
        let creds = Creds {
            registration_id: 42,
            identity: "abc".to_owned(),
        };
        let bytes = JsonCodec.encode(&creds).unwrap();
        let decoded: Creds = JsonCodec.decode(&bytes).unwrap();
        assert_eq!(decoded, creds);
    }

    #[test]
    fn test_json_codec_rejects_garbage() {
        let result: Result<Creds, _> = JsonCodec.decode(b"not json");
        assert!(matches!(result, Err(CacheError::Serialization(_))));
    }
}
