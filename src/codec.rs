//! Per-topic payload codecs

use crate::error::{EngineError, EngineResult};
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Turns envelope values into typed events and back
pub trait EventCodec<E>: Send + Sync + 'static {
    /// Parse a payload; failures are treated as poison messages
    fn decode(&self, payload: &[u8]) -> EngineResult<E>;

    /// Serialize an event for publishing
    fn encode(&self, event: &E) -> EngineResult<Bytes>;
}

/// JSON object payloads, the wire format shared by every service
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl<E> EventCodec<E> for JsonCodec
where
    E: Serialize + DeserializeOwned,
{
    fn decode(&self, payload: &[u8]) -> EngineResult<E> {
        serde_json::from_slice(payload).map_err(|e| EngineError::DecodeFailed(e.to_string()))
    }

    fn encode(&self, event: &E) -> EngineResult<Bytes> {
        serde_json::to_vec(event)
            .map(Bytes::from)
            .map_err(|e| EngineError::EncodeFailed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::PostCreated;
    use std::collections::HashMap;

    #[test]
    fn test_decode_malformed_payload() {
        let result: EngineResult<PostCreated> = JsonCodec.decode(b"{not json");
        assert!(matches!(result, Err(EngineError::DecodeFailed(_))));
    }

    #[test]
    fn test_decode_wrong_shape() {
        let result: EngineResult<PostCreated> = JsonCodec.decode(br#"{"id": 42}"#);
        assert!(matches!(result, Err(EngineError::DecodeFailed(_))));
    }

    #[test]
    fn test_encode_failure_is_reported() {
        // JSON object keys must be strings
        let mut map: HashMap<(u8, u8), u8> = HashMap::new();
        map.insert((1, 2), 3);

        let result = JsonCodec.encode(&map);
        assert!(matches!(result, Err(EngineError::EncodeFailed(_))));
    }

    #[test]
    fn test_each_decode_is_independent() {
        let payload = br#"{"id":"p1","author_id":"u1","content":"hi","created_at":"2024-01-01T00:00:00Z"}"#;
        let mut first: PostCreated = JsonCodec.decode(payload).unwrap();
        let second: PostCreated = JsonCodec.decode(payload).unwrap();

        first.content.push('!');
        assert_eq!(second.content, "hi");
    }
}
