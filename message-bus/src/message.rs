//! Message envelope for gossip broadcast

use crate::types::EventKind;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// Outbound message before it is enveloped
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Message kind
    #[serde(rename = "type")]
    pub kind: EventKind,

    /// Payload
    pub data: serde_json::Value,
}

impl Message {
    /// Create new message
    pub fn new(kind: EventKind, data: serde_json::Value) -> Self {
        Self { kind, data }
    }

    /// Create a message with a serializable payload
    pub fn with_payload<T: Serialize>(kind: EventKind, payload: &T) -> crate::Result<Self> {
        Ok(Self::new(kind, serde_json::to_value(payload)?))
    }
}

/// Wire envelope: `{ "type", "data", "id" }`
///
/// `id` depends only on `type` and `data`, so identical rebroadcasts from
/// different nodes collapse onto the same id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Message kind
    #[serde(rename = "type")]
    pub kind: EventKind,

    /// Payload
    pub data: serde_json::Value,

    /// BLAKE3 hex digest of the JSON encoding of `{type, data}`
    pub id: String,
}

impl Envelope {
    /// Wrap a message, deriving its id from content
    pub fn wrap(message: Message) -> crate::Result<Self> {
        let id = content_id(&message)?;
        Ok(Self {
            kind: message.kind,
            data: message.data,
            id,
        })
    }

    /// Decode the payload
    pub fn decode<T: DeserializeOwned>(&self) -> crate::Result<T> {
        Ok(T::deserialize(&self.data)?)
    }

    /// Serialize to bytes
    pub fn to_bytes(&self) -> crate::Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Deserialize from bytes
    pub fn from_bytes(bytes: &[u8]) -> crate::Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

fn content_id(message: &Message) -> crate::Result<String> {
    let mut hasher = blake3::Hasher::new();
    serde_json::to_writer(&mut hasher, message)?;
    Ok(hasher.finalize().to_hex().to_string())
}
