//! Direct-channel payloads

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::ChatMessage;

/// Announces a file before its chunks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileStart {
    pub id: Uuid,
    pub name: String,
    pub size: u64,
    pub total_chunks: u32,
}

/// One chunk of a file. Bytes travel base64 encoded since the relay path
/// is text-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileChunk {
    pub id: Uuid,
    pub index: u32,
    pub bytes: String,
}

impl FileChunk {
    pub fn new(id: Uuid, index: u32, data: &[u8]) -> Self {
        Self {
            id,
            index,
            bytes: BASE64.encode(data),
        }
    }

    /// Decode the carried bytes
    pub fn decode_bytes(&self) -> Result<Vec<u8>> {
        BASE64.decode(&self.bytes).map_err(|e| {
            Error::MalformedPayload(format!("chunk {} of {}: {}", self.index, self.id, e))
        })
    }
}

/// Marks the end of a file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEnd {
    pub id: Uuid,
}

/// Payload written to a direct channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum DirectPayload {
    Message(ChatMessage),
    FileStart(FileStart),
    FileChunk(FileChunk),
    FileEnd(FileEnd),
}

impl DirectPayload {
    /// Every tag the router understands
    pub const TAGS: [&'static str; 4] = ["message", "file-start", "file-chunk", "file-end"];

    pub fn tag(&self) -> &'static str {
        match self {
            DirectPayload::Message(_) => "message",
            DirectPayload::FileStart(_) => "file-start",
            DirectPayload::FileChunk(_) => "file-chunk",
            DirectPayload::FileEnd(_) => "file-end",
        }
    }

    /// Serialize to the channel's text format
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse channel text.
    ///
    /// Unknown tags and missing fields both come back as
    /// [`Error::MalformedPayload`] so the caller can log and drop.
    pub fn decode(text: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(text)
            .map_err(|e| Error::MalformedPayload(format!("invalid JSON: {}", e)))?;

        let tag = value
            .get("type")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| Error::MalformedPayload("missing type tag".into()))?;

        if !Self::TAGS.contains(&tag) {
            return Err(Error::MalformedPayload(format!("unknown tag '{}'", tag)));
        }

        let tag = tag.to_string();
        serde_json::from_value(value)
            .map_err(|e| Error::MalformedPayload(format!("'{}' payload: {}", tag, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChatId;

    #[test]
    fn test_tags_on_the_wire() {
        let id = Uuid::new_v4();
        let payload = DirectPayload::FileStart(FileStart {
            id,
            name: "notes.txt".into(),
            size: 12,
            total_chunks: 1,
        });

        let json: serde_json::Value = serde_json::from_str(&payload.encode().unwrap()).unwrap();
        assert_eq!(json["type"], "file-start");
        assert_eq!(json["data"]["totalChunks"], 1);
        assert_eq!(payload.tag(), "file-start");
    }

    #[test]
    fn test_decode_message() {
        let msg = ChatMessage::new(ChatId::Peer(Uuid::new_v4()), Uuid::new_v4(), "hi".into());
        let text = DirectPayload::Message(msg.clone()).encode().unwrap();

        match DirectPayload::decode(&text).unwrap() {
            DirectPayload::Message(decoded) => assert_eq!(decoded, msg),
            other => panic!("Wrong payload: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_tag_is_malformed() {
        let err = DirectPayload::decode(r#"{"type":"typing","data":{}}"#).unwrap_err();
        assert!(matches!(err, Error::MalformedPayload(ref m) if m.contains("typing")));
    }

    #[test]
    fn test_missing_field_is_malformed() {
        let id = Uuid::new_v4();
        let text = format!(r#"{{"type":"file-chunk","data":{{"id":"{}","index":0}}}}"#, id);
        assert!(matches!(
            DirectPayload::decode(&text),
            Err(Error::MalformedPayload(_))
        ));
        assert!(DirectPayload::decode("not json").is_err());
        assert!(DirectPayload::decode(r#"{"data":{}}"#).is_err());
    }

    #[test]
    fn test_chunk_bytes_are_text_safe() {
        let data = [0u8, 255, 10, 13, 34];
        let chunk = FileChunk::new(Uuid::new_v4(), 0, &data);
        assert!(chunk.bytes.is_ascii());
        assert_eq!(chunk.decode_bytes().unwrap(), data);

        let bad = FileChunk {
            bytes: "***".into(),
            ..chunk
        };
        assert!(bad.decode_bytes().is_err());
    }
}
