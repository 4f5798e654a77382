//! Length-prefixed frame encoding/decoding
//!
//! Wire format: [4-byte big-endian length][JSON signal event]
//! Maximum frame size: 4MB, enough for one base64 file chunk

use peerlink_core::SignalEvent;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};

/// Maximum allowed frame size (4MB)
pub const MAX_FRAME_SIZE: u32 = 4 * 1024 * 1024;

fn closed_or_io(e: std::io::Error) -> Error {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        Error::ConnectionClosed
    } else {
        Error::Io(e)
    }
}

/// Read a length-prefixed frame from a stream
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<SignalEvent> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await.map_err(closed_or_io)?;

    let len = u32::from_be_bytes(len_buf);

    if len == 0 {
        return Err(Error::Protocol("Empty frame".into()));
    }
    if len > MAX_FRAME_SIZE {
        return Err(Error::Protocol(format!(
            "Frame too large: {} bytes (max {})",
            len, MAX_FRAME_SIZE
        )));
    }

    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload).await.map_err(closed_or_io)?;

    serde_json::from_slice(&payload).map_err(|e| Error::Malformed(e.to_string()))
}

/// Write a length-prefixed frame to a stream
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, event: &SignalEvent) -> Result<()> {
    let payload = serde_json::to_vec(event)
        .map_err(|e| Error::Protocol(format!("Serialization failed: {}", e)))?;

    let len = payload.len() as u32;
    if len > MAX_FRAME_SIZE {
        return Err(Error::Protocol(format!(
            "Event too large: {} bytes (max {})",
            len, MAX_FRAME_SIZE
        )));
    }

    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(&payload).await?;
    writer.flush().await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use peerlink_core::{DirectPayload, FileChunk, CHUNK_SIZE};
    use std::io::Cursor;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_frame_roundtrip() {
        let event = SignalEvent::UserJoined {
            user_id: Uuid::new_v4(),
        };

        let mut buf = Vec::new();
        write_frame(&mut buf, &event).await.unwrap();

        let mut cursor = Cursor::new(buf);
        let decoded = read_frame(&mut cursor).await.unwrap();

        assert_eq!(decoded, event);
    }

    #[tokio::test]
    async fn test_full_chunk_fits_in_frame() {
        let chunk = FileChunk::new(Uuid::new_v4(), 0, &vec![0xAB; CHUNK_SIZE]);
        let event = DirectPayload::FileChunk(chunk).into_relay(Uuid::new_v4());

        let mut buf = Vec::new();
        write_frame(&mut buf, &event).await.unwrap();
        assert!(buf.len() < MAX_FRAME_SIZE as usize);
    }

    #[tokio::test]
    async fn test_empty_frame_rejected() {
        let mut cursor = Cursor::new(vec![0, 0, 0, 0]);
        let result = read_frame(&mut cursor).await;
        assert!(matches!(result, Err(Error::Protocol(_))));
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let len = (MAX_FRAME_SIZE + 1).to_be_bytes();
        let mut cursor = Cursor::new(len.to_vec());
        let result = read_frame(&mut cursor).await;
        assert!(matches!(result, Err(Error::Protocol(_))));
    }

    #[tokio::test]
    async fn test_truncated_frame_is_closed() {
        let mut cursor = Cursor::new(vec![0, 0, 0, 10, b'{']);
        let result = read_frame(&mut cursor).await;
        assert!(matches!(result, Err(Error::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_unknown_event_keeps_stream_in_sync() {
        let payload = br#"{"event":"user:typing","payload":{}}"#;
        let mut buf = (payload.len() as u32).to_be_bytes().to_vec();
        buf.extend_from_slice(payload);

        let event = SignalEvent::UserJoined {
            user_id: Uuid::new_v4(),
        };
        write_frame(&mut buf, &event).await.unwrap();

        let mut cursor = Cursor::new(buf);
        let result = read_frame(&mut cursor).await;
        assert!(matches!(result, Err(Error::Malformed(_))));
        assert_eq!(read_frame(&mut cursor).await.unwrap(), event);
    }
}
