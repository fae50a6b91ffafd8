//! Binary framing for [`ChunkMessage`]: one bincode-encoded message per
//! transport message.

use crate::protocol::error::ProtocolResult;
use crate::protocol::message::ChunkMessage;
use bytes::Bytes;

pub fn encode(message: &ChunkMessage) -> ProtocolResult<Bytes> {
    Ok(Bytes::from(bincode::serialize(message)?))
}

pub fn decode(frame: &[u8]) -> ProtocolResult<ChunkMessage> {
    Ok(bincode::deserialize(frame)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::error::ProtocolError;
    use crate::protocol::message::FileMetadata;

    #[test]
    fn test_chunk_frame_carries_payload() {
        let msg = ChunkMessage::Chunk {
            index: 7,
            data: Bytes::from_static(b"payload"),
        };
        let frame = encode(&msg).unwrap();
        assert!(frame.len() > 7);
        assert_eq!(decode(&frame).unwrap(), msg);
    }

    #[test]
    fn test_start_file_keeps_metadata() {
        let msg = ChunkMessage::StartFile {
            file_index: 2,
            metadata: FileMetadata::new("photo.jpg", 12, "image/jpeg")
                .chunked(5)
                .unwrap(),
        };
        match decode(&encode(&msg).unwrap()).unwrap() {
            ChunkMessage::StartFile {
                file_index,
                metadata,
            } => {
                assert_eq!(file_index, 2);
                assert_eq!(metadata.total_chunks, Some(3));
            }
            other => panic!("Expected start-file, got {}", other.kind()),
        }
    }

    #[test]
    fn test_garbage_is_malformed() {
        let result = decode(&[0xff, 0xff, 0xff, 0xff, 0x01]);
        assert!(matches!(result, Err(ProtocolError::Malformed(_))));
    }
}
