use crate::transport::TransportError;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Malformed message: {0}")]
    Malformed(String),

    #[error("Unexpected {message} message while {state}")]
    UnexpectedMessage { message: &'static str, state: String },

    #[error("Missing chunk {index} of {total} at finalize")]
    MissingChunk { index: u32, total: u32 },

    #[error("Chunk index {index} outside 0..{total}")]
    ChunkOutOfRange { index: u32, total: u32 },

    #[error("Metadata for {0} carries no chunk count")]
    MissingTotalChunks(String),

    #[error("File index {index} outside 0..{count}")]
    FileIndexOutOfRange { index: u32, count: usize },

    #[error("{size} bytes in {chunk_size}-byte chunks exceeds the chunk index range")]
    TooManyChunks { size: u64, chunk_size: u64 },
}

impl From<bincode::Error> for ProtocolError {
    fn from(err: bincode::Error) -> Self {
        ProtocolError::Malformed(err.to_string())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TimeoutError {
    #[error("No acknowledgment for chunk {index} from {peer} within {after:?}")]
    Ack {
        peer: String,
        index: u32,
        after: Duration,
    },

    #[error("Session to {peer} did not open within {after:?}")]
    ConnectionOpen { peer: String, after: Duration },

    #[error("Transfer inactive for {0:?}")]
    Inactivity(Duration),

    #[error("No file selection received within {0:?}")]
    Selection(Duration),
}

/// Failures surfaced by [`PeerChannel`](crate::protocol::PeerChannel) operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Timeout(#[from] TimeoutError),
}

pub type ProtocolResult<T> = Result<T, ProtocolError>;
pub type ChannelResult<T> = Result<T, ChannelError>;
