use crate::protocol::error::{ProtocolError, ProtocolResult};
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Describes one file. Immutable once announced.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FileMetadata {
    pub name: String,
    pub size: u64,
    pub mime_type: String,
    /// Set by the sender when the byte exchange starts; absent in file lists.
    pub total_chunks: Option<u32>,
}

impl FileMetadata {
    pub fn new(name: impl Into<String>, size: u64, mime_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            size,
            mime_type: mime_type.into(),
            total_chunks: None,
        }
    }

    /// Copy with `total_chunks` filled in for the given chunk size.
    pub fn chunked(&self, chunk_size: usize) -> ProtocolResult<Self> {
        Ok(Self {
            total_chunks: Some(chunk_count(self.size, chunk_size)?),
            ..self.clone()
        })
    }
}

/// Number of chunks a file of `size` bytes splits into. Zero for empty files.
/// Fails when the count does not fit a chunk index.
pub fn chunk_count(size: u64, chunk_size: usize) -> ProtocolResult<u32> {
    let chunk_size = chunk_size.max(1) as u64;
    u32::try_from(size.div_ceil(chunk_size))
        .map_err(|_| ProtocolError::TooManyChunks { size, chunk_size })
}

/// Byte range `[start, end)` covered by chunk `index`.
pub fn chunk_range(index: u32, size: u64, chunk_size: usize) -> (u64, u64) {
    let start = index as u64 * chunk_size as u64;
    let end = (start + chunk_size as u64).min(size);
    (start, end)
}

/// Everything exchanged on a peer session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ChunkMessage {
    Metadata(FileMetadata),
    Chunk { index: u32, data: Bytes },
    Ack { index: u32 },
    Complete,
    FileList {
        entries: Vec<FileMetadata>,
        total_size: u64,
    },
    FileSelection { selected_indices: Vec<u32> },
    StartFile {
        file_index: u32,
        metadata: FileMetadata,
    },
    QueueComplete,
}

impl ChunkMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            ChunkMessage::Metadata(_) => "metadata",
            ChunkMessage::Chunk { .. } => "chunk",
            ChunkMessage::Ack { .. } => "ack",
            ChunkMessage::Complete => "complete",
            ChunkMessage::FileList { .. } => "file-list",
            ChunkMessage::FileSelection { .. } => "file-selection",
            ChunkMessage::StartFile { .. } => "start-file",
            ChunkMessage::QueueComplete => "queue-complete",
        }
    }
}
